//! Local-simulation driver for the Byzantine-fault-tolerant synchronous
//! gradient aggregation protocol. The real network transport is out of
//! scope for the core (§1), so this binary only ever wires a coordinator
//! and its workers together over the in-process `ChannelTransport` — useful
//! for manual smoke-testing a configuration before it is run with a real
//! transport adapter.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bft_coordinator::CoordinatorNode;
use bft_core::config::{ErrMode, Flavour, RunConfig, TransportMode, UpdateMode};
use bft_core::engine::mock::{SeededGradientEngine, SequentialBatchProvider};
use bft_core::engine::{BatchProvider, GradientEngine};
use bft_core::model::{LayerSpec, ParameterVector};
use bft_core::transport::channel::{ChannelTransport, Hub};
use bft_worker::WorkerNode;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bft-agg")]
#[command(about = "Local simulation driver for Byzantine-fault-tolerant synchronous gradient aggregation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a local in-process simulation of one coordinator and W workers.
    Run(RunArgs),
    /// Validate a run configuration file without executing any steps.
    ValidateConfig {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print an example baseline run configuration (JSON) to stdout, a
    /// starting point for a replicated or cyclic configuration file.
    ExampleConfig {
        #[arg(long, default_value_t = 3)]
        workers: u32,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FlavourArg {
    Baseline,
    Replicated,
    Cyclic,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum UpdateModeArg {
    Mean,
    GeometricMedian,
    MajorityVote,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ErrModeArg {
    RevGrad,
    Constant,
    Random,
    CyclicCorrupt,
}

impl From<UpdateModeArg> for UpdateMode {
    fn from(value: UpdateModeArg) -> Self {
        match value {
            UpdateModeArg::Mean => UpdateMode::Mean,
            UpdateModeArg::GeometricMedian => UpdateMode::GeometricMedian,
            UpdateModeArg::MajorityVote => UpdateMode::MajorityVote,
        }
    }
}

impl From<ErrModeArg> for ErrMode {
    fn from(value: ErrModeArg) -> Self {
        match value {
            ErrModeArg::RevGrad => ErrMode::RevGrad,
            ErrModeArg::Constant => ErrMode::Constant,
            ErrModeArg::Random => ErrMode::Random,
            ErrModeArg::CyclicCorrupt => ErrMode::CyclicCorrupt,
        }
    }
}

#[derive(Parser)]
struct RunArgs {
    /// Load a full run configuration from a JSON file. Required for the
    /// replicated and cyclic flavours — their group/matrix parameters
    /// aren't practical to express as flags. When present, this overrides
    /// every flag below except --layers/--layer-size/--batch-size.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = FlavourArg::Baseline)]
    flavour: FlavourArg,
    #[arg(long, value_enum, default_value_t = UpdateModeArg::Mean)]
    update_mode: UpdateModeArg,

    #[arg(long, env = "BFT_WORKERS", default_value_t = 3)]
    workers: u32,
    #[arg(long, default_value_t = 1)]
    layers: usize,
    #[arg(long, default_value_t = 4)]
    layer_size: usize,
    #[arg(long, default_value_t = 4)]
    batch_size: usize,

    #[arg(long, env = "BFT_LEARNING_RATE", default_value_t = 0.1)]
    learning_rate: f64,
    #[arg(long, default_value_t = 0.0)]
    momentum: f64,
    #[arg(long, env = "BFT_MAX_STEPS", default_value_t = 5)]
    max_steps: u64,
    #[arg(long, default_value_t = 0)]
    eval_freq: u64,
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Worker rank in the adversarial simulation set; may be repeated.
    #[arg(long)]
    fault: Vec<u32>,
    #[arg(long, value_enum, default_value_t = ErrModeArg::RevGrad)]
    err_mode: ErrModeArg,
    #[arg(long, default_value_t = false)]
    compress_grad: bool,
    #[arg(long, default_value = "/tmp/bft-agg/")]
    train_dir: String,
}

fn build_config(args: &RunArgs) -> Result<RunConfig> {
    if let Some(path) = &args.config {
        return load_config(path);
    }

    let flavour = match args.flavour {
        FlavourArg::Baseline => Flavour::Baseline {
            update_mode: args.update_mode.into(),
        },
        FlavourArg::Replicated | FlavourArg::Cyclic => {
            bail!("--flavour replicated/cyclic requires --config <path.json>: their group/matrix parameters cannot be expressed as flags")
        }
    };

    Ok(RunConfig {
        num_workers: args.workers,
        fault_set: args.fault.clone(),
        flavour,
        transport_mode: TransportMode::Broadcast,
        compress_grad: args.compress_grad,
        learning_rate: args.learning_rate,
        momentum: args.momentum,
        max_steps: args.max_steps,
        eval_freq: args.eval_freq,
        timeout_threshold_ms: args.timeout_ms,
        checkpoint_step: 0,
        err_mode: args.err_mode.into(),
        train_dir: args.train_dir.clone(),
    })
}

fn load_config(path: &PathBuf) -> Result<RunConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: RunConfig = serde_json::from_str(&text).with_context(|| format!("parsing {} as a RunConfig", path.display()))?;
    Ok(config)
}

fn example_config(workers: u32) -> RunConfig {
    RunConfig {
        num_workers: workers,
        fault_set: vec![],
        flavour: Flavour::Baseline {
            update_mode: UpdateMode::Mean,
        },
        transport_mode: TransportMode::Broadcast,
        compress_grad: false,
        learning_rate: 0.1,
        momentum: 0.9,
        max_steps: 100,
        eval_freq: 10,
        timeout_threshold_ms: 5000,
        checkpoint_step: 0,
        err_mode: ErrMode::RevGrad,
        train_dir: "/tmp/bft-agg/".into(),
    }
}

async fn simulate(config: RunConfig, num_layers: usize, layer_size: usize, batch_size: usize) -> Result<()> {
    config.validate().context("invalid run configuration")?;

    let specs: Vec<LayerSpec> = (0..num_layers)
        .map(|i| LayerSpec::trainable(format!("layer{i}"), vec![layer_size]))
        .collect();
    let params = ParameterVector::new(specs);

    let mut ranks = vec![0u32];
    ranks.extend(1..=config.num_workers);
    let hub = Hub::new(ranks);

    let coordinator_transport = Arc::new(ChannelTransport::new(hub.clone(), 0));
    let mut coordinator = CoordinatorNode::new(coordinator_transport, config.clone(), params.clone())?;

    let mut worker_tasks = Vec::new();
    for rank in 1..=config.num_workers {
        let transport = Arc::new(ChannelTransport::new(hub.clone(), rank));
        let engine: Arc<dyn GradientEngine> = Arc::new(SeededGradientEngine::new(rank as f64));
        let provider: Arc<dyn BatchProvider> = Arc::new(SequentialBatchProvider);
        let mut worker = WorkerNode::new(transport, rank, config.clone(), params.clone(), provider, engine, batch_size)?;
        worker_tasks.push(tokio::spawn(async move { worker.run().await }));
    }

    let final_step = coordinator.run(config.max_steps).await?;
    tracing::info!(final_step, "simulation complete");
    for (layer, spec) in coordinator.params().specs().iter().enumerate() {
        if spec.trainable {
            tracing::info!(layer = spec.name.as_str(), value = ?coordinator.params().value(layer).data, "final parameter");
        }
    }

    for task in worker_tasks {
        task.abort();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => {
            let config = build_config(&args)?;
            simulate(config, args.layers, args.layer_size, args.batch_size).await?;
        }
        Commands::ValidateConfig { config } => {
            let config = load_config(&config)?;
            config.validate()?;
            println!("configuration is valid");
        }
        Commands::ExampleConfig { workers } => {
            println!("{}", serde_json::to_string_pretty(&example_config(workers))?);
        }
    }

    Ok(())
}
