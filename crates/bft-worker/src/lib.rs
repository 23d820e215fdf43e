//! Worker step loop (§4.2): observe step, fetch parameters, compute
//! (possibly coded) gradients, optionally corrupt them for adversarial
//! simulation, and transmit in reverse layer order. The three flavours
//! share this skeleton and differ only in how `GradientStrategy::compute`
//! derives its batch(es) and combines the resulting gradients (§9's
//! "protocol skeleton parameterised by batch provider / gradient
//! transformer").

use std::sync::Arc;

use bft_core::codec::{Codec, IdentityCodec, Int8Codec};
use bft_core::config::{ErrMode, Flavour, RunConfig, TransportMode};
use bft_core::engine::{BatchProvider, GradientEngine};
use bft_core::error::{Error, Result};
use bft_core::model::ParameterVector;
use bft_core::protocol::{grad_tag, param_tag, STEP_TAG};
use bft_core::state::WorkerState;
use bft_core::tensor::{ComplexTensor, Tensor};
use bft_core::transport::Transport;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A single outgoing-gradient corruption applied in place. Only called for
/// workers in the configured adversarial simulation set `F` — a test
/// affordance, never exercised in an honest deployment.
fn corrupt(tensor: &mut Tensor, mode: ErrMode, rng: &mut StdRng) {
    const CONSTANT_VALUE: f64 = 1000.0;
    const RANDOM_STD: f64 = 5.0;
    const CYCLIC_SCALE: f64 = 10.0;

    match mode {
        ErrMode::RevGrad => tensor.scale(-1.0),
        ErrMode::Constant => {
            for v in tensor.data.iter_mut() {
                *v = CONSTANT_VALUE;
            }
        }
        ErrMode::Random => {
            for v in tensor.data.iter_mut() {
                *v += gaussian(rng, 0.0, RANDOM_STD);
            }
        }
        ErrMode::CyclicCorrupt => {
            // The worker only ever holds its own row of `W_enc`, not the
            // full matrix, so it cannot compute the code's actual null
            // space here; approximate "maximise decoding difficulty" with
            // a large sign-flipped perturbation instead.
            tensor.scale(-CYCLIC_SCALE);
        }
    }
}

/// Box-Muller transform; this workspace's pinned `rand` version ships no
/// bundled normal distribution, so this is a small self-contained helper
/// rather than pulling in `rand_distr` for one call site.
fn gaussian(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std * z0
}

/// Flavour-specific batch derivation and gradient combination (§4.2). Each
/// call produces one gradient tensor per trainable layer, in ascending
/// layer-index order, for the given step.
trait GradientStrategy: Send + Sync {
    fn compute(&mut self, step: u64, params: &ParameterVector) -> Result<Vec<Tensor>>;
}

/// Baseline: one distinct batch per step, taken from the local shard by
/// advancing a cursor.
struct BaselineStrategy {
    batch_provider: Arc<dyn BatchProvider>,
    gradient_engine: Arc<dyn GradientEngine>,
    batch_size: usize,
    cursor: usize,
}

impl GradientStrategy for BaselineStrategy {
    fn compute(&mut self, _step: u64, params: &ParameterVector) -> Result<Vec<Tensor>> {
        let batch = self.batch_provider.fetch(self.cursor, self.batch_size);
        self.cursor += self.batch_size;
        self.gradient_engine.compute(params, &batch)
    }
}

/// Replicated: every worker in a group seeds its batch iterator with
/// `group_seed + epoch` (wrapping addition — `original_source`'s "⊕" turned
/// out to be a plain sum, not XOR, see DESIGN.md), so all replicas in a
/// group compute on the identical batch.
struct ReplicatedStrategy {
    batch_provider: Arc<dyn BatchProvider>,
    gradient_engine: Arc<dyn GradientEngine>,
    batch_size: usize,
    group_seed: u64,
}

impl GradientStrategy for ReplicatedStrategy {
    fn compute(&mut self, step: u64, params: &ParameterVector) -> Result<Vec<Tensor>> {
        let seed = self.group_seed.wrapping_add(step);
        let offset = (seed as usize).wrapping_mul(self.batch_size);
        let batch = self.batch_provider.fetch(offset, self.batch_size);
        self.gradient_engine.compute(params, &batch)
    }
}

/// Cyclic: computes a gradient for each sub-batch this worker's `W_mask`
/// row selects, then transmits `sum_k W_enc[rank, k] * g_k` — the honest
/// half of the linear code the coordinator decodes in
/// `bft_core::aggregate::cyclic`.
struct CyclicStrategy {
    batch_provider: Arc<dyn BatchProvider>,
    gradient_engine: Arc<dyn GradientEngine>,
    batch_size: usize,
    /// This worker's row of `W_enc`, length `num_batches`.
    row: Vec<(f64, f64)>,
    /// Indices of the `hat_s` sub-batches this worker computes on.
    support: Vec<usize>,
    num_batches: usize,
}

impl GradientStrategy for CyclicStrategy {
    fn compute(&mut self, step: u64, params: &ParameterVector) -> Result<Vec<Tensor>> {
        let window_start = step.saturating_sub(1) as usize * self.num_batches * self.batch_size;

        let mut combined: Vec<ComplexTensor> = params
            .trainable_layers()
            .map(|l| ComplexTensor::zeros(&params.spec(l).shape))
            .collect();

        for &k in &self.support {
            let offset = window_start + k * self.batch_size;
            let batch = self.batch_provider.fetch(offset, self.batch_size);
            let gradients = self.gradient_engine.compute(params, &batch)?;
            let coeff = self.row[k];
            for (acc, g) in combined.iter_mut().zip(gradients.iter()) {
                acc.add_scaled(coeff, g);
            }
        }

        Ok(combined.into_iter().map(|c| c.into_real_lossy()).collect())
    }
}

fn build_strategy(
    config: &RunConfig,
    rank: u32,
    batch_provider: Arc<dyn BatchProvider>,
    gradient_engine: Arc<dyn GradientEngine>,
    batch_size: usize,
) -> Result<Box<dyn GradientStrategy>> {
    match &config.flavour {
        Flavour::Baseline { .. } => Ok(Box::new(BaselineStrategy {
            batch_provider,
            gradient_engine,
            batch_size,
            cursor: 0,
        })),
        Flavour::Replicated { groups, group_seeds } => {
            let idx = groups
                .iter()
                .position(|group| group.contains(&rank))
                .ok_or_else(|| Error::BadConfig(format!("rank {rank} is not a member of any replicated group")))?;
            Ok(Box::new(ReplicatedStrategy {
                batch_provider,
                gradient_engine,
                batch_size,
                group_seed: group_seeds[idx],
            }))
        }
        Flavour::Cyclic { w_enc, w_mask, .. } => {
            let row = w_enc.rows[(rank - 1) as usize].clone();
            let support = w_mask.support(rank);
            let num_batches = w_enc.num_batches();
            Ok(Box::new(CyclicStrategy {
                batch_provider,
                gradient_engine,
                batch_size,
                row,
                support,
                num_batches,
            }))
        }
    }
}

/// One worker rank's step loop state.
pub struct WorkerNode<T: Transport> {
    transport: Arc<T>,
    rank: u32,
    config: RunConfig,
    params: ParameterVector,
    grad_codec: Box<dyn Codec>,
    strategy: Box<dyn GradientStrategy>,
    current_step: u64,
    state: WorkerState,
    rng: StdRng,
}

impl<T: Transport> WorkerNode<T> {
    /// Builds a worker from a validated `config`, `rank` in `1..=W`, and an
    /// initial (zeroed) local copy of the parameter vector matching the
    /// coordinator's layer specs. `batch_size` is the per-sub-batch size
    /// used by every flavour's batch derivation.
    pub fn new(
        transport: Arc<T>,
        rank: u32,
        config: RunConfig,
        params: ParameterVector,
        batch_provider: Arc<dyn BatchProvider>,
        gradient_engine: Arc<dyn GradientEngine>,
        batch_size: usize,
    ) -> Result<Self> {
        config.validate()?;
        if rank == 0 || rank > config.num_workers {
            return Err(Error::BadConfig(format!(
                "rank {rank} out of range for {} workers",
                config.num_workers
            )));
        }

        let grad_codec: Box<dyn Codec> = if config.compress_grad {
            Box::new(Int8Codec)
        } else {
            Box::new(IdentityCodec)
        };
        let strategy = build_strategy(&config, rank, batch_provider, gradient_engine, batch_size)?;
        let rng = StdRng::seed_from_u64(0x5eed_0000 ^ rank as u64);

        Ok(Self {
            transport,
            rank,
            config,
            params,
            grad_codec,
            strategy,
            current_step: 0,
            state: WorkerState::AwaitStep,
            rng,
        })
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    /// Runs until the coordinator stops broadcasting steps. The only
    /// transport error treated as graceful EOF is a failure to observe the
    /// next step; any error in the middle of a step (fetching parameters,
    /// sending a gradient) propagates as `TransportFailure`.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.state = WorkerState::AwaitStep;
            let step = match self.observe_step().await {
                Some(t) => t,
                None => {
                    self.state = WorkerState::Terminal;
                    return Ok(());
                }
            };

            if step == self.current_step {
                // The previous step's reply has not yet been consumed by
                // the coordinator, or this is a duplicate delivery.
                continue;
            }
            self.current_step = step;
            tracing::debug!(rank = self.rank, step, "observed step");

            self.state = WorkerState::FetchParams;
            self.fetch_params().await?;

            self.state = WorkerState::Compute;
            let mut gradients = self.strategy.compute(self.current_step, &self.params)?;
            if self.config.fault_set.contains(&self.rank) {
                tracing::warn!(rank = self.rank, step, "applying adversarial corruption");
                for tensor in gradients.iter_mut() {
                    corrupt(tensor, self.config.err_mode, &mut self.rng);
                }
            }

            self.state = WorkerState::Send;
            self.send_gradients(gradients).await?;
        }
    }

    async fn observe_step(&self) -> Option<u64> {
        let handle = self.transport.recv(0, STEP_TAG).await.ok()?;
        let bytes = self.transport.wait(handle).await.ok()?;
        if bytes.len() != 8 {
            return None;
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&bytes);
        Some(i64::from_ne_bytes(arr) as u64)
    }

    /// Receives `L` tensors in layer order (all layers, trainable and
    /// frozen — matching the coordinator's parameter broadcast) and
    /// installs them into the local parameter copy.
    async fn fetch_params(&mut self) -> Result<()> {
        for layer in self.params.all_layers() {
            let shape = self.params.spec(layer).shape.clone();
            let bytes = match self.config.transport_mode {
                TransportMode::Broadcast => {
                    let handle = self.transport.broadcast(0, param_tag(layer), Vec::new()).await?;
                    self.transport.wait(handle).await?
                }
                TransportMode::PointToPoint => {
                    let handle = self.transport.recv(0, param_tag(layer)).await?;
                    self.transport.wait(handle).await?
                }
            };
            let tensor = IdentityCodec.decode(&bytes, &shape)?;
            self.params.set_value(layer, tensor);
        }
        Ok(())
    }

    /// Transmits gradients in reverse layer order (last layer first),
    /// matching back-propagation's natural production order. Each send is
    /// posted and awaited before the next is posted — bounded in-flight of
    /// one, per §4.2.
    async fn send_gradients(&mut self, gradients: Vec<Tensor>) -> Result<()> {
        let trainable: Vec<usize> = self.params.trainable_layers().collect();
        debug_assert_eq!(trainable.len(), gradients.len());

        for (&layer, gradient) in trainable.iter().zip(gradients.iter()).rev() {
            let bytes = self.grad_codec.encode(gradient);
            let handle = self.transport.send(0, grad_tag(layer), bytes).await?;
            self.transport.wait(handle).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bft_core::codec::IdentityCodec as Codec_;
    use bft_core::config::{EncodingMatrix, MaskMatrix, UpdateMode};
    use bft_core::engine::mock::{FixedGradientEngine, SequentialBatchProvider};
    use bft_core::model::LayerSpec;
    use bft_core::transport::channel::{ChannelTransport, Hub};

    fn baseline_config() -> RunConfig {
        RunConfig {
            num_workers: 1,
            fault_set: vec![],
            flavour: Flavour::Baseline {
                update_mode: UpdateMode::Mean,
            },
            transport_mode: TransportMode::Broadcast,
            compress_grad: false,
            learning_rate: 1.0,
            momentum: 0.0,
            max_steps: 1,
            eval_freq: 0,
            timeout_threshold_ms: 2000,
            checkpoint_step: 0,
            err_mode: ErrMode::RevGrad,
            train_dir: "/tmp/unused/".into(),
        }
    }

    /// A fake coordinator: broadcasts step 1, broadcasts a parameter, then
    /// receives the worker's gradient for layer 0 and returns the decoded
    /// tensor for assertion.
    async fn fake_coordinator(transport: Arc<ChannelTransport>) -> Tensor {
        let handle = transport
            .broadcast(0, STEP_TAG, 1i64.to_ne_bytes().to_vec())
            .await
            .unwrap();
        transport.wait(handle).await.unwrap();

        let param_bytes = Codec_.encode(&Tensor::from_vec(&[2], vec![10.0, 10.0]));
        let handle = transport.broadcast(0, param_tag(0), param_bytes).await.unwrap();
        transport.wait(handle).await.unwrap();

        let handle = transport.recv(1, grad_tag(0)).await.unwrap();
        let bytes = transport.wait(handle).await.unwrap();
        Codec_.decode(&bytes, &[2]).unwrap()
    }

    #[tokio::test]
    async fn baseline_worker_sends_fixed_gradient_for_observed_step() {
        let hub = Hub::new(vec![0, 1]);
        let coordinator_transport = Arc::new(ChannelTransport::new(hub.clone(), 0));
        let worker_transport = Arc::new(ChannelTransport::new(hub, 1));

        let gradients = vec![Tensor::from_vec(&[2], vec![1.0, 0.5])];
        let engine: Arc<dyn GradientEngine> = Arc::new(FixedGradientEngine::new(gradients.clone()));
        let provider: Arc<dyn BatchProvider> = Arc::new(SequentialBatchProvider);

        let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![2])]);
        let mut worker = WorkerNode::new(
            worker_transport,
            1,
            baseline_config(),
            params,
            provider,
            engine,
            4,
        )
        .unwrap();

        let coordinator_task = tokio::spawn(fake_coordinator(coordinator_transport));

        tokio::select! {
            result = worker.run() => { result.unwrap(); }
            received = coordinator_task => {
                let received = received.unwrap();
                assert_eq!(received.data, gradients[0].data);
            }
        }
    }

    #[tokio::test]
    async fn adversarial_worker_negates_gradient_under_rev_grad() {
        let hub = Hub::new(vec![0, 1]);
        let coordinator_transport = Arc::new(ChannelTransport::new(hub.clone(), 0));
        let worker_transport = Arc::new(ChannelTransport::new(hub, 1));

        let gradients = vec![Tensor::from_vec(&[2], vec![1.0, -2.0])];
        let engine: Arc<dyn GradientEngine> = Arc::new(FixedGradientEngine::new(gradients));
        let provider: Arc<dyn BatchProvider> = Arc::new(SequentialBatchProvider);

        let mut config = baseline_config();
        config.fault_set = vec![1];
        config.err_mode = ErrMode::RevGrad;

        let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![2])]);
        let mut worker = WorkerNode::new(worker_transport, 1, config, params, provider, engine, 4).unwrap();

        let coordinator_task = tokio::spawn(fake_coordinator(coordinator_transport));
        tokio::select! {
            result = worker.run() => { result.unwrap(); }
            received = coordinator_task => {
                let received = received.unwrap();
                assert_eq!(received.data, vec![-1.0, 2.0]);
            }
        }
    }

    #[test]
    fn cyclic_strategy_combines_selected_sub_batches() {
        let w_enc = EncodingMatrix {
            rows: vec![vec![(1.0, 0.0), (0.0, 0.0), (0.0, 0.0)]],
        };
        let w_mask = MaskMatrix {
            rows: vec![vec![true, false, false]],
        };
        let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![1])]);

        let engine: Arc<dyn GradientEngine> =
            Arc::new(FixedGradientEngine::new(vec![Tensor::from_vec(&[1], vec![3.0])]));
        let provider: Arc<dyn BatchProvider> = Arc::new(SequentialBatchProvider);

        let mut strategy = CyclicStrategy {
            batch_provider: provider,
            gradient_engine: engine,
            batch_size: 2,
            row: w_enc.rows[0].clone(),
            support: w_mask.support(1),
            num_batches: w_enc.num_batches(),
        };

        let out = strategy.compute(1, &params).unwrap();
        assert_eq!(out[0].data, vec![3.0]);
    }

    #[test]
    fn replicated_strategy_is_deterministic_given_same_seed_and_step() {
        let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![1])]);
        let engine: Arc<dyn GradientEngine> = Arc::new(bft_core::engine::mock::SeededGradientEngine::new(1.0));
        let provider: Arc<dyn BatchProvider> = Arc::new(SequentialBatchProvider);

        let mut a = ReplicatedStrategy {
            batch_provider: provider.clone(),
            gradient_engine: engine.clone(),
            batch_size: 4,
            group_seed: 7,
        };
        let mut b = ReplicatedStrategy {
            batch_provider: provider,
            gradient_engine: engine,
            batch_size: 4,
            group_seed: 7,
        };

        assert_eq!(a.compute(3, &params).unwrap(), b.compute(3, &params).unwrap());
    }
}
