//! Coordinator step loop (§4.1): step broadcast, parameter broadcast,
//! gradient collection, reduce, apply, optional checkpoint, reset. The
//! coordinator is the sole owner of the step counter, the gradient
//! accumulator, and the parameter vector — nothing here is shared across
//! ranks except through the transport.

use std::sync::Arc;
use std::time::Duration;

use bft_core::accumulator::GradientAccumulator;
use bft_core::aggregate::cyclic::CyclicDecodeAggregator;
use bft_core::aggregate::geomedian::GeoMedianAggregator;
use bft_core::aggregate::majority::MajorityVoteAggregator;
use bft_core::aggregate::mean::MeanAggregator;
use bft_core::aggregate::Aggregator;
use bft_core::checkpoint;
use bft_core::codec::{Codec, IdentityCodec, Int8Codec};
use bft_core::config::{Flavour, RunConfig, TransportMode, UpdateMode};
use bft_core::error::{Error, Result};
use bft_core::model::ParameterVector;
use bft_core::protocol::{grad_tag, param_tag, STEP_TAG};
use bft_core::state::CoordinatorState;
use bft_core::tensor::Tensor;
use bft_core::transport::Transport;

fn build_aggregator(config: &RunConfig) -> Box<dyn Aggregator> {
    match &config.flavour {
        Flavour::Baseline { update_mode } => match update_mode {
            UpdateMode::Mean => Box::new(MeanAggregator::new(config.num_workers)),
            UpdateMode::GeometricMedian => Box::new(GeoMedianAggregator::default()),
            // Rejected by RunConfig::validate: majority vote needs the
            // replicated flavour's groups.
            UpdateMode::MajorityVote => unreachable!("validate() rejects Baseline+MajorityVote"),
        },
        Flavour::Replicated { groups, .. } => Box::new(MajorityVoteAggregator::new(groups.clone())),
        Flavour::Cyclic {
            w_enc,
            w_mask,
            hat_s,
        } => Box::new(CyclicDecodeAggregator::new(
            w_enc.clone(),
            *hat_s,
            w_mask.rows.clone(),
        )),
    }
}

/// One pending gradient receive: the worker rank it is posted against, the
/// layer's position in the trainable-layer ordering (accumulator index),
/// and the layer's absolute index (tag derivation, shape lookup).
struct Pending {
    rank: u32,
    pos: usize,
    layer: usize,
}

pub struct CoordinatorNode<T: Transport> {
    transport: Arc<T>,
    grad_codec: Box<dyn Codec>,
    aggregator: Box<dyn Aggregator>,
    config: RunConfig,
    params: ParameterVector,
    accumulator: GradientAccumulator,
    /// Momentum buffer, one entry per layer (including frozen, left at zero).
    velocity: Vec<Tensor>,
    step: u64,
    state: CoordinatorState,
}

impl<T: Transport> CoordinatorNode<T> {
    /// Builds a coordinator from a validated `config` and an initial
    /// parameter vector. If `config.checkpoint_step > 0`, resumes from that
    /// checkpoint instead (overriding `params` and the starting step).
    pub fn new(transport: Arc<T>, config: RunConfig, params: ParameterVector) -> Result<Self> {
        config.validate()?;
        bft_core::protocol::validate_tag_ranges(params.num_layers()).map_err(Error::BadConfig)?;

        let (params, start_step) = if config.checkpoint_step > 0 {
            let path = checkpoint::checkpoint_path(&config.train_dir, config.checkpoint_step);
            let blob = checkpoint::load(path)?;
            let resumed_step = blob.step + 1;
            (blob.parameters, resumed_step)
        } else {
            (params, 1)
        };

        let grad_codec: Box<dyn Codec> = if config.compress_grad {
            Box::new(Int8Codec)
        } else {
            Box::new(IdentityCodec)
        };
        let aggregator = build_aggregator(&config);
        let velocity = params
            .all_layers()
            .map(|l| Tensor::zeros(&params.spec(l).shape))
            .collect();
        let accumulator = GradientAccumulator::new(params.num_trainable(), config.num_workers);

        Ok(Self {
            transport,
            grad_codec,
            aggregator,
            config,
            params,
            accumulator,
            velocity,
            step: start_step,
            state: CoordinatorState::Broadcasting,
        })
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn params(&self) -> &ParameterVector {
        &self.params
    }

    /// Runs steps `self.step()..=max_steps`, returning the final step
    /// reached. Fails fast on the first unrecoverable error — synchronous
    /// semantics give no partial-step recovery (§4.1 failure semantics).
    pub async fn run(&mut self, max_steps: u64) -> Result<u64> {
        while self.step <= max_steps {
            self.run_step().await?;
        }
        self.state = CoordinatorState::Terminal;
        Ok(self.step.saturating_sub(1))
    }

    async fn run_step(&mut self) -> Result<()> {
        let trainable: Vec<usize> = self.params.trainable_layers().collect();

        self.state = CoordinatorState::Broadcasting;
        tracing::debug!(step = self.step, phase = "broadcasting", "step broadcast");
        let handle = self
            .transport
            .broadcast(0, STEP_TAG, (self.step as i64).to_ne_bytes().to_vec())
            .await?;
        self.transport.wait(handle).await?;

        tracing::debug!(step = self.step, phase = "broadcasting", "parameter broadcast");
        for layer in self.params.all_layers() {
            let bytes = IdentityCodec.encode(self.params.value(layer));
            match self.config.transport_mode {
                TransportMode::Broadcast => {
                    let handle = self.transport.broadcast(0, param_tag(layer), bytes).await?;
                    self.transport.wait(handle).await?;
                }
                TransportMode::PointToPoint => {
                    for rank in 1..=self.config.num_workers {
                        let handle = self.transport.send(rank, param_tag(layer), bytes.clone()).await?;
                        self.transport.wait(handle).await?;
                    }
                }
            }
        }

        self.state = CoordinatorState::Collecting;
        tracing::debug!(step = self.step, phase = "collecting", "gradient collection");
        self.collect_gradients(&trainable).await?;

        self.state = CoordinatorState::Reducing;
        let grads = self.aggregator.reduce(&self.accumulator, &self.params, &trainable)?;

        self.state = CoordinatorState::Applying;
        for (pos, &layer) in trainable.iter().enumerate() {
            let grad = &grads[pos];
            self.velocity[layer].scale(self.config.momentum);
            self.velocity[layer].add_assign(grad);
            let update = self.velocity[layer].scaled(self.config.learning_rate);
            let new_value = self.params.value(layer).sub(&update);
            self.params.set_value(layer, new_value);
        }

        if self.config.eval_freq > 0 && self.step % self.config.eval_freq == 0 {
            self.state = CoordinatorState::Persisting;
            tracing::info!(step = self.step, "persisting checkpoint");
            checkpoint::save(&self.config.train_dir, self.step, &self.params)?;
        }

        self.accumulator.reset();
        self.step += 1;
        Ok(())
    }

    /// Posts a receive for every (worker, trainable-layer) pair still
    /// missing, waits for the first to complete, decodes and hands it to
    /// the accumulator, and repeats until every slot has been filled or the
    /// configured timeout elapses. Handles are re-posted fresh each
    /// iteration rather than held across `wait_any` calls — `recv` just
    /// looks up the transport's already-buffered channel, so nothing is
    /// lost by not holding onto a handle the previous iteration did not
    /// select.
    async fn collect_gradients(&mut self, trainable: &[usize]) -> Result<()> {
        let mut pending: Vec<Pending> = Vec::with_capacity(trainable.len() * self.config.num_workers as usize);
        for (pos, &layer) in trainable.iter().enumerate() {
            for rank in 1..=self.config.num_workers {
                pending.push(Pending { rank, pos, layer });
            }
        }

        let timeout = Duration::from_millis(self.config.timeout_threshold_ms);
        while !self.accumulator.complete() {
            if pending.is_empty() {
                break;
            }

            let mut handles = Vec::with_capacity(pending.len());
            for p in &pending {
                handles.push(self.transport.recv(p.rank, grad_tag(p.layer)).await?);
            }

            let outcome = tokio::time::timeout(timeout, self.transport.wait_any(handles)).await;
            let (index, status, bytes) = match outcome {
                Err(_) => {
                    let offender = &pending[0];
                    return Err(Error::WorkerTimeout {
                        rank: offender.rank,
                        layer: offender.layer,
                    });
                }
                Ok(result) => result?,
            };

            let entry = pending.remove(index);
            debug_assert_eq!(entry.rank, status.source);

            let shape = self.params.spec(entry.layer).shape.clone();
            match self.grad_codec.decode(&bytes, &shape) {
                Ok(tensor) if tensor.shape_matches(&shape) => {
                    if self.accumulator.received(entry.pos) < self.config.num_workers {
                        self.accumulator.put(entry.pos, entry.rank, tensor);
                    }
                    self.accumulator.increment_received(entry.pos);
                }
                Ok(tensor) => {
                    tracing::warn!(
                        rank = entry.rank,
                        layer = entry.layer,
                        expected = ?shape,
                        got = ?tensor.shape,
                        "dropping gradient with mismatched shape"
                    );
                    return Err(Error::ShapeMismatch {
                        layer: entry.layer,
                        expected: shape,
                        got: tensor.shape,
                    });
                }
                Err(err) => {
                    // The wire carries no shape; a payload whose byte length
                    // doesn't match the expected shape's element count *is*
                    // the shape-mismatch signal (§4.1.3), surfaced by the
                    // codec as a decode error. Report the raw byte length as
                    // the only signal available for `got`.
                    tracing::warn!(rank = entry.rank, layer = entry.layer, %err, "dropping mismatched-shape gradient");
                    return Err(Error::ShapeMismatch {
                        layer: entry.layer,
                        expected: shape,
                        got: vec![bytes.len()],
                    });
                }
            }
        }
        Ok(())
    }
}
