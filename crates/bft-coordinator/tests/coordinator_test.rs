use std::sync::Arc;

use bft_core::codec::{Codec, IdentityCodec};
use bft_core::config::{ErrMode, Flavour, RunConfig, TransportMode, UpdateMode};
use bft_core::error::Error;
use bft_core::model::{LayerSpec, ParameterVector};
use bft_core::protocol::{grad_tag, param_tag, STEP_TAG};
use bft_core::tensor::Tensor;
use bft_core::transport::channel::{ChannelTransport, Hub};
use bft_core::transport::Transport;
use bft_coordinator::CoordinatorNode;

fn config(flavour: Flavour, num_workers: u32, train_dir: &str) -> RunConfig {
    RunConfig {
        num_workers,
        fault_set: vec![],
        flavour,
        transport_mode: TransportMode::Broadcast,
        compress_grad: false,
        learning_rate: 1.0,
        momentum: 0.0,
        max_steps: 1,
        eval_freq: 0,
        timeout_threshold_ms: 2000,
        checkpoint_step: 0,
        err_mode: ErrMode::RevGrad,
        train_dir: train_dir.to_string(),
    }
}

async fn fake_worker_sends_once(transport: Arc<ChannelTransport>, grad: Vec<f64>) {
    let handle = transport.recv(0, STEP_TAG).await.unwrap();
    transport.wait(handle).await.unwrap();
    let handle = transport.recv(0, param_tag(0)).await.unwrap();
    transport.wait(handle).await.unwrap();

    let bytes = IdentityCodec.encode(&Tensor::from_vec(&[2], grad));
    let handle = transport.send(0, grad_tag(0), bytes).await.unwrap();
    transport.wait(handle).await.unwrap();
}

/// §8 S3: W=6, two groups of 3; group 1 unanimous [1,1], group 2 has one
/// adversarial replica voting [9,9] against two honest votes of [2,2] ->
/// group votes [1,1] and [2,2], G = [1.5, 1.5].
#[tokio::test]
async fn majority_vote_matches_scenario_s3() {
    let hub = Hub::new(vec![0, 1, 2, 3, 4, 5, 6]);
    let coordinator_transport = Arc::new(ChannelTransport::new(hub.clone(), 0));
    let workers: Vec<Arc<ChannelTransport>> = (1..=6).map(|r| Arc::new(ChannelTransport::new(hub.clone(), r))).collect();

    let grads = [
        vec![1.0, 1.0],
        vec![1.0, 1.0],
        vec![1.0, 1.0],
        vec![2.0, 2.0],
        vec![2.0, 2.0],
        vec![9.0, 9.0],
    ];
    let tasks = tokio::spawn({
        let workers = workers.clone();
        let grads = grads.to_vec();
        async move {
            let futs = workers.into_iter().zip(grads).map(|(t, g)| fake_worker_sends_once(t, g));
            futures::future::join_all(futs).await;
        }
    });

    let flavour = Flavour::Replicated {
        groups: vec![vec![1, 2, 3], vec![4, 5, 6]],
        group_seeds: vec![0, 0],
    };
    let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![2])]);
    let mut node = CoordinatorNode::new(coordinator_transport, config(flavour, 6, "/tmp/unused/"), params).unwrap();
    node.run(1).await.unwrap();
    tasks.await.unwrap();

    let value = node.params().value(0);
    assert!((value.data[0] - (-1.5)).abs() < 1e-9, "{:?}", value.data);
    assert!((value.data[1] - (-1.5)).abs() < 1e-9, "{:?}", value.data);
}

/// §8 S2: W=5, f=2, baseline/geomedian. Gradients [0,0]x3, [1000,1000],
/// [-1000,0] -> median close to the origin.
#[tokio::test]
async fn geometric_median_is_robust_to_two_corrupted_workers() {
    let hub = Hub::new(vec![0, 1, 2, 3, 4, 5]);
    let coordinator_transport = Arc::new(ChannelTransport::new(hub.clone(), 0));
    let workers: Vec<Arc<ChannelTransport>> = (1..=5).map(|r| Arc::new(ChannelTransport::new(hub.clone(), r))).collect();

    let grads = [
        vec![0.0, 0.0],
        vec![0.0, 0.0],
        vec![0.0, 0.0],
        vec![1000.0, 1000.0],
        vec![-1000.0, 0.0],
    ];
    let tasks = tokio::spawn({
        let workers = workers.clone();
        let grads = grads.to_vec();
        async move {
            let futs = workers.into_iter().zip(grads).map(|(t, g)| fake_worker_sends_once(t, g));
            futures::future::join_all(futs).await;
        }
    });

    let flavour = Flavour::Baseline {
        update_mode: UpdateMode::GeometricMedian,
    };
    let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![2])]);
    let mut node = CoordinatorNode::new(coordinator_transport, config(flavour, 5, "/tmp/unused/"), params).unwrap();
    node.run(1).await.unwrap();
    tasks.await.unwrap();

    let value = node.params().value(0);
    assert!(value.data[0].abs() < 1e-2, "{:?}", value.data);
    assert!(value.data[1].abs() < 1e-2, "{:?}", value.data);
}

/// §8 S5: checkpoint at t=5, kill, restart; the new coordinator resumes at
/// t=6 with the same parameter vector an uninterrupted run would have had.
#[tokio::test]
async fn resumes_from_checkpoint_with_the_next_step() {
    let dir = tempfile::tempdir().unwrap();
    let train_dir = format!("{}/", dir.path().display());

    let flavour = Flavour::Baseline {
        update_mode: UpdateMode::Mean,
    };
    let mut cfg = config(flavour, 1, &train_dir);
    cfg.eval_freq = 1;
    cfg.max_steps = 5;

    {
        let hub = Hub::new(vec![0, 1]);
        let coordinator_transport = Arc::new(ChannelTransport::new(hub.clone(), 0));
        let worker_transport = Arc::new(ChannelTransport::new(hub, 1));

        let task = tokio::spawn(async move {
            for _ in 0..5 {
                fake_worker_sends_once(worker_transport.clone(), vec![1.0, 1.0]).await;
            }
        });

        let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![2])]);
        let mut node = CoordinatorNode::new(coordinator_transport, cfg.clone(), params).unwrap();
        let final_step = node.run(5).await.unwrap();
        assert_eq!(final_step, 5);
        task.await.unwrap();
    }

    let mut resumed_cfg = cfg.clone();
    resumed_cfg.checkpoint_step = 5;
    resumed_cfg.max_steps = 5;

    let hub = Hub::new(vec![0]);
    let coordinator_transport = Arc::new(ChannelTransport::new(hub, 0));
    let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![2])]);
    let node = CoordinatorNode::new(coordinator_transport, resumed_cfg, params).unwrap();
    assert_eq!(node.step(), 6);
    assert_eq!(node.params().value(0).data, vec![-5.0, -5.0]);
}

/// §8 S6: one worker posts a gradient with the wrong shape; the coordinator
/// must report `ShapeMismatch` and leave `G` unchanged (the step aborts
/// rather than silently aggregating a short slot).
#[tokio::test]
async fn wrong_shape_gradient_reports_shape_mismatch() {
    let hub = Hub::new(vec![0, 1]);
    let coordinator_transport = Arc::new(ChannelTransport::new(hub.clone(), 0));
    let worker_transport = Arc::new(ChannelTransport::new(hub, 1));

    let task = tokio::spawn(async move {
        let handle = worker_transport.recv(0, STEP_TAG).await.unwrap();
        worker_transport.wait(handle).await.unwrap();
        let handle = worker_transport.recv(0, param_tag(0)).await.unwrap();
        worker_transport.wait(handle).await.unwrap();

        // Layer 0 has shape [2]; send a 3-element tensor instead.
        let bytes = IdentityCodec.encode(&Tensor::from_vec(&[3], vec![1.0, 2.0, 3.0]));
        let handle = worker_transport.send(0, grad_tag(0), bytes).await.unwrap();
        worker_transport.wait(handle).await.unwrap();
    });

    let flavour = Flavour::Baseline {
        update_mode: UpdateMode::Mean,
    };
    let mut cfg = config(flavour, 1, "/tmp/unused/");
    cfg.timeout_threshold_ms = 2000;

    let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![2])]);
    let mut node = CoordinatorNode::new(coordinator_transport, cfg, params).unwrap();
    let err = node.run(1).await.unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { layer: 0, .. }), "{err:?}");
    task.await.unwrap();
}
