use crate::nn::layer::{FeatureInput, FullyConnected, Layer, RegressionOutput};
use crate::nn::{DagNetwork, LayerGraph, NetworkError, Shuffle, Trainer, TrainingOptions};
use crate::tensor::Tensor;
use std::sync::atomic::Ordering;

fn linear_network() -> Result<DagNetwork, NetworkError> {
    let graph = LayerGraph::from_series(vec![
        Layer::new("input", FeatureInput::new(1)),
        Layer::new("fc", FullyConnected::new(1)),
        Layer::new("output", RegressionOutput::new()),
    ])?;
    DagNetwork::new_with_seed(graph, 17)
}

/// y = 2x + 1
fn line_data() -> (Tensor, Tensor) {
    let xs: Vec<f32> = (0..8).map(|i| -1.0 + i as f32 * 2.0 / 7.0).collect();
    let ys: Vec<f32> = xs.iter().map(|x| 2.0 * x + 1.0).collect();
    (Tensor::new(&xs, &[8, 1]), Tensor::new(&ys, &[8, 1]))
}

fn options() -> TrainingOptions {
    TrainingOptions {
        max_epochs: 60,
        mini_batch_size: 4,
        initial_learn_rate: 0.05,
        momentum: 0.5,
        l2_regularization: 0.0,
        shuffle: Shuffle::EveryEpoch,
        verbose_frequency: 0,
        seed: Some(3),
        ..Default::default()
    }
}

#[test]
fn test_training_fits_a_line() -> Result<(), NetworkError> {
    let mut network = linear_network()?;
    let (x, y) = line_data();
    let trainer = Trainer::new(options())?;
    let mut dispatcher = trainer.dispatcher(vec![x], vec![y])?;

    let summary = trainer.train(&mut network, &mut dispatcher)?;
    assert!(!summary.stopped);
    assert_eq!(summary.epochs_completed, 60);
    assert_eq!(summary.iterations(), 120);
    let first = summary.losses[0];
    let last = summary.final_loss().unwrap();
    assert!(last < first * 0.25, "损失没有下降：{} -> {}", first, last);

    let prediction = network.predict(&[Tensor::new(&[0.5], &[1, 1])])?;
    assert!((prediction[0][[0, 0]] - 2.0).abs() < 0.5);
    Ok(())
}

#[test]
fn test_stop_flag_ends_training_before_first_iteration() -> Result<(), NetworkError> {
    let mut network = linear_network()?;
    let before: Vec<Tensor> = network
        .learnable_parameters()
        .iter()
        .filter_map(|p| p.value().cloned())
        .collect();
    let (x, y) = line_data();
    let trainer = Trainer::new(options())?;
    let mut dispatcher = trainer.dispatcher(vec![x], vec![y])?;

    trainer.stop_flag().store(true, Ordering::Relaxed);
    let summary = trainer.train(&mut network, &mut dispatcher)?;
    assert!(summary.stopped);
    assert_eq!(summary.iterations(), 0);
    assert_eq!(summary.epochs_completed, 0);

    let after: Vec<Tensor> = network
        .learnable_parameters()
        .iter()
        .filter_map(|p| p.value().cloned())
        .collect();
    assert_eq!(before, after);
    Ok(())
}
