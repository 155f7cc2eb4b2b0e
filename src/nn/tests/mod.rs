mod layers;
mod network;
mod optimizer;
mod options;
mod plan;
mod trainer;

use crate::nn::layer::{FeatureInput, FullyConnected, Layer, RegressionOutput, Relu};
use crate::nn::{DagNetwork, LayerGraph, NetworkError};
use crate::tensor::Tensor;

/// feature(in) -> fc1 -> relu -> fc2 -> output
pub(super) fn mlp_graph(inputs: usize, hidden: usize, outputs: usize) -> LayerGraph {
    let layers = vec![
        Layer::new("input", FeatureInput::new(inputs)),
        Layer::new("fc1", FullyConnected::new(hidden)),
        Layer::new("relu", Relu::new()),
        Layer::new("fc2", FullyConnected::new(outputs)),
        Layer::new("output", RegressionOutput::new()),
    ];
    match LayerGraph::from_series(layers) {
        Ok(graph) => graph,
        Err(e) => panic!("{}", e),
    }
}

/// 用中心差分校验网络给出的全部参数梯度
pub(super) fn check_gradients(
    network: &mut DagNetwork,
    inputs: &[Tensor],
    targets: &[Tensor],
    eps: f32,
    tolerance: f32,
) -> Result<(), NetworkError> {
    let analytic = network.compute_gradients_for_training(inputs, targets)?.gradients;
    let values: Vec<Tensor> = network
        .learnable_parameters()
        .iter()
        .map(|p| p.value().cloned().unwrap())
        .collect();

    for (index, gradient) in analytic.iter().enumerate() {
        let gradient = gradient.as_ref().unwrap().to_vec();
        let shape = values[index].shape().to_vec();
        for element in 0..gradient.len() {
            let mut loss_at = |delta: f32| -> Result<f32, NetworkError> {
                let mut perturbed = values.clone();
                let mut data = values[index].to_vec();
                data[element] += delta;
                perturbed[index] = Tensor::new(&data, &shape);
                network.set_learnable_parameter_values(perturbed)?;
                let predictions = network.predict(inputs)?;
                network.loss(&predictions, targets)
            };
            let numeric = (loss_at(eps)? - loss_at(-eps)?) / (2.0 * eps);
            let expected = gradient[element];
            assert!(
                (numeric - expected).abs() <= tolerance * expected.abs().max(1.0),
                "第{}个参数的第{}个元素：数值梯度{}，解析梯度{}",
                index,
                element,
                numeric,
                expected
            );
        }
    }
    network.set_learnable_parameter_values(values)
}

/// 逐元素比较（绝对误差）
pub(super) fn assert_all_close(actual: &Tensor, expected: &[f32], epsilon: f32) {
    let actual = actual.to_vec();
    assert_eq!(actual.len(), expected.len(), "元素个数不同：{:?} vs {:?}", actual, expected);
    for (a, e) in actual.iter().zip(expected) {
        approx::assert_abs_diff_eq!(*a, *e, epsilon = epsilon);
    }
}
