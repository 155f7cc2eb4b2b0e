use super::{assert_all_close, mlp_graph};
use crate::data::InMemoryDispatcher;
use crate::nn::layer::{
    Addition, BatchNormalization, Concatenation, Convolution2d, CustomLayer, CustomLayerBehavior,
    FeatureInput, FullyConnected, ImageInput, Layer, LayerError, LayerGradients, MaxPooling2d,
    Memory, Normalization, Padding, RegressionOutput, Relu, Size,
};
use crate::nn::{DagNetwork, GraphError, LayerGraph, NetworkError};
use crate::tensor::Tensor;
use crate::utils::assert_err;

/// 第k个输出（从0起）为(k+1)·x；输出数由连接表决定
#[derive(Debug, Clone)]
struct Splitter;

impl CustomLayerBehavior for Splitter {
    fn num_outputs(&self) -> Option<usize> {
        None
    }

    fn forward_propagate_size(
        &self,
        input_sizes: &[Size],
        num_outputs: usize,
    ) -> Result<Vec<Size>, LayerError> {
        Ok(vec![input_sizes[0].clone(); num_outputs])
    }

    fn predict(&self, x: &[Tensor], num_outputs: usize) -> Result<Vec<Tensor>, LayerError> {
        Ok((0..num_outputs).map(|k| &x[0] * (k + 1) as f32).collect())
    }

    fn backward(
        &self,
        x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        _memory: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        let mut dx = x[0].zeros_like();
        for (k, g) in dz.iter().enumerate() {
            dx += &(g * (k + 1) as f32);
        }
        Ok(LayerGradients {
            inputs: vec![dx],
            parameters: vec![],
        })
    }

    fn clone_boxed(&self) -> Box<dyn CustomLayerBehavior> {
        Box::new(self.clone())
    }
}

fn identity_fc(name: &str, n: usize) -> Result<Layer, LayerError> {
    let mut identity = vec![0.0; n * n];
    for i in 0..n {
        identity[i * n + i] = 1.0;
    }
    let mut layer = Layer::new(name, FullyConnected::new(n));
    layer.set_parameter_value("Weights", Tensor::new(&identity, &[n, n]))?;
    layer.set_parameter_value("Bias", Tensor::zeros(&[n]))?;
    Ok(layer)
}

#[test]
fn test_convolution_on_zero_input_outputs_rectified_bias() -> Result<(), NetworkError> {
    let bias = [0.5, -1.0, 2.0, -0.25, 0.0, 3.0, -2.0, 1.5];
    let mut conv = Layer::new("conv", Convolution2d::new((3, 3), 8).padding(Padding::Same));
    conv.set_parameter_value("Bias", Tensor::new(&bias, &[8]))
        .map_err(NetworkError::layer("conv"))?;
    let graph = LayerGraph::from_series(vec![
        Layer::new("input", ImageInput::new(3, 4, 4)),
        conv,
        Layer::new("relu", Relu::new()),
        Layer::new("output", RegressionOutput::new()),
    ])?;
    let network = DagNetwork::new_with_seed(graph, 0)?;

    let predictions = network.predict(&[Tensor::zeros(&[2, 3, 4, 4])])?;
    assert_eq!(predictions.len(), 1);
    let y = &predictions[0];
    assert_eq!(y.shape(), &[2, 8, 4, 4]);
    for n in 0..2 {
        for c in 0..8 {
            for h in 0..4 {
                for w in 0..4 {
                    assert_eq!(y[[n, c, h, w]], bias[c].max(0.0));
                }
            }
        }
    }
    Ok(())
}

#[test]
fn test_addition_of_two_inputs() -> Result<(), NetworkError> {
    let mut graph = LayerGraph::new();
    graph.add_layers(vec![
        Layer::new("a", ImageInput::new(1, 2, 2)),
        Layer::new("b", ImageInput::new(1, 2, 2)),
        Layer::new("add", Addition::new(2).map_err(NetworkError::layer("add"))?),
        Layer::new("output", RegressionOutput::new()),
    ])?;
    graph.connect("a", "add/in1")?;
    graph.connect("b", "add/in2")?;
    graph.connect("add", "output")?;
    let network = DagNetwork::new(graph)?;

    // 单通道2x2图像
    let a = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
    let b = Tensor::new(&[5.0, 6.0, 7.0, 8.0], &[1, 1, 2, 2]);
    let y = network.predict(&[a, b])?;
    assert_eq!(y[0], Tensor::new(&[6.0, 8.0, 10.0, 12.0], &[1, 1, 2, 2]));
    assert_eq!(network.input_names(), vec!["a", "b"]);
    assert_eq!(network.output_names(), vec!["output"]);
    Ok(())
}

#[test]
fn test_concatenation_follows_port_order() -> Result<(), NetworkError> {
    let mut graph = LayerGraph::new();
    graph.add_layers(vec![
        Layer::new("a", FeatureInput::new(1)),
        Layer::new("b", FeatureInput::new(1)),
        Layer::new("cat", Concatenation::depth(2).map_err(NetworkError::layer("cat"))?),
        Layer::new("output", RegressionOutput::new()),
    ])?;
    // 连接的添加顺序与端口顺序相反
    graph.connect("a", "cat/in2")?;
    graph.connect("b", "cat/in1")?;
    graph.connect("cat", "output")?;
    let network = DagNetwork::new(graph)?;

    let y = network.predict(&[Tensor::new(&[1.0], &[1, 1]), Tensor::new(&[2.0], &[1, 1])])?;
    assert_eq!(y[0], Tensor::new(&[2.0, 1.0], &[1, 2]));
    Ok(())
}

#[test]
fn test_predict_is_repeatable() -> Result<(), NetworkError> {
    let network = DagNetwork::new_with_seed(mlp_graph(3, 5, 2), 11)?;
    let x = Tensor::new(&[0.1, -0.2, 0.3, 1.0, 2.0, -3.0], &[2, 3]);
    let first = network.predict(&[x.clone()])?;
    let second = network.predict(&[x])?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_same_seed_builds_same_parameters() -> Result<(), NetworkError> {
    let a = DagNetwork::new_with_seed(mlp_graph(3, 4, 1), 5)?;
    let b = DagNetwork::new_with_seed(mlp_graph(3, 4, 1), 5)?;
    for (pa, pb) in a.learnable_parameters().iter().zip(b.learnable_parameters()) {
        assert_eq!(pa.value(), pb.value());
    }
    assert_eq!(a.num_learnable_parameters(), 4);
    Ok(())
}

#[test]
fn test_build_reports_wrong_layer_size() -> Result<(), GraphError> {
    let graph = LayerGraph::from_series(vec![
        Layer::new("input", FeatureInput::new(3)),
        Layer::new("fc", FullyConnected::new(2).input_size(4)),
        Layer::new("output", RegressionOutput::new()),
    ])?;
    assert_err!(
        DagNetwork::new(graph),
        NetworkError::Layer { layer, source: LayerError::WrongLayerSize { .. } } if layer == "fc"
    );
    Ok(())
}

#[test]
fn test_build_reports_parameter_shape_mismatch() -> Result<(), NetworkError> {
    let mut fc = Layer::new("fc", FullyConnected::new(2));
    fc.set_parameter_value("Weights", Tensor::zeros(&[3, 3]))
        .map_err(NetworkError::layer("fc"))?;
    let graph = LayerGraph::from_series(vec![
        Layer::new("input", FeatureInput::new(3)),
        fc,
        Layer::new("output", RegressionOutput::new()),
    ])?;
    assert_err!(
        DagNetwork::new(graph),
        NetworkError::Layer {
            source: LayerError::InvalidParameterShape { parameter: "Weights", .. },
            ..
        }
    );
    Ok(())
}

#[test]
fn test_parameter_values_are_checked() -> Result<(), NetworkError> {
    let mut network = DagNetwork::new_with_seed(mlp_graph(2, 3, 1), 0)?;
    assert_err!(
        network.set_learnable_parameter_values(vec![Tensor::zeros(&[3, 2])]),
        NetworkError::ParameterCountMismatch { expected: 4, got: 1 }
    );
    let wrong = vec![
        Tensor::zeros(&[3, 2]),
        Tensor::zeros(&[3]),
        Tensor::zeros(&[2, 3]),
        Tensor::zeros(&[1]),
    ];
    assert_err!(
        network.set_learnable_parameter_values(wrong),
        NetworkError::Layer { layer, .. } if layer == "fc2"
    );
    Ok(())
}

#[test]
fn test_frozen_layers_get_placeholder_gradients() -> Result<(), NetworkError> {
    let mut graph = mlp_graph(2, 3, 1);
    graph.layer_mut("fc1")?.freeze();
    let mut network = DagNetwork::new_with_seed(graph, 3)?;
    assert_eq!(network.layer_is_learning(), vec![false, false, false, true, false]);
    assert_eq!(network.earliest_learning_layer(), Some(3));

    let x = Tensor::new(&[1.0, 2.0], &[1, 2]);
    let t = Tensor::new(&[0.5], &[1, 1]);
    let result = network.compute_gradients_for_training(&[x.clone()], &[t.clone()])?;
    let present: Vec<bool> = result.gradients.iter().map(Option::is_some).collect();
    assert_eq!(present, vec![false, false, true, true]);

    network.layer_mut("fc2")?.freeze();
    assert_eq!(network.earliest_learning_layer(), None);
    let result = network.compute_gradients_for_training(&[x.clone()], &[t.clone()])?;
    assert!(result.gradients.iter().all(Option::is_none));
    let expected_loss = network.loss(&network.predict(&[x])?, &[t])?;
    assert_eq!(result.loss, expected_loss);
    Ok(())
}

#[test]
fn test_fan_out_accumulates_gradients() -> Result<(), NetworkError> {
    let mut graph = LayerGraph::new();
    graph.add_layers(vec![
        Layer::new("input", FeatureInput::new(2)),
        identity_fc("fc", 2).map_err(NetworkError::layer("fc"))?,
        Layer::new("add", Addition::new(2).map_err(NetworkError::layer("add"))?),
        Layer::new("output", RegressionOutput::new()),
    ])?;
    graph.connect("input", "fc")?;
    graph.connect("fc", "add/in1")?;
    graph.connect("fc", "add/in2")?;
    graph.connect("add", "output")?;
    let mut network = DagNetwork::new(graph)?;

    let x = Tensor::new(&[1.0, 0.0], &[1, 2]);
    let t = Tensor::zeros(&[1, 2]);
    let result = network.compute_gradients_for_training(&[x], &[t])?;
    assert_eq!(result.predictions[0], Tensor::new(&[2.0, 0.0], &[1, 2]));
    assert!((result.loss - 2.0).abs() < 1e-6);
    let dw = result.gradients[0].as_ref().unwrap();
    let db = result.gradients[1].as_ref().unwrap();
    assert_all_close(dw, &[4.0, 0.0, 0.0, 0.0], 1e-6);
    assert_all_close(db, &[4.0, 0.0], 1e-6);
    Ok(())
}

#[test]
fn test_activations_of_hidden_layer() -> Result<(), NetworkError> {
    let graph = LayerGraph::from_series(vec![
        Layer::new("input", FeatureInput::new(2)),
        identity_fc("fc", 2).map_err(NetworkError::layer("fc"))?,
        Layer::new("relu", Relu::new()),
        Layer::new("output", RegressionOutput::new()),
    ])?;
    let network = DagNetwork::new(graph)?;
    let x = Tensor::new(&[-1.0, 2.0], &[1, 2]);

    assert_eq!(network.activations(&[x.clone()], "fc")?, vec![x.clone()]);
    assert_eq!(
        network.activations(&[x.clone()], "relu")?,
        vec![Tensor::new(&[0.0, 2.0], &[1, 2])]
    );
    assert_err!(network.activations(&[x], "nope"), NetworkError::LayerNotFound(_));
    Ok(())
}

#[test]
fn test_variable_output_layer_resolved_from_connections() -> Result<(), NetworkError> {
    let mut graph = LayerGraph::new();
    graph.add_layers(vec![
        Layer::new("input", FeatureInput::new(2)),
        Layer::new("split", CustomLayer::new(Splitter)),
        Layer::new("add", Addition::new(2).map_err(NetworkError::layer("add"))?),
        Layer::new("output", RegressionOutput::new()),
    ])?;
    graph.connect("input", "split")?;
    assert_err!(graph.connect("split", "add/in1"), GraphError::PortRequired(_));
    graph.connect("split/out1", "add/in1")?;
    graph.connect("split/out3", "add/in2")?;
    graph.connect("add", "output")?;

    let mut network = DagNetwork::new(graph)?;
    assert_eq!(network.layer("split")?.output_names(), vec!["out1", "out2", "out3"]);
    // input 1 + split 3 + add 1 + output 1
    assert_eq!(network.buffer_plan().num_activations(), 6);

    let x = Tensor::new(&[1.0, -2.0], &[1, 2]);
    assert_eq!(network.predict(&[x.clone()])?[0], Tensor::new(&[4.0, -8.0], &[1, 2]));

    // 没有可学习参数，反向传播不会进行，但损失照算
    let result = network.compute_gradients_for_training(&[x], &[Tensor::zeros(&[1, 2])])?;
    assert!(result.gradients.is_empty());
    assert!((result.loss - 40.0).abs() < 1e-4);
    Ok(())
}

#[test]
fn test_batch_normalization_state_update() -> Result<(), NetworkError> {
    let graph = LayerGraph::from_series(vec![
        Layer::new("input", FeatureInput::new(1)),
        Layer::new("bn", BatchNormalization::new()),
        Layer::new("output", RegressionOutput::new()),
    ])?;
    let mut network = DagNetwork::new(graph)?;
    let x = Tensor::new(&[1.0, 3.0], &[2, 1]);
    let t = Tensor::zeros(&[2, 1]);

    let result = network.compute_gradients_for_training(&[x.clone()], &[t])?;
    // 训练时按批统计量归一化
    assert_all_close(&result.predictions[0], &[-1.0, 1.0], 1e-3);
    assert_eq!(result.state.len(), 1);
    assert_eq!(result.state[0].layer, "bn");
    assert_all_close(&result.state[0].values[0], &[0.2], 1e-6);
    assert_all_close(&result.state[0].values[1], &[1.1], 1e-6);

    network.update_network_state(&result.state)?;
    let y = network.predict(&[x])?;
    let inv_std = 1.0 / (1.1f32 + 1e-5).sqrt();
    assert_all_close(&y[0], &[0.8 * inv_std, 2.8 * inv_std], 1e-4);
    Ok(())
}

#[test]
fn test_zero_center_statistics() -> Result<(), NetworkError> {
    let graph = LayerGraph::from_series(vec![
        Layer::new("input", FeatureInput::new(2).normalization(Normalization::ZeroCenter)),
        identity_fc("fc", 2).map_err(NetworkError::layer("fc"))?,
        Layer::new("output", RegressionOutput::new()),
    ])?;
    let mut network = DagNetwork::new(graph)?;
    let data = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);

    // 尚未计算统计量
    assert_err!(
        network.predict(&[data.clone()]),
        NetworkError::Layer { source: LayerError::InvalidConfiguration(_), .. }
    );

    let mut dispatcher = InMemoryDispatcher::new(vec![data.clone()], vec![], 2)?;
    network.compute_input_statistics(&mut dispatcher)?;
    let y = network.predict(&[data])?;
    assert_eq!(y[0], Tensor::new(&[-2.0, -2.0, 0.0, 0.0, 2.0, 2.0], &[3, 2]));
    Ok(())
}

#[test]
fn test_input_and_target_counts_are_checked() -> Result<(), NetworkError> {
    let mut network = DagNetwork::new(mlp_graph(2, 2, 1))?;
    let x = Tensor::zeros(&[1, 2]);
    assert_err!(
        network.predict(&[x.clone(), x.clone()]),
        NetworkError::InputCountMismatch { expected: 1, got: 2 }
    );
    assert_err!(
        network.compute_gradients_for_training(&[x], &[]),
        NetworkError::TargetCountMismatch { expected: 1, got: 0 }
    );
    Ok(())
}

#[test]
fn test_build_rejects_zero_stride() -> Result<(), GraphError> {
    let graph = LayerGraph::from_series(vec![
        Layer::new("input", ImageInput::new(1, 4, 4)),
        Layer::new("conv", Convolution2d::new((3, 3), 2).stride((0, 1)).padding(Padding::Same)),
        Layer::new("output", RegressionOutput::new()),
    ])?;
    assert_err!(
        DagNetwork::new_with_seed(graph, 0),
        NetworkError::Layer { layer, source: LayerError::InvalidConfiguration(_) }
            if layer == "conv"
    );

    let graph = LayerGraph::from_series(vec![
        Layer::new("input", ImageInput::new(1, 4, 4)),
        Layer::new("pool", MaxPooling2d::new((2, 2)).stride((0, 1)).padding(Padding::Same)),
        Layer::new("output", RegressionOutput::new()),
    ])?;
    assert_err!(
        DagNetwork::new_with_seed(graph, 0),
        NetworkError::Layer { layer, source: LayerError::InvalidConfiguration(_) }
            if layer == "pool"
    );
    Ok(())
}

#[test]
fn test_observation_counts_must_agree() -> Result<(), NetworkError> {
    let mut graph = LayerGraph::new();
    graph.add_layers(vec![
        Layer::new("a", FeatureInput::new(1)),
        Layer::new("b", FeatureInput::new(1)),
        identity_fc("fa", 1).map_err(NetworkError::layer("fa"))?,
        identity_fc("fb", 1).map_err(NetworkError::layer("fb"))?,
        Layer::new("oa", RegressionOutput::new()),
        Layer::new("ob", RegressionOutput::new()),
    ])?;
    graph.connect("a", "fa")?;
    graph.connect("fa", "oa")?;
    graph.connect("b", "fb")?;
    graph.connect("fb", "ob")?;
    let mut network = DagNetwork::new(graph)?;

    let two = Tensor::zeros(&[2, 1]);
    let three = Tensor::zeros(&[3, 1]);
    assert_err!(
        network.predict(&[two.clone(), three.clone()]),
        NetworkError::ObservationCountMismatch { expected: 2, got: 3 }
    );
    let mismatched = [two.clone(), three.clone()];
    assert_err!(
        network.compute_gradients_for_training(&mismatched, &mismatched),
        NetworkError::ObservationCountMismatch { expected: 2, got: 3 }
    );
    // 输入一致，目标不一致
    assert_err!(
        network.compute_gradients_for_training(&[two.clone(), two.clone()], &[two.clone(), three]),
        NetworkError::ObservationCountMismatch { expected: 2, got: 3 }
    );
    let matched = [two.clone(), two];
    assert!(network.compute_gradients_for_training(&matched, &matched).is_ok());
    Ok(())
}

#[test]
fn test_training_forward_clears_only_without_learning_layers() -> Result<(), NetworkError> {
    let mut network = DagNetwork::new_with_seed(mlp_graph(2, 3, 1), 0)?;
    let x = Tensor::new(&[1.0, -2.0], &[1, 2]);

    // 有学习层时保留全部激活，供反向传播使用
    let forward = network.forward_propagation_with_memory(&[x.clone()])?;
    assert_eq!(forward.num_retained_activations(), 5);

    network.layer_mut("fc1")?.freeze();
    network.layer_mut("fc2")?.freeze();
    assert_eq!(network.earliest_learning_layer(), None);
    // 无学习层时按前向清理表清理，只剩输出层的预测格
    let forward = network.forward_propagation_with_memory(&[x])?;
    assert_eq!(forward.num_retained_activations(), 1);
    assert_eq!(forward.predictions().len(), 1);
    Ok(())
}
