use super::mlp_graph;
use crate::nn::layer::{Addition, FeatureInput, FullyConnected, Layer, RegressionOutput};
use crate::nn::network::BufferPlan;
use crate::nn::{DagNetwork, LayerGraph, NetworkError};

/// input -> fc_a -> add/in2, input -> fc_b -> add/in1, add -> output
fn diamond() -> Result<DagNetwork, NetworkError> {
    let mut graph = LayerGraph::new();
    graph.add_layer(Layer::new("input", FeatureInput::new(2)))?;
    graph.add_layer(Layer::new("fc_a", FullyConnected::new(3)))?;
    graph.add_layer(Layer::new("fc_b", FullyConnected::new(3)))?;
    graph.add_layer(Layer::new("add", Addition::new(2).unwrap()))?;
    graph.add_layer(Layer::new("output", RegressionOutput::new()))?;
    graph.connect("input", "fc_a")?;
    graph.connect("input", "fc_b")?;
    graph.connect("fc_a", "add/in2")?;
    graph.connect("fc_b", "add/in1")?;
    graph.connect("add", "output")?;
    DagNetwork::new_with_seed(graph, 1)
}

/// 每个被读取的格子都由排在前面的恰好一个层写入；前向清理在最后一次读取之后且每格至多一次
fn assert_plan_is_safe(plan: &BufferPlan) {
    let mut cleared_at = vec![None; plan.num_activations()];
    for k in 0..plan.num_layers() {
        for &slot in plan.forward_clear(k) {
            assert!(cleared_at[slot].is_none(), "格子{}被清理了两次", slot);
            cleared_at[slot] = Some(k);
        }
    }
    let mut written = vec![0; plan.num_activations()];
    for k in 0..plan.num_layers() {
        for &slot in plan.input_indices(k) {
            assert!(plan.producer(slot) < k);
            if let Some(step) = cleared_at[slot] {
                assert!(step >= k, "格子{}在第{}步被清理，却在第{}步被读取", slot, step, k);
            }
        }
        for &slot in plan.output_indices(k) {
            assert_eq!(plan.producer(slot), k);
            written[slot] += 1;
        }
    }
    assert!(written.iter().all(|&w| w == 1));

    let mut backward_cleared = vec![0; plan.num_activations()];
    for k in 0..plan.num_layers() {
        for &slot in plan.backward_clear(k) {
            assert_eq!(plan.producer(slot), k);
            backward_cleared[slot] += 1;
        }
    }
    assert!(backward_cleared.iter().all(|&c| c == 1));
}

#[test]
fn test_diamond_layout() -> Result<(), NetworkError> {
    let network = diamond()?;
    let plan = network.buffer_plan();
    assert_eq!(plan.num_activations(), 5);
    assert_eq!(plan.output_indices(3), &[3]);
    // 按目标端口排序：in1来自fc_b，in2来自fc_a
    assert_eq!(plan.input_indices(3), &[2, 1]);

    assert_eq!(plan.forward_clear(0), &[] as &[usize]);
    assert_eq!(plan.forward_clear(2), &[0]);
    assert_eq!(plan.forward_clear(3), &[1, 2]);
    assert_eq!(plan.forward_clear(4), &[3]);
    for k in 0..5 {
        assert_eq!(plan.backward_clear(k), &[k]);
    }
    assert_plan_is_safe(plan);
    Ok(())
}

#[test]
fn test_output_layer_slot_is_never_cleared_forward() -> Result<(), NetworkError> {
    let network = DagNetwork::new_with_seed(mlp_graph(3, 4, 2), 3)?;
    let plan = network.buffer_plan();
    let output = network.layer_index("output")?;
    let output_slot = plan.output_indices(output)[0];
    assert!((0..plan.num_layers()).all(|k| !plan.forward_clear(k).contains(&output_slot)));
    assert_plan_is_safe(plan);
    Ok(())
}

#[test]
fn test_network_keeps_original_layer_mapping() -> Result<(), NetworkError> {
    let mut graph = LayerGraph::new();
    graph.add_layer(Layer::new("output", RegressionOutput::new()))?;
    graph.add_layer(Layer::new("input", FeatureInput::new(2)))?;
    graph.connect("input", "output")?;
    let network = DagNetwork::new(graph)?;
    assert_eq!(network.layers()[0].name(), "input");
    assert_eq!(network.layer_order().sorted_to_original(0), 1);
    assert_eq!(network.layer_order().original_to_sorted(0), 1);
    assert_eq!(network.connections()[0].source, 0);
    assert_eq!(network.connections()[0].destination, 1);
    Ok(())
}
