use crate::nn::layer::{
    AveragePooling2d, ClassificationOutput, Concatenation, Convolution2d, Dropout, FeatureInput,
    LayerError, LeakyRelu, Lstm, MaxPooling2d, Memory, OutputLayer, OutputMode, Padding,
    RegressionOutput, Softmax, TraitLayer,
};
use super::assert_all_close;
use crate::tensor::Tensor;
use crate::utils::assert_err;
use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;

const POOL_X: &[f32] = &[
    1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0,
];

#[test]
fn test_max_pooling_forward_and_backward() -> Result<(), LayerError> {
    let pool = MaxPooling2d::new((2, 2));
    let x = Tensor::new(POOL_X, &[1, 1, 4, 4]);
    let mut rng = StdRng::seed_from_u64(0);
    let (z, memory) = pool.forward(&[x.clone()], &mut rng)?;
    assert_eq!(z[0], Tensor::new(&[6.0, 8.0, 14.0, 16.0], &[1, 1, 2, 2]));
    assert_eq!(pool.forward_propagate_size(&[vec![1, 4, 4]])?, vec![vec![1, 2, 2]]);

    let dz = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
    let grads = pool.backward(&[x], &z, &[dz], &memory, false)?;
    let mut expected = vec![0.0; 16];
    expected[5] = 1.0;
    expected[7] = 2.0;
    expected[13] = 3.0;
    expected[15] = 4.0;
    assert_eq!(grads.inputs[0], Tensor::new(&expected, &[1, 1, 4, 4]));
    Ok(())
}

#[test]
fn test_average_pooling() -> Result<(), LayerError> {
    let pool = AveragePooling2d::new((2, 2));
    let x = Tensor::new(POOL_X, &[1, 1, 4, 4]);
    let z = pool.predict(&[x.clone()])?;
    assert_eq!(z[0], Tensor::new(&[3.5, 5.5, 11.5, 13.5], &[1, 1, 2, 2]));

    let dz = Tensor::ones(&[1, 1, 2, 2]);
    let grads = pool.backward(&[x], &z, &[dz], &Memory::Empty, false)?;
    assert_eq!(grads.inputs[0], Tensor::filled(0.25, &[1, 1, 4, 4]));
    Ok(())
}

#[test]
fn test_convolution_size_inference() -> Result<(), LayerError> {
    let mut conv = Convolution2d::new((3, 3), 8).stride((2, 2)).padding(Padding::Same);
    assert!(!conv.has_size_determined());
    conv.infer_size(&[vec![3, 5, 5]])?;
    assert!(conv.has_size_determined());
    assert_eq!(conv.forward_propagate_size(&[vec![3, 5, 5]])?, vec![vec![8, 3, 3]]);
    assert_eq!(conv.learnable_parameters()[0].expected_shape(), Some(&[8, 3, 3, 3][..]));

    let mut rng = StdRng::seed_from_u64(0);
    conv.initialize_learnable_parameters(&mut rng)?;
    let z = conv.predict(&[Tensor::zeros(&[2, 3, 5, 5])])?;
    assert_eq!(z[0].shape(), &[2, 8, 3, 3]);

    let mut fixed = Convolution2d::new((3, 3), 4).num_channels(2);
    assert_eq!(fixed.learnable_parameters()[0].expected_shape(), Some(&[4, 2, 3, 3][..]));
    assert_eq!(fixed.learnable_parameters()[1].expected_shape(), Some(&[4][..]));
    assert_err!(
        fixed.infer_size(&[vec![3, 5, 5]]),
        LayerError::WrongLayerSize { expected, got } if expected == &vec![2] && got == &vec![3]
    );
    Ok(())
}

#[test]
fn test_zero_stride_or_window_is_rejected() {
    let conv = Convolution2d::new((3, 3), 2).stride((0, 1)).padding(Padding::Same);
    assert_err!(conv.forward_propagate_size(&[vec![1, 4, 4]]), LayerError::InvalidConfiguration(_));
    let conv = Convolution2d::new((0, 3), 2);
    assert_err!(conv.forward_propagate_size(&[vec![1, 4, 4]]), LayerError::InvalidConfiguration(_));

    let max_pool = MaxPooling2d::new((2, 2)).stride((1, 0)).padding(Padding::Same);
    assert_err!(
        max_pool.forward_propagate_size(&[vec![1, 4, 4]]),
        LayerError::InvalidConfiguration(_)
    );
    let avg_pool = AveragePooling2d::new((2, 2)).stride((0, 0));
    assert_err!(
        avg_pool.predict(&[Tensor::zeros(&[1, 1, 4, 4])]),
        LayerError::InvalidConfiguration(_)
    );
}

#[test]
fn test_softmax_rows_sum_to_one() -> Result<(), LayerError> {
    let softmax = Softmax::new();
    let x = Tensor::new(&[1.0, 2.0, 3.0, -1.0, 0.0, 1000.0], &[2, 3]);
    let z = softmax.predict(&[x])?.remove(0);
    assert_all_close(&z.sum_axis(1), &[1.0, 1.0], 1e-6);
    assert_abs_diff_eq!(z[[1, 2]], 1.0, epsilon = 1e-6);
    assert!(z.to_vec().iter().all(|v| v.is_finite()));
    Ok(())
}

#[test]
fn test_leaky_relu() -> Result<(), LayerError> {
    let layer = LeakyRelu::new(0.1);
    let x = Tensor::new(&[-2.0, 3.0], &[1, 2]);
    let z = layer.predict(&[x.clone()])?;
    assert_all_close(&z[0], &[-0.2, 3.0], 1e-6);
    let grads = layer.backward(&[x], &z, &[Tensor::ones(&[1, 2])], &Memory::Empty, false)?;
    assert_all_close(&grads.inputs[0], &[0.1, 1.0], 1e-6);
    Ok(())
}

#[test]
fn test_dropout_reuses_mask_in_backward() -> Result<(), LayerError> {
    let dropout = Dropout::new(0.5)?;
    let x = Tensor::ones(&[4, 8]);
    let mut rng = StdRng::seed_from_u64(42);
    let (z, memory) = dropout.forward(&[x.clone()], &mut rng)?;
    let dropped = z[0].to_vec().iter().filter(|&&v| v == 0.0).count();
    assert!(dropped > 0 && dropped < 32);
    assert!(z[0].to_vec().iter().all(|&v| v == 0.0 || v == 2.0));

    let grads = dropout.backward(&[x.clone()], &z, &[Tensor::ones(&[4, 8])], &memory, false)?;
    assert_eq!(grads.inputs[0], z[0]);

    // 推理时为恒等变换
    assert_eq!(dropout.predict(&[x.clone()])?[0], x);
    assert_err!(Dropout::new(1.0), LayerError::InvalidConfiguration(_));
    Ok(())
}

#[test]
fn test_depth_concatenation_splits_gradient() -> Result<(), LayerError> {
    let concat = Concatenation::depth(2)?;
    let a = Tensor::new(&[1.0, 2.0], &[1, 2]);
    let b = Tensor::new(&[3.0], &[1, 1]);
    assert_eq!(concat.forward_propagate_size(&[vec![2], vec![1]])?, vec![vec![3]]);
    let z = concat.predict(&[a.clone(), b.clone()])?;
    assert_eq!(z[0], Tensor::new(&[1.0, 2.0, 3.0], &[1, 3]));

    let dz = Tensor::new(&[10.0, 20.0, 30.0], &[1, 3]);
    let grads = concat.backward(&[a, b], &z, &[dz], &Memory::Empty, false)?;
    assert_eq!(grads.inputs[0], Tensor::new(&[10.0, 20.0], &[1, 2]));
    assert_eq!(grads.inputs[1], Tensor::new(&[30.0], &[1, 1]));
    Ok(())
}

#[test]
fn test_lstm_output_modes() -> Result<(), LayerError> {
    let mut rng = StdRng::seed_from_u64(7);
    let x = Tensor::new_uniform(-1.0, 1.0, &[2, 3, 5], &mut rng);

    let mut sequence = Lstm::new(4);
    sequence.infer_size(&[vec![3]])?;
    sequence.initialize_learnable_parameters(&mut rng)?;
    assert_eq!(sequence.learnable_parameters()[1].value().unwrap().shape(), &[16, 4]);
    // 遗忘门偏置初始化为1
    let bias = sequence.learnable_parameters()[2].value().unwrap().to_vec();
    assert_eq!(&bias[4..8], &[1.0; 4]);
    assert_eq!(&bias[..4], &[0.0; 4]);
    assert_eq!(sequence.predict(&[x.clone()])?[0].shape(), &[2, 4, 5]);

    let mut last = Lstm::new(4).output_mode(OutputMode::Last);
    last.infer_size(&[vec![3]])?;
    last.initialize_learnable_parameters(&mut rng)?;
    let z = last.predict(&[x])?;
    assert_eq!(z[0].shape(), &[2, 4]);
    // 隐藏状态由tanh与sigmoid相乘得到
    assert!(z[0].to_vec().iter().all(|v| v.abs() < 1.0));

    let fixed = Lstm::new(2).input_size(3);
    assert!(fixed.has_size_determined());
    let shapes: Vec<_> = fixed
        .learnable_parameters()
        .iter()
        .map(|p| p.expected_shape().map(<[usize]>::to_vec))
        .collect();
    assert_eq!(shapes, vec![Some(vec![8, 3]), Some(vec![8, 2]), Some(vec![8])]);
    Ok(())
}

#[test]
fn test_output_losses() -> Result<(), LayerError> {
    let classification = ClassificationOutput::new();
    let y = Tensor::new(&[0.5, 0.5, 0.25, 0.75], &[2, 2]);
    let t = Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]);
    let expected = -(0.5f32.ln() + 0.75f32.ln()) / 2.0;
    assert_abs_diff_eq!(classification.forward_loss(&y, &t)?, expected, epsilon = 1e-6);
    let dy = classification.backward_loss(&y, &t)?;
    assert_all_close(&dy, &[-1.0, 0.0, 0.0, -1.0 / 1.5], 1e-6);

    let regression = RegressionOutput::new();
    let y = Tensor::new(&[1.0, 2.0], &[1, 2]);
    let t = Tensor::zeros(&[1, 2]);
    assert_abs_diff_eq!(regression.forward_loss(&y, &t)?, 2.5, epsilon = 1e-6);
    assert_eq!(regression.backward_loss(&y, &t)?, y);

    assert_err!(
        regression.forward_loss(&y, &Tensor::zeros(&[2, 1])),
        LayerError::InputShapeMismatch(_)
    );
    Ok(())
}

#[test]
fn test_input_layer_checks_shape() {
    let input = FeatureInput::new(3);
    assert!(input.predict(&[Tensor::zeros(&[5, 3])]).is_ok());
    assert_err!(input.predict(&[Tensor::zeros(&[5, 4])]), LayerError::InputShapeMismatch(_));
}
