/*
 * @Description  : 全连接层 Z = W·X + b
 *
 * 输入/输出形状：
 * - 特征 [N, I] -> [N, O]
 * - 图像 [N, C, H, W] -> 按观测展平为 [N, C*H*W] -> [N, O]
 * - 序列 [N, C, T] -> 每个时间步独立计算 -> [N, O, T]
 */

use super::{single, single_size, LayerError, LayerGradients, Memory, Size, TraitLayer};
use crate::nn::param::{glorot_uniform, LearnableParameter};
use crate::tensor::Tensor;
use rand::rngs::StdRng;

/// 全连接层
///
/// 参数：`Weights` `[O, I]`，`Bias` `[O]`。输入尺寸`I`可留空，由输入自动确定。
#[derive(Debug, Clone)]
pub struct FullyConnected {
    output_size: usize,
    input_size: Option<usize>,
    parameters: [LearnableParameter; 2],
}

/// 把输入整理成二维`[M, I]`（每行一个观测或一个时间步）后，如何还原
enum RowLayout {
    Flat,
    Image { shape: Vec<usize> },
    Sequence { batch_size: usize, steps: usize },
}

impl RowLayout {
    fn to_rows(x: &Tensor) -> Result<(Tensor, Self), LayerError> {
        let shape = x.shape();
        match shape.len() {
            2 => Ok((x.clone(), Self::Flat)),
            3 => {
                let (n, c, t) = (shape[0], shape[1], shape[2]);
                let rows = x.permute(&[0, 2, 1]).try_reshape(&[n * t, c])?;
                Ok((rows, Self::Sequence { batch_size: n, steps: t }))
            }
            4 => {
                let n = shape[0];
                let rows = x.try_reshape(&[n, shape[1..].iter().product()])?;
                Ok((rows, Self::Image { shape: shape.to_vec() }))
            }
            rank => Err(LayerError::UnsupportedInputRank {
                rank,
                supported: "特征[N, C]、序列[N, C, T]或图像[N, C, H, W]",
            }),
        }
    }

    /// 还原输出`[M, O]`
    fn output_from_rows(&self, rows: Tensor) -> Result<Tensor, LayerError> {
        match *self {
            Self::Flat | Self::Image { .. } => Ok(rows),
            Self::Sequence { batch_size, steps } => {
                let o = rows.shape()[1];
                Ok(rows.try_reshape(&[batch_size, steps, o])?.permute(&[0, 2, 1]))
            }
        }
    }

    /// 还原输入梯度`[M, I]`
    fn input_from_rows(&self, rows: Tensor) -> Result<Tensor, LayerError> {
        match self {
            Self::Flat => Ok(rows),
            Self::Image { shape } => Ok(rows.try_reshape(shape)?),
            Self::Sequence { batch_size, steps } => {
                let c = rows.shape()[1];
                Ok(rows.try_reshape(&[*batch_size, *steps, c])?.permute(&[0, 2, 1]))
            }
        }
    }
}

impl FullyConnected {
    pub fn new(output_size: usize) -> Self {
        Self {
            output_size,
            input_size: None,
            parameters: [
                LearnableParameter::new("Weights"),
                LearnableParameter::new("Bias"),
            ],
        }
    }

    pub fn input_size(mut self, input_size: usize) -> Self {
        self.input_size = Some(input_size);
        self.parameters = [
            LearnableParameter::with_expected_shape("Weights", vec![self.output_size, input_size]),
            LearnableParameter::with_expected_shape("Bias", vec![self.output_size]),
        ];
        self
    }

    pub const fn output_size(&self) -> usize {
        self.output_size
    }
}

impl TraitLayer for FullyConnected {
    fn has_size_determined(&self) -> bool {
        self.input_size.is_some()
    }

    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        single_size(input_sizes)?;
        Ok(vec![vec![self.output_size]])
    }

    fn infer_size(&mut self, input_sizes: &[Size]) -> Result<(), LayerError> {
        let size = single_size(input_sizes)?;
        let input_size = size.iter().product::<usize>();
        match self.input_size {
            Some(expected) if expected != input_size => {
                return Err(LayerError::WrongLayerSize {
                    expected: vec![expected],
                    got: size.clone(),
                })
            }
            _ => self.input_size = Some(input_size),
        }
        let [weights, bias] = &mut self.parameters;
        weights.set_expected_shape(vec![self.output_size, input_size])?;
        bias.set_expected_shape(vec![self.output_size])
    }

    fn learnable_parameters(&self) -> &[LearnableParameter] {
        &self.parameters
    }

    fn learnable_parameters_mut(&mut self) -> &mut [LearnableParameter] {
        &mut self.parameters
    }

    fn initialize_learnable_parameters(&mut self, rng: &mut StdRng) -> Result<(), LayerError> {
        let fan_in = self.input_size.ok_or(LayerError::SizeNotDetermined)?;
        let fan_out = self.output_size;
        let [weights, bias] = &mut self.parameters;
        weights.initialize_with(|shape| glorot_uniform(shape, fan_in, fan_out, rng))?;
        bias.initialize_with(Tensor::zeros)
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        let (rows, layout) = RowLayout::to_rows(single(x)?)?;
        let weights = self.parameters[0].try_value()?;
        let bias = self.parameters[1].try_value()?;
        if rows.shape()[1] != weights.shape()[1] {
            return Err(LayerError::InputShapeMismatch(format!(
                "全连接层要求输入尺寸为{}，实际为{}",
                weights.shape()[1],
                rows.shape()[1]
            )));
        }
        let z = rows.mat_mul(&weights.transpose())? + bias;
        Ok(vec![layout.output_from_rows(z)?])
    }

    fn backward(
        &self,
        x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        _memory: &Memory,
        need_parameter_gradients: bool,
    ) -> Result<LayerGradients, LayerError> {
        let (rows, layout) = RowLayout::to_rows(single(x)?)?;
        let (dz_rows, _) = RowLayout::to_rows(single(dz)?)?;
        let weights = self.parameters[0].try_value()?;

        let dx = layout.input_from_rows(dz_rows.mat_mul(weights)?)?;
        let parameters = if need_parameter_gradients {
            vec![dz_rows.transpose().mat_mul(&rows)?, dz_rows.sum_axis(0)]
        } else {
            vec![]
        };
        Ok(LayerGradients {
            inputs: vec![dx],
            parameters,
        })
    }
}
