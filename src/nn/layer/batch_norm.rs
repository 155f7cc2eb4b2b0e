/*
 * @Description  : 批归一化层
 *
 * 沿通道维（第1维）归一化，对其余各维（批次、空间或时间）求统计量：
 * - 训练（forward）：用本批次的均值/方差，并在记忆中保存归一化结果与统计量
 * - 推理（predict）：用运行均值/方差（网络状态，经`updated_state`/`set_state`更新）
 */

use super::{
    expand_channels, single, single_size, LayerError, LayerGradients, Memory, Size, TraitLayer,
};
use crate::nn::param::LearnableParameter;
use crate::tensor::Tensor;
use rand::rngs::StdRng;

/// 运行统计量的衰减系数：running = (1 - decay)·running + decay·batch
pub const DEFAULT_DECAY: f32 = 0.1;

/// 批归一化层
///
/// 参数：`Offset` `[C]`（初值0），`Scale` `[C]`（初值1）。
#[derive(Debug, Clone)]
pub struct BatchNormalization {
    num_channels: Option<usize>,
    epsilon: f32,
    decay: f32,
    trained_mean: Option<Tensor>,
    trained_variance: Option<Tensor>,
    parameters: [LearnableParameter; 2],
}

impl Default for BatchNormalization {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchNormalization {
    pub const fn new() -> Self {
        Self {
            num_channels: None,
            epsilon: 1e-5,
            decay: DEFAULT_DECAY,
            trained_mean: None,
            trained_variance: None,
            parameters: [
                LearnableParameter::new("Offset"),
                LearnableParameter::new("Scale"),
            ],
        }
    }

    pub fn epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn decay(mut self, decay: f32) -> Self {
        self.decay = decay;
        self
    }

    pub fn trained_mean(&self) -> Option<&Tensor> {
        self.trained_mean.as_ref()
    }

    pub fn trained_variance(&self) -> Option<&Tensor> {
        self.trained_variance.as_ref()
    }

    fn check(&self, x: &Tensor) -> Result<usize, LayerError> {
        if x.dimension() < 2 {
            return Err(LayerError::UnsupportedInputRank {
                rank: x.dimension(),
                supported: "至少2维[N, C, ..]",
            });
        }
        let c = self.num_channels.ok_or(LayerError::SizeNotDetermined)?;
        if x.shape()[1] != c {
            return Err(LayerError::InputShapeMismatch(format!(
                "批归一化层要求{c}个通道，实际为{}",
                x.shape()[1]
            )));
        }
        Ok(c)
    }

    /// 每个通道参与统计的元素个数
    fn count_per_channel(x: &Tensor) -> usize {
        x.size() / x.shape()[1].max(1)
    }

    fn normalize(
        &self,
        x: &Tensor,
        mean: &Tensor,
        variance: &Tensor,
    ) -> Result<(Tensor, Tensor, Tensor), LayerError> {
        let epsilon = self.epsilon;
        let inv_std = variance.map(|v| 1.0 / (v + epsilon).sqrt());
        let x_hat =
            &(x - &expand_channels(mean, x.shape())?) * &expand_channels(&inv_std, x.shape())?;
        let scale = self.parameters[1].try_value()?;
        let offset = self.parameters[0].try_value()?;
        let z = &x_hat * &expand_channels(scale, x.shape())? + expand_channels(offset, x.shape())?;
        Ok((z, x_hat, inv_std))
    }
}

impl TraitLayer for BatchNormalization {
    fn has_size_determined(&self) -> bool {
        self.num_channels.is_some()
    }

    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        Ok(vec![single_size(input_sizes)?.clone()])
    }

    fn infer_size(&mut self, input_sizes: &[Size]) -> Result<(), LayerError> {
        let size = single_size(input_sizes)?;
        let c = *size.first().ok_or(LayerError::UnsupportedInputRank {
            rank: 1,
            supported: "至少2维[N, C, ..]",
        })?;
        match self.num_channels {
            Some(expected) if expected != c => {
                return Err(LayerError::WrongLayerSize {
                    expected: vec![expected],
                    got: vec![c],
                })
            }
            _ => self.num_channels = Some(c),
        }
        for p in &mut self.parameters {
            p.set_expected_shape(vec![c])?;
        }
        Ok(())
    }

    fn learnable_parameters(&self) -> &[LearnableParameter] {
        &self.parameters
    }

    fn learnable_parameters_mut(&mut self) -> &mut [LearnableParameter] {
        &mut self.parameters
    }

    fn initialize_learnable_parameters(&mut self, _rng: &mut StdRng) -> Result<(), LayerError> {
        let c = self.num_channels.ok_or(LayerError::SizeNotDetermined)?;
        let [offset, scale] = &mut self.parameters;
        offset.initialize_with(Tensor::zeros)?;
        scale.initialize_with(Tensor::ones)?;
        if self.trained_mean.is_none() {
            self.trained_mean = Some(Tensor::zeros(&[c]));
        }
        if self.trained_variance.is_none() {
            self.trained_variance = Some(Tensor::ones(&[c]));
        }
        Ok(())
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        let x = single(x)?;
        self.check(x)?;
        let mean = self.trained_mean.as_ref().ok_or(LayerError::SizeNotDetermined)?;
        let variance = self.trained_variance.as_ref().ok_or(LayerError::SizeNotDetermined)?;
        Ok(vec![self.normalize(x, mean, variance)?.0])
    }

    /// 记忆：[归一化后的输入x̂, 1/sqrt(σ²+ε), 批均值, 批方差]
    fn forward(
        &self,
        x: &[Tensor],
        _rng: &mut StdRng,
    ) -> Result<(Vec<Tensor>, Memory), LayerError> {
        let x = single(x)?;
        self.check(x)?;
        let m = Self::count_per_channel(x) as f32;
        let mean = &x.sum_except_axis(1) * (1.0 / m);
        let centered = x - &expand_channels(&mean, x.shape())?;
        let variance = &centered.map(|v| v * v).sum_except_axis(1) * (1.0 / m);
        let (z, x_hat, inv_std) = self.normalize(x, &mean, &variance)?;
        Ok((vec![z], Memory::Tensors(vec![x_hat, inv_std, mean, variance])))
    }

    /// dx̂ = dZ·γ
    /// dX = (1/m)·inv_std·(m·dx̂ - Σdx̂ - x̂·Σ(dx̂·x̂))
    fn backward(
        &self,
        x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        memory: &Memory,
        need_parameter_gradients: bool,
    ) -> Result<LayerGradients, LayerError> {
        let x = single(x)?;
        let dz = single(dz)?;
        let (x_hat, inv_std) = match memory.tensors()? {
            [x_hat, inv_std, ..] => (x_hat, inv_std),
            _ => return Err(LayerError::MissingMemory),
        };
        let shape = x.shape();
        let m = Self::count_per_channel(x) as f32;
        let scale = self.parameters[1].try_value()?;

        let dx_hat = dz * &expand_channels(scale, shape)?;
        let sum_dx_hat = expand_channels(&dx_hat.sum_except_axis(1), shape)?;
        let sum_dx_hat_x_hat = expand_channels(&(&dx_hat * x_hat).sum_except_axis(1), shape)?;
        let dx = &(&(&(m * &dx_hat) - &sum_dx_hat) - &(x_hat * &sum_dx_hat_x_hat))
            * &expand_channels(&(inv_std * (1.0 / m)), shape)?;

        let parameters = if need_parameter_gradients {
            vec![dz.sum_except_axis(1), (dz * x_hat).sum_except_axis(1)]
        } else {
            vec![]
        };
        Ok(LayerGradients {
            inputs: vec![dx],
            parameters,
        })
    }

    /// 按衰减系数混合运行统计量；运行方差使用无偏的批方差
    fn updated_state(&self, memory: &Memory) -> Result<Option<Vec<Tensor>>, LayerError> {
        let (x_hat, batch_mean, batch_variance) = match memory.tensors()? {
            [x_hat, _, mean, variance] => (x_hat, mean, variance),
            _ => return Err(LayerError::MissingMemory),
        };
        let running_mean = self.trained_mean.as_ref().ok_or(LayerError::SizeNotDetermined)?;
        let running_variance = self
            .trained_variance
            .as_ref()
            .ok_or(LayerError::SizeNotDetermined)?;
        let m = Self::count_per_channel(x_hat) as f32;
        let unbiased = if m > 1.0 {
            batch_variance * (m / (m - 1.0))
        } else {
            batch_variance.clone()
        };
        let decay = self.decay;
        let new_mean = (1.0 - decay) * running_mean + &(decay * batch_mean);
        let new_variance = (1.0 - decay) * running_variance + &(decay * &unbiased);
        Ok(Some(vec![new_mean, new_variance]))
    }

    fn set_state(&mut self, state: &[Tensor]) -> Result<(), LayerError> {
        let c = self.num_channels.ok_or(LayerError::SizeNotDetermined)?;
        match state {
            [mean, variance] if mean.shape() == [c] && variance.shape() == [c] => {
                self.trained_mean = Some(mean.clone());
                self.trained_variance = Some(variance.clone());
                Ok(())
            }
            _ => Err(LayerError::InvalidConfiguration(format!(
                "批归一化层的状态应为两个长度为{c}的张量"
            ))),
        }
    }
}
