/*
 * @Description  : 输入层：图像、特征、序列
 *
 * 输入层没有输入端口，网络把外部数据直接交给它；它是反向传播的终点。
 */

use super::{
    expand_channels, single, LayerError, LayerGradients, LayerRole, Memory, Size, TraitLayer,
};
use crate::tensor::Tensor;

/// 输入数据的归一化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    #[default]
    None,
    /// 减去训练数据的均值（由`DagNetwork::compute_input_statistics`计算）
    ZeroCenter,
}

/// 各输入层共用的部分
#[derive(Debug, Clone)]
struct InputCore {
    size: Size,
    normalization: Normalization,
    mean: Option<Tensor>,
}

impl InputCore {
    fn new(size: Size) -> Self {
        Self {
            size,
            normalization: Normalization::None,
            mean: None,
        }
    }

    /// 外部数据的形状须为`[N, ..size]`（序列另加末尾的`T`）
    fn check(&self, x: &Tensor, has_time_axis: bool) -> Result<(), LayerError> {
        let rank = self.size.len() + 1 + usize::from(has_time_axis);
        let shape = x.shape();
        if shape.len() != rank || shape[1..=self.size.len()] != self.size[..] {
            return Err(LayerError::InputShapeMismatch(format!(
                "输入层要求每个观测的尺寸为{:?}，得到的数据形状为{:?}",
                self.size, shape
            )));
        }
        Ok(())
    }

    fn normalize(&self, x: &Tensor) -> Result<Tensor, LayerError> {
        match (&self.normalization, &self.mean) {
            (Normalization::ZeroCenter, Some(mean)) => Ok(x - mean),
            (Normalization::ZeroCenter, None) => Err(LayerError::InvalidConfiguration(
                "零中心化的输入层尚未设置均值".to_string(),
            )),
            (Normalization::None, _) => Ok(x.clone()),
        }
    }

    fn set_mean(&mut self, mean: Tensor) -> Result<(), LayerError> {
        if mean.shape() != self.size.as_slice() {
            return Err(LayerError::WrongLayerSize {
                expected: self.size.clone(),
                got: mean.shape().to_vec(),
            });
        }
        self.mean = Some(mean);
        Ok(())
    }
}

/// 图像输入层，尺寸`[C, H, W]`
#[derive(Debug, Clone)]
pub struct ImageInput {
    core: InputCore,
}

impl ImageInput {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            core: InputCore::new(vec![channels, height, width]),
        }
    }

    pub fn normalization(mut self, normalization: Normalization) -> Self {
        self.core.normalization = normalization;
        self
    }

    pub fn mean(&self) -> Option<&Tensor> {
        self.core.mean.as_ref()
    }
}

impl TraitLayer for ImageInput {
    fn role(&self) -> LayerRole {
        LayerRole::Input
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn forward_propagate_size(&self, _input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        Ok(vec![self.core.size.clone()])
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        let x = single(x)?;
        self.core.check(x, false)?;
        Ok(vec![self.core.normalize(x)?])
    }

    fn backward(
        &self,
        _: &[Tensor],
        _: &[Tensor],
        _: &[Tensor],
        _: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        Ok(LayerGradients::default())
    }

    fn needs_input_statistics(&self) -> bool {
        self.core.normalization == Normalization::ZeroCenter
    }

    fn set_input_statistics(&mut self, mean: Tensor) -> Result<(), LayerError> {
        self.core.set_mean(mean)
    }
}

/// 特征输入层，尺寸`[C]`
#[derive(Debug, Clone)]
pub struct FeatureInput {
    core: InputCore,
}

impl FeatureInput {
    pub fn new(num_features: usize) -> Self {
        Self {
            core: InputCore::new(vec![num_features]),
        }
    }

    pub fn normalization(mut self, normalization: Normalization) -> Self {
        self.core.normalization = normalization;
        self
    }

    pub fn mean(&self) -> Option<&Tensor> {
        self.core.mean.as_ref()
    }
}

impl TraitLayer for FeatureInput {
    fn role(&self) -> LayerRole {
        LayerRole::Input
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn forward_propagate_size(&self, _input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        Ok(vec![self.core.size.clone()])
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        let x = single(x)?;
        self.core.check(x, false)?;
        Ok(vec![self.core.normalize(x)?])
    }

    fn backward(
        &self,
        _: &[Tensor],
        _: &[Tensor],
        _: &[Tensor],
        _: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        Ok(LayerGradients::default())
    }

    fn needs_input_statistics(&self) -> bool {
        self.core.normalization == Normalization::ZeroCenter
    }

    fn set_input_statistics(&mut self, mean: Tensor) -> Result<(), LayerError> {
        self.core.set_mean(mean)
    }
}

/// 序列输入层，尺寸`[C]`，数据形状`[N, C, T]`
///
/// 零中心化时均值按通道计算（对观测与时间步求平均），形状为`[C]`。
#[derive(Debug, Clone)]
pub struct SequenceInput {
    core: InputCore,
}

impl SequenceInput {
    pub fn new(num_channels: usize) -> Self {
        Self {
            core: InputCore::new(vec![num_channels]),
        }
    }

    pub fn normalization(mut self, normalization: Normalization) -> Self {
        self.core.normalization = normalization;
        self
    }

    pub fn mean(&self) -> Option<&Tensor> {
        self.core.mean.as_ref()
    }
}

impl TraitLayer for SequenceInput {
    fn role(&self) -> LayerRole {
        LayerRole::Input
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn forward_propagate_size(&self, _input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        Ok(vec![self.core.size.clone()])
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        let x = single(x)?;
        self.core.check(x, true)?;
        match (&self.core.normalization, &self.core.mean) {
            (Normalization::ZeroCenter, Some(mean)) => {
                Ok(vec![x - &expand_channels(mean, x.shape())?])
            }
            _ => Ok(vec![self.core.normalize(x)?]),
        }
    }

    fn backward(
        &self,
        _: &[Tensor],
        _: &[Tensor],
        _: &[Tensor],
        _: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        Ok(LayerGradients::default())
    }

    fn needs_input_statistics(&self) -> bool {
        self.core.normalization == Normalization::ZeroCenter
    }

    /// 接受按观测累加得到的`[C, T]`均值，或已按通道平均的`[C]`
    fn set_input_statistics(&mut self, mean: Tensor) -> Result<(), LayerError> {
        let mean = if mean.dimension() == 2 {
            let steps = mean.shape()[1].max(1) as f32;
            &mean.sum_axis(1) * (1.0 / steps)
        } else {
            mean
        };
        self.core.set_mean(mean)
    }
}
