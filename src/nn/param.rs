/*
 * @Description  : 可学习参数：由层持有的带学习率/L2系数的张量
 */

use crate::nn::layer::LayerError;
use crate::tensor::Tensor;

/// 可学习参数
///
/// 构造层时创建（值为空），`initialize_learnable_parameters`时填充，
/// 训练中每次迭代经`update_learnable_parameters`原地累加更新。
#[derive(Debug, Clone)]
pub struct LearnableParameter {
    name: &'static str,
    value: Option<Tensor>,
    /// 层尺寸确定后才能得知
    expected_shape: Option<Vec<usize>>,
    pub learn_rate_factor: f32,
    pub l2_factor: f32,
}

impl LearnableParameter {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: None,
            expected_shape: None,
            learn_rate_factor: 1.0,
            l2_factor: 1.0,
        }
    }

    /// 期望形状在构造时即已确定的参数
    pub(crate) fn with_expected_shape(name: &'static str, shape: Vec<usize>) -> Self {
        Self {
            expected_shape: Some(shape),
            ..Self::new(name)
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub fn value(&self) -> Option<&Tensor> {
        self.value.as_ref()
    }

    pub(crate) fn try_value(&self) -> Result<&Tensor, LayerError> {
        self.value
            .as_ref()
            .ok_or(LayerError::MissingParameterValue(self.name))
    }

    pub fn expected_shape(&self) -> Option<&[usize]> {
        self.expected_shape.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.value.is_some()
    }

    /// 学习率系数非零才参与训练
    pub fn is_learning(&self) -> bool {
        self.learn_rate_factor != 0.0
    }

    /// 设置参数值；若期望形状已确定，形状不符时报`InvalidParameterShape`
    pub fn set_value(&mut self, value: Tensor) -> Result<(), LayerError> {
        if let Some(expected) = &self.expected_shape {
            if value.shape() != expected.as_slice() {
                return Err(LayerError::InvalidParameterShape {
                    parameter: self.name,
                    expected: expected.clone(),
                    got: value.shape().to_vec(),
                });
            }
        }
        self.value = Some(value);
        Ok(())
    }

    /// 由层尺寸推断出期望形状；已有值且形状不符时报错
    pub(crate) fn set_expected_shape(&mut self, shape: Vec<usize>) -> Result<(), LayerError> {
        if let Some(value) = &self.value {
            if value.shape() != shape.as_slice() {
                return Err(LayerError::InvalidParameterShape {
                    parameter: self.name,
                    expected: shape,
                    got: value.shape().to_vec(),
                });
            }
        }
        self.expected_shape = Some(shape);
        Ok(())
    }

    /// 若尚无值，用`init`按期望形状生成初值；已有值则保留
    pub(crate) fn initialize_with<F>(&mut self, init: F) -> Result<(), LayerError>
    where
        F: FnOnce(&[usize]) -> Tensor,
    {
        if self.value.is_some() {
            return Ok(());
        }
        let shape = self
            .expected_shape
            .as_deref()
            .ok_or(LayerError::SizeNotDetermined)?;
        self.value = Some(init(shape));
        Ok(())
    }

    /// 原地加上增量（形状须一致）
    pub(crate) fn apply_delta(&mut self, delta: &Tensor) -> Result<(), LayerError> {
        let value = self
            .value
            .as_mut()
            .ok_or(LayerError::MissingParameterValue(self.name))?;
        if !value.is_same_shape(delta) {
            return Err(LayerError::InvalidParameterShape {
                parameter: self.name,
                expected: value.shape().to_vec(),
                got: delta.shape().to_vec(),
            });
        }
        *value += delta;
        Ok(())
    }

    pub fn numel(&self) -> usize {
        self.value.as_ref().map_or(0, Tensor::size)
    }
}

/// Glorot（Xavier）均匀分布初始化：U(-a, a)，a = sqrt(6 / (fan_in + fan_out))
pub(crate) fn glorot_uniform<R: rand::Rng + ?Sized>(
    shape: &[usize],
    fan_in: usize,
    fan_out: usize,
    rng: &mut R,
) -> Tensor {
    let bound = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
    Tensor::new_uniform(-bound, bound, shape, rng)
}
