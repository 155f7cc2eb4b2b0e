/*
 * @Description  : 输出（损失）层
 *
 * 输出层没有输出端口，`predict`/`forward`原样传出输入（即网络的预测），
 * 反向传播时由`backward_loss`播下梯度。损失均按批大小N取平均。
 */

use super::{single, single_size, LayerError, LayerGradients, LayerRole, Memory, Size, TraitLayer};
use crate::tensor::Tensor;

/// 计算损失及其梯度时`Y`取值的下限
const MIN_PROBABILITY: f32 = f32::EPSILON;

/// 输出层的损失接口
pub trait OutputLayer {
    /// 损失值
    fn forward_loss(&self, y: &Tensor, t: &Tensor) -> Result<f32, LayerError>;

    /// 损失对预测`Y`的梯度
    fn backward_loss(&self, y: &Tensor, t: &Tensor) -> Result<Tensor, LayerError>;
}

fn check_targets(y: &Tensor, t: &Tensor) -> Result<f32, LayerError> {
    if !y.is_same_shape(t) {
        return Err(LayerError::InputShapeMismatch(format!(
            "预测形状{:?}与目标形状{:?}不一致",
            y.shape(),
            t.shape()
        )));
    }
    Ok(y.batch_size().max(1) as f32)
}

/// 尺寸为`[K]`（或`[K, 1, 1]`）的输出层共用的尺寸推断
fn infer_output_size(current: &mut Option<usize>, input_sizes: &[Size]) -> Result<(), LayerError> {
    let size = single_size(input_sizes)?;
    let k = size.iter().product::<usize>();
    match *current {
        Some(expected) if expected != k => Err(LayerError::WrongLayerSize {
            expected: vec![expected],
            got: size.clone(),
        }),
        _ => {
            *current = Some(k);
            Ok(())
        }
    }
}

fn pass_through(dz: &[Tensor]) -> Result<LayerGradients, LayerError> {
    Ok(LayerGradients {
        inputs: vec![single(dz)?.clone()],
        parameters: vec![],
    })
}

/// 分类输出层，交叉熵损失：-Σ T·ln(Y) / N
#[derive(Debug, Clone, Default)]
pub struct ClassificationOutput {
    num_classes: Option<usize>,
}

impl ClassificationOutput {
    pub const fn new() -> Self {
        Self { num_classes: None }
    }

    pub const fn num_classes(&self) -> Option<usize> {
        self.num_classes
    }
}

impl OutputLayer for ClassificationOutput {
    fn forward_loss(&self, y: &Tensor, t: &Tensor) -> Result<f32, LayerError> {
        let n = check_targets(y, t)?;
        let y_log = y.map(|v| v.max(MIN_PROBABILITY).ln());
        Ok(-t.dot_sum(&y_log) / n)
    }

    /// -(T / Y) / N
    fn backward_loss(&self, y: &Tensor, t: &Tensor) -> Result<Tensor, LayerError> {
        let n = check_targets(y, t)?;
        Ok(t.zip_map(y, |tv, yv| -(tv / yv.max(MIN_PROBABILITY)) / n))
    }
}

impl TraitLayer for ClassificationOutput {
    fn role(&self) -> LayerRole {
        LayerRole::Output
    }

    fn num_outputs(&self) -> Option<usize> {
        Some(0)
    }

    fn has_size_determined(&self) -> bool {
        self.num_classes.is_some()
    }

    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        single_size(input_sizes)?;
        Ok(vec![])
    }

    fn infer_size(&mut self, input_sizes: &[Size]) -> Result<(), LayerError> {
        infer_output_size(&mut self.num_classes, input_sizes)
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        Ok(vec![single(x)?.clone()])
    }

    fn backward(
        &self,
        _x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        _memory: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        pass_through(dz)
    }
}

/// 回归输出层，半均方误差：Σ (Y-T)² / (2N)
#[derive(Debug, Clone, Default)]
pub struct RegressionOutput {
    num_responses: Option<usize>,
}

impl RegressionOutput {
    pub const fn new() -> Self {
        Self {
            num_responses: None,
        }
    }

    pub const fn num_responses(&self) -> Option<usize> {
        self.num_responses
    }
}

impl OutputLayer for RegressionOutput {
    fn forward_loss(&self, y: &Tensor, t: &Tensor) -> Result<f32, LayerError> {
        let n = check_targets(y, t)?;
        let diff = y - t;
        Ok(diff.dot_sum(&diff) / (2.0 * n))
    }

    /// (Y-T) / N
    fn backward_loss(&self, y: &Tensor, t: &Tensor) -> Result<Tensor, LayerError> {
        let n = check_targets(y, t)?;
        Ok(&(y - t) * (1.0 / n))
    }
}

impl TraitLayer for RegressionOutput {
    fn role(&self) -> LayerRole {
        LayerRole::Output
    }

    fn num_outputs(&self) -> Option<usize> {
        Some(0)
    }

    fn has_size_determined(&self) -> bool {
        self.num_responses.is_some()
    }

    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        single_size(input_sizes)?;
        Ok(vec![])
    }

    fn infer_size(&mut self, input_sizes: &[Size]) -> Result<(), LayerError> {
        infer_output_size(&mut self.num_responses, input_sizes)
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        Ok(vec![single(x)?.clone()])
    }

    fn backward(
        &self,
        _x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        _memory: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        pass_through(dz)
    }
}
