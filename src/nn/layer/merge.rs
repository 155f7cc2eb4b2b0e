/*
 * @Description  : 合并层：逐元素相加、沿某一维拼接
 *
 * 多输入层按输入端口顺序（in1, in2, ..）接收操作数，与连接的声明顺序无关。
 */

use super::{expect_count, LayerError, LayerGradients, Memory, Size, TraitLayer};
use crate::tensor::Tensor;

/// 把`n`个同形状输入逐元素相加
#[derive(Debug, Clone)]
pub struct Addition {
    num_inputs: usize,
}

impl Addition {
    pub fn new(num_inputs: usize) -> Result<Self, LayerError> {
        if num_inputs < 2 {
            return Err(LayerError::InvalidConfiguration(format!(
                "相加层至少需要2个输入，得到{num_inputs}"
            )));
        }
        Ok(Self { num_inputs })
    }
}

impl TraitLayer for Addition {
    fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        expect_count(input_sizes, self.num_inputs)?;
        let first = &input_sizes[0];
        if let Some(other) = input_sizes.iter().find(|s| *s != first) {
            return Err(LayerError::InputShapeMismatch(format!(
                "相加层的输入尺寸须一致：{first:?} vs {other:?}"
            )));
        }
        Ok(vec![first.clone()])
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        expect_count(x, self.num_inputs)?;
        let mut sum = x[0].clone();
        for t in &x[1..] {
            if !sum.is_same_shape(t) {
                return Err(LayerError::InputShapeMismatch(format!(
                    "相加层的输入形状须一致：{:?} vs {:?}",
                    sum.shape(),
                    t.shape()
                )));
            }
            sum += t;
        }
        Ok(vec![sum])
    }

    fn backward(
        &self,
        x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        _memory: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        expect_count(x, self.num_inputs)?;
        let dz = dz.first().ok_or(LayerError::InputCountMismatch { expected: 1, got: 0 })?;
        Ok(LayerGradients {
            inputs: vec![dz.clone(); self.num_inputs],
            parameters: vec![],
        })
    }
}

/// 沿`axis`拼接`n`个输入
///
/// `axis`以单个观测的尺寸计（0为通道维），故深度拼接即`axis = 0`。
#[derive(Debug, Clone)]
pub struct Concatenation {
    num_inputs: usize,
    axis: usize,
}

impl Concatenation {
    pub fn new(num_inputs: usize, axis: usize) -> Result<Self, LayerError> {
        if num_inputs < 2 {
            return Err(LayerError::InvalidConfiguration(format!(
                "拼接层至少需要2个输入，得到{num_inputs}"
            )));
        }
        Ok(Self { num_inputs, axis })
    }

    /// 沿通道维拼接
    pub fn depth(num_inputs: usize) -> Result<Self, LayerError> {
        Self::new(num_inputs, 0)
    }

    /// 数据张量中对应的维（跳过批次维）
    const fn tensor_axis(&self) -> usize {
        self.axis + 1
    }
}

impl TraitLayer for Concatenation {
    fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        expect_count(input_sizes, self.num_inputs)?;
        let first = &input_sizes[0];
        if self.axis >= first.len() {
            return Err(LayerError::InvalidConfiguration(format!(
                "拼接维{}超出输入尺寸{first:?}的维数",
                self.axis
            )));
        }
        let mut out = first.clone();
        out[self.axis] = 0;
        for size in input_sizes {
            let compatible = size.len() == first.len()
                && size
                    .iter()
                    .zip(first)
                    .enumerate()
                    .all(|(i, (a, b))| i == self.axis || a == b);
            if !compatible {
                return Err(LayerError::InputShapeMismatch(format!(
                    "拼接层的输入除第{}维外须一致：{first:?} vs {size:?}",
                    self.axis
                )));
            }
            out[self.axis] += size[self.axis];
        }
        Ok(vec![out])
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        expect_count(x, self.num_inputs)?;
        let refs = x.iter().collect::<Vec<_>>();
        Ok(vec![Tensor::concat(&refs, self.tensor_axis())?])
    }

    /// 把上游梯度按各输入在拼接维上的长度切回去
    fn backward(
        &self,
        x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        _memory: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        expect_count(x, self.num_inputs)?;
        let dz = dz.first().ok_or(LayerError::InputCountMismatch { expected: 1, got: 0 })?;
        let axis = self.tensor_axis();
        let mut start = 0;
        let mut inputs = Vec::with_capacity(x.len());
        for t in x {
            let len = t.shape()[axis];
            inputs.push(dz.slice_axis(axis, start, start + len)?);
            start += len;
        }
        Ok(LayerGradients {
            inputs,
            parameters: vec![],
        })
    }
}
