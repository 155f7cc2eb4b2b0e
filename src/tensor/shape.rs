use super::Tensor;
use crate::errors::{Operator, TensorError};
use ndarray::{concatenate, Axis, IxDyn, Slice};

impl Tensor {
    pub fn reshape(&self, shape: &[usize]) -> Self {
        match self.try_reshape(shape) {
            Ok(t) => t,
            Err(e) => panic!("{}", e),
        }
    }

    pub fn try_reshape(&self, shape: &[usize]) -> Result<Self, TensorError> {
        let new_total_elements: usize = shape.iter().product();
        if self.size() != new_total_elements {
            return Err(TensorError::IncompatibleShape);
        }
        // 先转成标准布局，保证按逻辑顺序重排
        let data = self.data.as_standard_layout().to_owned();
        data.into_shape(IxDyn(shape))
            .map(Tensor::from_array)
            .map_err(|_| TensorError::IncompatibleShape)
    }

    /// 按`axes`交换维度，返回标准布局的新张量
    pub fn permute(&self, axes: &[usize]) -> Self {
        let permuted = self.data.view().permuted_axes(IxDyn(axes));
        Tensor::from_array(permuted.as_standard_layout().to_owned())
    }

    /// 沿`axis`把多个张量拼接起来，除`axis`外其余维度必须一致
    pub fn concat(tensors: &[&Tensor], axis: usize) -> Result<Tensor, TensorError> {
        let first = tensors.first().ok_or(TensorError::EmptyList)?;
        for t in tensors.iter().skip(1) {
            let compatible = t.dimension() == first.dimension()
                && t
                    .shape()
                    .iter()
                    .zip(first.shape())
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !compatible {
                return Err(TensorError::OperatorError {
                    operator: Operator::Concat,
                    tensor1_shape: first.shape().to_vec(),
                    tensor2_shape: t.shape().to_vec(),
                });
            }
        }
        let views = tensors.iter().map(|t| t.data.view()).collect::<Vec<_>>();
        concatenate(Axis(axis), &views)
            .map(Tensor::from_array)
            .map_err(|_| TensorError::IncompatibleShape)
    }

    /// 截取`axis`维上`[start, end)`的部分
    pub fn slice_axis(&self, axis: usize, start: usize, end: usize) -> Result<Tensor, TensorError> {
        let len = self.shape().get(axis).copied().unwrap_or(0);
        if end > len || start > end {
            return Err(TensorError::IndexOutOfRange {
                axis,
                index: end,
                len,
            });
        }
        let view = self
            .data
            .slice_axis(Axis(axis), Slice::from(start as isize..end as isize));
        Ok(Tensor::from_array(view.to_owned()))
    }

    /// 按观测索引（第0维）挑选子批次
    pub fn select_observations(&self, indices: &[usize]) -> Result<Tensor, TensorError> {
        let len = self.batch_size();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(TensorError::IndexOutOfRange { axis: 0, index, len });
        }
        Ok(Tensor::from_array(self.data.select(Axis(0), indices)))
    }
}
