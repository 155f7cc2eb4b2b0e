use ndarray::{Array, IxDyn};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::errors::TensorError;

mod ops {
    pub mod add;
    pub mod eq;
    pub mod mat_mul;
    pub mod mul;
    pub mod others;
    pub mod sub;
}

mod index;
mod property;
mod shape;

#[cfg(test)]
mod tests;

/// 定义张量的结构体。其可以是标量、向量、矩阵或更高维度的数组。
/// 注：网络中流动的激活值一律是"批次优先"（batch-first）的：
/// 图像为`[N, C, H, W]`，特征为`[N, C]`，序列为`[N, C, T]`。
#[derive(Debug, Clone)]
pub struct Tensor {
    data: Array<f32, IxDyn>,
}

impl Tensor {
    /// 创建一个张量，`data`的长度必须和`shape`中所有元素的乘积相等（标量`shape`可以是`[]`）。
    /// 长度不符时会panic；需要可恢复错误时请使用`try_new`。
    pub fn new(data: &[f32], shape: &[usize]) -> Tensor {
        match Self::try_new(data.to_vec(), shape) {
            Ok(tensor) => tensor,
            Err(e) => panic!("{}", e),
        }
    }

    /// 同`new`，但长度与形状不符时返回错误
    pub fn try_new(data: Vec<f32>, shape: &[usize]) -> Result<Tensor, TensorError> {
        let data_len = data.len();
        Array::from_shape_vec(IxDyn(shape), data)
            .map(|data| Tensor { data })
            .map_err(|_| TensorError::DataShapeMismatch {
                data_len,
                shape: shape.to_vec(),
            })
    }

    pub fn zeros(shape: &[usize]) -> Tensor {
        Tensor {
            data: Array::zeros(IxDyn(shape)),
        }
    }

    pub fn ones(shape: &[usize]) -> Tensor {
        Self::filled(1.0, shape)
    }

    pub fn filled(value: f32, shape: &[usize]) -> Tensor {
        Tensor {
            data: Array::from_elem(IxDyn(shape), value),
        }
    }

    pub fn zeros_like(&self) -> Tensor {
        Self::zeros(self.shape())
    }

    /// 创建一个随机张量，其值在[min, max]的闭区间
    pub fn new_uniform<R: Rng + ?Sized>(
        min: f32,
        max: f32,
        shape: &[usize],
        rng: &mut R,
    ) -> Tensor {
        let uniform = Uniform::from(min..=max);
        let data = (0..shape.iter().product::<usize>())
            .map(|_| uniform.sample(rng))
            .collect::<Vec<_>>();
        Tensor::new(&data, shape)
    }

    pub(crate) fn from_array(data: Array<f32, IxDyn>) -> Tensor {
        Tensor { data }
    }
}
