use crate::tensor::Tensor;
use ndarray::{Axis, Zip};

impl From<f32> for Tensor {
    /// 实现 From<f32> trait 用于将`f32`类型转换为形状为`[1]`的张量
    fn from(scalar: f32) -> Self {
        Tensor::new(&[scalar], &[1])
    }
}

impl Tensor {
    /// 对张量中的所有元素求和，返回纯数
    pub fn sum(&self) -> f32 {
        let mut value = 0.0;
        Zip::from(&self.data).for_each(|a| value += a);
        value
    }

    /// 对两个形状一致的张量逐元素相乘后求和
    pub fn dot_sum(&self, other: &Tensor) -> f32 {
        (self * other).sum()
    }

    /// 逐元素映射
    pub fn map<F: Fn(f32) -> f32>(&self, f: F) -> Tensor {
        Tensor {
            data: self.data.mapv(f),
        }
    }

    /// 两个形状一致的张量逐元素组合
    pub fn zip_map<F: Fn(f32, f32) -> f32>(&self, other: &Tensor, f: F) -> Tensor {
        assert!(
            self.is_same_shape(other),
            "zip_map要求形状一致：{:?} vs {:?}",
            self.shape(),
            other.shape()
        );
        let mut data = self.data.clone();
        Zip::from(&mut data)
            .and(&other.data)
            .for_each(|a, &b| *a = f(*a, b));
        Tensor { data }
    }

    /// 所有元素绝对值的最大值（空张量为0）
    pub fn max_abs(&self) -> f32 {
        self.data.iter().fold(0.0f32, |m, &x| m.max(x.abs()))
    }

    /// 沿`axis`求和并消去该维
    pub fn sum_axis(&self, axis: usize) -> Tensor {
        Tensor {
            data: self.data.sum_axis(Axis(axis)),
        }
    }

    /// 对除`axis`外的所有维求和，得到长度为`shape[axis]`的一维张量（偏置/通道统计量的梯度用）
    pub fn sum_except_axis(&self, axis: usize) -> Tensor {
        let len = self.shape()[axis];
        let mut out = vec![0.0f32; len];
        for (i, lane) in self.data.axis_iter(Axis(axis)).enumerate() {
            out[i] = lane.sum();
        }
        Tensor::new(&out, &[len])
    }

    /// 判断两个张量能否按 NumPy 规则广播
    pub fn can_broadcast_with(&self, other: &Tensor) -> bool {
        let a = self.shape();
        let b = other.shape();
        a.iter()
            .rev()
            .zip(b.iter().rev())
            .all(|(&x, &y)| x == y || x == 1 || y == 1)
    }
}
