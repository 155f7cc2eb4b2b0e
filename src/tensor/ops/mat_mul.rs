/*
 * @Description  : 二维张量（矩阵）乘法与转置，供全连接层、LSTM等使用
 */

use crate::errors::{Operator, TensorError};
use crate::tensor::Tensor;
use ndarray::Ix2;

impl Tensor {
    /// 矩阵乘法：`[m, k] x [k, n] -> [m, n]`
    pub fn mat_mul(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        let mismatch = || TensorError::OperatorError {
            operator: Operator::Mul,
            tensor1_shape: self.shape().to_vec(),
            tensor2_shape: other.shape().to_vec(),
        };
        let a = self.data.view().into_dimensionality::<Ix2>().map_err(|_| mismatch())?;
        let b = other.data.view().into_dimensionality::<Ix2>().map_err(|_| mismatch())?;
        if a.ncols() != b.nrows() {
            return Err(mismatch());
        }
        Ok(Tensor {
            data: a.dot(&b).into_dyn(),
        })
    }

    /// 二维张量转置（标准布局）
    pub fn transpose(&self) -> Tensor {
        self.permute(&[1, 0])
    }
}
