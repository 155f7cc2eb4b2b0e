/*
 * @Description  : 求解器：把梯度变成参数增量
 */

mod sgdm;

pub use sgdm::Sgdm;

use crate::nn::param::LearnableParameter;
use crate::tensor::Tensor;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SolverError {
    #[error("梯度有{gradients}个，学习率系数却有{factors}个")]
    LengthMismatch { gradients: usize, factors: usize },
    #[error("第{index}个参数的梯度形状{got:?}与之前的{expected:?}不一致")]
    ShapeMismatch {
        index: usize,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
}

/// 求解器接口。求解器是有状态的（如动量），同一实例只能顺序调用
pub trait Solver {
    /// 由梯度（全局参数顺序）计算增量；梯度缺失或学习率系数为0的参数增量为`None`
    fn calculate_update(
        &mut self,
        gradients: &[Option<Tensor>],
        learn_rate_factors: &[f32],
        global_learn_rate: f32,
    ) -> Result<Vec<Option<Tensor>>, SolverError>;

    /// 清空内部状态
    fn reset(&mut self);
}

/// L2正则化：`g += λ·l2_factor·W`
pub fn apply_l2_regularization(
    gradients: &mut [Option<Tensor>],
    parameters: &[&LearnableParameter],
    lambda: f32,
) -> Result<(), SolverError> {
    if gradients.len() != parameters.len() {
        return Err(SolverError::LengthMismatch {
            gradients: gradients.len(),
            factors: parameters.len(),
        });
    }
    if lambda == 0.0 {
        return Ok(());
    }
    for (index, (gradient, parameter)) in gradients.iter_mut().zip(parameters).enumerate() {
        let (Some(g), Some(w)) = (gradient.as_mut(), parameter.value()) else {
            continue;
        };
        if !g.is_same_shape(w) {
            return Err(SolverError::ShapeMismatch {
                index,
                expected: w.shape().to_vec(),
                got: g.shape().to_vec(),
            });
        }
        *g += &((lambda * parameter.l2_factor) * w);
    }
    Ok(())
}
