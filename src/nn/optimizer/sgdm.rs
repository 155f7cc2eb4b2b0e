/*
 * @Description  : 带动量的随机梯度下降（SGDM）
 *
 * v = momentum·v_prev − (lr·factor)·g，返回的增量即为新的v
 */

use super::{Solver, SolverError};
use crate::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct Sgdm {
    momentum: f32,
    /// 每个参数一个速度，首次更新前视为0
    velocity: Vec<Option<Tensor>>,
}

impl Sgdm {
    pub const fn new(momentum: f32) -> Self {
        Self {
            momentum,
            velocity: Vec::new(),
        }
    }

    pub const fn momentum(&self) -> f32 {
        self.momentum
    }

    pub fn velocity(&self) -> &[Option<Tensor>] {
        &self.velocity
    }
}

impl Solver for Sgdm {
    fn calculate_update(
        &mut self,
        gradients: &[Option<Tensor>],
        learn_rate_factors: &[f32],
        global_learn_rate: f32,
    ) -> Result<Vec<Option<Tensor>>, SolverError> {
        if gradients.len() != learn_rate_factors.len() {
            return Err(SolverError::LengthMismatch {
                gradients: gradients.len(),
                factors: learn_rate_factors.len(),
            });
        }
        if self.velocity.len() != gradients.len() {
            self.velocity.resize(gradients.len(), None);
        }

        let mut deltas = Vec::with_capacity(gradients.len());
        for (index, (gradient, &factor)) in gradients.iter().zip(learn_rate_factors).enumerate() {
            let Some(g) = gradient.as_ref().filter(|_| factor != 0.0) else {
                deltas.push(None);
                continue;
            };
            let step = (global_learn_rate * factor) * g;
            let v = match &self.velocity[index] {
                Some(previous) if !previous.is_same_shape(g) => {
                    return Err(SolverError::ShapeMismatch {
                        index,
                        expected: previous.shape().to_vec(),
                        got: g.shape().to_vec(),
                    })
                }
                Some(previous) => self.momentum * previous - step,
                None => -&step,
            };
            self.velocity[index] = Some(v.clone());
            deltas.push(Some(v));
        }
        Ok(deltas)
    }

    fn reset(&mut self) {
        self.velocity.clear();
    }
}
