/*
 * @Description  : Dropout 层
 *
 * 推理时为恒等变换；训练时以概率`probability`把元素置0，其余元素放大`1/(1-probability)`，
 * 所用的掩码作为记忆保存，反向传播复用同一掩码。
 */

use super::{single, single_size, LayerError, LayerGradients, Memory, Size, TraitLayer};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct Dropout {
    probability: f32,
}

impl Default for Dropout {
    fn default() -> Self {
        Self { probability: 0.5 }
    }
}

impl Dropout {
    /// `probability`须在[0, 1)内
    pub fn new(probability: f32) -> Result<Self, LayerError> {
        if !(0.0..1.0).contains(&probability) {
            return Err(LayerError::InvalidConfiguration(format!(
                "dropout概率须在[0, 1)内，得到{probability}"
            )));
        }
        Ok(Self { probability })
    }

    pub const fn probability(&self) -> f32 {
        self.probability
    }
}

impl TraitLayer for Dropout {
    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        Ok(vec![single_size(input_sizes)?.clone()])
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        Ok(vec![single(x)?.clone()])
    }

    fn forward(&self, x: &[Tensor], rng: &mut StdRng) -> Result<(Vec<Tensor>, Memory), LayerError> {
        let x = single(x)?;
        let keep_scale = 1.0 / (1.0 - self.probability);
        let mask_data = (0..x.size())
            .map(|_| {
                if rng.r#gen::<f32>() < self.probability {
                    0.0
                } else {
                    keep_scale
                }
            })
            .collect::<Vec<_>>();
        let mask = Tensor::try_new(mask_data, x.shape())?;
        Ok((vec![x * &mask], Memory::Tensors(vec![mask])))
    }

    fn backward(
        &self,
        _x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        memory: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        let mask = memory.tensors()?.first().ok_or(LayerError::MissingMemory)?;
        Ok(LayerGradients {
            inputs: vec![single(dz)? * mask],
            parameters: vec![],
        })
    }
}
