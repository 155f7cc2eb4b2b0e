/*
 * @Description  : 激活层：ReLU、Leaky ReLU、Softmax（沿通道维，即第1维）
 */

use super::{single, single_size, LayerError, LayerGradients, Memory, Size, TraitLayer};
use crate::tensor::Tensor;
use ndarray::Axis;

/// ReLU：max(x, 0)
#[derive(Debug, Clone, Default)]
pub struct Relu;

impl Relu {
    pub const fn new() -> Self {
        Self
    }
}

impl TraitLayer for Relu {
    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        Ok(vec![single_size(input_sizes)?.clone()])
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        Ok(vec![single(x)?.map(|v| v.max(0.0))])
    }

    fn backward(
        &self,
        x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        _memory: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        let dx = single(dz)?.zip_map(single(x)?, |g, v| if v > 0.0 { g } else { 0.0 });
        Ok(LayerGradients {
            inputs: vec![dx],
            parameters: vec![],
        })
    }
}

/// Leaky ReLU：x > 0 时为 x，否则为 scale·x
#[derive(Debug, Clone)]
pub struct LeakyRelu {
    scale: f32,
}

impl Default for LeakyRelu {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl LeakyRelu {
    pub const fn new(scale: f32) -> Self {
        Self { scale }
    }
}

impl TraitLayer for LeakyRelu {
    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        Ok(vec![single_size(input_sizes)?.clone()])
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        let scale = self.scale;
        Ok(vec![single(x)?.map(|v| if v > 0.0 { v } else { scale * v })])
    }

    fn backward(
        &self,
        x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        _memory: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        let scale = self.scale;
        let dx = single(dz)?.zip_map(single(x)?, |g, v| if v > 0.0 { g } else { scale * g });
        Ok(LayerGradients {
            inputs: vec![dx],
            parameters: vec![],
        })
    }
}

/// Softmax，沿通道维归一化
#[derive(Debug, Clone, Default)]
pub struct Softmax;

impl Softmax {
    pub const fn new() -> Self {
        Self
    }
}

fn check_rank(x: &Tensor) -> Result<(), LayerError> {
    if x.dimension() < 2 {
        return Err(LayerError::UnsupportedInputRank {
            rank: x.dimension(),
            supported: "至少2维[N, C, ..]",
        });
    }
    Ok(())
}

impl TraitLayer for Softmax {
    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        Ok(vec![single_size(input_sizes)?.clone()])
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        let x = single(x)?;
        check_rank(x)?;
        let mut out = x.array().clone();
        for mut lane in out.lanes_mut(Axis(1)) {
            // 减去最大值，避免exp溢出
            let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            lane.mapv_inplace(|v| (v - max).exp());
            let sum = lane.sum();
            lane.mapv_inplace(|v| v / sum);
        }
        Ok(vec![Tensor::from_array(out)])
    }

    /// dX = Z ⊙ (dZ - Σ_c(dZ ⊙ Z))
    fn backward(
        &self,
        _x: &[Tensor],
        z: &[Tensor],
        dz: &[Tensor],
        _memory: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        let z = single(z)?;
        let dz = single(dz)?;
        check_rank(z)?;
        let z = z.array();
        let dz = dz.array();
        let inner = (dz * z).sum_axis(Axis(1)).insert_axis(Axis(1));
        let dx = z * &(dz - &inner);
        Ok(LayerGradients {
            inputs: vec![Tensor::from_array(dx)],
            parameters: vec![],
        })
    }
}
