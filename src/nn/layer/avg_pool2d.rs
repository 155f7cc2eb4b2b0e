/*
 * @Description  : 2D 平均池化层
 *
 * - 输入：[N, C, H, W]，输出：[N, C, H', W']
 * - 填充位置按0计入平均（除数恒为窗口大小）
 */

use super::max_pool2d::pool_geometry;
use super::{
    image_dims, image_size, single, single_size, LayerError, LayerGradients, Memory, Padding, Size,
    TraitLayer,
};
use crate::tensor::Tensor;
use rayon::prelude::*;

/// 2D 平均池化层
#[derive(Debug, Clone)]
pub struct AveragePooling2d {
    pool_size: (usize, usize),
    stride: (usize, usize),
    padding: Padding,
}

impl AveragePooling2d {
    /// 默认步长等于池化窗口
    pub fn new(pool_size: (usize, usize)) -> Self {
        Self {
            pool_size,
            stride: pool_size,
            padding: Padding::default(),
        }
    }

    pub fn stride(mut self, stride: (usize, usize)) -> Self {
        self.stride = stride;
        self
    }

    pub fn padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    fn window_len(&self) -> f32 {
        (self.pool_size.0 * self.pool_size.1) as f32
    }
}

impl TraitLayer for AveragePooling2d {
    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        let (c, h, w) = image_size(single_size(input_sizes)?)?;
        let geometry = pool_geometry(h, w, self.pool_size, self.stride, self.padding)?;
        Ok(vec![vec![c, geometry.out.0, geometry.out.1]])
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        let input = single(x)?;
        let (batch_size, channels, in_h, in_w) = image_dims(input)?;
        let geometry = pool_geometry(in_h, in_w, self.pool_size, self.stride, self.padding)?;
        let (out_h, out_w) = geometry.out;
        let window_len = self.window_len();

        let batch_results: Vec<Vec<f32>> = (0..batch_size)
            .into_par_iter()
            .map(|b| {
                let mut sample = Vec::with_capacity(channels * out_h * out_w);
                for c in 0..channels {
                    for oh in 0..out_h {
                        for ow in 0..out_w {
                            let sum: f32 = geometry
                                .window(oh, ow, in_h, in_w)
                                .map(|(ih, iw)| input[[b, c, ih, iw]])
                                .sum();
                            sample.push(sum / window_len);
                        }
                    }
                }
                sample
            })
            .collect();

        let all_data: Vec<f32> = batch_results.into_iter().flatten().collect();
        Ok(vec![Tensor::new(&all_data, &[batch_size, channels, out_h, out_w])])
    }

    /// 每个输出位置的梯度平均分给窗口内的有效输入位置
    fn backward(
        &self,
        x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        _memory: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        let input = single(x)?;
        let upstream_grad = single(dz)?;
        let (batch_size, channels, in_h, in_w) = image_dims(input)?;
        let geometry = pool_geometry(in_h, in_w, self.pool_size, self.stride, self.padding)?;
        let (out_h, out_w) = geometry.out;
        let window_len = self.window_len();

        let batch_results: Vec<Vec<f32>> = (0..batch_size)
            .into_par_iter()
            .map(|b| {
                let mut sample_grad = vec![0.0f32; channels * in_h * in_w];
                for c in 0..channels {
                    for oh in 0..out_h {
                        for ow in 0..out_w {
                            let g = upstream_grad[[b, c, oh, ow]] / window_len;
                            for (ih, iw) in geometry.window(oh, ow, in_h, in_w) {
                                sample_grad[c * in_h * in_w + ih * in_w + iw] += g;
                            }
                        }
                    }
                }
                sample_grad
            })
            .collect();

        let all_data: Vec<f32> = batch_results.into_iter().flatten().collect();
        Ok(LayerGradients {
            inputs: vec![Tensor::new(&all_data, input.shape())],
            parameters: vec![],
        })
    }
}
