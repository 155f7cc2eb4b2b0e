/*
 * @Description  : 2D 最大池化层
 *
 * - 输入：[N, C, H, W]，输出：[N, C, H', W']
 * - `forward`记录每个输出位置取到最大值的输入索引（展平后），反向传播时梯度只流向该位置
 * - 使用 Rayon 在 batch 维度并行加速
 */

use super::conv2d::{check_window, output_extent};
use super::{
    image_dims, image_size, single, single_size, LayerError, LayerGradients, Memory, Padding, Size,
    TraitLayer,
};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rayon::prelude::*;

/// 窗口完全落在填充区时的占位索引
const NO_INDEX: usize = usize::MAX;

/// 2D 最大池化层
#[derive(Debug, Clone)]
pub struct MaxPooling2d {
    pool_size: (usize, usize),
    stride: (usize, usize),
    padding: Padding,
}

/// 池化几何参数
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolGeometry {
    pub(crate) pool: (usize, usize),
    pub(crate) stride: (usize, usize),
    /// 上、左填充
    pub(crate) offset: (usize, usize),
    pub(crate) out: (usize, usize),
}

pub(crate) fn pool_geometry(
    h: usize,
    w: usize,
    pool: (usize, usize),
    stride: (usize, usize),
    padding: Padding,
) -> Result<PoolGeometry, LayerError> {
    check_window("池化层", pool, stride)?;
    let [top, bottom, left, right] = padding.resolve((h, w), pool, stride);
    match (
        output_extent(h, top, bottom, pool.0, stride.0),
        output_extent(w, left, right, pool.1, stride.1),
    ) {
        (Some(out_h), Some(out_w)) => Ok(PoolGeometry {
            pool,
            stride,
            offset: (top, left),
            out: (out_h, out_w),
        }),
        _ => Err(LayerError::InputShapeMismatch(format!(
            "池化窗口{}x{}超出填充后的输入{}x{}",
            pool.0,
            pool.1,
            h + top + bottom,
            w + left + right
        ))),
    }
}

impl PoolGeometry {
    /// 输出位置(oh, ow)的窗口在原输入中的有效坐标
    pub(crate) fn window(
        &self,
        oh: usize,
        ow: usize,
        h: usize,
        w: usize,
    ) -> impl Iterator<Item = (usize, usize)> {
        let h_start = (oh * self.stride.0) as isize - self.offset.0 as isize;
        let w_start = (ow * self.stride.1) as isize - self.offset.1 as isize;
        let (k_h, k_w) = self.pool;
        (0..k_h as isize)
            .flat_map(move |kh| (0..k_w as isize).map(move |kw| (h_start + kh, w_start + kw)))
            .filter(move |&(ih, iw)| ih >= 0 && iw >= 0 && ih < h as isize && iw < w as isize)
            .map(|(ih, iw)| (ih as usize, iw as usize))
    }
}

impl MaxPooling2d {
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

    /// 池化，同时返回每个输出位置最大值的展平输入索引
    fn pool(&self, input: &Tensor) -> Result<(Tensor, Vec<usize>), LayerError> {
        let (batch_size, channels, in_h, in_w) = image_dims(input)?;
        let geometry = pool_geometry(in_h, in_w, self.pool_size, self.stride, self.padding)?;
        let (out_h, out_w) = geometry.out;
        let sample_len = channels * in_h * in_w;

        let batch_results: Vec<(Vec<f32>, Vec<usize>)> = (0..batch_size)
            .into_par_iter()
            .map(|b| {
                let mut values = Vec::with_capacity(channels * out_h * out_w);
                let mut indices = Vec::with_capacity(channels * out_h * out_w);
                for c in 0..channels {
                    for oh in 0..out_h {
                        for ow in 0..out_w {
                            let mut best = (f32::NEG_INFINITY, NO_INDEX);
                            for (ih, iw) in geometry.window(oh, ow, in_h, in_w) {
                                let v = input[[b, c, ih, iw]];
                                if v > best.0 || best.1 == NO_INDEX {
                                    best = (v, b * sample_len + c * in_h * in_w + ih * in_w + iw);
                                }
                            }
                            let value = if best.1 == NO_INDEX { 0.0 } else { best.0 };
                            values.push(value);
                            indices.push(best.1);
                        }
                    }
                }
                (values, indices)
            })
            .collect();

        let (values, indices): (Vec<Vec<f32>>, Vec<Vec<usize>>) = batch_results.into_iter().unzip();
        let values: Vec<f32> = values.into_iter().flatten().collect();
        let indices: Vec<usize> = indices.into_iter().flatten().collect();
        Ok((
            Tensor::new(&values, &[batch_size, channels, out_h, out_w]),
            indices,
        ))
    }
}

impl TraitLayer for MaxPooling2d {
    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        let (c, h, w) = image_size(single_size(input_sizes)?)?;
        let geometry = pool_geometry(h, w, self.pool_size, self.stride, self.padding)?;
        Ok(vec![vec![c, geometry.out.0, geometry.out.1]])
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        Ok(vec![self.pool(single(x)?)?.0])
    }

    fn forward(
        &self,
        x: &[Tensor],
        _rng: &mut StdRng,
    ) -> Result<(Vec<Tensor>, Memory), LayerError> {
        let (z, indices) = self.pool(single(x)?)?;
        Ok((vec![z], Memory::Indices(indices)))
    }

    /// 稀疏梯度：每个输出位置的梯度加到其最大值所在的输入位置
    fn backward(
        &self,
        x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        memory: &Memory,
        _: bool,
    ) -> Result<LayerGradients, LayerError> {
        let input = single(x)?;
        let upstream_grad = single(dz)?;
        let indices = memory.indices()?;
        if indices.len() != upstream_grad.size() {
            return Err(LayerError::MissingMemory);
        }
        let mut dx = vec![0.0f32; input.size()];
        for (&idx, g) in indices.iter().zip(upstream_grad.view().iter()) {
            if idx != NO_INDEX {
                dx[idx] += g;
            }
        }
        Ok(LayerGradients {
            inputs: vec![Tensor::new(&dx, input.shape())],
            parameters: vec![],
        })
    }
}
