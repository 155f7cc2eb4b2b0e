/*
 * @Description  : 2D 卷积层
 *
 * 输入/输出形状：
 * - 输入：[N, C, H, W]
 * - 输出：[N, F, H', W']
 *
 * 输出尺寸计算：
 * - 显式填充：H' = (H + top + bottom - kH) / sH + 1
 * - `same`填充：H' = ceil(H / sH)，所需的总填充量尽量平分到上下（多出的一行放在下方）
 *
 * 使用 Rayon 在 batch 维度并行加速。
 */

use super::{image_dims, image_size, single, LayerError, LayerGradients, Memory, Size, TraitLayer};
use crate::nn::param::{glorot_uniform, LearnableParameter};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rayon::prelude::*;

/// 卷积/池化的填充方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// 使输出尺寸为`ceil(输入 / 步长)`
    Same,
    Explicit {
        top: usize,
        bottom: usize,
        left: usize,
        right: usize,
    },
}

impl Default for Padding {
    fn default() -> Self {
        Self::symmetric(0, 0)
    }
}

impl Padding {
    /// 上下各填`pad_h`，左右各填`pad_w`
    pub const fn symmetric(pad_h: usize, pad_w: usize) -> Self {
        Self::Explicit {
            top: pad_h,
            bottom: pad_h,
            left: pad_w,
            right: pad_w,
        }
    }

    /// 解析为`[top, bottom, left, right]`
    pub(crate) fn resolve(
        &self,
        (h, w): (usize, usize),
        (k_h, k_w): (usize, usize),
        (s_h, s_w): (usize, usize),
    ) -> [usize; 4] {
        match *self {
            Self::Same => {
                let (top, bottom) = same_padding(h, k_h, s_h);
                let (left, right) = same_padding(w, k_w, s_w);
                [top, bottom, left, right]
            }
            Self::Explicit {
                top,
                bottom,
                left,
                right,
            } => [top, bottom, left, right],
        }
    }
}

fn same_padding(len: usize, k: usize, s: usize) -> (usize, usize) {
    let out = (len + s - 1) / s;
    let total = ((out.max(1) - 1) * s + k).saturating_sub(len);
    (total / 2, total - total / 2)
}

/// 窗口尺寸与步长都必须为正
pub(crate) fn check_window(
    what: &str,
    (k_h, k_w): (usize, usize),
    (s_h, s_w): (usize, usize),
) -> Result<(), LayerError> {
    if k_h == 0 || k_w == 0 || s_h == 0 || s_w == 0 {
        return Err(LayerError::InvalidConfiguration(format!(
            "{what}的窗口{k_h}x{k_w}与步长{s_h}x{s_w}都必须为正"
        )));
    }
    Ok(())
}

/// 填充后沿某一维的输出长度；窗口放不下时为`None`
pub(crate) fn output_extent(
    len: usize,
    pad_a: usize,
    pad_b: usize,
    k: usize,
    s: usize,
) -> Option<usize> {
    let padded = len + pad_a + pad_b;
    (padded >= k && k > 0 && s > 0).then(|| (padded - k) / s + 1)
}

/// 对`[N, C, H, W]`输入按`[top, bottom, left, right]`填充常数（Rayon 并行版本）
pub(crate) fn pad_image(input: &Tensor, pads: [usize; 4], value: f32) -> Tensor {
    let [top, bottom, left, right] = pads;
    if pads == [0; 4] {
        return input.clone();
    }
    let shape = input.shape();
    let (batch_size, c, h, w) = (shape[0], shape[1], shape[2], shape[3]);
    let new_h = h + top + bottom;
    let new_w = w + left + right;
    let single_sample_size = c * new_h * new_w;

    let batch_results: Vec<Vec<f32>> = (0..batch_size)
        .into_par_iter()
        .map(|bi| {
            let mut sample_data = vec![value; single_sample_size];
            for ci in 0..c {
                for hi in 0..h {
                    for wi in 0..w {
                        let idx = ci * new_h * new_w + (hi + top) * new_w + (wi + left);
                        sample_data[idx] = input[[bi, ci, hi, wi]];
                    }
                }
            }
            sample_data
        })
        .collect();

    let all_data: Vec<f32> = batch_results.into_iter().flatten().collect();
    Tensor::new(&all_data, &[batch_size, c, new_h, new_w])
}

/// 2D 卷积层
///
/// 参数：`Weights` `[F, C, kH, kW]`，`Bias` `[F]`。通道数`C`可留空，由输入自动确定。
///
/// # 使用示例
/// ```ignore
/// let conv = Convolution2d::new((3, 3), 8).padding(Padding::Same);
/// let layer = Layer::new("conv1", conv);
/// ```
#[derive(Debug, Clone)]
pub struct Convolution2d {
    filter_size: (usize, usize),
    num_filters: usize,
    stride: (usize, usize),
    padding: Padding,
    num_channels: Option<usize>,
    parameters: [LearnableParameter; 2],
}

impl Convolution2d {
    pub fn new(filter_size: (usize, usize), num_filters: usize) -> Self {
        Self {
            filter_size,
            num_filters,
            stride: (1, 1),
            padding: Padding::default(),
            num_channels: None,
            parameters: [
                LearnableParameter::new("Weights"),
                LearnableParameter::new("Bias"),
            ],
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

    /// 显式指定输入通道数（否则由`infer_size`确定）
    pub fn num_channels(mut self, num_channels: usize) -> Self {
        self.num_channels = Some(num_channels);
        let (k_h, k_w) = self.filter_size;
        self.parameters = [
            LearnableParameter::with_expected_shape(
                "Weights",
                vec![self.num_filters, num_channels, k_h, k_w],
            ),
            LearnableParameter::with_expected_shape("Bias", vec![self.num_filters]),
        ];
        self
    }

    fn output_hw(&self, h: usize, w: usize) -> Result<(usize, usize, [usize; 4]), LayerError> {
        check_window("卷积层", self.filter_size, self.stride)?;
        let pads = self.padding.resolve((h, w), self.filter_size, self.stride);
        let [top, bottom, left, right] = pads;
        let (k_h, k_w) = self.filter_size;
        let (s_h, s_w) = self.stride;
        match (
            output_extent(h, top, bottom, k_h, s_h),
            output_extent(w, left, right, k_w, s_w),
        ) {
            (Some(out_h), Some(out_w)) => Ok((out_h, out_w, pads)),
            _ => Err(LayerError::InputShapeMismatch(format!(
                "卷积核{k_h}x{k_w}大于填充后的输入{}x{}",
                h + top + bottom,
                w + left + right
            ))),
        }
    }

    fn check_channels(&self, c: usize) -> Result<(), LayerError> {
        match self.num_channels {
            Some(expected) if expected != c => Err(LayerError::InputShapeMismatch(format!(
                "卷积层要求{expected}个输入通道，实际为{c}"
            ))),
            Some(_) => Ok(()),
            None => Err(LayerError::SizeNotDetermined),
        }
    }

    /// 对已填充的输入做卷积并加偏置（Rayon 并行版本）
    fn convolve(
        &self,
        padded: &Tensor,
        kernel: &Tensor,
        bias: &Tensor,
        out_h: usize,
        out_w: usize,
    ) -> Tensor {
        let shape = padded.shape();
        let (batch_size, in_c) = (shape[0], shape[1]);
        let out_c = self.num_filters;
        let (k_h, k_w) = self.filter_size;
        let (stride_h, stride_w) = self.stride;
        let single_sample_size = out_c * out_h * out_w;

        let batch_results: Vec<Vec<f32>> = (0..batch_size)
            .into_par_iter()
            .map(|b| {
                let mut sample_data = vec![0.0f32; single_sample_size];
                for oc in 0..out_c {
                    for oh in 0..out_h {
                        for ow in 0..out_w {
                            let mut sum = bias[[oc]];
                            let h_start = oh * stride_h;
                            let w_start = ow * stride_w;
                            for ic in 0..in_c {
                                for kh in 0..k_h {
                                    for kw in 0..k_w {
                                        sum += padded[[b, ic, h_start + kh, w_start + kw]]
                                            * kernel[[oc, ic, kh, kw]];
                                    }
                                }
                            }
                            sample_data[oc * out_h * out_w + oh * out_w + ow] = sum;
                        }
                    }
                }
                sample_data
            })
            .collect();

        let all_data: Vec<f32> = batch_results.into_iter().flatten().collect();
        Tensor::new(&all_data, &[batch_size, out_c, out_h, out_w])
    }
}

impl TraitLayer for Convolution2d {
    fn has_size_determined(&self) -> bool {
        self.num_channels.is_some()
    }

    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        let (_, h, w) = image_size(super::single_size(input_sizes)?)?;
        let (out_h, out_w, _) = self.output_hw(h, w)?;
        Ok(vec![vec![self.num_filters, out_h, out_w]])
    }

    fn infer_size(&mut self, input_sizes: &[Size]) -> Result<(), LayerError> {
        let (c, _, _) = image_size(super::single_size(input_sizes)?)?;
        match self.num_channels {
            Some(expected) if expected != c => {
                return Err(LayerError::WrongLayerSize {
                    expected: vec![expected],
                    got: vec![c],
                })
            }
            Some(_) => {}
            None => self.num_channels = Some(c),
        }
        let (k_h, k_w) = self.filter_size;
        let [weights, bias] = &mut self.parameters;
        weights.set_expected_shape(vec![self.num_filters, c, k_h, k_w])?;
        bias.set_expected_shape(vec![self.num_filters])
    }

    fn learnable_parameters(&self) -> &[LearnableParameter] {
        &self.parameters
    }

    fn learnable_parameters_mut(&mut self) -> &mut [LearnableParameter] {
        &mut self.parameters
    }

    fn initialize_learnable_parameters(&mut self, rng: &mut StdRng) -> Result<(), LayerError> {
        let c = self.num_channels.ok_or(LayerError::SizeNotDetermined)?;
        let (k_h, k_w) = self.filter_size;
        let fan_in = c * k_h * k_w;
        let fan_out = self.num_filters * k_h * k_w;
        let [weights, bias] = &mut self.parameters;
        weights.initialize_with(|shape| glorot_uniform(shape, fan_in, fan_out, rng))?;
        bias.initialize_with(Tensor::zeros)
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        let x = single(x)?;
        let (_, c, h, w) = image_dims(x)?;
        self.check_channels(c)?;
        let (out_h, out_w, pads) = self.output_hw(h, w)?;
        let kernel = self.parameters[0].try_value()?;
        let bias = self.parameters[1].try_value()?;
        let padded = pad_image(x, pads, 0.0);
        Ok(vec![self.convolve(&padded, kernel, bias, out_h, out_w)])
    }

    /// 对于 Z = conv(X, W) + b:
    /// - dL/dX: 转置卷积
    /// - dL/dW: 输入与上游梯度的相关运算
    /// - dL/db: 上游梯度按通道求和
    fn backward(
        &self,
        x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        _memory: &Memory,
        need_parameter_gradients: bool,
    ) -> Result<LayerGradients, LayerError> {
        let input = single(x)?;
        let upstream_grad = single(dz)?;
        let (batch_size, in_c, in_h, in_w) = image_dims(input)?;
        let (_, out_c, out_h, out_w) = image_dims(upstream_grad)?;
        let (_, _, pads) = self.output_hw(in_h, in_w)?;
        let [pad_h, _, pad_w, _] = pads;
        let (k_h, k_w) = self.filter_size;
        let (stride_h, stride_w) = self.stride;
        let kernel = self.parameters[0].try_value()?;

        // ========== dL/dX ==========
        let single_sample_size = in_c * in_h * in_w;
        let batch_results: Vec<Vec<f32>> = (0..batch_size)
            .into_par_iter()
            .map(|b| {
                let mut sample_grad = vec![0.0f32; single_sample_size];
                for oc in 0..out_c {
                    for oh in 0..out_h {
                        for ow in 0..out_w {
                            let grad_val = upstream_grad[[b, oc, oh, ow]];
                            let h_start = oh * stride_h;
                            let w_start = ow * stride_w;
                            for ic in 0..in_c {
                                for kh in 0..k_h {
                                    for kw in 0..k_w {
                                        let orig_h = (h_start + kh) as isize - pad_h as isize;
                                        let orig_w = (w_start + kw) as isize - pad_w as isize;
                                        if orig_h >= 0
                                            && orig_h < in_h as isize
                                            && orig_w >= 0
                                            && orig_w < in_w as isize
                                        {
                                            let idx = ic * in_h * in_w
                                                + orig_h as usize * in_w
                                                + orig_w as usize;
                                            sample_grad[idx] += grad_val * kernel[[oc, ic, kh, kw]];
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                sample_grad
            })
            .collect();
        let all_data: Vec<f32> = batch_results.into_iter().flatten().collect();
        let dx = Tensor::new(&all_data, input.shape());

        if !need_parameter_gradients {
            return Ok(LayerGradients {
                inputs: vec![dx],
                parameters: vec![],
            });
        }

        // ========== dL/dW ==========
        // 跨 batch 累加，使用 map-reduce 模式
        let padded_input = pad_image(input, pads, 0.0);
        let kernel_size = out_c * in_c * k_h * k_w;
        let total_kernel_grad = (0..batch_size)
            .into_par_iter()
            .map(|b| {
                let mut sample_kernel_grad = vec![0.0f32; kernel_size];
                for oc in 0..out_c {
                    for oh in 0..out_h {
                        for ow in 0..out_w {
                            let grad_val = upstream_grad[[b, oc, oh, ow]];
                            let h_start = oh * stride_h;
                            let w_start = ow * stride_w;
                            for ic in 0..in_c {
                                for kh in 0..k_h {
                                    for kw in 0..k_w {
                                        let idx =
                                            oc * in_c * k_h * k_w + ic * k_h * k_w + kh * k_w + kw;
                                        sample_kernel_grad[idx] += grad_val
                                            * padded_input[[b, ic, h_start + kh, w_start + kw]];
                                    }
                                }
                            }
                        }
                    }
                }
                sample_kernel_grad
            })
            .reduce(
                || vec![0.0f32; kernel_size],
                |mut acc, g| {
                    acc.iter_mut().zip(g).for_each(|(a, b)| *a += b);
                    acc
                },
            );
        let d_weights = Tensor::new(&total_kernel_grad, kernel.shape());
        let d_bias = upstream_grad.sum_except_axis(1);

        Ok(LayerGradients {
            inputs: vec![dx],
            parameters: vec![d_weights, d_bias],
        })
    }
}
