/*
 * @Description  : LSTM 层（按时间展开，BPTT 反向传播）
 *
 * 公式（门的排列顺序为 i, f, g, o）:
 *   i_t = σ(W_i·x_t + R_i·h_{t-1} + b_i)     # 输入门
 *   f_t = σ(W_f·x_t + R_f·h_{t-1} + b_f)     # 遗忘门
 *   g_t = tanh(W_g·x_t + R_g·h_{t-1} + b_g)  # 候选细胞
 *   o_t = σ(W_o·x_t + R_o·h_{t-1} + b_o)     # 输出门
 *   c_t = f_t ⊙ c_{t-1} + i_t ⊙ g_t          # 细胞状态
 *   h_t = o_t ⊙ tanh(c_t)                    # 隐藏状态
 *
 * 输入：[N, C, T]；输出：`Sequence`模式为[N, H, T]，`Last`模式为[N, H]。
 * 初始隐藏状态与细胞状态均为0。
 */

use super::{single, single_size, LayerError, LayerGradients, Memory, Size, TraitLayer};
use crate::nn::param::{glorot_uniform, LearnableParameter};
use crate::tensor::Tensor;
use ndarray::{s, stack, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis, Ix1, Ix2, Ix3};
use rand::rngs::StdRng;

/// LSTM 的输出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// 输出每个时间步的隐藏状态
    #[default]
    Sequence,
    /// 只输出最后一个时间步的隐藏状态
    Last,
}

/// LSTM 层
///
/// 参数：`InputWeights` `[4H, C]`，`RecurrentWeights` `[4H, H]`，`Bias` `[4H]`。
#[derive(Debug, Clone)]
pub struct Lstm {
    num_hidden_units: usize,
    input_size: Option<usize>,
    output_mode: OutputMode,
    parameters: [LearnableParameter; 3],
}

/// 前向计算的逐时间步记录
struct Trace {
    /// 激活后的门 [N, 4H]
    gates: Vec<Array2<f32>>,
    cells: Vec<Array2<f32>>,
    hiddens: Vec<Array2<f32>>,
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

fn shape_error(e: ndarray::ShapeError) -> LayerError {
    LayerError::InputShapeMismatch(e.to_string())
}

fn view2(t: &Tensor) -> Result<ArrayView2<'_, f32>, LayerError> {
    t.view().into_dimensionality::<Ix2>().map_err(shape_error)
}

fn view3(t: &Tensor) -> Result<ArrayView3<'_, f32>, LayerError> {
    t.view().into_dimensionality::<Ix3>().map_err(|_| LayerError::UnsupportedInputRank {
        rank: t.dimension(),
        supported: "序列[N, C, T]",
    })
}

impl Lstm {
    pub fn new(num_hidden_units: usize) -> Self {
        Self {
            num_hidden_units,
            input_size: None,
            output_mode: OutputMode::default(),
            parameters: [
                LearnableParameter::new("InputWeights"),
                LearnableParameter::new("RecurrentWeights"),
                LearnableParameter::new("Bias"),
            ],
        }
    }

    pub fn output_mode(mut self, output_mode: OutputMode) -> Self {
        self.output_mode = output_mode;
        self
    }

    pub fn input_size(mut self, input_size: usize) -> Self {
        self.input_size = Some(input_size);
        let h = self.num_hidden_units;
        self.parameters = [
            LearnableParameter::with_expected_shape("InputWeights", vec![4 * h, input_size]),
            LearnableParameter::with_expected_shape("RecurrentWeights", vec![4 * h, h]),
            LearnableParameter::with_expected_shape("Bias", vec![4 * h]),
        ];
        self
    }

    fn set_parameter_shapes(&mut self, input_size: usize) -> Result<(), LayerError> {
        let h = self.num_hidden_units;
        let [input_weights, recurrent_weights, bias] = &mut self.parameters;
        input_weights.set_expected_shape(vec![4 * h, input_size])?;
        recurrent_weights.set_expected_shape(vec![4 * h, h])?;
        bias.set_expected_shape(vec![4 * h])
    }

    fn weights(
        &self,
    ) -> Result<(ArrayView2<'_, f32>, ArrayView2<'_, f32>, Array1<f32>), LayerError> {
        let w = view2(self.parameters[0].try_value()?)?;
        let r = view2(self.parameters[1].try_value()?)?;
        let b = self.parameters[2]
            .try_value()?
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(shape_error)?
            .to_owned();
        Ok((w, r, b))
    }

    fn run(&self, x: &Tensor) -> Result<Trace, LayerError> {
        let x = view3(x)?;
        let (n, c, steps) = x.dim();
        let h = self.num_hidden_units;
        let (w, r, b) = self.weights()?;
        if w.ncols() != c {
            return Err(LayerError::InputShapeMismatch(format!(
                "LSTM层要求{}个输入通道，实际为{c}",
                w.ncols()
            )));
        }

        let mut trace = Trace {
            gates: Vec::with_capacity(steps),
            cells: Vec::with_capacity(steps),
            hiddens: Vec::with_capacity(steps),
        };
        let mut h_prev = Array2::<f32>::zeros((n, h));
        let mut c_prev = Array2::<f32>::zeros((n, h));
        for t in 0..steps {
            let x_t = x.index_axis(Axis(2), t);
            let mut gates = x_t.dot(&w.t()) + h_prev.dot(&r.t()) + &b;
            gates.slice_mut(s![.., 0..2 * h]).mapv_inplace(sigmoid);
            gates.slice_mut(s![.., 2 * h..3 * h]).mapv_inplace(f32::tanh);
            gates.slice_mut(s![.., 3 * h..]).mapv_inplace(sigmoid);

            let i = gates.slice(s![.., 0..h]);
            let f = gates.slice(s![.., h..2 * h]);
            let g = gates.slice(s![.., 2 * h..3 * h]);
            let o = gates.slice(s![.., 3 * h..]);
            let c_t = &f * &c_prev + &i * &g;
            let h_t = &o * &c_t.mapv(f32::tanh);

            h_prev = h_t.clone();
            c_prev = c_t.clone();
            trace.gates.push(gates);
            trace.cells.push(c_t);
            trace.hiddens.push(h_t);
        }
        Ok(trace)
    }

    fn output(&self, trace: &Trace, n: usize) -> Result<Tensor, LayerError> {
        let h = self.num_hidden_units;
        match self.output_mode {
            OutputMode::Sequence => {
                let views = trace.hiddens.iter().map(Array2::view).collect::<Vec<_>>();
                if views.is_empty() {
                    return Ok(Tensor::zeros(&[n, h, 0]));
                }
                Ok(Tensor::from_array(stack(Axis(2), &views).map_err(shape_error)?.into_dyn()))
            }
            OutputMode::Last => Ok(trace.hiddens.last().map_or_else(
                || Tensor::zeros(&[n, h]),
                |h_t| Tensor::from_array(h_t.clone().into_dyn()),
            )),
        }
    }
}

fn stack_steps(steps: &[Array2<f32>]) -> Result<Tensor, LayerError> {
    let views = steps.iter().map(Array2::view).collect::<Vec<_>>();
    Ok(Tensor::from_array(stack(Axis(0), &views).map_err(shape_error)?.into_dyn()))
}

impl TraitLayer for Lstm {
    fn has_size_determined(&self) -> bool {
        self.input_size.is_some()
    }

    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        single_size(input_sizes)?;
        Ok(vec![vec![self.num_hidden_units]])
    }

    fn infer_size(&mut self, input_sizes: &[Size]) -> Result<(), LayerError> {
        let size = single_size(input_sizes)?;
        let c = match size.as_slice() {
            [c] => *c,
            _ => {
                return Err(LayerError::UnsupportedInputRank {
                    rank: size.len() + 2,
                    supported: "序列[N, C, T]",
                })
            }
        };
        match self.input_size {
            Some(expected) if expected != c => {
                return Err(LayerError::WrongLayerSize {
                    expected: vec![expected],
                    got: vec![c],
                })
            }
            _ => self.input_size = Some(c),
        }
        self.set_parameter_shapes(c)
    }

    fn learnable_parameters(&self) -> &[LearnableParameter] {
        &self.parameters
    }

    fn learnable_parameters_mut(&mut self) -> &mut [LearnableParameter] {
        &mut self.parameters
    }

    /// 权重为 Glorot 均匀分布；偏置中遗忘门部分为1，其余为0
    fn initialize_learnable_parameters(&mut self, rng: &mut StdRng) -> Result<(), LayerError> {
        let c = self.input_size.ok_or(LayerError::SizeNotDetermined)?;
        let h = self.num_hidden_units;
        let [input_weights, recurrent_weights, bias] = &mut self.parameters;
        input_weights.initialize_with(|shape| glorot_uniform(shape, c, 4 * h, rng))?;
        recurrent_weights.initialize_with(|shape| glorot_uniform(shape, h, 4 * h, rng))?;
        bias.initialize_with(|shape| {
            let data = (0..shape[0])
                .map(|k| if (h..2 * h).contains(&k) { 1.0 } else { 0.0 })
                .collect::<Vec<_>>();
            Tensor::new(&data, shape)
        })
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        let x = single(x)?;
        let trace = self.run(x)?;
        Ok(vec![self.output(&trace, x.batch_size())?])
    }

    /// 记忆：[门 [T, N, 4H]，细胞状态 [T, N, H]，隐藏状态 [T, N, H]]
    fn forward(
        &self,
        x: &[Tensor],
        _rng: &mut StdRng,
    ) -> Result<(Vec<Tensor>, Memory), LayerError> {
        let x = single(x)?;
        let trace = self.run(x)?;
        let z = self.output(&trace, x.batch_size())?;
        if trace.gates.is_empty() {
            return Ok((vec![z], Memory::Tensors(vec![])));
        }
        let memory = vec![
            stack_steps(&trace.gates)?,
            stack_steps(&trace.cells)?,
            stack_steps(&trace.hiddens)?,
        ];
        Ok((vec![z], Memory::Tensors(memory)))
    }

    /// 沿时间反向传播（BPTT）
    fn backward(
        &self,
        x: &[Tensor],
        _z: &[Tensor],
        dz: &[Tensor],
        memory: &Memory,
        need_parameter_gradients: bool,
    ) -> Result<LayerGradients, LayerError> {
        let x_tensor = single(x)?;
        let x = view3(x_tensor)?;
        let (n, c, steps) = x.dim();
        let h = self.num_hidden_units;
        let (w, r, _) = self.weights()?;
        let dz = single(dz)?;

        let mut dx = Array3::<f32>::zeros((n, c, steps));
        let mut d_w = Array2::<f32>::zeros((4 * h, c));
        let mut d_r = Array2::<f32>::zeros((4 * h, h));
        let mut d_b = Array1::<f32>::zeros(4 * h);
        if steps == 0 {
            return Ok(LayerGradients {
                inputs: vec![Tensor::from_array(dx.into_dyn())],
                parameters: if need_parameter_gradients {
                    vec![
                        Tensor::from_array(d_w.into_dyn()),
                        Tensor::from_array(d_r.into_dyn()),
                        Tensor::from_array(d_b.into_dyn()),
                    ]
                } else {
                    vec![]
                },
            });
        }

        let (gates, cells, hiddens) = match memory.tensors()? {
            [gates, cells, hiddens] => (view3(gates)?, view3(cells)?, view3(hiddens)?),
            _ => return Err(LayerError::MissingMemory),
        };
        let dz_steps = match self.output_mode {
            OutputMode::Sequence => Some(view3(dz)?),
            OutputMode::Last => None,
        };
        let dz_last = match self.output_mode {
            OutputMode::Last => Some(view2(dz)?),
            OutputMode::Sequence => None,
        };

        let zeros = Array2::<f32>::zeros((n, h));
        let mut dh_next = Array2::<f32>::zeros((n, h));
        let mut dc_next = Array2::<f32>::zeros((n, h));
        for t in (0..steps).rev() {
            let mut dh = dh_next.clone();
            if let Some(dz_steps) = &dz_steps {
                dh += &dz_steps.index_axis(Axis(2), t);
            }
            if let (Some(dz_last), true) = (&dz_last, t + 1 == steps) {
                dh += dz_last;
            }

            let gate = gates.index_axis(Axis(0), t);
            let (i, f, g, o) = (
                gate.slice(s![.., 0..h]),
                gate.slice(s![.., h..2 * h]),
                gate.slice(s![.., 2 * h..3 * h]),
                gate.slice(s![.., 3 * h..]),
            );
            let c_t = cells.index_axis(Axis(0), t);
            let c_prev = if t > 0 { cells.index_axis(Axis(0), t - 1) } else { zeros.view() };
            let h_prev = if t > 0 { hiddens.index_axis(Axis(0), t - 1) } else { zeros.view() };

            let tanh_c = c_t.mapv(f32::tanh);
            let d_o = &dh * &tanh_c;
            let dc = &dc_next + &(&dh * &o * &tanh_c.mapv(|v| 1.0 - v * v));
            let d_i = &dc * &g;
            let d_g = &dc * &i;
            let d_f = &dc * &c_prev;
            dc_next = &dc * &f;

            // 激活前的梯度
            let mut da = Array2::<f32>::zeros((n, 4 * h));
            da.slice_mut(s![.., 0..h]).assign(&(&d_i * &i.mapv(|v| v * (1.0 - v))));
            da.slice_mut(s![.., h..2 * h]).assign(&(&d_f * &f.mapv(|v| v * (1.0 - v))));
            da.slice_mut(s![.., 2 * h..3 * h]).assign(&(&d_g * &g.mapv(|v| 1.0 - v * v)));
            da.slice_mut(s![.., 3 * h..]).assign(&(&d_o * &o.mapv(|v| v * (1.0 - v))));

            dx.index_axis_mut(Axis(2), t).assign(&da.dot(&w));
            dh_next = da.dot(&r);
            if need_parameter_gradients {
                d_w += &da.t().dot(&x.index_axis(Axis(2), t));
                d_r += &da.t().dot(&h_prev);
                d_b += &da.sum_axis(Axis(0));
            }
        }

        let parameters = if need_parameter_gradients {
            vec![
                Tensor::from_array(d_w.into_dyn()),
                Tensor::from_array(d_r.into_dyn()),
                Tensor::from_array(d_b.into_dyn()),
            ]
        } else {
            vec![]
        };
        Ok(LayerGradients {
            inputs: vec![Tensor::from_array(dx.into_dyn())],
            parameters,
        })
    }
}
