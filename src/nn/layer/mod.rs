/*
 * @Description  : 层（Layer）：网络的多态计算单元
 *
 * 两级设计：
 * - 对外的[`Layer`]只持有名称与具体层对象，构造后拓扑相关的属性不再变化
 * - 具体层对象是封闭的枚举[`LayerType`]，经`enum_dispatch`静态分发到[`TraitLayer`]
 *
 * 张量约定（批次优先）：图像`[N, C, H, W]`，特征`[N, C]`，序列`[N, C, T]`；
 * 层的“尺寸”不含`N`（序列亦不含`T`）：图像`[C, H, W]`，特征/序列`[C]`。
 */

mod activation;
mod avg_pool2d;
mod batch_norm;
mod conv2d;
mod custom;
mod dropout;
mod error;
mod fully_connected;
mod input;
mod lstm;
mod max_pool2d;
mod merge;
mod output;

pub use activation::{LeakyRelu, Relu, Softmax};
pub use avg_pool2d::AveragePooling2d;
pub use batch_norm::BatchNormalization;
pub use conv2d::{Convolution2d, Padding};
pub use custom::{CustomLayer, CustomLayerBehavior};
pub use dropout::Dropout;
pub use error::LayerError;
pub use fully_connected::FullyConnected;
pub use input::{FeatureInput, ImageInput, Normalization, SequenceInput};
pub use lstm::{Lstm, OutputMode};
pub use max_pool2d::MaxPooling2d;
pub use merge::{Addition, Concatenation};
pub use output::{ClassificationOutput, OutputLayer, RegressionOutput};

use crate::nn::param::LearnableParameter;
use crate::tensor::Tensor;
use enum_dispatch::enum_dispatch;
use ndarray::IxDyn;
use rand::rngs::StdRng;

/// 单个观测的尺寸（不含批次维）
pub type Size = Vec<usize>;

/// 层在网络中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRole {
    /// 直接接收外部数据，反向传播的终点
    Input,
    Hidden,
    /// 计算损失，反向传播的起点
    Output,
}

/// `forward`产生、供`backward`使用的不透明记忆
#[derive(Debug, Clone, Default)]
pub enum Memory {
    #[default]
    Empty,
    Tensors(Vec<Tensor>),
    Indices(Vec<usize>),
}

impl Memory {
    pub fn bytes(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Tensors(tensors) => tensors.iter().map(Tensor::bytes).sum(),
            Self::Indices(indices) => indices.len() * std::mem::size_of::<usize>(),
        }
    }

    pub fn tensors(&self) -> Result<&[Tensor], LayerError> {
        match self {
            Self::Tensors(tensors) => Ok(tensors),
            _ => Err(LayerError::MissingMemory),
        }
    }

    pub fn indices(&self) -> Result<&[usize], LayerError> {
        match self {
            Self::Indices(indices) => Ok(indices),
            _ => Err(LayerError::MissingMemory),
        }
    }
}

/// `backward`的结果：对每个输入的梯度（形状同输入），以及按参数顺序排列的参数梯度
/// （未请求参数梯度时为空）
#[derive(Debug, Clone, Default)]
pub struct LayerGradients {
    pub inputs: Vec<Tensor>,
    pub parameters: Vec<Tensor>,
}

#[enum_dispatch]
#[derive(Debug, Clone)]
pub enum LayerType {
    ImageInput(ImageInput),
    FeatureInput(FeatureInput),
    SequenceInput(SequenceInput),
    Convolution2d(Convolution2d),
    FullyConnected(FullyConnected),
    Relu(Relu),
    LeakyRelu(LeakyRelu),
    Softmax(Softmax),
    MaxPooling2d(MaxPooling2d),
    AveragePooling2d(AveragePooling2d),
    BatchNormalization(BatchNormalization),
    Dropout(Dropout),
    Addition(Addition),
    Concatenation(Concatenation),
    Lstm(Lstm),
    ClassificationOutput(ClassificationOutput),
    RegressionOutput(RegressionOutput),
    Custom(CustomLayer),
}

impl LayerType {
    /// 输出层才有损失函数
    pub fn as_output_layer(&self) -> Option<&dyn OutputLayer> {
        match self {
            Self::ClassificationOutput(layer) => Some(layer),
            Self::RegressionOutput(layer) => Some(layer),
            Self::Custom(layer) => layer.as_output_layer(),
            _ => None,
        }
    }
}

#[enum_dispatch(LayerType)]
pub trait TraitLayer {
    fn role(&self) -> LayerRole {
        LayerRole::Hidden
    }

    /// 输入端口数（输入层为0）
    fn num_inputs(&self) -> usize {
        1
    }

    /// 输出端口数；`None`表示输出数可变、且尚未由连接表确定
    fn num_outputs(&self) -> Option<usize> {
        Some(1)
    }

    fn has_variable_outputs(&self) -> bool {
        false
    }

    /// 由连接表确定可变输出层的输出数
    fn resolve_num_outputs(&mut self, _num_outputs: usize) {}

    fn has_size_determined(&self) -> bool {
        true
    }

    /// 纯形状推断，不做任何张量运算
    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError>;

    /// 由观测到的输入尺寸确定“自动”属性（如通道数）；
    /// 尺寸已确定却与输入不符时报`WrongLayerSize`
    fn infer_size(&mut self, _input_sizes: &[Size]) -> Result<(), LayerError> {
        Ok(())
    }

    fn learnable_parameters(&self) -> &[LearnableParameter] {
        &[]
    }

    fn learnable_parameters_mut(&mut self) -> &mut [LearnableParameter] {
        &mut []
    }

    /// 为尚无值的参数生成初值，已有值的参数保持不变
    fn initialize_learnable_parameters(&mut self, _rng: &mut StdRng) -> Result<(), LayerError> {
        Ok(())
    }

    /// 推理用的纯变换
    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError>;

    /// 训练用的变换，额外返回供反向传播使用的记忆
    fn forward(
        &self,
        x: &[Tensor],
        _rng: &mut StdRng,
    ) -> Result<(Vec<Tensor>, Memory), LayerError> {
        Ok((self.predict(x)?, Memory::Empty))
    }

    /// 由上游梯度`dz`计算对输入（及参数，若`need_parameter_gradients`）的梯度
    fn backward(
        &self,
        x: &[Tensor],
        z: &[Tensor],
        dz: &[Tensor],
        memory: &Memory,
        need_parameter_gradients: bool,
    ) -> Result<LayerGradients, LayerError>;

    /// 有运行统计量的层（批归一化）根据本次`forward`的记忆给出新的状态
    fn updated_state(&self, _memory: &Memory) -> Result<Option<Vec<Tensor>>, LayerError> {
        Ok(None)
    }

    fn set_state(&mut self, _state: &[Tensor]) -> Result<(), LayerError> {
        Ok(())
    }

    /// 是否需要输入统计量（零中心化的输入层）
    fn needs_input_statistics(&self) -> bool {
        false
    }

    fn set_input_statistics(&mut self, _mean: Tensor) -> Result<(), LayerError> {
        Ok(())
    }
}

/// 网络中的一个层：唯一名称 + 具体层对象
#[derive(Debug, Clone)]
pub struct Layer {
    pub(crate) name: String,
    pub(crate) inner: LayerType,
}

impl Layer {
    pub fn new(name: impl Into<String>, inner: impl Into<LayerType>) -> Self {
        Self {
            name: name.into(),
            inner: inner.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn inner(&self) -> &LayerType {
        &self.inner
    }

    pub fn role(&self) -> LayerRole {
        self.inner.role()
    }

    /// 单输入为`in`，多输入为`in1`..`inN`
    pub fn input_names(&self) -> Vec<String> {
        port_names("in", self.inner.num_inputs(), false)
    }

    /// 单输出为`out`，多输出（或可变输出）为`out1`..`outN`
    pub fn output_names(&self) -> Vec<String> {
        let n = self.inner.num_outputs().unwrap_or(0);
        port_names("out", n, self.inner.has_variable_outputs())
    }

    pub(crate) fn input_port_index(&self, port: &str) -> Option<usize> {
        self.input_names().iter().position(|name| name == port)
    }

    pub(crate) fn output_port_index(&self, port: &str) -> Option<usize> {
        if self.inner.has_variable_outputs() {
            return port
                .strip_prefix("out")
                .and_then(|k| k.parse::<usize>().ok())
                .filter(|&k| k >= 1)
                .map(|k| k - 1);
        }
        self.output_names().iter().position(|name| name == port)
    }

    pub fn learnable_parameters(&self) -> &[LearnableParameter] {
        self.inner.learnable_parameters()
    }

    /// 至少有一个学习率系数非零的参数
    pub fn is_learning(&self) -> bool {
        self.learnable_parameters().iter().any(LearnableParameter::is_learning)
    }

    fn parameter_mut(&mut self, parameter: &str) -> Result<&mut LearnableParameter, LayerError> {
        self.inner
            .learnable_parameters_mut()
            .iter_mut()
            .find(|p| p.name() == parameter)
            .ok_or_else(|| LayerError::ParameterNotFound(parameter.to_string()))
    }

    pub fn set_learn_rate_factor(
        &mut self,
        parameter: &str,
        factor: f32,
    ) -> Result<(), LayerError> {
        self.parameter_mut(parameter)?.learn_rate_factor = factor;
        Ok(())
    }

    pub fn set_l2_factor(&mut self, parameter: &str, factor: f32) -> Result<(), LayerError> {
        self.parameter_mut(parameter)?.l2_factor = factor;
        Ok(())
    }

    /// 冻结本层：所有参数学习率系数置0
    pub fn freeze(&mut self) {
        for p in self.inner.learnable_parameters_mut() {
            p.learn_rate_factor = 0.0;
        }
    }

    /// 预先给定参数值（初始化时会保留）
    pub fn set_parameter_value(
        &mut self,
        parameter: &str,
        value: Tensor,
    ) -> Result<(), LayerError> {
        self.parameter_mut(parameter)?.set_value(value)
    }
}

fn port_names(prefix: &str, n: usize, always_numbered: bool) -> Vec<String> {
    if n == 1 && !always_numbered {
        return vec![prefix.to_string()];
    }
    (1..=n).map(|i| format!("{prefix}{i}")).collect()
}

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓各层共用的小工具↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
pub(crate) fn expect_count<T>(items: &[T], expected: usize) -> Result<(), LayerError> {
    if items.len() != expected {
        return Err(LayerError::InputCountMismatch {
            expected,
            got: items.len(),
        });
    }
    Ok(())
}

/// 取唯一的输入
pub(crate) fn single(x: &[Tensor]) -> Result<&Tensor, LayerError> {
    expect_count(x, 1)?;
    Ok(&x[0])
}

pub(crate) fn single_size(sizes: &[Size]) -> Result<&Size, LayerError> {
    expect_count(sizes, 1)?;
    Ok(&sizes[0])
}

/// 把长度为C的通道向量沿第1维广播成`shape`（`shape[1] == C`）
pub(crate) fn expand_channels(v: &Tensor, shape: &[usize]) -> Result<Tensor, LayerError> {
    let mut unit = vec![1; shape.len()];
    unit[1] = v.size();
    let reshaped = v.try_reshape(&unit)?;
    let expanded = reshaped
        .array()
        .broadcast(IxDyn(shape))
        .ok_or_else(|| {
            LayerError::InputShapeMismatch(format!(
                "长度为{}的通道向量无法广播到{:?}",
                v.size(),
                shape
            ))
        })?
        .to_owned();
    Ok(Tensor::from_array(expanded))
}

/// 输入须为`[N, C, H, W]`
pub(crate) fn image_dims(x: &Tensor) -> Result<(usize, usize, usize, usize), LayerError> {
    match *x.shape() {
        [n, c, h, w] => Ok((n, c, h, w)),
        _ => Err(LayerError::UnsupportedInputRank {
            rank: x.dimension(),
            supported: "4维图像[N, C, H, W]",
        }),
    }
}

/// 尺寸须为`[C, H, W]`
pub(crate) fn image_size(size: &[usize]) -> Result<(usize, usize, usize), LayerError> {
    match *size {
        [c, h, w] => Ok((c, h, w)),
        _ => Err(LayerError::UnsupportedInputRank {
            rank: size.len() + 1,
            supported: "4维图像[N, C, H, W]",
        }),
    }
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑各层共用的小工具↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/
