use crate::errors::TensorError;
use thiserror::Error;

/// 层的配置/计算错误（配置错误均为致命错误，不重试）
#[derive(Error, Debug, PartialEq)]
pub enum LayerError {
    #[error("层尺寸与输入不符：层要求{expected:?}，输入为{got:?}")]
    WrongLayerSize { expected: Vec<usize>, got: Vec<usize> },
    #[error("参数“{parameter}”的形状应为{expected:?}，实际为{got:?}")]
    InvalidParameterShape {
        parameter: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("输入形状不符：{0}")]
    InputShapeMismatch(String),
    #[error("参数“{0}”尚未初始化")]
    MissingParameterValue(&'static str),
    #[error("层尺寸尚未确定")]
    SizeNotDetermined,
    #[error("不支持{rank}维的输入（支持：{supported}）")]
    UnsupportedInputRank { rank: usize, supported: &'static str },
    #[error("需要{expected}个输入，实际为{got}个")]
    InputCountMismatch { expected: usize, got: usize },
    #[error("该层不是输出层，无法计算损失")]
    NotAnOutputLayer,
    #[error("层配置无效：{0}")]
    InvalidConfiguration(String),
    #[error("反向传播所需的前向记忆缺失或类型不符")]
    MissingMemory,
    #[error("未找到名为“{0}”的参数")]
    ParameterNotFound(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("自定义层错误：{0}")]
    Custom(String),
}
