/*
 * @Description  : DagNetwork 的错误类型
 */

use thiserror::Error;

use crate::data::DataError;
use crate::execution::ExecutionError;
use crate::nn::graph::GraphError;
use crate::nn::layer::LayerError;
use crate::nn::optimizer::SolverError;

#[derive(Error, Debug, PartialEq)]
pub enum NetworkError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error("层“{layer}”出错：{source}")]
    Layer { layer: String, source: LayerError },
    #[error("网络有{expected}个输入层，却提供了{got}个输入")]
    InputCountMismatch { expected: usize, got: usize },
    #[error("网络有{expected}个输出层，却提供了{got}个目标")]
    TargetCountMismatch { expected: usize, got: usize },
    #[error("所有输入与目标的观测数必须一致：应为{expected}，实际为{got}")]
    ObservationCountMismatch { expected: usize, got: usize },
    #[error("网络中没有名为“{0}”的层")]
    LayerNotFound(String),
    #[error("网络共有{expected}个可学习参数，却提供了{got}个")]
    ParameterCountMismatch { expected: usize, got: usize },
    #[error("层“{layer}”的梯度形状应为{expected:?}，实际为{got:?}")]
    GradientShapeMismatch {
        layer: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("训练选项无效：{0}")]
    InvalidOptions(String),
    #[error("激活缓冲区第{0}格为空（已被清理或从未写入）")]
    MissingActivation(usize),
}

impl NetworkError {
    /// 只有显存不足可以通过回收重试
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::Execution(e) if e.is_out_of_memory())
    }

    pub(crate) fn layer(layer: &str) -> impl FnOnce(LayerError) -> Self + '_ {
        move |source| Self::Layer {
            layer: layer.to_string(),
            source,
        }
    }
}
