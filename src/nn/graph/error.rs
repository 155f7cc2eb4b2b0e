/*
 * @Description  : LayerGraph 模块的错误类型
 */

use thiserror::Error;

/// 层图构建/校验/排序错误（均为配置错误，不重试）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("层名称不能为空，且不能包含'/'：“{0}”")]
    InvalidLayerName(String),
    #[error("层名称“{0}”重复")]
    DuplicateLayerName(String),
    #[error("未找到名为“{0}”的层")]
    LayerNotFound(String),
    #[error("层“{layer}”没有名为“{port}”的端口")]
    InvalidPort { layer: String, port: String },
    #[error("层“{0}”有多个端口，连接时须写明端口，如“{0}/in1”")]
    PortRequired(String),
    #[error("层“{layer}”的输入端口“{port}”已被连接")]
    PortAlreadyConnected { layer: String, port: String },
    #[error("层“{layer}”的输入端口“{port}”未连接")]
    UnconnectedInput { layer: String, port: String },
    #[error("连接“{from}”->“{to}”不存在")]
    ConnectionNotFound { from: String, to: String },
    #[error("层图中存在环，无法拓扑排序，涉及的层：{0:?}")]
    Cyclic(Vec<String>),
    #[error("网络至少需要一个输入层")]
    MissingInputLayer,
    #[error("网络至少需要一个输出层")]
    MissingOutputLayer,
}
