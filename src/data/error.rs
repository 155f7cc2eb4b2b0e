//! 数据分发错误类型定义

use crate::errors::TensorError;
use thiserror::Error;

/// 数据分发相关错误（立即上报，不重试）
#[derive(Debug, Error, PartialEq)]
pub enum DataError {
    /// 各输入/目标张量的观测数（第0维）不一致
    #[error("观测数不一致: 第{index}个张量有{got}个观测，期望{expected}个")]
    MismatchedObservations {
        index: usize,
        expected: usize,
        got: usize,
    },

    /// 数据集为空
    #[error("数据集为空")]
    EmptyDataset,

    /// 批大小为0
    #[error("mini_batch_size 必须大于 0")]
    ZeroBatchSize,

    /// 取批次时的张量错误
    #[error(transparent)]
    Tensor(#[from] TensorError),
}
