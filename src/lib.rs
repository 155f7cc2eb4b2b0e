//! # dagnet
//!
//! `dagnet`是一个用纯rust实现的有向无环图（DAG）神经网络执行引擎：
//! 由层（layer）组成的图经拓扑排序后，预先规划好激活缓冲区的布局与清理时刻，
//! 再以此做前向推理、带记忆的训练前向传播、梯度累积的反向传播，以及SGDM参数更新。
//!

pub mod data;
pub mod errors;
pub mod execution;
pub mod nn;
pub mod tensor;
#[cfg(test)]
mod utils;
