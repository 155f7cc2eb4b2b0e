//! 数据分发模块
//!
//! 引擎与训练循环只通过[`Dispatcher`]取得mini-batch，不关心数据来自内存、文件还是后台预取。
//!
//! # 主要组件
//!
//! - [`Dispatcher`]: mini-batch分发接口
//! - [`InMemoryDispatcher`]: 基于内存张量的分发器（第0维为观测维）
//! - [`DataError`]: 数据分发错误类型
//!
//! # 使用示例
//!
//! ```ignore
//! use dagnet::data::{Dispatcher, InMemoryDispatcher};
//!
//! let mut dispatcher = InMemoryDispatcher::new(vec![x], vec![y], 32)?.seed(42);
//! dispatcher.shuffle();
//! dispatcher.start();
//! while let Some(batch) = dispatcher.next()? {
//!     let grads = network.compute_gradients_for_training(&batch.inputs, &batch.targets)?;
//! }
//! ```

mod dispatcher;
pub mod error;

#[cfg(test)]
mod tests;

pub use dispatcher::{Dispatcher, InMemoryDispatcher, MiniBatch};
pub use error::DataError;
