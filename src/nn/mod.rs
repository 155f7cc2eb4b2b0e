/*
 * @Description  : 负责神经网络（neural network）的构建与训练：
 *                 层 -> 层图 -> DAG网络执行引擎 -> 求解器 -> 训练循环
 */

pub mod graph;
pub mod layer;
pub mod network;
pub mod optimizer;
pub mod options;
pub mod param;
pub mod series;
pub mod trainer;

pub use graph::{AugmentedEdge, Connection, GraphError, LayerGraph, LayerOrder};
pub use layer::{Layer, LayerError, LayerRole, LayerType, TraitLayer};
pub use network::{DagNetwork, ForwardMemory, LayerState, NetworkError, TrainingGradients};
pub use optimizer::{Sgdm, Solver, SolverError};
pub use options::{LearnRateSchedule, Shuffle, TrainingOptions};
pub use param::LearnableParameter;
pub use series::SeriesNetwork;
pub use trainer::{Trainer, TrainingSummary};

#[cfg(test)]
mod tests;
