/*
 * @Description  : mini-batch分发器
 *
 * 提供统一的数据分发接口，支持：
 * - 自动分批 (mini_batch_size)
 * - 随机打乱 (shuffle)
 * - 丢弃不完整批次 (drop_last)
 */

use super::DataError;
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// 一个mini-batch：每个网络输入一个张量，每个输出层一个目标张量，以及本批次的观测索引
#[derive(Debug, Clone)]
pub struct MiniBatch {
    pub inputs: Vec<Tensor>,
    pub targets: Vec<Tensor>,
    pub indices: Vec<usize>,
}

/// mini-batch分发接口
///
/// 一个epoch的用法：`start()`后反复调用`next()`直到返回`None`（此时`is_done()`为真）。
pub trait Dispatcher {
    /// 回到数据开头（不改变当前顺序）
    fn start(&mut self);

    /// 取下一个mini-batch；数据已取完时返回`Ok(None)`
    fn next(&mut self) -> Result<Option<MiniBatch>, DataError>;

    /// 重新随机排列观测顺序，并回到数据开头
    fn shuffle(&mut self);

    fn is_done(&self) -> bool;

    fn num_observations(&self) -> usize;

    fn mini_batch_size(&self) -> usize;
}

/// 基于内存张量的分发器
///
/// # 示例
/// ```ignore
/// let dispatcher = InMemoryDispatcher::new(vec![train_x], vec![train_y], 32)?
///     .drop_last(true)
///     .seed(42);
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryDispatcher {
    inputs: Vec<Tensor>,
    targets: Vec<Tensor>,
    num_observations: usize,
    mini_batch_size: usize,
    drop_last: bool,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl InMemoryDispatcher {
    /// 创建新的分发器
    ///
    /// # 参数
    /// - `inputs`: 每个网络输入一个张量，第一维为观测数
    /// - `targets`: 每个输出层一个目标张量，第一维为观测数（可以为空，仅用于推理/统计）
    /// - `mini_batch_size`: 批大小
    pub fn new(
        inputs: Vec<Tensor>,
        targets: Vec<Tensor>,
        mini_batch_size: usize,
    ) -> Result<Self, DataError> {
        if mini_batch_size == 0 {
            return Err(DataError::ZeroBatchSize);
        }
        let first = inputs.first().ok_or(DataError::EmptyDataset)?;
        let num_observations = first.batch_size();
        if num_observations == 0 {
            return Err(DataError::EmptyDataset);
        }
        for (index, t) in inputs.iter().chain(targets.iter()).enumerate() {
            if t.batch_size() != num_observations {
                return Err(DataError::MismatchedObservations {
                    index,
                    expected: num_observations,
                    got: t.batch_size(),
                });
            }
        }

        Ok(Self {
            inputs,
            targets,
            num_observations,
            mini_batch_size,
            drop_last: false,
            order: (0..num_observations).collect(),
            cursor: 0,
            rng: StdRng::from_entropy(),
        })
    }

    /// 设置是否丢弃最后一个不完整的批次
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// 设置随机种子（用于 shuffle）
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// 每个epoch的批次数量
    pub fn num_batches(&self) -> usize {
        if self.drop_last {
            self.num_observations / self.mini_batch_size
        } else {
            (self.num_observations + self.mini_batch_size - 1) / self.mini_batch_size
        }
    }

    /// 所有输入（不分批），用于统计量计算等
    pub fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    fn remaining(&self) -> usize {
        self.num_observations - self.cursor
    }
}

impl Dispatcher for InMemoryDispatcher {
    fn start(&mut self) {
        self.cursor = 0;
    }

    fn next(&mut self) -> Result<Option<MiniBatch>, DataError> {
        if self.is_done() {
            return Ok(None);
        }
        let end = (self.cursor + self.mini_batch_size).min(self.num_observations);
        let indices = self.order[self.cursor..end].to_vec();
        self.cursor = end;

        let inputs = self
            .inputs
            .iter()
            .map(|t| t.select_observations(&indices))
            .collect::<Result<Vec<_>, _>>()?;
        let targets = self
            .targets
            .iter()
            .map(|t| t.select_observations(&indices))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(MiniBatch {
            inputs,
            targets,
            indices,
        }))
    }

    fn shuffle(&mut self) {
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
    }

    fn is_done(&self) -> bool {
        let remaining = self.remaining();
        remaining == 0 || (self.drop_last && remaining < self.mini_batch_size)
    }

    fn num_observations(&self) -> usize {
        self.num_observations
    }

    fn mini_batch_size(&self) -> usize {
        self.mini_batch_size
    }
}
