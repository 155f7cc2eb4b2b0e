use super::{Device, ExecutionError, ExecutionStrategy};
use crate::tensor::Tensor;

/// 带固定显存预算的设备执行策略
///
/// 放置张量时若`已驻留 + 新张量`超过预算，则报`OutOfMemory`，
/// 由引擎的分级回收（把缓冲区取回主机）腾出空间后重试。
#[derive(Debug, Clone)]
pub struct MemoryBudgetStrategy {
    ordinal: usize,
    budget_bytes: usize,
}

impl MemoryBudgetStrategy {
    pub const fn new(ordinal: usize, budget_bytes: usize) -> Self {
        Self {
            ordinal,
            budget_bytes,
        }
    }

    pub const fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }
}

impl ExecutionStrategy for MemoryBudgetStrategy {
    fn device(&self) -> Device {
        Device::Accelerator(self.ordinal)
    }

    fn environment(&self, tensor: Tensor, resident_bytes: usize) -> Result<Tensor, ExecutionError> {
        let requested = tensor.bytes();
        let available = self.budget_bytes.saturating_sub(resident_bytes);
        if requested > available {
            return Err(ExecutionError::OutOfMemory {
                requested,
                available,
            });
        }
        Ok(tensor)
    }
}
