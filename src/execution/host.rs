use super::{Device, ExecutionError, ExecutionStrategy};
use crate::tensor::Tensor;

/// 主机执行策略：张量留在主机内存中，不设上限
#[derive(Debug, Clone, Copy, Default)]
pub struct HostStrategy;

impl ExecutionStrategy for HostStrategy {
    fn device(&self) -> Device {
        Device::Host
    }

    fn environment(
        &self,
        tensor: Tensor,
        _resident_bytes: usize,
    ) -> Result<Tensor, ExecutionError> {
        Ok(tensor)
    }
}
