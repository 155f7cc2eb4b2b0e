/*
 * @Description  : 执行策略：决定张量放在哪个设备上运算。
 *                 引擎只通过`ExecutionStrategy`与设备打交道，本身不含任何设备分支。
 */

mod budget;
mod host;

pub use budget::MemoryBudgetStrategy;
pub use host::HostStrategy;

use crate::tensor::Tensor;
use thiserror::Error;

/// 执行设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// 主机内存
    Host,
    /// 加速设备（序号）
    Accelerator(usize),
}

/// 执行策略相关错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// 设备显存不足，可经分级回收后重试
    #[error("设备显存不足：需要{requested}字节，剩余{available}字节")]
    OutOfMemory { requested: usize, available: usize },
    #[error("累加图像的形状{expected:?}与批次中单个样本的形状{got:?}不一致")]
    AccumShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
}

impl ExecutionError {
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

/// 执行策略
///
/// - `environment`：把张量放置到执行设备上；`resident_bytes`是调用方当前已驻留在设备上的字节数
/// - `gather`：把张量取回主机
/// - `compute_accum_image`：把一个批次按样本累加进`accum`（输入归一化统计量用）
pub trait ExecutionStrategy: std::fmt::Debug {
    fn device(&self) -> Device;

    fn environment(&self, tensor: Tensor, resident_bytes: usize) -> Result<Tensor, ExecutionError>;

    fn gather(&self, tensor: Tensor) -> Tensor {
        tensor
    }

    fn compute_accum_image(
        &self,
        accum: Option<Tensor>,
        batch: &Tensor,
    ) -> Result<Tensor, ExecutionError> {
        let batch_sum = batch.sum_axis(0);
        match accum {
            None => Ok(batch_sum),
            Some(acc) if acc.is_same_shape(&batch_sum) => Ok(acc + batch_sum),
            Some(acc) => Err(ExecutionError::AccumShapeMismatch {
                expected: acc.shape().to_vec(),
                got: batch_sum.shape().to_vec(),
            }),
        }
    }

    /// 放在该设备上的数据是否计入设备驻留量
    fn is_device_resident(&self) -> bool {
        self.device() != Device::Host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_strategy_never_runs_out_of_memory() {
        let host = HostStrategy;
        let t = Tensor::ones(&[64, 64]);
        let placed = host.environment(t.clone(), usize::MAX / 2).unwrap();
        assert_eq!(placed, t);
        assert!(!host.is_device_resident());
    }

    #[test]
    fn test_budget_strategy_reports_out_of_memory() {
        let device = MemoryBudgetStrategy::new(0, 64);
        assert_eq!(device.device(), Device::Accelerator(0));
        // 16个f32 = 64字节，刚好放下
        assert!(device.environment(Tensor::zeros(&[16]), 0).is_ok());
        let err = device.environment(Tensor::zeros(&[16]), 8).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::OutOfMemory {
                requested: 64,
                available: 56,
            }
        );
        assert!(err.is_out_of_memory());
    }

    #[test]
    fn test_compute_accum_image() {
        let host = HostStrategy;
        let batch1 = Tensor::new(&[1., 2., 3., 4.], &[2, 2]);
        let batch2 = Tensor::new(&[5., 6.], &[1, 2]);
        let acc = host.compute_accum_image(None, &batch1).unwrap();
        let acc = host.compute_accum_image(Some(acc), &batch2).unwrap();
        assert_eq!(acc, Tensor::new(&[9., 12.], &[2]));

        let wrong = Tensor::new(&[1., 2., 3.], &[1, 3]);
        assert!(host.compute_accum_image(Some(acc), &wrong).is_err());
    }
}
