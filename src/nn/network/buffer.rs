/*
 * @Description  : 一次网络调用所拥有的缓冲区：激活、前向记忆、梯度（dLossdX）
 *
 * 每格记录其内容是否驻留在设备上；驻留字节数之和交给执行策略核算显存。
 */

use crate::execution::{ExecutionError, ExecutionStrategy};
use crate::nn::layer::Memory;
use crate::tensor::Tensor;

/// 可以放在设备上的缓冲内容
pub(crate) trait Placeable: Sized {
    fn bytes(&self) -> usize;

    /// 取回主机
    fn gathered(self, strategy: &dyn ExecutionStrategy) -> Self;
}

impl Placeable for Tensor {
    fn bytes(&self) -> usize {
        Tensor::bytes(self)
    }

    fn gathered(self, strategy: &dyn ExecutionStrategy) -> Self {
        strategy.gather(self)
    }
}

impl Placeable for Memory {
    fn bytes(&self) -> usize {
        Memory::bytes(self)
    }

    fn gathered(self, strategy: &dyn ExecutionStrategy) -> Self {
        match self {
            Self::Tensors(tensors) => {
                Self::Tensors(tensors.into_iter().map(|t| strategy.gather(t)).collect())
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    value: T,
    on_device: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Buffer<T> {
    slots: Vec<Option<Slot<T>>>,
}

impl<T: Placeable> Buffer<T> {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| None).collect(),
        }
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.slots[index].as_ref().map(|slot| &slot.value)
    }

    pub(crate) fn take(&mut self, index: usize) -> Option<T> {
        self.slots[index].take().map(|slot| slot.value)
    }

    pub(crate) fn insert(&mut self, index: usize, value: T, on_device: bool) {
        self.slots[index] = Some(Slot { value, on_device });
    }

    pub(crate) fn clear(&mut self, index: usize) {
        self.slots[index] = None;
    }

    pub(crate) fn num_occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub(crate) fn resident_bytes(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| slot.on_device)
            .map(|slot| slot.value.bytes())
            .sum()
    }

    /// 把所有驻留在设备上的格子取回主机
    pub(crate) fn gather_all(&mut self, strategy: &dyn ExecutionStrategy) {
        for entry in &mut self.slots {
            if let Some(slot) = entry.take() {
                *entry = Some(if slot.on_device {
                    Slot {
                        value: slot.value.gathered(strategy),
                        on_device: false,
                    }
                } else {
                    slot
                });
            }
        }
    }
}

/// 一次前向/反向调用的全部缓冲区
#[derive(Debug, Clone)]
pub(crate) struct Workspace {
    pub(crate) activations: Buffer<Tensor>,
    pub(crate) memory: Buffer<Memory>,
    pub(crate) gradients: Buffer<Tensor>,
}

impl Workspace {
    pub(crate) fn new(num_activations: usize, num_layers: usize) -> Self {
        Self {
            activations: Buffer::new(num_activations),
            memory: Buffer::new(num_layers),
            gradients: Buffer::new(num_activations),
        }
    }

    pub(crate) fn resident_bytes(&self) -> usize {
        self.activations.resident_bytes()
            + self.memory.resident_bytes()
            + self.gradients.resident_bytes()
    }

    /// 依次把张量交给执行策略放置，每放一个都计入驻留字节；失败时缓冲区不变。
    /// `pending_bytes`为本次操作中已放置、尚未写入缓冲区的字节数
    pub(crate) fn place(
        &self,
        strategy: &dyn ExecutionStrategy,
        tensors: &[Tensor],
        pending_bytes: usize,
    ) -> Result<Vec<Tensor>, ExecutionError> {
        let mut resident = self.resident_bytes() + pending_bytes;
        tensors
            .iter()
            .map(|t| {
                let placed = strategy.environment(t.clone(), resident)?;
                resident += placed.bytes();
                Ok(placed)
            })
            .collect()
    }

    pub(crate) fn place_memory(
        &self,
        strategy: &dyn ExecutionStrategy,
        memory: &Memory,
        pending_bytes: usize,
    ) -> Result<Memory, ExecutionError> {
        match memory {
            Memory::Tensors(tensors) => Ok(Memory::Tensors(self.place(
                strategy,
                tensors,
                pending_bytes,
            )?)),
            other => Ok(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::MemoryBudgetStrategy;

    #[test]
    fn test_resident_bytes_and_gather() {
        let device = MemoryBudgetStrategy::new(0, 1024);
        let mut ws = Workspace::new(3, 2);
        ws.activations.insert(0, Tensor::zeros(&[4]), true);
        ws.activations.insert(1, Tensor::zeros(&[2]), false);
        ws.memory.insert(0, Memory::Tensors(vec![Tensor::zeros(&[3])]), true);
        ws.gradients.insert(2, Tensor::zeros(&[1]), true);
        assert_eq!(ws.resident_bytes(), (4 + 3 + 1) * 4);

        ws.activations.gather_all(&device);
        assert_eq!(ws.resident_bytes(), (3 + 1) * 4);
        assert_eq!(ws.activations.num_occupied(), 2);
        assert!(ws.activations.get(0).is_some());
    }

    #[test]
    fn test_place_counts_earlier_tensors() {
        let device = MemoryBudgetStrategy::new(0, 40);
        let ws = Workspace::new(1, 1);
        // 每个张量24字节：单独放得下，两个一起放不下
        let tensors = vec![Tensor::zeros(&[6]), Tensor::zeros(&[6])];
        assert!(ws.place(&device, &tensors[..1], 0).is_ok());
        assert!(ws.place(&device, &tensors[..1], 24).is_err());
        let err = ws.place(&device, &tensors, 0).unwrap_err();
        assert!(err.is_out_of_memory());
    }
}
