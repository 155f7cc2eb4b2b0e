/*
 * @Description  : 显存不足时的分阶段回收
 *
 * 每个逐层操作失败于显存不足时，依次：
 * 1. 把激活缓冲区取回主机
 * 2. 把前向记忆缓冲区取回主机
 * 3. 把已累积的梯度取回主机
 * 每个阶段之后重试一次；三个阶段都用完仍失败则把错误原样抛出。其它错误不重试。
 */

use super::buffer::Workspace;
use crate::execution::{ExecutionError, ExecutionStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    GatherActivations,
    GatherMemory,
    GatherGradients,
}

impl RecoveryStage {
    pub const ALL: [Self; 3] = [
        Self::GatherActivations,
        Self::GatherMemory,
        Self::GatherGradients,
    ];

    fn apply(self, workspace: &mut Workspace, strategy: &dyn ExecutionStrategy) {
        match self {
            Self::GatherActivations => workspace.activations.gather_all(strategy),
            Self::GatherMemory => workspace.memory.gather_all(strategy),
            Self::GatherGradients => workspace.gradients.gather_all(strategy),
        }
    }
}

/// 在分阶段回收的保护下执行`op`；`op`失败时不得已经修改了缓冲区
pub(crate) fn with_recovery<T, F>(
    workspace: &mut Workspace,
    strategy: &dyn ExecutionStrategy,
    layer: &str,
    mut op: F,
) -> Result<T, ExecutionError>
where
    F: FnMut(&mut Workspace) -> Result<T, ExecutionError>,
{
    let mut stages = RecoveryStage::ALL.into_iter();
    loop {
        match op(workspace) {
            Err(e) if e.is_out_of_memory() => match stages.next() {
                Some(stage) => {
                    log::warn!("层“{}”显存不足（{}），回收阶段：{:?}", layer, e, stage);
                    stage.apply(workspace, strategy);
                }
                None => return Err(e),
            },
            result => return result,
        }
    }
}
