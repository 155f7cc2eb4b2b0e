/*
 * @Description  : 按缓冲区布局执行的前向传播
 */

use super::buffer::Workspace;
use super::plan::BufferPlan;
use super::recovery::with_recovery;
use super::NetworkError;
use crate::execution::ExecutionStrategy;
use crate::nn::layer::{Layer, LayerError, Memory};
use crate::tensor::Tensor;

/// 前向/反向传播共用的只读视图
pub(crate) struct Engine<'a> {
    pub(crate) layers: &'a [Layer],
    pub(crate) plan: &'a BufferPlan,
    pub(crate) strategy: &'a dyn ExecutionStrategy,
    /// 输入层的排序后索引，按原始顺序排列
    pub(crate) input_layers: &'a [usize],
}

/// 一次前向传播的配置
pub(crate) struct ForwardPass<'a> {
    /// 执行到（含）排序后索引为`last`的层
    pub(crate) last: usize,
    /// 按前向清理表清理格子
    pub(crate) clear_eagerly: bool,
    /// 清理时额外保留的格子
    pub(crate) keep: &'a [usize],
    pub(crate) keep_memory: bool,
}

/// 检查各张量第0维（观测数）一致，返回该观测数；`expected`给出时也须与之相同
pub(crate) fn check_observation_count(
    tensors: &[Tensor],
    expected: Option<usize>,
) -> Result<Option<usize>, NetworkError> {
    let mut expected = expected;
    for t in tensors {
        let got = t.batch_size();
        match expected {
            Some(n) if n != got => {
                return Err(NetworkError::ObservationCountMismatch { expected: n, got });
            }
            Some(_) => {}
            None => expected = Some(got),
        }
    }
    Ok(expected)
}

impl Engine<'_> {
    pub(crate) fn check_inputs(&self, inputs: &[Tensor]) -> Result<(), NetworkError> {
        if inputs.len() != self.input_layers.len() {
            return Err(NetworkError::InputCountMismatch {
                expected: self.input_layers.len(),
                got: inputs.len(),
            });
        }
        check_observation_count(inputs, None).map(|_| ())
    }

    pub(crate) fn read_activations(
        &self,
        workspace: &Workspace,
        slots: &[usize],
    ) -> Result<Vec<Tensor>, NetworkError> {
        slots
            .iter()
            .map(|&s| {
                workspace
                    .activations
                    .get(s)
                    .cloned()
                    .ok_or(NetworkError::MissingActivation(s))
            })
            .collect()
    }

    /// 前向传播：输入层直接接收外部数据，其余层按预先算好的索引取输入
    pub(crate) fn forward<F>(
        &self,
        inputs: &[Tensor],
        workspace: &mut Workspace,
        pass: &ForwardPass<'_>,
        mut run: F,
    ) -> Result<(), NetworkError>
    where
        F: FnMut(&Layer, &[Tensor]) -> Result<(Vec<Tensor>, Memory), LayerError>,
    {
        self.check_inputs(inputs)?;
        let on_device = self.strategy.is_device_resident();

        for (k, layer) in self.layers.iter().enumerate().take(pass.last + 1) {
            let x = match self.input_layers.iter().position(|&i| i == k) {
                Some(j) => vec![inputs[j].clone()],
                None => self.read_activations(workspace, self.plan.input_indices(k))?,
            };
            let (z, memory) = run(layer, &x).map_err(NetworkError::layer(layer.name()))?;

            let slots = self.plan.output_indices(k);
            if z.len() != slots.len() {
                return Err(NetworkError::Layer {
                    layer: layer.name().to_string(),
                    source: LayerError::InvalidConfiguration(format!(
                        "产生了{}个输出，网络为其分配了{}个",
                        z.len(),
                        slots.len()
                    )),
                });
            }

            with_recovery(workspace, self.strategy, layer.name(), |ws| {
                let placed = ws.place(self.strategy, &z, 0)?;
                let placed_memory = if pass.keep_memory {
                    let pending = placed.iter().map(Tensor::bytes).sum();
                    Some(ws.place_memory(self.strategy, &memory, pending)?)
                } else {
                    None
                };
                for (&slot, tensor) in slots.iter().zip(placed) {
                    ws.activations.insert(slot, tensor, on_device);
                }
                if let Some(placed_memory) = placed_memory {
                    ws.memory.insert(k, placed_memory, on_device);
                }
                Ok(())
            })?;

            if pass.clear_eagerly {
                for &slot in self.plan.forward_clear(k) {
                    if !pass.keep.contains(&slot) {
                        workspace.activations.clear(slot);
                    }
                }
            }
        }
        Ok(())
    }

    /// 每个输出层（按原始顺序）的预测
    pub(crate) fn predictions(
        &self,
        workspace: &Workspace,
        output_layers: &[usize],
    ) -> Result<Vec<Tensor>, NetworkError> {
        let slots: Vec<usize> = output_layers
            .iter()
            .flat_map(|&k| self.plan.output_indices(k).iter().copied())
            .collect();
        self.read_activations(workspace, &slots)
    }
}
