/*
 * @Description  : 按缓冲区布局执行的反向传播
 *
 * 按排序后的逆序遍历到最早的学习层为止：
 * - 输出层用`backward_loss`在其输入格子上播下梯度
 * - 输入层什么也不做
 * - 其余层调用`backward`，把对输入的梯度累加到输入格子上（扇出处相加）
 * 访问完一个层后按反向清理表清理激活与梯度，并释放该层的前向记忆。
 */

use super::buffer::Workspace;
use super::forward::Engine;
use super::recovery::with_recovery;
use super::NetworkError;
use crate::nn::layer::{LayerError, LayerRole, Memory, TraitLayer};
use crate::tensor::Tensor;

impl Engine<'_> {
    /// 返回每个层（排序后）的参数梯度；未访问或不在学习的层为`None`
    pub(crate) fn backward(
        &self,
        workspace: &mut Workspace,
        targets: &[Tensor],
        output_layers: &[usize],
        is_learning: &[bool],
        earliest_learning_layer: Option<usize>,
    ) -> Result<Vec<Option<Vec<Tensor>>>, NetworkError> {
        let mut parameter_gradients = vec![None; self.layers.len()];
        let Some(earliest) = earliest_learning_layer else {
            return Ok(parameter_gradients);
        };

        for k in (earliest..self.layers.len()).rev() {
            let layer = &self.layers[k];
            match layer.role() {
                LayerRole::Input => {}
                LayerRole::Output => {
                    let j = output_layers
                        .iter()
                        .position(|&o| o == k)
                        .ok_or_else(|| NetworkError::Layer {
                            layer: layer.name().to_string(),
                            source: LayerError::NotAnOutputLayer,
                        })?;
                    let output = layer
                        .inner
                        .as_output_layer()
                        .ok_or(LayerError::NotAnOutputLayer)
                        .map_err(NetworkError::layer(layer.name()))?;
                    let slot = self.plan.input_indices(k)[0];
                    let y = self.read_activations(workspace, &[slot])?.remove(0);
                    let dy = output
                        .backward_loss(&y, &targets[j])
                        .map_err(NetworkError::layer(layer.name()))?;
                    self.accumulate(workspace, layer.name(), slot, &y, dy)?;
                }
                LayerRole::Hidden => {
                    let input_slots = self.plan.input_indices(k);
                    let output_slots = self.plan.output_indices(k);
                    let x = self.read_activations(workspace, input_slots)?;
                    let z = self.read_activations(workspace, output_slots)?;
                    // 没有梯度流入的输出端口按零梯度处理
                    let dz: Vec<Tensor> = output_slots
                        .iter()
                        .zip(&z)
                        .map(|(&s, z)| {
                            workspace
                                .gradients
                                .get(s)
                                .cloned()
                                .unwrap_or_else(|| z.zeros_like())
                        })
                        .collect();
                    let memory = workspace.memory.take(k).unwrap_or(Memory::Empty);

                    let gradients = layer
                        .inner
                        .backward(&x, &z, &dz, &memory, is_learning[k])
                        .map_err(NetworkError::layer(layer.name()))?;
                    if gradients.inputs.len() != x.len() {
                        return Err(NetworkError::Layer {
                            layer: layer.name().to_string(),
                            source: LayerError::InputCountMismatch {
                                expected: x.len(),
                                got: gradients.inputs.len(),
                            },
                        });
                    }
                    for ((&slot, xi), dx) in input_slots.iter().zip(&x).zip(gradients.inputs) {
                        self.accumulate(workspace, layer.name(), slot, xi, dx)?;
                    }
                    if is_learning[k] {
                        parameter_gradients[k] = Some(gradients.parameters);
                    }
                }
            }

            for &slot in self.plan.backward_clear(k) {
                workspace.activations.clear(slot);
                workspace.gradients.clear(slot);
            }
            workspace.memory.clear(k);
        }
        Ok(parameter_gradients)
    }

    /// 把`dx`累加到格子`slot`的梯度上（形状须与该格的激活`x`一致）
    fn accumulate(
        &self,
        workspace: &mut Workspace,
        layer: &str,
        slot: usize,
        x: &Tensor,
        dx: Tensor,
    ) -> Result<(), NetworkError> {
        if !dx.is_same_shape(x) {
            return Err(NetworkError::GradientShapeMismatch {
                layer: layer.to_string(),
                expected: x.shape().to_vec(),
                got: dx.shape().to_vec(),
            });
        }
        let sum = match workspace.gradients.take(slot) {
            Some(mut existing) => {
                existing += &dx;
                existing
            }
            None => dx,
        };
        let on_device = self.strategy.is_device_resident();
        with_recovery(workspace, self.strategy, layer, |ws| {
            let placed = ws.place(self.strategy, std::slice::from_ref(&sum), 0)?;
            for tensor in placed {
                ws.gradients.insert(slot, tensor, on_device);
            }
            Ok(())
        })?;
        Ok(())
    }
}
