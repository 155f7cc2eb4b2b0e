/*
 * @Description  : 缓冲区布局：在网络构建时一次性算好，之后每次前向/反向传播都直接按表执行
 *
 * - 每个层的每个输出端口占激活缓冲区的一格（slot），同一层的格子连续
 * - 每个层的输入格子按目标端口排序
 * - 前向清理表：格子在最后一个读取它的层执行完后立即清理（输出层的格子除外）
 * - 反向清理表：格子在反向遍历访问到其生产者（最早接触它的层）之后清理
 */

use crate::nn::graph::Connection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPlan {
    num_activations: usize,
    output_indices: Vec<Vec<usize>>,
    input_indices: Vec<Vec<usize>>,
    producers: Vec<usize>,
    forward_clear: Vec<Vec<usize>>,
    backward_clear: Vec<Vec<usize>>,
}

impl BufferPlan {
    /// 所有索引均为排序后的层索引
    ///
    /// - `num_outputs[k]`: 层k占用的格子数
    /// - `connections`: 以排序后索引表示的连接表（已校验：每个输入端口恰好连接一次）
    /// - `is_output[k]`: 层k是否为输出层（其格子存放预测，前向不清理）
    pub(crate) fn new(
        num_outputs: &[usize],
        connections: &[Connection],
        is_output: &[bool],
    ) -> Self {
        let num_layers = num_outputs.len();

        let mut output_indices = Vec::with_capacity(num_layers);
        let mut producers = Vec::new();
        for (layer, &n) in num_outputs.iter().enumerate() {
            let start = producers.len();
            output_indices.push((start..start + n).collect::<Vec<_>>());
            producers.extend(std::iter::repeat(layer).take(n));
        }
        let num_activations = producers.len();

        let mut sorted = connections.to_vec();
        sorted.sort_by_key(|c| (c.destination, c.destination_port));
        let mut input_indices = vec![Vec::new(); num_layers];
        let mut last_consumer: Vec<Option<usize>> = vec![None; num_activations];
        for c in &sorted {
            let slot = output_indices[c.source][c.source_port];
            input_indices[c.destination].push(slot);
            let last = last_consumer[slot].get_or_insert(c.destination);
            *last = (*last).max(c.destination);
        }

        let mut forward_clear = vec![Vec::new(); num_layers];
        let mut backward_clear = vec![Vec::new(); num_layers];
        for (slot, &producer) in producers.iter().enumerate() {
            backward_clear[producer].push(slot);
            if is_output[producer] {
                continue;
            }
            // 没有消费者的格子（未连接的输出端口）在生产者执行完后立即清理
            let step = last_consumer[slot].unwrap_or(producer);
            forward_clear[step].push(slot);
        }

        log::debug!(
            "缓冲区规划完成：{}个层，{}个激活格子",
            num_layers,
            num_activations
        );
        Self {
            num_activations,
            output_indices,
            input_indices,
            producers,
            forward_clear,
            backward_clear,
        }
    }

    pub fn num_activations(&self) -> usize {
        self.num_activations
    }

    pub fn num_layers(&self) -> usize {
        self.output_indices.len()
    }

    /// 层`layer`（排序后索引）的输出格子
    pub fn output_indices(&self, layer: usize) -> &[usize] {
        &self.output_indices[layer]
    }

    /// 层`layer`的输入格子，按输入端口排序
    pub fn input_indices(&self, layer: usize) -> &[usize] {
        &self.input_indices[layer]
    }

    /// 写入格子`slot`的层
    pub fn producer(&self, slot: usize) -> usize {
        self.producers[slot]
    }

    /// 前向传播中层`layer`执行完后应清理的格子
    pub fn forward_clear(&self, layer: usize) -> &[usize] {
        &self.forward_clear[layer]
    }

    /// 反向传播中访问完层`layer`后应清理的格子
    pub fn backward_clear(&self, layer: usize) -> &[usize] {
        &self.backward_clear[layer]
    }
}
