/*
 * @Description  : 层图的拓扑排序
 *
 * - `topological_sort`: 稳定的Kahn算法，同时可执行的多个层按原始插入顺序取最小者
 * - `pseudo_topological_sort`: 容忍环，先用深度优先搜索删除回边再排序
 */

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use super::{GraphError, LayerGraph};

/// 原始索引与排序后索引的双向映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerOrder {
    sorted_to_original: Vec<usize>,
    original_to_sorted: Vec<usize>,
}

impl LayerOrder {
    /// `order[k]`是排第k位的层的原始索引
    pub fn new(order: Vec<usize>) -> Self {
        let mut original_to_sorted = vec![0; order.len()];
        for (sorted, &original) in order.iter().enumerate() {
            original_to_sorted[original] = sorted;
        }
        Self {
            sorted_to_original: order,
            original_to_sorted,
        }
    }

    pub fn sorted_to_original(&self, sorted: usize) -> usize {
        self.sorted_to_original[sorted]
    }

    pub fn original_to_sorted(&self, original: usize) -> usize {
        self.original_to_sorted[original]
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.sorted_to_original
    }

    pub fn len(&self) -> usize {
        self.sorted_to_original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted_to_original.is_empty()
    }
}

impl LayerGraph {
    /// 稳定拓扑排序，返回按执行顺序排列的原始索引；有环时返回`GraphError::Cyclic`，
    /// 其中列出所有处于环上（或只能经由环到达）的层
    pub fn topological_sort(&self) -> Result<Vec<usize>, GraphError> {
        let edges = self.connections().iter().map(|c| (c.source, c.destination));
        stable_kahn(self.num_layers(), edges).map_err(|stuck| {
            GraphError::Cyclic(
                stuck
                    .into_iter()
                    .map(|i| self.layers()[i].name().to_string())
                    .collect(),
            )
        })
    }

    /// 对有环的图也给出一个顺序：从虚拟源点做深度优先搜索，删去所有回边后再做稳定排序
    pub fn pseudo_topological_sort(&self) -> Vec<usize> {
        if let Ok(order) = self.topological_sort() {
            return order;
        }
        let back_edges = self.back_edges();
        for &(source, destination) in &back_edges {
            log::warn!(
                "层图有环，忽略连接 {} -> {}",
                self.layers()[source].name(),
                self.layers()[destination].name()
            );
        }
        let edges = self
            .connections()
            .iter()
            .map(|c| (c.source, c.destination))
            .filter(|edge| !back_edges.contains(edge));
        match stable_kahn(self.num_layers(), edges) {
            Ok(order) => order,
            // 删去回边后不会再有环；此处仅保证返回每个层恰好一次
            Err(stuck) => {
                let mut order: Vec<usize> = (0..self.num_layers())
                    .filter(|i| !stuck.contains(i))
                    .collect();
                order.extend(stuck);
                order
            }
        }
    }

    /// 深度优先搜索找回边。虚拟源点的子节点依次为：入度为0的层，然后是其余尚未访问的层
    fn back_edges(&self) -> HashSet<(usize, usize)> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let n = self.num_layers();
        let mut successors = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        for c in self.connections() {
            successors[c.source].push(c.destination);
            in_degree[c.destination] += 1;
        }

        let roots = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .chain((0..n).filter(|&i| in_degree[i] > 0));
        let mut marks = vec![Mark::Unvisited; n];
        let mut back_edges = HashSet::new();
        for root in roots {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // 栈中为(节点, 下一个待访问的后继序号)
            let mut stack = vec![(root, 0usize)];
            marks[root] = Mark::OnStack;
            while let Some((node, next)) = stack.last_mut() {
                let node = *node;
                if let Some(&succ) = successors[node].get(*next) {
                    *next += 1;
                    match marks[succ] {
                        Mark::Unvisited => {
                            marks[succ] = Mark::OnStack;
                            stack.push((succ, 0));
                        }
                        Mark::OnStack => {
                            back_edges.insert((node, succ));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }
        back_edges
    }
}

/// Kahn算法；就绪集合用最小堆，保证结果只由原始索引决定。
/// 失败时返回无法排出的节点
fn stable_kahn(
    n: usize,
    edges: impl Iterator<Item = (usize, usize)>,
) -> Result<Vec<usize>, Vec<usize>> {
    let mut in_degree = vec![0usize; n];
    let mut successors = vec![Vec::new(); n];
    for (source, destination) in edges {
        successors[source].push(destination);
        in_degree[destination] += 1;
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &succ in &successors[node] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.push(Reverse(succ));
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err((0..n).filter(|&i| in_degree[i] > 0).collect())
    }
}
