/*
 * @Description  : LayerGraph 模块：层与多端口连接组成的有向图
 *
 * 公开 API：
 * - `LayerGraph`: 层列表 + 四元组连接表（源层, 源端口, 目标层, 目标端口）
 * - `Connection` / `AugmentedEdge`: 连接与按层对折叠后的边
 * - `LayerOrder`: 原始索引与拓扑排序后索引的双向映射
 * - `GraphError`: 错误类型
 *
 * 端口在内部一律从0开始编号；按名称连接时写作`"层名"`或`"层名/端口名"`。
 */

mod error;
mod sort;

pub use error::GraphError;
pub use sort::LayerOrder;

use crate::nn::layer::{Layer, LayerRole, TraitLayer};

/// 一条连接（端口从0开始编号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Connection {
    pub source: usize,
    pub source_port: usize,
    pub destination: usize,
    pub destination_port: usize,
}

/// 同一对（源层, 目标层）之间的所有连接折叠成的一条边，`ports`为(源端口, 目标端口)列表，
/// 按目标端口排序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AugmentedEdge {
    pub source: usize,
    pub destination: usize,
    pub ports: Vec<(usize, usize)>,
}

/// 层图
///
/// # 使用示例
/// ```ignore
/// let mut graph = LayerGraph::new();
/// graph.add_layer(Layer::new("input", FeatureInput::new(2)))?;
/// graph.add_layer(Layer::new("fc1", FullyConnected::new(2)))?;
/// graph.add_layer(Layer::new("fc2", FullyConnected::new(2)))?;
/// graph.add_layer(Layer::new("add", Addition::new(2)?))?;
/// graph.add_layer(Layer::new("output", RegressionOutput::new()))?;
/// graph.connect("input", "fc1")?;
/// graph.connect("input", "fc2")?;
/// graph.connect("fc1", "add/in1")?;
/// graph.connect("fc2", "add/in2")?;
/// graph.connect("add", "output")?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct LayerGraph {
    layers: Vec<Layer>,
    connections: Vec<Connection>,
}

fn split_port(endpoint: &str) -> (&str, Option<&str>) {
    match endpoint.split_once('/') {
        Some((layer, port)) => (layer, Some(port)),
        None => (endpoint, None),
    }
}

impl LayerGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把层数组首尾相连成一条链
    pub fn from_series(layers: Vec<Layer>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for layer in layers {
            graph.add_layer(layer)?;
        }
        for i in 1..graph.layers.len() {
            let source = graph.layers[i - 1].name.clone();
            let destination = graph.layers[i].name.clone();
            graph.connect(&source, &destination)?;
        }
        Ok(graph)
    }

    /// 添加一个层，返回其（原始）索引
    pub fn add_layer(&mut self, layer: Layer) -> Result<usize, GraphError> {
        if layer.name.is_empty() || layer.name.contains('/') {
            return Err(GraphError::InvalidLayerName(layer.name));
        }
        if self.layers.iter().any(|l| l.name == layer.name) {
            return Err(GraphError::DuplicateLayerName(layer.name));
        }
        self.layers.push(layer);
        Ok(self.layers.len() - 1)
    }

    pub fn add_layers(&mut self, layers: Vec<Layer>) -> Result<(), GraphError> {
        for layer in layers {
            self.add_layer(layer)?;
        }
        Ok(())
    }

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓访问器↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn index_of(&self, name: &str) -> Result<usize, GraphError> {
        self.layers
            .iter()
            .position(|l| l.name == name)
            .ok_or_else(|| GraphError::LayerNotFound(name.to_string()))
    }

    pub fn layer(&self, name: &str) -> Result<&Layer, GraphError> {
        Ok(&self.layers[self.index_of(name)?])
    }

    pub fn layer_mut(&mut self, name: &str) -> Result<&mut Layer, GraphError> {
        let index = self.index_of(name)?;
        Ok(&mut self.layers[index])
    }

    /// 输入层的原始索引（按原始顺序）
    pub fn input_layer_indices(&self) -> Vec<usize> {
        self.indices_with_role(LayerRole::Input)
    }

    /// 输出层的原始索引（按原始顺序）
    pub fn output_layer_indices(&self) -> Vec<usize> {
        self.indices_with_role(LayerRole::Output)
    }

    fn indices_with_role(&self, role: LayerRole) -> Vec<usize> {
        (0..self.layers.len())
            .filter(|&i| self.layers[i].role() == role)
            .collect()
    }

    pub(crate) fn into_parts(self) -> (Vec<Layer>, Vec<Connection>) {
        (self.layers, self.connections)
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑访问器↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓连接↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    fn resolve_source(&self, endpoint: &str) -> Result<(usize, usize), GraphError> {
        let (name, port) = split_port(endpoint);
        let index = self.index_of(name)?;
        let layer = &self.layers[index];
        let port_index = match port {
            Some(port) => layer.output_port_index(port),
            None if !layer.inner.has_variable_outputs() && layer.inner.num_outputs() == Some(1) => {
                Some(0)
            }
            None if layer.inner.num_outputs() == Some(0) => None,
            None => return Err(GraphError::PortRequired(name.to_string())),
        };
        port_index.map(|p| (index, p)).ok_or_else(|| GraphError::InvalidPort {
            layer: name.to_string(),
            port: port.unwrap_or("out").to_string(),
        })
    }

    fn resolve_destination(&self, endpoint: &str) -> Result<(usize, usize), GraphError> {
        let (name, port) = split_port(endpoint);
        let index = self.index_of(name)?;
        let layer = &self.layers[index];
        let port_index = match port {
            Some(port) => layer.input_port_index(port),
            None if layer.inner.num_inputs() == 1 => Some(0),
            None if layer.inner.num_inputs() == 0 => None,
            None => return Err(GraphError::PortRequired(name.to_string())),
        };
        port_index.map(|p| (index, p)).ok_or_else(|| GraphError::InvalidPort {
            layer: name.to_string(),
            port: port.unwrap_or("in").to_string(),
        })
    }

    /// 连接`source`的输出端口到`destination`的输入端口；每个输入端口只能被连接一次
    pub fn connect(&mut self, source: &str, destination: &str) -> Result<(), GraphError> {
        let (source, source_port) = self.resolve_source(source)?;
        let (destination, destination_port) = self.resolve_destination(destination)?;
        if self
            .connections
            .iter()
            .any(|c| c.destination == destination && c.destination_port == destination_port)
        {
            let layer = &self.layers[destination];
            return Err(GraphError::PortAlreadyConnected {
                layer: layer.name.clone(),
                port: layer.input_names()[destination_port].clone(),
            });
        }
        self.connections.push(Connection {
            source,
            source_port,
            destination,
            destination_port,
        });
        Ok(())
    }

    /// 断开一条连接
    pub fn disconnect(&mut self, source: &str, destination: &str) -> Result<(), GraphError> {
        let (s, sp) = self.resolve_source(source)?;
        let (d, dp) = self.resolve_destination(destination)?;
        let before = self.connections.len();
        self.connections.retain(|c| {
            !(c.source == s
                && c.source_port == sp
                && c.destination == d
                && c.destination_port == dp)
        });
        if self.connections.len() == before {
            return Err(GraphError::ConnectionNotFound {
                from: source.to_string(),
                to: destination.to_string(),
            });
        }
        Ok(())
    }

    /// 删除若干层及与之相关的所有连接，其余层的原始索引随之前移
    pub fn remove_layers(&mut self, names: &[&str]) -> Result<(), GraphError> {
        let mut removed = vec![false; self.layers.len()];
        for name in names {
            removed[self.index_of(name)?] = true;
        }
        let mut new_index = vec![usize::MAX; self.layers.len()];
        let mut next = 0;
        for (i, &gone) in removed.iter().enumerate() {
            if !gone {
                new_index[i] = next;
                next += 1;
            }
        }

        self.connections
            .retain(|c| !removed[c.source] && !removed[c.destination]);
        for c in &mut self.connections {
            c.source = new_index[c.source];
            c.destination = new_index[c.destination];
        }
        let mut i = 0;
        self.layers.retain(|_| {
            let keep = !removed[i];
            i += 1;
            keep
        });
        Ok(())
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑连接↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

    /// 层`index`实际占用的输出个数：
    /// 输出层为1（存放预测），可变输出层取连接表中引用到的最大输出端口+1，其余为声明值
    pub(crate) fn resolved_num_outputs(&self, index: usize) -> usize {
        let layer = &self.layers[index];
        if layer.role() == LayerRole::Output {
            return 1;
        }
        if layer.inner.has_variable_outputs() {
            return self
                .connections
                .iter()
                .filter(|c| c.source == index)
                .map(|c| c.source_port + 1)
                .max()
                .unwrap_or(0);
        }
        layer.inner.num_outputs().unwrap_or(0)
    }

    /// 校验：每个输入端口恰好连接一次；至少有一个输入层和一个输出层
    pub fn validate(&self) -> Result<(), GraphError> {
        for (index, layer) in self.layers.iter().enumerate() {
            for (port, port_name) in layer.input_names().into_iter().enumerate() {
                let connected = self
                    .connections
                    .iter()
                    .any(|c| c.destination == index && c.destination_port == port);
                if !connected {
                    return Err(GraphError::UnconnectedInput {
                        layer: layer.name.clone(),
                        port: port_name,
                    });
                }
            }
        }
        if self.input_layer_indices().is_empty() {
            return Err(GraphError::MissingInputLayer);
        }
        if self.output_layer_indices().is_empty() {
            return Err(GraphError::MissingOutputLayer);
        }
        Ok(())
    }

    /// 把同一(源层, 目标层)对之间的连接折叠为一条边（按首次出现的顺序）
    pub fn augmented_edges(&self) -> Vec<AugmentedEdge> {
        let mut edges: Vec<AugmentedEdge> = Vec::new();
        for c in &self.connections {
            match edges
                .iter_mut()
                .find(|e| e.source == c.source && e.destination == c.destination)
            {
                Some(edge) => edge.ports.push((c.source_port, c.destination_port)),
                None => edges.push(AugmentedEdge {
                    source: c.source,
                    destination: c.destination,
                    ports: vec![(c.source_port, c.destination_port)],
                }),
            }
        }
        for edge in &mut edges {
            edge.ports.sort_by_key(|&(_, destination_port)| destination_port);
        }
        edges
    }
}
