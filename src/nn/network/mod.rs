/*
 * @Description  : DagNetwork：有向无环图网络的执行引擎
 *
 * 构建时（一次）：校验并拓扑排序层图 -> 推断各层尺寸 -> 初始化可学习参数 -> 规划缓冲区布局；
 * 之后每次调用都只按布局执行：
 * - `predict`: 推理，前向清理表即时释放不再需要的激活
 * - `forward_propagation_with_memory`: 训练用前向，保留各层的记忆
 * - `compute_gradients_for_training`: 前向 + 反向，给出按全局参数顺序排列的梯度
 * 每个逐层操作都在分阶段显存回收的保护下执行。
 */

mod backward;
mod buffer;
mod error;
mod forward;
mod plan;
mod recovery;

pub use error::NetworkError;
pub use plan::BufferPlan;
pub use recovery::RecoveryStage;

use buffer::Workspace;
use forward::{check_observation_count, Engine, ForwardPass};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::data::{DataError, Dispatcher};
use crate::execution::{ExecutionStrategy, HostStrategy};
use crate::nn::graph::{Connection, LayerGraph, LayerOrder};
use crate::nn::layer::{Layer, LayerError, LayerRole, Size, TraitLayer};
use crate::nn::param::LearnableParameter;
use crate::tensor::Tensor;

/// 有运行统计量的层在一次训练前向后给出的新状态
#[derive(Debug, Clone, PartialEq)]
pub struct LayerState {
    pub layer: String,
    pub values: Vec<Tensor>,
}

/// `compute_gradients_for_training`的结果
#[derive(Debug, Clone)]
pub struct TrainingGradients {
    /// 按全局参数顺序排列；反向传播未到达或不在学习的层为`None`
    pub gradients: Vec<Option<Tensor>>,
    /// 每个输出层一个（原始顺序）
    pub predictions: Vec<Tensor>,
    pub loss: f32,
    pub state: Vec<LayerState>,
}

/// 训练用前向传播的结果：保留了激活与记忆，可交给`backward_propagation`
#[derive(Debug, Clone)]
pub struct ForwardMemory {
    workspace: Workspace,
    predictions: Vec<Tensor>,
    state: Vec<LayerState>,
}

impl ForwardMemory {
    pub fn predictions(&self) -> &[Tensor] {
        &self.predictions
    }

    pub fn state(&self) -> &[LayerState] {
        &self.state
    }

    /// 当前仍保存着的激活格子数
    pub fn num_retained_activations(&self) -> usize {
        self.workspace.activations.num_occupied()
    }
}

#[derive(Debug)]
pub struct DagNetwork {
    /// 按拓扑顺序排列
    layers: Vec<Layer>,
    order: LayerOrder,
    /// 以排序后索引表示
    connections: Vec<Connection>,
    plan: BufferPlan,
    /// 输入/输出层的排序后索引，按原始顺序排列
    input_layers: Vec<usize>,
    output_layers: Vec<usize>,
    strategy: Box<dyn ExecutionStrategy>,
    rng: StdRng,
}

impl DagNetwork {
    pub fn new(graph: LayerGraph) -> Result<Self, NetworkError> {
        Self::build(graph, StdRng::from_entropy())
    }

    /// 参数初始化与dropout都使用以`seed`为种子的随机数生成器
    pub fn new_with_seed(graph: LayerGraph, seed: u64) -> Result<Self, NetworkError> {
        Self::build(graph, StdRng::seed_from_u64(seed))
    }

    fn build(graph: LayerGraph, mut rng: StdRng) -> Result<Self, NetworkError> {
        graph.validate()?;
        let order = LayerOrder::new(graph.topological_sort()?);
        let num_outputs_original: Vec<usize> = (0..graph.num_layers())
            .map(|i| graph.resolved_num_outputs(i))
            .collect();
        let input_layers: Vec<usize> = graph
            .input_layer_indices()
            .into_iter()
            .map(|i| order.original_to_sorted(i))
            .collect();
        let output_layers: Vec<usize> = graph
            .output_layer_indices()
            .into_iter()
            .map(|i| order.original_to_sorted(i))
            .collect();

        let (layers, connections) = graph.into_parts();
        let mut unsorted: Vec<Option<Layer>> = layers.into_iter().map(Some).collect();
        let mut layers: Vec<Layer> = order
            .as_slice()
            .iter()
            .filter_map(|&i| unsorted[i].take())
            .collect();
        let num_outputs: Vec<usize> = order
            .as_slice()
            .iter()
            .map(|&i| num_outputs_original[i])
            .collect();
        let connections: Vec<Connection> = connections
            .iter()
            .map(|c| Connection {
                source: order.original_to_sorted(c.source),
                destination: order.original_to_sorted(c.destination),
                ..*c
            })
            .collect();

        for (layer, &n) in layers.iter_mut().zip(&num_outputs) {
            if layer.inner.has_variable_outputs() {
                layer.inner.resolve_num_outputs(n);
            }
        }
        let is_output: Vec<bool> = layers.iter().map(|l| l.role() == LayerRole::Output).collect();
        let plan = BufferPlan::new(&num_outputs, &connections, &is_output);

        // 按拓扑顺序推断尺寸并初始化参数
        let mut sizes: Vec<Option<Size>> = vec![None; plan.num_activations()];
        for (k, layer) in layers.iter_mut().enumerate() {
            let input_sizes = plan
                .input_indices(k)
                .iter()
                .map(|&s| sizes[s].clone().ok_or(NetworkError::MissingActivation(s)))
                .collect::<Result<Vec<_>, _>>()?;
            layer
                .inner
                .infer_size(&input_sizes)
                .map_err(NetworkError::layer(&layer.name))?;
            let output_sizes = if is_output[k] {
                // 输出层的格子存放预测，尺寸同输入
                layer
                    .inner
                    .forward_propagate_size(&input_sizes)
                    .map_err(NetworkError::layer(&layer.name))?;
                input_sizes
            } else {
                layer
                    .inner
                    .forward_propagate_size(&input_sizes)
                    .map_err(NetworkError::layer(&layer.name))?
            };
            let slots = plan.output_indices(k);
            if output_sizes.len() != slots.len() {
                return Err(NetworkError::Layer {
                    layer: layer.name.clone(),
                    source: LayerError::InvalidConfiguration(format!(
                        "推断出{}个输出尺寸，网络为其分配了{}个输出",
                        output_sizes.len(),
                        slots.len()
                    )),
                });
            }
            for (&slot, size) in slots.iter().zip(output_sizes) {
                sizes[slot] = Some(size);
            }
            layer
                .inner
                .initialize_learnable_parameters(&mut rng)
                .map_err(NetworkError::layer(&layer.name))?;
        }

        log::debug!(
            "网络构建完成，执行顺序：{:?}",
            layers.iter().map(Layer::name).collect::<Vec<_>>()
        );
        Ok(Self {
            layers,
            order,
            connections,
            plan,
            input_layers,
            output_layers,
            strategy: Box::new(HostStrategy),
            rng,
        })
    }

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓访问器↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    /// 按拓扑顺序排列的层
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// 层在排序后的索引
    pub fn layer_index(&self, name: &str) -> Result<usize, NetworkError> {
        self.layers
            .iter()
            .position(|l| l.name() == name)
            .ok_or_else(|| NetworkError::LayerNotFound(name.to_string()))
    }

    pub fn layer(&self, name: &str) -> Result<&Layer, NetworkError> {
        Ok(&self.layers[self.layer_index(name)?])
    }

    /// 可修改学习率系数、冻结层等；拓扑与尺寸不可再变
    pub fn layer_mut(&mut self, name: &str) -> Result<&mut Layer, NetworkError> {
        let index = self.layer_index(name)?;
        Ok(&mut self.layers[index])
    }

    pub fn layer_order(&self) -> &LayerOrder {
        &self.order
    }

    /// 以排序后索引表示的连接表
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn buffer_plan(&self) -> &BufferPlan {
        &self.plan
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.input_layers.iter().map(|&k| self.layers[k].name()).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.output_layers.iter().map(|&k| self.layers[k].name()).collect()
    }

    pub fn execution_strategy(&self) -> &dyn ExecutionStrategy {
        self.strategy.as_ref()
    }

    pub fn set_execution_strategy(&mut self, strategy: impl ExecutionStrategy + 'static) {
        self.strategy = Box::new(strategy);
    }

    /// 每个层（排序后）是否至少有一个学习率系数非零的参数
    pub fn layer_is_learning(&self) -> Vec<bool> {
        self.layers.iter().map(Layer::is_learning).collect()
    }

    /// 排序后最靠前的学习层；反向传播到此为止
    pub fn earliest_learning_layer(&self) -> Option<usize> {
        self.layers.iter().position(Layer::is_learning)
    }

    fn engine(&self) -> Engine<'_> {
        Engine {
            layers: &self.layers,
            plan: &self.plan,
            strategy: self.strategy.as_ref(),
            input_layers: &self.input_layers,
        }
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑访问器↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓前向传播↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    /// 推理：每个输入层一个张量（原始顺序），返回每个输出层的预测
    pub fn predict(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, NetworkError> {
        let engine = self.engine();
        let mut workspace = Workspace::new(self.plan.num_activations(), self.layers.len());
        let pass = ForwardPass {
            last: self.layers.len() - 1,
            clear_eagerly: true,
            keep: &[],
            keep_memory: false,
        };
        engine.forward(inputs, &mut workspace, &pass, |layer, x| {
            Ok((layer.inner.predict(x)?, Default::default()))
        })?;
        engine.predictions(&workspace, &self.output_layers)
    }

    /// 推理到名为`layer`的层为止，返回它的全部输出
    pub fn activations(&self, inputs: &[Tensor], layer: &str) -> Result<Vec<Tensor>, NetworkError> {
        let k = self.layer_index(layer)?;
        let engine = self.engine();
        let mut workspace = Workspace::new(self.plan.num_activations(), self.layers.len());
        let pass = ForwardPass {
            last: k,
            clear_eagerly: true,
            keep: self.plan.output_indices(k),
            keep_memory: false,
        };
        engine.forward(inputs, &mut workspace, &pass, |layer, x| {
            Ok((layer.inner.predict(x)?, Default::default()))
        })?;
        engine.read_activations(&workspace, self.plan.output_indices(k))
    }

    /// 训练用前向传播：保留每层的记忆；只有在没有任何学习层时才即时清理激活
    pub fn forward_propagation_with_memory(
        &mut self,
        inputs: &[Tensor],
    ) -> Result<ForwardMemory, NetworkError> {
        let clear_eagerly = self.earliest_learning_layer().is_none();
        let engine = Engine {
            layers: &self.layers,
            plan: &self.plan,
            strategy: self.strategy.as_ref(),
            input_layers: &self.input_layers,
        };
        let rng = &mut self.rng;
        let mut workspace = Workspace::new(self.plan.num_activations(), self.layers.len());
        let pass = ForwardPass {
            last: self.layers.len() - 1,
            clear_eagerly,
            keep: &[],
            keep_memory: true,
        };
        engine.forward(inputs, &mut workspace, &pass, |layer, x| {
            layer.inner.forward(x, rng)
        })?;

        let predictions = engine.predictions(&workspace, &self.output_layers)?;
        let mut state = Vec::new();
        for (k, layer) in self.layers.iter().enumerate() {
            let Some(memory) = workspace.memory.get(k) else {
                continue;
            };
            if let Some(values) = layer
                .inner
                .updated_state(memory)
                .map_err(NetworkError::layer(layer.name()))?
            {
                state.push(LayerState {
                    layer: layer.name().to_string(),
                    values,
                });
            }
        }
        Ok(ForwardMemory {
            workspace,
            predictions,
            state,
        })
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑前向传播↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓反向传播↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    /// 由一次训练前向的结果做反向传播；每个输出层一个目标（原始顺序）
    pub fn backward_propagation(
        &self,
        forward: ForwardMemory,
        targets: &[Tensor],
    ) -> Result<TrainingGradients, NetworkError> {
        let ForwardMemory {
            mut workspace,
            predictions,
            state,
        } = forward;
        let n = check_observation_count(&predictions, None)?;
        check_observation_count(targets, n)?;
        let loss = self.loss(&predictions, targets)?;
        let per_layer = self.engine().backward(
            &mut workspace,
            targets,
            &self.output_layers,
            &self.layer_is_learning(),
            self.earliest_learning_layer(),
        )?;

        let mut gradients = Vec::new();
        for (layer, grads) in self.layers.iter().zip(per_layer) {
            let n = layer.learnable_parameters().len();
            match grads {
                Some(grads) => {
                    let mut grads = grads.into_iter();
                    gradients.extend((0..n).map(|_| grads.next()));
                }
                None => gradients.extend(std::iter::repeat(None).take(n)),
            }
        }
        Ok(TrainingGradients {
            gradients,
            predictions,
            loss,
            state,
        })
    }

    pub fn compute_gradients_for_training(
        &mut self,
        inputs: &[Tensor],
        targets: &[Tensor],
    ) -> Result<TrainingGradients, NetworkError> {
        self.check_targets(targets)?;
        let n = check_observation_count(inputs, None)?;
        check_observation_count(targets, n)?;
        let forward = self.forward_propagation_with_memory(inputs)?;
        self.backward_propagation(forward, targets)
    }

    fn check_targets(&self, targets: &[Tensor]) -> Result<(), NetworkError> {
        if targets.len() != self.output_layers.len() {
            return Err(NetworkError::TargetCountMismatch {
                expected: self.output_layers.len(),
                got: targets.len(),
            });
        }
        Ok(())
    }

    /// 所有输出层损失之和
    pub fn loss(&self, predictions: &[Tensor], targets: &[Tensor]) -> Result<f32, NetworkError> {
        self.check_targets(targets)?;
        if predictions.len() != self.output_layers.len() {
            return Err(NetworkError::InputCountMismatch {
                expected: self.output_layers.len(),
                got: predictions.len(),
            });
        }
        let mut loss = 0.0;
        for ((&k, y), t) in self.output_layers.iter().zip(predictions).zip(targets) {
            let layer = &self.layers[k];
            let output = layer
                .inner
                .as_output_layer()
                .ok_or(LayerError::NotAnOutputLayer)
                .map_err(NetworkError::layer(layer.name()))?;
            loss += output
                .forward_loss(y, t)
                .map_err(NetworkError::layer(layer.name()))?;
        }
        Ok(loss)
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑反向传播↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓参数与状态↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    /// 全局参数顺序：排序后的层顺序，层内按参数声明顺序
    pub fn learnable_parameters(&self) -> Vec<&LearnableParameter> {
        self.layers
            .iter()
            .flat_map(|l| l.learnable_parameters())
            .collect()
    }

    pub fn num_learnable_parameters(&self) -> usize {
        self.layers.iter().map(|l| l.learnable_parameters().len()).sum()
    }

    pub fn learn_rate_factors(&self) -> Vec<f32> {
        self.learnable_parameters()
            .iter()
            .map(|p| p.learn_rate_factor)
            .collect()
    }

    pub fn l2_factors(&self) -> Vec<f32> {
        self.learnable_parameters().iter().map(|p| p.l2_factor).collect()
    }

    fn check_parameter_count(&self, got: usize) -> Result<(), NetworkError> {
        let expected = self.num_learnable_parameters();
        if got != expected {
            return Err(NetworkError::ParameterCountMismatch { expected, got });
        }
        Ok(())
    }

    /// 按全局参数顺序整体替换参数值（形状须与原值一致）
    pub fn set_learnable_parameter_values(
        &mut self,
        values: Vec<Tensor>,
    ) -> Result<(), NetworkError> {
        self.check_parameter_count(values.len())?;
        let mut values = values.into_iter();
        for layer in &mut self.layers {
            for p in layer.inner.learnable_parameters_mut() {
                if let Some(value) = values.next() {
                    p.set_value(value).map_err(NetworkError::layer(&layer.name))?;
                }
            }
        }
        Ok(())
    }

    /// 把增量加到参数上；`None`的参数保持不变
    pub fn update_learnable_parameters(
        &mut self,
        deltas: &[Option<Tensor>],
    ) -> Result<(), NetworkError> {
        self.check_parameter_count(deltas.len())?;
        let mut deltas = deltas.iter();
        for layer in &mut self.layers {
            for p in layer.inner.learnable_parameters_mut() {
                if let Some(Some(delta)) = deltas.next() {
                    p.apply_delta(delta).map_err(NetworkError::layer(&layer.name))?;
                }
            }
        }
        Ok(())
    }

    /// 应用`compute_gradients_for_training`给出的状态（如批归一化的运行统计量）
    pub fn update_network_state(&mut self, state: &[LayerState]) -> Result<(), NetworkError> {
        for entry in state {
            let layer = self.layer_mut(&entry.layer)?;
            layer
                .inner
                .set_state(&entry.values)
                .map_err(NetworkError::layer(&layer.name))?;
        }
        Ok(())
    }

    /// 遍历一遍分发器的数据，为需要零中心化的输入层计算并设置均值
    pub fn compute_input_statistics(
        &mut self,
        dispatcher: &mut dyn Dispatcher,
    ) -> Result<(), NetworkError> {
        let needs: Vec<usize> = (0..self.input_layers.len())
            .filter(|&j| self.layers[self.input_layers[j]].inner.needs_input_statistics())
            .collect();
        if needs.is_empty() {
            return Ok(());
        }

        let mut accum: Vec<Option<Tensor>> = vec![None; self.input_layers.len()];
        let mut count = 0usize;
        dispatcher.start();
        while let Some(batch) = dispatcher.next()? {
            self.engine().check_inputs(&batch.inputs)?;
            for &j in &needs {
                accum[j] = Some(
                    self.strategy
                        .compute_accum_image(accum[j].take(), &batch.inputs[j])?,
                );
            }
            count += batch.indices.len();
        }
        if count == 0 {
            return Err(DataError::EmptyDataset.into());
        }

        for j in needs {
            if let Some(sum) = accum[j].take() {
                let mean = &sum * (1.0 / count as f32);
                let layer = &mut self.layers[self.input_layers[j]];
                layer
                    .inner
                    .set_input_statistics(mean)
                    .map_err(NetworkError::layer(&layer.name))?;
            }
        }
        log::debug!("已根据{}个观测计算输入统计量", count);
        Ok(())
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑参数与状态↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/
}
