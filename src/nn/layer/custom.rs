/*
 * @Description  : 自定义层：由用户提供行为对象
 *
 * 行为对象可以声明可变的输出数（`num_outputs`返回`None`），
 * 此时实际输出数由网络按连接表中引用到的输出端口确定，再经`resolve_num_outputs`告知本层。
 */

use super::{LayerError, LayerGradients, LayerRole, Memory, OutputLayer, Size, TraitLayer};
use crate::nn::param::LearnableParameter;
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use std::fmt;

/// 自定义层的行为
pub trait CustomLayerBehavior: fmt::Debug {
    fn role(&self) -> LayerRole {
        LayerRole::Hidden
    }

    fn num_inputs(&self) -> usize {
        1
    }

    /// `None`表示输出数可变
    fn num_outputs(&self) -> Option<usize> {
        Some(1)
    }

    fn forward_propagate_size(
        &self,
        input_sizes: &[Size],
        num_outputs: usize,
    ) -> Result<Vec<Size>, LayerError>;

    fn infer_size(&mut self, _input_sizes: &[Size]) -> Result<(), LayerError> {
        Ok(())
    }

    fn learnable_parameters(&self) -> &[LearnableParameter] {
        &[]
    }

    fn learnable_parameters_mut(&mut self) -> &mut [LearnableParameter] {
        &mut []
    }

    fn initialize_learnable_parameters(&mut self, _rng: &mut StdRng) -> Result<(), LayerError> {
        Ok(())
    }

    fn predict(&self, x: &[Tensor], num_outputs: usize) -> Result<Vec<Tensor>, LayerError>;

    fn forward(
        &self,
        x: &[Tensor],
        num_outputs: usize,
        _rng: &mut StdRng,
    ) -> Result<(Vec<Tensor>, Memory), LayerError> {
        Ok((self.predict(x, num_outputs)?, Memory::Empty))
    }

    fn backward(
        &self,
        x: &[Tensor],
        z: &[Tensor],
        dz: &[Tensor],
        memory: &Memory,
        need_parameter_gradients: bool,
    ) -> Result<LayerGradients, LayerError>;

    /// 自定义输出层在此返回自身
    fn as_output_layer(&self) -> Option<&dyn OutputLayer> {
        None
    }

    fn clone_boxed(&self) -> Box<dyn CustomLayerBehavior>;
}

/// 包装用户行为对象的层
#[derive(Debug)]
pub struct CustomLayer {
    behavior: Box<dyn CustomLayerBehavior>,
    resolved_outputs: Option<usize>,
}

impl Clone for CustomLayer {
    fn clone(&self) -> Self {
        Self {
            behavior: self.behavior.clone_boxed(),
            resolved_outputs: self.resolved_outputs,
        }
    }
}

impl CustomLayer {
    pub fn new(behavior: impl CustomLayerBehavior + 'static) -> Self {
        Self {
            behavior: Box::new(behavior),
            resolved_outputs: None,
        }
    }

    pub fn behavior(&self) -> &dyn CustomLayerBehavior {
        self.behavior.as_ref()
    }

    pub(crate) fn as_output_layer(&self) -> Option<&dyn OutputLayer> {
        self.behavior.as_output_layer()
    }

    fn outputs(&self) -> usize {
        self.num_outputs().unwrap_or(0)
    }
}

impl TraitLayer for CustomLayer {
    fn role(&self) -> LayerRole {
        self.behavior.role()
    }

    fn num_inputs(&self) -> usize {
        self.behavior.num_inputs()
    }

    fn num_outputs(&self) -> Option<usize> {
        self.behavior.num_outputs().or(self.resolved_outputs)
    }

    fn has_variable_outputs(&self) -> bool {
        self.behavior.num_outputs().is_none()
    }

    fn resolve_num_outputs(&mut self, num_outputs: usize) {
        if self.has_variable_outputs() {
            self.resolved_outputs = Some(num_outputs);
        }
    }

    fn forward_propagate_size(&self, input_sizes: &[Size]) -> Result<Vec<Size>, LayerError> {
        self.behavior.forward_propagate_size(input_sizes, self.outputs())
    }

    fn infer_size(&mut self, input_sizes: &[Size]) -> Result<(), LayerError> {
        self.behavior.infer_size(input_sizes)
    }

    fn learnable_parameters(&self) -> &[LearnableParameter] {
        self.behavior.learnable_parameters()
    }

    fn learnable_parameters_mut(&mut self) -> &mut [LearnableParameter] {
        self.behavior.learnable_parameters_mut()
    }

    fn initialize_learnable_parameters(&mut self, rng: &mut StdRng) -> Result<(), LayerError> {
        self.behavior.initialize_learnable_parameters(rng)
    }

    fn predict(&self, x: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        self.behavior.predict(x, self.outputs())
    }

    fn forward(&self, x: &[Tensor], rng: &mut StdRng) -> Result<(Vec<Tensor>, Memory), LayerError> {
        self.behavior.forward(x, self.outputs(), rng)
    }

    fn backward(
        &self,
        x: &[Tensor],
        z: &[Tensor],
        dz: &[Tensor],
        memory: &Memory,
        need_parameter_gradients: bool,
    ) -> Result<LayerGradients, LayerError> {
        self.behavior.backward(x, z, dz, memory, need_parameter_gradients)
    }
}
