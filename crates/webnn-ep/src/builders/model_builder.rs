//! Lowering of one graph partition into a backend graph.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::helper::{get_clip_min_max, NodeAttrHelper, UniqueNameGenerator};
use super::model::{CompiledModel, TensorBoundaryInfo};
use super::registry::OpBuilderRegistry;
use crate::backend::{
    Activation, ArrayBufferView, MlBackend, MlGraphBuilder, Operand, OperandDescriptor,
    OperandType, Operator,
};
use crate::error::{CompileError, CompileResult};
use crate::graph::{unpack_initializer, GraphView, Node, NodeIndex, TensorProto};
use crate::options::{DeviceType, ProviderOptions};

/// Operator types that may be folded into their producer.
pub(crate) const FUSABLE_ACTIVATIONS: &[&str] = &["Relu", "LeakyRelu", "Sigmoid", "Tanh", "Clip"];

/// Lowers one partition of the host graph into a backend graph.
///
/// Creating the engine acquires the backend context and graph builder;
/// [`ModelBuilder::compile`] runs the remaining stages and either yields a
/// [`CompiledModel`] or the first error encountered.
pub struct ModelBuilder<'a, B: MlBackend> {
    graph: &'a GraphView,
    registry: &'a OpBuilderRegistry<B>,
    backend: Arc<B>,
    device: DeviceType,
    context: B::Context,
    builder: B::Builder,
    operands: HashMap<String, Operand<B>>,
    skipped_initializers: HashSet<String>,
    skipped_inputs: HashSet<String>,
    activation_nodes: HashMap<NodeIndex, Operator<B>>,
    fused_activations: HashSet<String>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    scalar_outputs: HashSet<String>,
    boundary: HashMap<String, TensorBoundaryInfo>,
    names: UniqueNameGenerator,
}

impl<'a, B: MlBackend> ModelBuilder<'a, B> {
    pub fn new(
        graph: &'a GraphView,
        registry: &'a OpBuilderRegistry<B>,
        backend: Arc<B>,
        options: &ProviderOptions,
    ) -> CompileResult<Self> {
        let context = backend
            .create_context(&options.context_options())
            .map_err(CompileError::ContextCreation)?;
        let builder = backend
            .create_graph_builder(&context)
            .map_err(CompileError::GraphBuilderCreation)?;

        let mut names = UniqueNameGenerator::new();
        for name in graph.node_args.keys().chain(graph.initializers.keys()) {
            names.reserve(name.clone());
        }
        for node in &graph.nodes {
            for name in node.inputs.iter().chain(node.outputs.iter()) {
                if !name.is_empty() {
                    names.reserve(name.clone());
                }
            }
        }

        Ok(Self {
            graph,
            registry,
            backend,
            device: options.device_type(),
            context,
            builder,
            operands: HashMap::new(),
            skipped_initializers: HashSet::new(),
            skipped_inputs: HashSet::new(),
            activation_nodes: HashMap::new(),
            fused_activations: HashSet::new(),
            input_names: Vec::new(),
            output_names: Vec::new(),
            scalar_outputs: HashSet::new(),
            boundary: HashMap::new(),
            names,
        })
    }

    /// Runs every lowering stage and builds the backend graph.
    pub fn compile(mut self) -> CompileResult<CompiledModel<B>> {
        self.preprocess_initializers();
        self.preprocess_activations()?;
        self.register_initializers()?;
        self.register_model_inputs()?;
        self.add_operations()?;
        self.register_model_outputs()?;

        let mut named_outputs = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            named_outputs.push((name.clone(), self.operand(name)?));
        }

        let ModelBuilder {
            backend,
            context,
            builder,
            input_names,
            output_names,
            scalar_outputs,
            boundary,
            ..
        } = self;
        let graph = builder
            .build(&named_outputs)
            .map_err(CompileError::GraphBuild)?;
        log::debug!(
            "built {} graph with {} inputs and {} outputs",
            backend.backend_name(),
            input_names.len(),
            output_names.len()
        );

        Ok(CompiledModel::new(
            backend,
            context,
            graph,
            input_names,
            output_names,
            scalar_outputs,
            boundary,
        ))
    }

    pub fn graph(&self) -> &'a GraphView {
        self.graph
    }

    pub fn device_type(&self) -> DeviceType {
        self.device
    }

    pub fn builder(&mut self) -> &mut B::Builder {
        &mut self.builder
    }

    pub fn initializer(&self, name: &str) -> Option<&'a TensorProto> {
        self.graph.initializer(name)
    }

    pub fn operand(&self, name: &str) -> CompileResult<Operand<B>> {
        self.operands
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::MissingOperand {
                name: name.to_string(),
            })
    }

    pub fn has_operand(&self, name: &str) -> bool {
        self.operands.contains_key(name)
    }

    /// Binds `name` to `operand`; every name is bound at most once.
    pub fn add_operand(&mut self, name: &str, operand: Operand<B>) -> CompileResult<()> {
        if self.operands.contains_key(name) {
            return Err(CompileError::DuplicateOperand {
                name: name.to_string(),
            });
        }
        self.names.reserve(name);
        self.operands.insert(name.to_string(), operand);
        Ok(())
    }

    /// Registers an operand with no host tensor name under a fresh name.
    pub fn add_intermediate(&mut self, base: &str, operand: Operand<B>) -> CompileResult<String> {
        let name = self.names.unique(base);
        self.add_operand(&name, operand)?;
        Ok(name)
    }

    pub fn unique_name(&mut self, base: &str) -> String {
        self.names.unique(base)
    }

    pub fn add_initializer_to_skip(&mut self, name: &str) {
        self.skipped_initializers.insert(name.to_string());
    }

    pub fn add_input_to_skip(&mut self, name: &str) {
        self.skipped_inputs.insert(name.to_string());
    }

    pub fn is_fused(&self, output: &str) -> bool {
        self.fused_activations.contains(output)
    }

    /// Claims the pending activation that consumes output `slot` of `node`.
    ///
    /// Fusion requires a single consuming edge into input 0 of an activation
    /// node with a pending candidate, and neither the produced tensor nor the
    /// activation result may be a graph output. On success the produced
    /// tensor is recorded as fused so the activation node is not emitted.
    pub fn find_activation(&mut self, node: &Node, slot: usize) -> Option<Operator<B>> {
        let output = node.output(slot)?;
        let consumers = self.graph.consumers(output);
        let [(consumer, input_slot)] = consumers.as_slice() else {
            return None;
        };
        if *input_slot != 0 || !self.activation_nodes.contains_key(consumer) {
            return None;
        }
        if self.graph.is_graph_output(output) {
            return None;
        }
        let activation = self.graph.node(*consumer)?;
        let activation_output = activation.output(0)?;
        if self.graph.is_graph_output(activation_output) {
            return None;
        }

        let operator = self.activation_nodes.remove(consumer)?;
        self.fused_activations.insert(output.to_string());
        log::debug!(
            "Node [{}] type [{}], fused the output [{}] with {} [{}]",
            node.name,
            node.op_type,
            output,
            activation.op_type,
            activation.name
        );
        Some(operator)
    }

    fn preprocess_initializers(&mut self) {
        let graph = self.graph;
        let registry = self.registry;
        for node in &graph.nodes {
            if let Some(op_builder) = registry.get(&node.op_type) {
                op_builder.add_initializers_to_skip(self, node);
            }
        }
    }

    fn preprocess_activations(&mut self) -> CompileResult<()> {
        let graph = self.graph;
        for node in &graph.nodes {
            let activation = match node.op_type.as_str() {
                "Relu" => Activation::Relu,
                "LeakyRelu" => Activation::LeakyRelu {
                    alpha: NodeAttrHelper::new(node).get_float("alpha", 0.01),
                },
                "Sigmoid" => Activation::Sigmoid,
                "Tanh" => Activation::Tanh,
                "Clip" => match get_clip_min_max(graph, node) {
                    Some((min, max)) => Activation::Clamp { min, max },
                    None => continue,
                },
                _ => continue,
            };
            let operator = self.builder.activation_operator(&activation)?;
            self.activation_nodes.insert(node.index, operator);
        }
        Ok(())
    }

    fn register_initializers(&mut self) -> CompileResult<()> {
        let graph = self.graph;
        for (name, tensor) in &graph.initializers {
            if self.skipped_initializers.contains(name) {
                continue;
            }
            let operand_type = self.supported_operand_type(name, tensor.data_type)?;
            let dims = if tensor.dims.is_empty() {
                vec![1]
            } else {
                tensor
                    .dims
                    .iter()
                    .map(|&dim| u32::try_from(dim))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| CompileError::invalid_initializer(name, "invalid dimensions"))?
            };
            let bytes = unpack_initializer(tensor)?;
            let desc = OperandDescriptor::new(operand_type, dims);
            let operand = self
                .builder
                .constant(&desc, ArrayBufferView::new(operand_type, &bytes))?;
            self.add_operand(name, operand)?;
        }
        Ok(())
    }

    fn register_model_inputs(&mut self) -> CompileResult<()> {
        let graph = self.graph;
        for name in &graph.inputs {
            self.register_model_input_output(name, true)?;
        }
        Ok(())
    }

    fn register_model_outputs(&mut self) -> CompileResult<()> {
        let graph = self.graph;
        for name in &graph.outputs {
            self.register_model_input_output(name, false)?;
        }
        Ok(())
    }

    fn register_model_input_output(&mut self, name: &str, is_input: bool) -> CompileResult<()> {
        if is_input && (self.graph.is_initializer(name) || self.skipped_inputs.contains(name)) {
            return Ok(());
        }

        let arg = self
            .graph
            .node_arg(name)
            .ok_or_else(|| CompileError::MissingType {
                name: name.to_string(),
            })?;
        let shape = arg
            .static_shape()
            .ok_or_else(|| CompileError::DynamicShape {
                name: name.to_string(),
            })?;
        let is_scalar = shape.is_empty();
        let shape = if is_scalar { vec![1] } else { shape };
        let dims = shape
            .iter()
            .map(|&dim| u32::try_from(dim))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| CompileError::DynamicShape {
                name: name.to_string(),
            })?;

        let elem_type = arg.elem_type.ok_or_else(|| CompileError::MissingType {
            name: name.to_string(),
        })?;
        let operand_type = self.supported_operand_type(name, elem_type)?;

        if is_input {
            let desc = OperandDescriptor::new(operand_type, dims);
            let operand = self.builder.input(name, &desc)?;
            self.add_operand(name, operand)?;
            self.input_names.push(name.to_string());
        } else {
            if is_scalar {
                self.scalar_outputs.insert(name.to_string());
            }
            self.output_names.push(name.to_string());
        }

        self.boundary.insert(
            name.to_string(),
            TensorBoundaryInfo {
                elem_type,
                shape,
                is_scalar,
            },
        );
        Ok(())
    }

    fn add_operations(&mut self) -> CompileResult<()> {
        let graph = self.graph;
        let registry = self.registry;
        for node in &graph.nodes {
            if FUSABLE_ACTIVATIONS.contains(&node.op_type.as_str()) {
                if let Some(input) = node.input(0).filter(|input| self.is_fused(input)) {
                    // The producer already applied this activation.
                    let operand = self.operand(input)?;
                    if let Some(output) = node.output(0) {
                        self.add_operand(output, operand)?;
                    }
                    log::debug!("{} Node [{}] fused", node.op_type, node.name);
                    continue;
                }
            }

            let op_builder =
                registry
                    .get(&node.op_type)
                    .ok_or_else(|| CompileError::NoOpBuilder {
                        op_type: node.op_type.clone(),
                        node: node.name.clone(),
                    })?;
            log::trace!("lowering {} node [{}]", node.op_type, node.name);
            op_builder.add_to_model_builder(self, node)?;
        }
        Ok(())
    }

    fn supported_operand_type(
        &self,
        name: &str,
        elem_type: crate::graph::ElementType,
    ) -> CompileResult<OperandType> {
        let unsupported = || CompileError::UnsupportedType {
            name: name.to_string(),
            elem_type,
        };
        if !super::helper::is_supported_data_type(elem_type, self.device) {
            return Err(unsupported());
        }
        OperandType::from_element_type(elem_type).ok_or_else(unsupported)
    }
}
