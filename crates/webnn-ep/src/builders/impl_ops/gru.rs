use std::sync::Arc;

use super::{input_operand, input_shape, invalid};
use crate::backend::{
    Activation, GruOptions, GruWeightLayout, MlBackend, MlGraphBuilder, RecurrentDirection,
    SplitSpec,
};
use crate::builders::helper::{tensor_shape, NodeAttrHelper};
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{GraphView, Node};
use crate::options::DeviceType;

struct GruOpBuilder;

const X_IDX: usize = 0;
const W_IDX: usize = 1;
const R_IDX: usize = 2;
const B_IDX: usize = 3;
const SEQUENCE_LENS_IDX: usize = 4;
const INITIAL_H_IDX: usize = 5;

const DEFAULT_ACTIVATIONS: &[&str] = &["Sigmoid", "Tanh"];

fn gate_activation(name: &str) -> Option<Activation> {
    match name {
        "Relu" => Some(Activation::Relu),
        "Sigmoid" => Some(Activation::Sigmoid),
        "Tanh" => Some(Activation::Tanh),
        _ => None,
    }
}

fn direction(node: &Node) -> Option<RecurrentDirection> {
    match NodeAttrHelper::new(node)
        .get_string("direction", "forward")
        .as_str()
    {
        "forward" => Some(RecurrentDirection::Forward),
        "reverse" => Some(RecurrentDirection::Backward),
        "bidirectional" => Some(RecurrentDirection::Both),
        _ => None,
    }
}

/// Uniform step count from `sequence_lens`, or `None` when absent.
fn sequence_length(graph: &GraphView, node: &Node) -> Result<Option<i64>, String> {
    let Some(name) = node.input(SEQUENCE_LENS_IDX) else {
        return Ok(None);
    };
    let tensor = graph
        .initializer(name)
        .ok_or("sequence_lens must be a constant initializer")?;
    let lens = tensor.to_i64_vec().map_err(|err| err.to_string())?;
    match lens.split_first() {
        None => Ok(None),
        Some((first, rest)) if rest.iter().all(|len| len == first) => Ok(Some(*first)),
        Some(_) => Err("values in sequence_lens should be the same".to_string()),
    }
}

impl<B: MlBackend> OpBuilder<B> for GruOpBuilder {
    fn add_initializers_to_skip(&self, model_builder: &mut ModelBuilder<'_, B>, node: &Node) {
        if let Some(name) = node.input(SEQUENCE_LENS_IDX) {
            model_builder.add_initializer_to_skip(name);
            model_builder.add_input_to_skip(name);
        }
    }

    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let helper = NodeAttrHelper::new(node);
        let graph = model_builder.graph();
        let input = input_operand(model_builder, node, X_IDX)?;
        let weight = input_operand(model_builder, node, W_IDX)?;
        let recurrent_weight = input_operand(model_builder, node, R_IDX)?;

        let input_dims = input_shape(graph, node, X_IDX)?;
        let steps = match sequence_length(graph, node).map_err(|reason| invalid(node, reason))? {
            Some(len) => len,
            None => input_dims[0],
        };
        let recurrent_dims = input_shape(graph, node, R_IDX)?;
        let hidden_size = helper.get_int("hidden_size", recurrent_dims[2]);

        let mut options = GruOptions {
            reset_after: helper.get_int("linear_before_reset", 0) != 0,
            return_sequence: true,
            direction: direction(node).ok_or_else(|| invalid(node, "unknown direction"))?,
            layout: GruWeightLayout::Zrn,
            ..GruOptions::default()
        };

        if node.input(B_IDX).is_some() {
            // B stacks [Wb, Rb] along axis 1.
            let bias = input_operand(model_builder, node, B_IDX)?;
            let halves = model_builder
                .builder()
                .split(&bias, &SplitSpec::Count(2), 1)?;
            let [input_bias, recurrent_bias]: [_; 2] = halves
                .try_into()
                .map_err(|_| invalid(node, "bias split did not yield two halves"))?;
            let base = node.input(B_IDX).unwrap_or("B");
            model_builder.add_intermediate(base, input_bias.clone())?;
            model_builder.add_intermediate(base, recurrent_bias.clone())?;
            options.bias = Some(input_bias);
            options.recurrent_bias = Some(recurrent_bias);
        }
        if node.input(INITIAL_H_IDX).is_some() {
            options.initial_hidden_state = Some(input_operand(model_builder, node, INITIAL_H_IDX)?);
        }

        let activations = helper.get_strings("activations", DEFAULT_ACTIVATIONS);
        for name in activations.iter().take(2) {
            let activation = gate_activation(name)
                .ok_or_else(|| invalid(node, format!("unsupported activation {name}")))?;
            let operator = model_builder.builder().activation_operator(&activation)?;
            options.activations.push(operator);
        }

        let steps = u32::try_from(steps).map_err(|_| invalid(node, "invalid step count"))?;
        let hidden_size =
            u32::try_from(hidden_size).map_err(|_| invalid(node, "invalid hidden_size"))?;
        let outputs = model_builder.builder().gru(
            &input,
            &weight,
            &recurrent_weight,
            steps,
            hidden_size,
            options,
        )?;
        let [hidden, sequence]: [_; 2] = outputs
            .try_into()
            .map_err(|_| invalid(node, "gru did not return hidden state and sequence"))?;

        // Y is the full sequence, Y_h the last hidden state.
        if let Some(y) = node.output(0) {
            model_builder.add_operand(y, sequence)?;
        }
        if let Some(y_h) = node.output(1) {
            model_builder.add_operand(y_h, hidden)?;
        }
        Ok(())
    }

    fn is_op_supported_impl(&self, graph: &GraphView, node: &Node, _device: DeviceType) -> bool {
        let name = &node.name;
        if let Err(reason) = sequence_length(graph, node) {
            log::debug!("GRU [{name}] {reason}");
            return false;
        }

        let helper = NodeAttrHelper::new(node);
        for attr in ["activation_alpha", "activation_beta", "clip"] {
            if helper.has_attr(attr) {
                log::debug!("GRU [{name}] unsupported attribute: {attr}");
                return false;
            }
        }

        let Some(direction) = direction(node) else {
            log::debug!("GRU [{name}] unknown direction");
            return false;
        };
        let activations = helper.get_strings("activations", DEFAULT_ACTIVATIONS);
        match activations.len() {
            2 => {}
            4 if direction == RecurrentDirection::Both => {
                if activations[..2] != activations[2..] {
                    log::debug!("GRU [{name}] per-direction activations must match");
                    return false;
                }
            }
            4 => {
                log::debug!("GRU [{name}] a list of 4 activation functions must be bidirectional");
                return false;
            }
            n => {
                log::debug!("GRU [{name}] expects 2 or 4 activations, got {n}");
                return false;
            }
        }
        if let Some(bad) = activations.iter().find(|a| gate_activation(a).is_none()) {
            log::debug!("GRU [{name}] unsupported activation {bad}");
            return false;
        }

        if helper.get_int("linear_before_reset", 0) != 0 {
            log::debug!("GRU [{name}] unsupported linear_before_reset = true");
            return false;
        }
        if helper.get_int("layout", 0) != 0 {
            log::debug!("GRU [{name}] unsupported batch-major layout");
            return false;
        }

        let recurrent_shape = node.input(R_IDX).and_then(|r| tensor_shape(graph, r));
        if !matches!(recurrent_shape, Some(ref dims) if dims.len() == 3) {
            log::debug!("GRU [{name}] recurrence weight must be a known 3-D tensor");
            return false;
        }
        if node.input(W_IDX).and_then(|w| tensor_shape(graph, w)).is_none() {
            log::debug!("GRU [{name}] weight shape is unknown");
            return false;
        }
        true
    }

    fn min_supported_opset(&self, _node: &Node) -> i64 {
        7
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(&["GRU"], Arc::new(GruOpBuilder));
}
