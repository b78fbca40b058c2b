mod activation;
mod batch_norm;
mod binary;
mod clip;
mod concat;
mod conv;
mod gemm;
mod gru;
mod pool;
mod range;
mod reshape;
mod resize;
mod split;
mod transpose;

use super::helper::tensor_shape;
use super::registry::OpBuilderRegistry;
use super::ModelBuilder;
use crate::backend::{MlBackend, Operand};
use crate::error::{CompileError, CompileResult};
use crate::graph::{GraphView, Node};

pub(super) fn register_all<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    activation::register(registry);
    batch_norm::register(registry);
    binary::register(registry);
    clip::register(registry);
    concat::register(registry);
    conv::register(registry);
    gemm::register(registry);
    gru::register(registry);
    pool::register(registry);
    range::register(registry);
    reshape::register(registry);
    resize::register(registry);
    split::register(registry);
    transpose::register(registry);
}

fn invalid(node: &Node, reason: impl Into<String>) -> CompileError {
    CompileError::invalid_node(&node.op_type, &node.name, reason)
}

fn required_input(node: &Node, slot: usize) -> CompileResult<&str> {
    node.input(slot)
        .ok_or_else(|| invalid(node, format!("missing input {slot}")))
}

fn input_shape(graph: &GraphView, node: &Node, slot: usize) -> CompileResult<Vec<i64>> {
    let name = required_input(node, slot)?;
    tensor_shape(graph, name).ok_or_else(|| invalid(node, format!("shape of '{name}' is unknown")))
}

fn to_u32_vec(node: &Node, what: &str, values: &[i64]) -> CompileResult<Vec<u32>> {
    values
        .iter()
        .map(|&v| u32::try_from(v))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid(node, format!("{what} must be non-negative: {values:?}")))
}

fn to_u32_pair(node: &Node, what: &str, values: &[i64]) -> CompileResult<[u32; 2]> {
    match to_u32_vec(node, what, values)?.as_slice() {
        [a, b] => Ok([*a, *b]),
        _ => Err(invalid(node, format!("{what} must have two values"))),
    }
}

fn input_operand<B: MlBackend>(
    model_builder: &ModelBuilder<'_, B>,
    node: &Node,
    slot: usize,
) -> CompileResult<Operand<B>> {
    model_builder.operand(required_input(node, slot)?)
}

/// Binds output 0 of `node` to `operand`.
fn add_output<B: MlBackend>(
    model_builder: &mut ModelBuilder<'_, B>,
    node: &Node,
    operand: Operand<B>,
) -> CompileResult<()> {
    let output = node
        .output(0)
        .ok_or_else(|| invalid(node, "missing output 0"))?;
    model_builder.add_operand(output, operand)
}
