use std::sync::Arc;

use super::{add_output, input_operand, invalid, to_u32_vec};
use crate::backend::{MlBackend, MlGraphBuilder};
use crate::builders::helper::{tensor_shape, NodeAttrHelper};
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{GraphView, Node};
use crate::options::DeviceType;

struct ReshapeOpBuilder;

/// Resolves a Reshape target: `0` copies the input dimension at the same
/// position and a single `-1` absorbs the remaining elements.
fn resolve_target_shape(input: &[i64], target: &[i64]) -> Result<Vec<i64>, String> {
    let total: i64 = input.iter().product();
    let mut resolved = Vec::with_capacity(target.len());
    let mut infer_at = None;
    for (i, &dim) in target.iter().enumerate() {
        match dim {
            0 => {
                let copied = input.get(i).copied().ok_or_else(|| {
                    format!("dimension {i} cannot be copied from a rank-{} input", input.len())
                })?;
                resolved.push(copied);
            }
            -1 => {
                if infer_at.replace(i).is_some() {
                    return Err("more than one -1 in target shape".to_string());
                }
                resolved.push(1);
            }
            d if d > 0 => resolved.push(d),
            d => return Err(format!("invalid target dimension {d}")),
        }
    }

    let known: i64 = resolved.iter().product();
    if let Some(i) = infer_at {
        if known == 0 || total % known != 0 {
            return Err(format!("cannot infer -1 for {total} elements"));
        }
        resolved[i] = total / known;
    } else if known != total {
        return Err(format!("target shape {target:?} does not hold {total} elements"));
    }
    Ok(resolved)
}

fn target_shape(graph: &GraphView, node: &Node) -> Result<Vec<i64>, String> {
    let shape_name = node.input(1).ok_or("missing shape input")?;
    let tensor = graph
        .initializer(shape_name)
        .ok_or("shape must be a constant initializer")?;
    let target = tensor.to_i64_vec().map_err(|err| err.to_string())?;
    if target.is_empty() {
        return Err("reshape to rank 0 is not supported".to_string());
    }
    let input = node
        .input(0)
        .and_then(|name| tensor_shape(graph, name))
        .ok_or("input shape is unknown")?;
    resolve_target_shape(&input, &target)
}

impl<B: MlBackend> OpBuilder<B> for ReshapeOpBuilder {
    fn add_initializers_to_skip(&self, model_builder: &mut ModelBuilder<'_, B>, node: &Node) {
        if let Some(shape) = node.input(1) {
            model_builder.add_initializer_to_skip(shape);
        }
    }

    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let input = input_operand(model_builder, node, 0)?;
        let shape =
            target_shape(model_builder.graph(), node).map_err(|reason| invalid(node, reason))?;
        let new_shape = to_u32_vec(node, "shape", &shape)?;
        let output = model_builder.builder().reshape(&input, &new_shape)?;
        add_output(model_builder, node, output)
    }

    fn is_op_supported_impl(&self, graph: &GraphView, node: &Node, _device: DeviceType) -> bool {
        if NodeAttrHelper::new(node).get_int("allowzero", 0) != 0 {
            log::debug!("Reshape [{}] with allowzero is not supported", node.name);
            return false;
        }
        match target_shape(graph, node) {
            Ok(_) => true,
            Err(reason) => {
                log::debug!("Reshape [{}] {reason}", node.name);
                false
            }
        }
    }

    fn min_supported_opset(&self, _node: &Node) -> i64 {
        5
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(&["Reshape"], Arc::new(ReshapeOpBuilder));
}
