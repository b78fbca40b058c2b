use std::sync::Arc;

use super::{add_output, invalid};
use crate::backend::{MlBackend, MlGraphBuilder, OperandType};
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{ElementType, GraphView, Node};
use crate::options::DeviceType;

struct RangeOpBuilder;

#[derive(Debug, Clone, Copy, PartialEq)]
struct RangeParams {
    operand_type: OperandType,
    start: f32,
    delta: f32,
    len: u32,
}

fn scalar(graph: &GraphView, node: &Node, slot: usize) -> Result<(ElementType, f32), String> {
    let name = node.input(slot).ok_or_else(|| format!("missing input {slot}"))?;
    let tensor = graph
        .initializer(name)
        .ok_or_else(|| format!("'{name}' must be a constant initializer"))?;
    let values = tensor.to_f32_vec().map_err(|err| err.to_string())?;
    match values.as_slice() {
        [value] => Ok((tensor.data_type, *value)),
        _ => Err(format!("'{name}' must hold exactly one value")),
    }
}

/// Element count is `max(ceil((limit - start) / delta), 0)`.
fn range_len(start: f32, limit: f32, delta: f32) -> Result<u32, String> {
    if delta == 0.0 {
        return Err("delta must not be zero".to_string());
    }
    let len = ((limit - start) / delta).ceil().max(0.0);
    if !len.is_finite() || len > u32::MAX as f32 {
        return Err(format!("range of length {len} cannot be materialized"));
    }
    Ok(len as u32)
}

fn range_params(graph: &GraphView, node: &Node) -> Result<RangeParams, String> {
    let (elem_type, start) = scalar(graph, node, 0)?;
    let (limit_type, limit) = scalar(graph, node, 1)?;
    let (delta_type, delta) = scalar(graph, node, 2)?;
    if limit_type != elem_type || delta_type != elem_type {
        return Err("start, limit and delta must share one type".to_string());
    }
    let operand_type = match elem_type {
        ElementType::Float32 => OperandType::Float32,
        ElementType::Int32 => OperandType::Int32,
        other => return Err(format!("type {other} is not supported")),
    };
    let len = range_len(start, limit, delta)?;
    if len == 0 {
        return Err("empty ranges are not supported".to_string());
    }
    Ok(RangeParams {
        operand_type,
        start,
        delta,
        len,
    })
}

impl<B: MlBackend> OpBuilder<B> for RangeOpBuilder {
    fn add_initializers_to_skip(&self, model_builder: &mut ModelBuilder<'_, B>, node: &Node) {
        for slot in 0..3 {
            if let Some(name) = node.input(slot) {
                model_builder.add_initializer_to_skip(name);
            }
        }
    }

    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let params =
            range_params(model_builder.graph(), node).map_err(|reason| invalid(node, reason))?;
        let builder = model_builder.builder();
        let mut output =
            builder.fill_sequence(OperandType::Float32, &[params.len], params.start, params.delta)?;
        if params.operand_type != OperandType::Float32 {
            output = builder.cast(&output, params.operand_type)?;
        }
        add_output(model_builder, node, output)
    }

    // Inputs are constant scalars read at compile time, not runtime tensors.
    fn has_supported_inputs(&self, graph: &GraphView, node: &Node, _device: DeviceType) -> bool {
        match range_params(graph, node) {
            Ok(_) => true,
            Err(reason) => {
                log::debug!("Range [{}] {reason}", node.name);
                false
            }
        }
    }

    fn min_supported_opset(&self, _node: &Node) -> i64 {
        11
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(&["Range"], Arc::new(RangeOpBuilder));
}

#[cfg(test)]
mod tests {
    use super::range_len;

    #[test]
    fn length_rounds_up_and_clamps_at_zero() {
        assert_eq!(range_len(0.0, 5.0, 2.0), Ok(3));
        assert_eq!(range_len(10.0, 4.0, -3.0), Ok(2));
        assert_eq!(range_len(5.0, 0.0, 1.0), Ok(0));
        assert!(range_len(0.0, 1.0, 0.0).is_err());
    }
}
