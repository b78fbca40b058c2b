use std::sync::Arc;

use super::{input_operand, invalid};
use crate::backend::{MlBackend, MlGraphBuilder, SplitSpec};
use crate::builders::helper::{handle_negative_axis, tensor_shape, NodeAttrHelper};
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{GraphView, Node};
use crate::options::DeviceType;

struct SplitOpBuilder;

const SPLIT_IDX: usize = 1;

#[derive(Debug)]
struct SplitPlan {
    axis: usize,
    spec: SplitSpec,
}

/// Resolves the split axis and the per-output lengths.
///
/// Before opset 13 `split` is an attribute, afterwards an optional constant
/// input. Without either the axis is divided evenly across the outputs.
fn split_plan(graph: &GraphView, node: &Node) -> Result<SplitPlan, String> {
    let input = node
        .input(0)
        .and_then(|name| tensor_shape(graph, name))
        .ok_or("input shape is unknown")?;
    let helper = NodeAttrHelper::new(node);
    let axis = helper.get_int("axis", 0);
    let axis = handle_negative_axis(axis, input.len())
        .ok_or_else(|| format!("axis {axis} out of range for rank {}", input.len()))?;
    let axis_len = input[axis];

    let splits = if node.since_version < 13 {
        helper.get_ints("split", &[])
    } else if let Some(name) = node.input(SPLIT_IDX) {
        graph
            .initializer(name)
            .ok_or("split must be a constant initializer")?
            .to_i64_vec()
            .map_err(|err| err.to_string())?
    } else {
        Vec::new()
    };

    let outputs = match helper.get_int("num_outputs", 0) {
        0 => node.outputs.len() as i64,
        n => n,
    };
    if outputs < 1 {
        return Err("split has no outputs".to_string());
    }

    if splits.is_empty() {
        if axis_len % outputs != 0 {
            return Err(format!(
                "axis length {axis_len} cannot be split evenly into {outputs} outputs"
            ));
        }
        return Ok(SplitPlan {
            axis,
            spec: SplitSpec::Count(outputs as u32),
        });
    }

    if splits.len() as i64 != outputs {
        return Err(format!(
            "{} split lengths given for {outputs} outputs",
            splits.len()
        ));
    }
    if splits.iter().any(|&len| len <= 0) {
        return Err(format!("split lengths must be positive: {splits:?}"));
    }
    if splits.iter().sum::<i64>() != axis_len {
        return Err(format!(
            "split lengths {splits:?} do not sum to axis length {axis_len}"
        ));
    }
    let sizes = splits
        .iter()
        .map(|&len| u32::try_from(len))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| format!("split lengths out of range: {splits:?}"))?;
    Ok(SplitPlan {
        axis,
        spec: SplitSpec::Sizes(sizes),
    })
}

impl<B: MlBackend> OpBuilder<B> for SplitOpBuilder {
    fn add_initializers_to_skip(&self, model_builder: &mut ModelBuilder<'_, B>, node: &Node) {
        if let Some(name) = node.input(SPLIT_IDX) {
            model_builder.add_initializer_to_skip(name);
        }
    }

    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let input = input_operand(model_builder, node, 0)?;
        let plan = split_plan(model_builder.graph(), node).map_err(|reason| invalid(node, reason))?;
        let results = model_builder
            .builder()
            .split(&input, &plan.spec, plan.axis as u32)?;
        if results.len() != node.outputs.len() {
            return Err(invalid(
                node,
                format!(
                    "split produced {} outputs, node has {}",
                    results.len(),
                    node.outputs.len()
                ),
            ));
        }
        for (slot, operand) in results.into_iter().enumerate() {
            if let Some(name) = node.output(slot) {
                model_builder.add_operand(name, operand)?;
            }
        }
        Ok(())
    }

    fn is_op_supported_impl(&self, graph: &GraphView, node: &Node, _device: DeviceType) -> bool {
        match split_plan(graph, node) {
            Ok(_) => true,
            Err(reason) => {
                log::debug!("Split [{}] {reason}", node.name);
                false
            }
        }
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(&["Split"], Arc::new(SplitOpBuilder));
}
