use std::sync::Arc;

use super::{add_output, input_shape, invalid};
use crate::backend::{MlBackend, MlGraphBuilder};
use crate::builders::helper::{handle_negative_axis, tensor_shape, NodeAttrHelper};
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{GraphView, Node};
use crate::options::DeviceType;

struct ConcatOpBuilder;

impl<B: MlBackend> OpBuilder<B> for ConcatOpBuilder {
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let rank = input_shape(model_builder.graph(), node, 0)?.len();
        let axis = NodeAttrHelper::new(node).get_int("axis", 1);
        let axis = handle_negative_axis(axis, rank)
            .ok_or_else(|| invalid(node, format!("axis {axis} out of range for rank {rank}")))?;

        let mut inputs = Vec::with_capacity(node.inputs.len());
        for name in node.inputs.iter().filter(|name| !name.is_empty()) {
            log::trace!("Concat [{}] input {name}", node.name);
            inputs.push(model_builder.operand(name)?);
        }

        let output = model_builder.builder().concat(&inputs, axis as u32)?;
        add_output(model_builder, node, output)
    }

    fn is_op_supported_impl(&self, graph: &GraphView, node: &Node, _device: DeviceType) -> bool {
        let count = node.inputs.iter().filter(|name| !name.is_empty()).count();
        if count < 2 {
            log::debug!(
                "Concat [{}] only supports 2+ inputs, actual number of inputs: {count}",
                node.name
            );
            return false;
        }
        let Some(rank) = node
            .input(0)
            .and_then(|input| tensor_shape(graph, input))
            .map(|shape| shape.len())
        else {
            return false;
        };
        let axis = NodeAttrHelper::new(node).get_int("axis", 1);
        if handle_negative_axis(axis, rank).is_none() {
            log::debug!("Concat [{}] axis {axis} out of range", node.name);
            return false;
        }
        true
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(&["Concat"], Arc::new(ConcatOpBuilder));
}
