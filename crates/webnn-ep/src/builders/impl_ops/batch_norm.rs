use std::sync::Arc;

use super::{add_output, input_operand};
use crate::backend::{BatchNormalizationOptions, MlBackend, MlGraphBuilder};
use crate::builders::helper::{tensor_shape, NodeAttrHelper};
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{GraphView, Node};
use crate::options::DeviceType;

struct BatchNormalizationOpBuilder;

impl<B: MlBackend> OpBuilder<B> for BatchNormalizationOpBuilder {
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let input = input_operand(model_builder, node, 0)?;
        let mean = input_operand(model_builder, node, 3)?;
        let variance = input_operand(model_builder, node, 4)?;
        let options = BatchNormalizationOptions {
            scale: Some(input_operand(model_builder, node, 1)?),
            bias: Some(input_operand(model_builder, node, 2)?),
            axis: 1,
            epsilon: NodeAttrHelper::new(node).get_float("epsilon", 1e-5),
            activation: model_builder.find_activation(node, 0),
        };
        let output = model_builder
            .builder()
            .batch_normalization(&input, &mean, &variance, options)?;
        add_output(model_builder, node, output)
    }

    fn is_op_supported_impl(&self, graph: &GraphView, node: &Node, _device: DeviceType) -> bool {
        let name = &node.name;
        if node.outputs.iter().filter(|o| !o.is_empty()).count() != 1 {
            log::debug!(
                "BatchNormalization [{name}] has training outputs; export the model in inference mode"
            );
            return false;
        }

        let rank = node
            .input(0)
            .and_then(|input| tensor_shape(graph, input))
            .map(|shape| shape.len());
        if rank != Some(4) {
            log::debug!("BN [{name}] only supports 4d input, got {rank:?}");
            return false;
        }

        let helper = NodeAttrHelper::new(node);
        if helper.get_int("spatial", 1) != 1 {
            log::debug!("Non-spatial BN [{name}] is not supported");
            return false;
        }
        if helper.get_int("training_mode", 0) != 0 {
            log::debug!("BN [{name}] in training mode is not supported");
            return false;
        }

        for (slot, label) in [(1, "Scale"), (2, "B"), (3, "Mean"), (4, "Var")] {
            let is_constant = node
                .input(slot)
                .map(|input| graph.is_initializer(input))
                .unwrap_or(false);
            if !is_constant {
                log::debug!("{label} of BN [{name}] must be a constant initializer");
                return false;
            }
        }
        true
    }

    fn min_supported_opset(&self, _node: &Node) -> i64 {
        7
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(&["BatchNormalization"], Arc::new(BatchNormalizationOpBuilder));
}
