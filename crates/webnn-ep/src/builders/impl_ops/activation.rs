use std::sync::Arc;

use super::{add_output, input_operand, invalid};
use crate::backend::{MlBackend, MlGraphBuilder, UnaryOp};
use crate::builders::helper::NodeAttrHelper;
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::Node;

/// Standalone activations. Fused instances never reach this builder.
struct ActivationOpBuilder;

impl<B: MlBackend> OpBuilder<B> for ActivationOpBuilder {
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let input = input_operand(model_builder, node, 0)?;
        let builder = model_builder.builder();
        let output = match node.op_type.as_str() {
            "Relu" => builder.unary(UnaryOp::Relu, &input)?,
            "LeakyRelu" => {
                let alpha = NodeAttrHelper::new(node).get_float("alpha", 0.01);
                builder.leaky_relu(&input, alpha)?
            }
            "Sigmoid" => builder.unary(UnaryOp::Sigmoid, &input)?,
            "Tanh" => builder.unary(UnaryOp::Tanh, &input)?,
            other => return Err(invalid(node, format!("unknown activation {other}"))),
        };
        add_output(model_builder, node, output)
    }

    // Opset 5 and below use the consumed_inputs attribute.
    fn min_supported_opset(&self, _node: &Node) -> i64 {
        6
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(
        &["Relu", "LeakyRelu", "Sigmoid", "Tanh"],
        Arc::new(ActivationOpBuilder),
    );
}
