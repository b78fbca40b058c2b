use std::sync::Arc;

use super::{add_output, input_operand, invalid};
use crate::backend::{BinaryOp, MlBackend, MlGraphBuilder};
use crate::builders::helper::is_input_supported;
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{GraphView, Node};
use crate::options::DeviceType;

struct BinaryOpBuilder;

impl<B: MlBackend> OpBuilder<B> for BinaryOpBuilder {
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let op = match node.op_type.as_str() {
            "Add" => BinaryOp::Add,
            "Sub" => BinaryOp::Sub,
            "Mul" => BinaryOp::Mul,
            "Div" => BinaryOp::Div,
            other => return Err(invalid(node, format!("unknown binary op {other}"))),
        };
        let a = input_operand(model_builder, node, 0)?;
        let b = input_operand(model_builder, node, 1)?;
        let output = model_builder.builder().binary(op, &a, &b)?;
        add_output(model_builder, node, output)
    }

    fn has_supported_inputs(&self, graph: &GraphView, node: &Node, device: DeviceType) -> bool {
        let mut elem_types = Vec::with_capacity(2);
        for slot in 0..2 {
            let Some(arg) = node.input(slot).and_then(|name| graph.node_arg(name)) else {
                log::debug!("{} [{}] input {slot} is undeclared", node.op_type, node.name);
                return false;
            };
            if !is_input_supported(arg, &node.name, device) {
                return false;
            }
            elem_types.push(arg.elem_type);
        }
        if elem_types[0] != elem_types[1] {
            log::debug!(
                "{} [{}] input types differ: {:?} vs {:?}",
                node.op_type,
                node.name,
                elem_types[0],
                elem_types[1]
            );
            return false;
        }
        true
    }

    // Opset 6 and below carry the legacy broadcast attribute.
    fn min_supported_opset(&self, _node: &Node) -> i64 {
        7
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(&["Add", "Sub", "Mul", "Div"], Arc::new(BinaryOpBuilder));
}
