use std::sync::Arc;

use super::{add_output, input_operand};
use crate::backend::{GemmOptions, MlBackend, MlGraphBuilder};
use crate::builders::helper::{tensor_shape, NodeAttrHelper};
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{GraphView, Node};
use crate::options::DeviceType;

/// Gemm (`alpha * A' * B' + beta * C`) and MatMul.
struct GemmOpBuilder;

const A_IDX: usize = 0;
const B_IDX: usize = 1;
const C_IDX: usize = 2;

fn non_empty_2d(graph: &GraphView, node: &Node, slot: usize, label: &str) -> Option<Vec<i64>> {
    let shape = tensor_shape(graph, node.input(slot)?)?;
    if shape.len() != 2 {
        log::debug!("Gemm [{}] {label} must be 2D", node.name);
        return None;
    }
    if shape.iter().product::<i64>() == 0 {
        log::debug!("Gemm [{}] {label} must be non-empty", node.name);
        return None;
    }
    Some(shape)
}

impl<B: MlBackend> OpBuilder<B> for GemmOpBuilder {
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let a = input_operand(model_builder, node, A_IDX)?;
        let b = input_operand(model_builder, node, B_IDX)?;
        let output = if node.op_type == "MatMul" {
            model_builder.builder().matmul(&a, &b)?
        } else {
            let helper = NodeAttrHelper::new(node);
            let mut options = GemmOptions {
                a_transpose: helper.get_int("transA", 0) == 1,
                b_transpose: helper.get_int("transB", 0) == 1,
                alpha: helper.get_float("alpha", 1.0),
                beta: helper.get_float("beta", 1.0),
                ..GemmOptions::default()
            };
            if node.input(C_IDX).is_some() {
                options.c = Some(input_operand(model_builder, node, C_IDX)?);
            }
            options.activation = model_builder.find_activation(node, 0);
            model_builder.builder().gemm(&a, &b, options)?
        };
        add_output(model_builder, node, output)
    }

    fn is_op_supported_impl(&self, graph: &GraphView, node: &Node, _device: DeviceType) -> bool {
        if node.op_type == "MatMul" {
            let ranks = [A_IDX, B_IDX].map(|slot| {
                node.input(slot)
                    .and_then(|name| tensor_shape(graph, name))
                    .map(|shape| shape.len())
            });
            return match ranks {
                [Some(a), Some(b)] if a >= 2 && b >= 2 => true,
                _ => {
                    log::debug!("MatMul [{}] needs known inputs of rank 2 or more", node.name);
                    false
                }
            };
        }

        let Some(_a_shape) = non_empty_2d(graph, node, A_IDX, "A") else {
            return false;
        };
        let Some(b_shape) = non_empty_2d(graph, node, B_IDX, "B") else {
            return false;
        };

        if let Some(c_name) = node.input(C_IDX) {
            let Some(c_shape) = tensor_shape(graph, c_name) else {
                return false;
            };
            if let Some(&c_size) = c_shape.last() {
                let trans_b = NodeAttrHelper::new(node).get_int("transB", 0);
                let n = if trans_b == 0 { b_shape[1] } else { b_shape[0] };
                if c_size != n && c_size != 1 {
                    log::debug!(
                        "C of Gemm [{}] must be a vector of b_shape[{}] b_shape: {b_shape:?} c_size: {c_size}",
                        node.name,
                        if trans_b == 0 { 1 } else { 0 }
                    );
                    return false;
                }
            } else {
                log::debug!("C of Gemm [{}] is a scalar", node.name);
            }
        }
        true
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(&["Gemm", "MatMul"], Arc::new(GemmOpBuilder));
}
