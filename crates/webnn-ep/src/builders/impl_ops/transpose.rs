use std::sync::Arc;

use super::{add_output, input_operand, input_shape, invalid, to_u32_vec};
use crate::backend::{MlBackend, MlGraphBuilder};
use crate::builders::helper::{tensor_shape, NodeAttrHelper};
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{GraphView, Node};
use crate::options::DeviceType;

struct TransposeOpBuilder;

/// `perm` attribute, defaulting to reversed axes.
fn permutation(node: &Node, rank: usize) -> Vec<i64> {
    let reversed: Vec<i64> = (0..rank as i64).rev().collect();
    NodeAttrHelper::new(node).get_ints("perm", &reversed)
}

fn is_permutation(perm: &[i64], rank: usize) -> bool {
    if perm.len() != rank {
        return false;
    }
    let mut seen = vec![false; rank];
    for &axis in perm {
        match usize::try_from(axis) {
            Ok(a) if a < rank && !seen[a] => seen[a] = true,
            _ => return false,
        }
    }
    true
}

impl<B: MlBackend> OpBuilder<B> for TransposeOpBuilder {
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let rank = input_shape(model_builder.graph(), node, 0)?.len();
        let perm = permutation(node, rank);
        if !is_permutation(&perm, rank) {
            return Err(invalid(node, format!("perm {perm:?} is not a permutation")));
        }
        let input = input_operand(model_builder, node, 0)?;
        let perm = to_u32_vec(node, "perm", &perm)?;
        let output = model_builder.builder().transpose(&input, &perm)?;
        add_output(model_builder, node, output)
    }

    fn is_op_supported_impl(&self, graph: &GraphView, node: &Node, _device: DeviceType) -> bool {
        let Some(rank) = node
            .input(0)
            .and_then(|name| tensor_shape(graph, name))
            .map(|shape| shape.len())
        else {
            return false;
        };
        let perm = permutation(node, rank);
        if !is_permutation(&perm, rank) {
            log::debug!("Transpose [{}] perm {perm:?} is invalid", node.name);
            return false;
        }
        true
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(&["Transpose"], Arc::new(TransposeOpBuilder));
}
