use std::sync::Arc;

use super::{add_output, input_operand, invalid};
use crate::backend::{ClampOptions, MlBackend, MlGraphBuilder};
use crate::builders::helper::get_clip_min_max;
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{GraphView, Node};
use crate::options::DeviceType;

struct ClipOpBuilder;

impl<B: MlBackend> OpBuilder<B> for ClipOpBuilder {
    fn add_initializers_to_skip(&self, model_builder: &mut ModelBuilder<'_, B>, node: &Node) {
        for slot in [1, 2] {
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
        let input = input_operand(model_builder, node, 0)?;
        let (min_value, max_value) = get_clip_min_max(model_builder.graph(), node)
            .ok_or_else(|| invalid(node, "min/max must be constant"))?;
        let output = model_builder.builder().clamp(
            &input,
            ClampOptions {
                min_value,
                max_value,
            },
        )?;
        add_output(model_builder, node, output)
    }

    fn is_op_supported_impl(&self, graph: &GraphView, node: &Node, _device: DeviceType) -> bool {
        get_clip_min_max(graph, node).is_some()
    }

    fn min_supported_opset(&self, _node: &Node) -> i64 {
        6
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(&["Clip"], Arc::new(ClipOpBuilder));
}
