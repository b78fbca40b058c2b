//! Per-operator translation into backend graph calls.

pub mod helper;
mod impl_ops;
mod model;
mod model_builder;
mod registry;

use crate::backend::MlBackend;
use crate::error::CompileResult;
use crate::graph::{GraphView, Node};
use crate::options::DeviceType;

pub use model::{CompiledModel, InputTensor, OutputTensor, OwnedTensor, TensorBoundaryInfo};
pub use model_builder::ModelBuilder;
pub use registry::{init_op_builders, OpBuilderRegistry};

/// Lowest and highest opset any builder accepts unless it narrows the range.
pub const DEFAULT_MIN_OPSET: i64 = 1;
pub const DEFAULT_MAX_OPSET: i64 = 18;

/// Translator for one family of host operators.
///
/// Builders are stateless; a single instance may serve several operator
/// types and is shared by every compile.
pub trait OpBuilder<B: MlBackend>: Send + Sync {
    /// Marks initializers this builder reads by value so they are not
    /// materialized as backend constants.
    fn add_initializers_to_skip(&self, _model_builder: &mut ModelBuilder<'_, B>, _node: &Node) {}

    /// Emits backend operators for `node` and registers its outputs.
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()>;

    fn is_op_supported(&self, graph: &GraphView, node: &Node, device: DeviceType) -> bool {
        if !self.has_supported_inputs(graph, node, device) {
            return false;
        }
        let (min, max) = (
            self.min_supported_opset(node),
            self.max_supported_opset(node),
        );
        if node.since_version < min || node.since_version > max {
            log::debug!(
                "{} [{}] opset {} is outside supported range [{min}, {max}]",
                node.op_type,
                node.name,
                node.since_version
            );
            return false;
        }
        self.is_op_supported_impl(graph, node, device)
    }

    fn is_op_supported_impl(&self, _graph: &GraphView, _node: &Node, _device: DeviceType) -> bool {
        true
    }

    /// By default only the first input is checked: it must be a declared
    /// tensor with a static shape and a supported element type.
    fn has_supported_inputs(&self, graph: &GraphView, node: &Node, device: DeviceType) -> bool {
        let Some(name) = node.input(0) else {
            log::debug!("{} [{}] has no input", node.op_type, node.name);
            return false;
        };
        match graph.node_arg(name) {
            Some(arg) => helper::is_input_supported(arg, &node.name, device),
            None => {
                log::debug!("{} [{}] input '{name}' is undeclared", node.op_type, node.name);
                false
            }
        }
    }

    fn min_supported_opset(&self, _node: &Node) -> i64 {
        DEFAULT_MIN_OPSET
    }

    fn max_supported_opset(&self, _node: &Node) -> i64 {
        DEFAULT_MAX_OPSET
    }
}
