//! Capability probing: which nodes the registry can lower, grouped by
//! position in the topological order.

use crate::backend::MlBackend;
use crate::builders::helper::is_input_supported;
use crate::builders::OpBuilderRegistry;
use crate::graph::{GraphView, Node, NodeIndex};
use crate::options::DeviceType;

/// Node indices of one compiled subgraph, in topological order.
pub type PartitionGroup = Vec<NodeIndex>;

/// Whether the registry can lower `node` on `device`.
pub fn is_node_supported<B: MlBackend>(
    graph: &GraphView,
    node: &Node,
    registry: &OpBuilderRegistry<B>,
    device: DeviceType,
) -> bool {
    match registry.get(&node.op_type) {
        Some(builder) => builder.is_op_supported(graph, node, device),
        None => {
            log::debug!(
                "Operator type: [{}] is not supported for now, node: [{}]",
                node.op_type,
                node.name
            );
            false
        }
    }
}

/// Declared graph inputs must all be static and of a supported type, else no
/// node is taken.
fn graph_inputs_supported(graph: &GraphView, device: DeviceType) -> bool {
    for name in &graph.inputs {
        if graph.is_initializer(name) {
            continue;
        }
        let Some(arg) = graph.node_arg(name) else {
            log::debug!("Graph input '{name}' is undeclared");
            return false;
        };
        if !is_input_supported(arg, "graph", device) {
            return false;
        }
    }
    true
}

/// Splits the graph into maximal runs of consecutive supported nodes.
///
/// Grouping follows topological position only: an unsupported node always
/// closes the current run, and a supported node between two unsupported ones
/// forms a group of its own.
pub fn get_supported_nodes<B: MlBackend>(
    graph: &GraphView,
    registry: &OpBuilderRegistry<B>,
    device: DeviceType,
) -> Vec<PartitionGroup> {
    let mut groups = Vec::new();
    if !graph_inputs_supported(graph, device) {
        return groups;
    }

    let mut current = PartitionGroup::new();
    for node in &graph.nodes {
        let supported = is_node_supported(graph, node, registry, device);
        log::trace!(
            "Operator type: [{}] index: [{}] name: [{}] supported: [{supported}]",
            node.op_type,
            node.index,
            node.name
        );
        if supported {
            current.push(node.index);
        } else if !current.is_empty() {
            groups.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    log::debug!(
        "{} of {} nodes supported in {} group(s)",
        groups.iter().map(Vec::len).sum::<usize>(),
        graph.nodes.len(),
        groups.len()
    );
    groups
}
