use std::collections::HashSet;
use std::fmt;

use super::GraphView;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyError {
    pub missing_tensor: String,
    pub node: String,
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tensor '{}' is missing before node '{}'",
            self.missing_tensor, self.node
        )
    }
}

impl std::error::Error for TopologyError {}

/// Checks that every node input is available when the node is reached.
pub fn validate_topology(graph: &GraphView) -> Result<(), TopologyError> {
    let mut available: HashSet<&str> = graph.inputs.iter().map(String::as_str).collect();
    available.extend(graph.initializers.keys().map(String::as_str));

    for node in &graph.nodes {
        for input in node.inputs.iter().filter(|name| !name.is_empty()) {
            if !available.contains(input.as_str()) {
                return Err(TopologyError {
                    missing_tensor: input.clone(),
                    node: node.name.clone(),
                });
            }
        }
        available.extend(
            node.outputs
                .iter()
                .filter(|name| !name.is_empty())
                .map(String::as_str),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ElementType, Node, NodeArg};

    #[test]
    fn use_before_definition_is_reported() {
        let mut graph = GraphView::new(13);
        graph.add_input(NodeArg::new("x", ElementType::Float32, &[2]));
        graph.add_node(Node::new("Add", &["x", "later"], &["y"]).named("add"));
        graph.add_node(Node::new("Relu", &["x"], &["later"]));

        let err = validate_topology(&graph).expect_err("later is produced after its use");
        assert_eq!(
            err,
            TopologyError {
                missing_tensor: "later".into(),
                node: "add".into(),
            }
        );
    }
}
