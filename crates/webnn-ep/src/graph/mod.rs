//! Read-only view of the host computation graph.
//!
//! The view holds nodes in topological order together with the declared tensor
//! slots, graph boundary and constant initializers. Everything downstream
//! (partitioning, lowering) reads from it and never mutates it.

mod tensor;
mod topology;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use tensor::{unpack_initializer, ElementType, TensorProto};
pub use topology::{validate_topology, TopologyError};

/// Position of a node in the topological order of its graph.
pub type NodeIndex = usize;

/// One dimension of a declared tensor shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dim {
    Value(i64),
    Param(String),
    Unknown,
}

impl Dim {
    pub fn as_static(&self) -> Option<i64> {
        match self {
            Dim::Value(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for Dim {
    fn from(value: i64) -> Self {
        Dim::Value(value)
    }
}

/// A named tensor slot with its declared type and shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeArg {
    pub name: String,
    #[serde(default)]
    pub elem_type: Option<ElementType>,
    #[serde(default)]
    pub shape: Option<Vec<Dim>>,
}

impl NodeArg {
    pub fn new(name: impl Into<String>, elem_type: ElementType, dims: &[i64]) -> Self {
        Self {
            name: name.into(),
            elem_type: Some(elem_type),
            shape: Some(dims.iter().copied().map(Dim::Value).collect()),
        }
    }

    pub fn with_shape(name: impl Into<String>, elem_type: ElementType, shape: Vec<Dim>) -> Self {
        Self {
            name: name.into(),
            elem_type: Some(elem_type),
            shape: Some(shape),
        }
    }

    /// Static dimensions, or `None` if the shape is absent or any dim is symbolic.
    pub fn static_shape(&self) -> Option<Vec<i64>> {
        self.shape
            .as_ref()?
            .iter()
            .map(Dim::as_static)
            .collect::<Option<Vec<_>>>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    Int(i64),
    Float(f32),
    String(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f32> for AttributeValue {
    fn from(value: f32) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<Vec<i64>> for AttributeValue {
    fn from(value: Vec<i64>) -> Self {
        AttributeValue::Ints(value)
    }
}

impl From<Vec<f32>> for AttributeValue {
    fn from(value: Vec<f32>) -> Self {
        AttributeValue::Floats(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(value: Vec<String>) -> Self {
        AttributeValue::Strings(value)
    }
}

/// One operation of the host graph.
///
/// An empty string in `inputs` marks an omitted optional input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub index: NodeIndex,
    #[serde(default)]
    pub name: String,
    pub op_type: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub since_version: i64,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Node {
    pub fn new(op_type: impl Into<String>, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            index: 0,
            name: String::new(),
            op_type: op_type.into(),
            domain: String::new(),
            since_version: 0,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn since(mut self, version: i64) -> Self {
        self.since_version = version;
        self
    }

    /// Input name at `slot`, treating a missing or empty entry as absent.
    pub fn input(&self, slot: usize) -> Option<&str> {
        self.inputs
            .get(slot)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    pub fn output(&self, slot: usize) -> Option<&str> {
        self.outputs
            .get(slot)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}

/// Topologically ordered host graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphView {
    #[serde(default = "default_opset")]
    pub opset: i64,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub node_args: BTreeMap<String, NodeArg>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub initializers: BTreeMap<String, TensorProto>,
}

fn default_opset() -> i64 {
    13
}

impl GraphView {
    pub fn new(opset: i64) -> Self {
        Self {
            opset,
            ..Self::default()
        }
    }

    pub fn add_input(&mut self, arg: NodeArg) -> &mut Self {
        self.inputs.push(arg.name.clone());
        self.node_args.insert(arg.name.clone(), arg);
        self
    }

    pub fn add_output(&mut self, arg: NodeArg) -> &mut Self {
        self.outputs.push(arg.name.clone());
        self.node_args.insert(arg.name.clone(), arg);
        self
    }

    /// Declares an intermediate tensor's type and shape.
    pub fn add_value(&mut self, arg: NodeArg) -> &mut Self {
        self.node_args.insert(arg.name.clone(), arg);
        self
    }

    pub fn add_initializer(&mut self, tensor: TensorProto) -> &mut Self {
        let arg = NodeArg::new(tensor.name.clone(), tensor.data_type, &tensor.dims);
        self.node_args.entry(tensor.name.clone()).or_insert(arg);
        self.initializers.insert(tensor.name.clone(), tensor);
        self
    }

    /// Appends a node, assigning its topological index and the graph opset
    /// when the node does not carry its own since-version.
    pub fn add_node(&mut self, mut node: Node) -> NodeIndex {
        let index = self.nodes.len();
        node.index = index;
        if node.since_version == 0 {
            node.since_version = self.opset;
        }
        if node.name.is_empty() {
            node.name = format!("{}_{}", node.op_type, index);
        }
        self.nodes.push(node);
        index
    }

    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.iter().find(|node| node.index == index)
    }

    pub fn node_arg(&self, name: &str) -> Option<&NodeArg> {
        self.node_args.get(name)
    }

    pub fn initializer(&self, name: &str) -> Option<&TensorProto> {
        self.initializers.get(name)
    }

    pub fn is_initializer(&self, name: &str) -> bool {
        self.initializers.contains_key(name)
    }

    pub fn is_graph_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|output| output == name)
    }

    /// Every `(node, input slot)` edge that reads `name`.
    pub fn consumers(&self, name: &str) -> Vec<(NodeIndex, usize)> {
        let mut edges = Vec::new();
        for node in &self.nodes {
            for (slot, input) in node.inputs.iter().enumerate() {
                if input == name {
                    edges.push((node.index, slot));
                }
            }
        }
        edges
    }

    /// Node that produces `name`, if any.
    pub fn producer(&self, name: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|node| node.outputs.iter().any(|output| output == name))
    }

    /// Extracts the node-induced sub-view for a partition group.
    ///
    /// Node indices are preserved so that capability records stay meaningful
    /// against the parent graph.
    pub fn subgraph(&self, group: &[NodeIndex]) -> GraphView {
        let members: HashSet<NodeIndex> = group.iter().copied().collect();
        let nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|node| members.contains(&node.index))
            .cloned()
            .collect();

        let produced: HashSet<&str> = nodes
            .iter()
            .flat_map(|node| node.outputs.iter().map(String::as_str))
            .filter(|name| !name.is_empty())
            .collect();

        let mut inputs = Vec::new();
        let mut initializers = BTreeMap::new();
        let mut seen = HashSet::new();
        for node in &nodes {
            for input in node.inputs.iter().filter(|name| !name.is_empty()) {
                if !seen.insert(input.as_str()) {
                    continue;
                }
                if let Some(tensor) = self.initializers.get(input) {
                    initializers.insert(input.clone(), tensor.clone());
                } else if !produced.contains(input.as_str()) {
                    inputs.push(input.clone());
                }
            }
        }

        let mut outputs = Vec::new();
        for node in &nodes {
            for output in node.outputs.iter().filter(|name| !name.is_empty()) {
                let consumed_outside = self
                    .consumers(output)
                    .iter()
                    .any(|(index, _)| !members.contains(index));
                if self.is_graph_output(output) || consumed_outside {
                    outputs.push(output.clone());
                }
            }
        }

        let mut node_args = BTreeMap::new();
        let referenced = nodes
            .iter()
            .flat_map(|node| node.inputs.iter().chain(node.outputs.iter()));
        for name in referenced {
            if let Some(arg) = self.node_args.get(name) {
                node_args.insert(name.clone(), arg.clone());
            }
        }

        GraphView {
            opset: self.opset,
            nodes,
            node_args,
            inputs,
            outputs,
            initializers,
        }
    }

    /// Input and output positions by tensor name.
    pub fn boundary_index_maps(&self) -> (HashMap<String, usize>, HashMap<String, usize>) {
        let inputs = self
            .inputs
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let outputs = self
            .outputs
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        (inputs, outputs)
    }
}

/// Reads a JSON graph fixture and validates its topology.
pub fn load_graph_json(path: impl AsRef<Path>) -> anyhow::Result<GraphView> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read graph file {}", path.display()))?;
    let mut graph: GraphView = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse graph file {}", path.display()))?;
    for tensor in graph.initializers.values() {
        if !graph.node_args.contains_key(&tensor.name) {
            let arg = NodeArg::new(tensor.name.clone(), tensor.data_type, &tensor.dims);
            graph.node_args.insert(tensor.name.clone(), arg);
        }
    }
    for (index, node) in graph.nodes.iter_mut().enumerate() {
        node.index = index;
        if node.since_version == 0 {
            node.since_version = graph.opset;
        }
    }
    validate_topology(&graph).with_context(|| format!("invalid graph {}", path.display()))?;
    Ok(graph)
}
