//! Host-facing facade: capability discovery and per-partition compilation.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::MlBackend;
use crate::builders::{init_op_builders, CompiledModel, ModelBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{GraphView, NodeIndex};
use crate::options::ProviderOptions;
use crate::partition::get_supported_nodes;

/// Prefix of generated fused-node names.
pub const FUSED_NODE_PREFIX: &str = "WEBNN";

/// One partition the provider offers to take over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeCapability {
    /// Fused-node name, `WEBNN_<graph hash>_<n>`.
    pub name: String,
    pub nodes: Vec<NodeIndex>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

fn fnv_hash(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Stable fingerprint of the graph's boundary and node list.
fn graph_hash(graph: &GraphView) -> u64 {
    let mut bytes = Vec::new();
    for name in graph.inputs.iter().chain(graph.outputs.iter()) {
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
    }
    for node in &graph.nodes {
        bytes.extend_from_slice(node.op_type.as_bytes());
        bytes.push(b':');
        bytes.extend_from_slice(node.name.as_bytes());
        bytes.push(0);
    }
    fnv_hash(&bytes)
}

/// Execution provider over one backend.
pub struct ExecutionProvider<B: MlBackend> {
    backend: Arc<B>,
    options: ProviderOptions,
    registry: Arc<OpBuilderRegistry<B>>,
    models: HashMap<String, Arc<CompiledModel<B>>>,
    next_id: usize,
}

impl<B: MlBackend> ExecutionProvider<B> {
    /// Environment overrides are applied on top of `options`.
    pub fn new(backend: Arc<B>, options: ProviderOptions) -> Self {
        Self::with_registry(backend, options, Arc::new(init_op_builders()))
    }

    pub fn with_registry(
        backend: Arc<B>,
        options: ProviderOptions,
        registry: Arc<OpBuilderRegistry<B>>,
    ) -> Self {
        let options = options.with_env_overrides();
        log::debug!(
            "{} provider created with {:?}",
            backend.backend_name(),
            options.context
        );
        Self {
            backend,
            options,
            registry,
            models: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    pub fn registry(&self) -> &OpBuilderRegistry<B> {
        &self.registry
    }

    /// Partitions `graph` and names each group it can take.
    pub fn get_capability(&mut self, graph: &GraphView) -> Vec<ComputeCapability> {
        let groups = get_supported_nodes(graph, &*self.registry, self.options.device_type());
        if groups.is_empty() {
            return Vec::new();
        }

        let hash = graph_hash(graph);
        let mut capabilities = Vec::with_capacity(groups.len());
        for nodes in groups {
            let sub = graph.subgraph(&nodes);
            let name = format!("{FUSED_NODE_PREFIX}_{hash}_{}", self.next_id);
            self.next_id += 1;
            log::debug!("{name} takes {} node(s)", nodes.len());
            capabilities.push(ComputeCapability {
                name,
                nodes,
                inputs: sub.inputs,
                outputs: sub.outputs,
            });
        }
        capabilities
    }

    /// Lowers one capability and keeps the result under its fused-node name.
    pub fn compile(
        &mut self,
        graph: &GraphView,
        capability: &ComputeCapability,
    ) -> CompileResult<Arc<CompiledModel<B>>> {
        let mut sub = graph.subgraph(&capability.nodes);
        // The host binds buffers in capability order.
        sub.inputs = capability.inputs.clone();
        sub.outputs = capability.outputs.clone();
        let (input_map, output_map) = sub.boundary_index_maps();

        let builder =
            ModelBuilder::new(&sub, &*self.registry, Arc::clone(&self.backend), &self.options)?;
        let mut model = builder.compile()?;
        model.set_input_map(input_map);
        model.set_output_map(output_map);

        let model = Arc::new(model);
        self.models
            .insert(capability.name.clone(), Arc::clone(&model));
        Ok(model)
    }

    /// Compiles every capability of `graph`, stopping at the first failure.
    pub fn compile_all(
        &mut self,
        graph: &GraphView,
    ) -> CompileResult<Vec<(ComputeCapability, Arc<CompiledModel<B>>)>> {
        let capabilities = self.get_capability(graph);
        let mut compiled = Vec::with_capacity(capabilities.len());
        for capability in capabilities {
            let model = self.compile(graph, &capability)?;
            compiled.push((capability, model));
        }
        Ok(compiled)
    }

    pub fn model(&self, name: &str) -> Option<Arc<CompiledModel<B>>> {
        self.models.get(name).cloned()
    }

    /// Drops a compiled model when the host releases the fused node.
    pub fn release(&mut self, name: &str) -> bool {
        self.models.remove(name).is_some()
    }
}
