#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use webnn_ep::{
    CompiledModel, ElementType, ExecutionProvider, GraphView, NodeArg, OwnedTensor,
    ProviderOptions,
};
use webnn_ep_backend_ref_cpu::RefCpuBackend;

pub type Model = Arc<CompiledModel<RefCpuBackend>>;

pub fn f32_arg(name: &str, dims: &[i64]) -> NodeArg {
    NodeArg::new(name, ElementType::Float32, dims)
}

pub fn provider(backend: &Arc<RefCpuBackend>) -> ExecutionProvider<RefCpuBackend> {
    ExecutionProvider::new(Arc::clone(backend), ProviderOptions::default())
}

/// Compiles a graph that is expected to form exactly one partition.
pub fn compile_single(graph: &GraphView) -> (Arc<RefCpuBackend>, Model) {
    compile_single_on(Arc::new(RefCpuBackend::new()), graph)
}

pub fn compile_single_on(backend: Arc<RefCpuBackend>, graph: &GraphView) -> (Arc<RefCpuBackend>, Model) {
    let mut provider = provider(&backend);
    let mut compiled = provider.compile_all(graph).expect("compile graph");
    assert_eq!(compiled.len(), 1, "expected a single partition");
    let (_, model) = compiled.remove(0);
    (backend, model)
}

pub fn run_f32(model: &Model, inputs: &[(&str, &[i64], &[f32])]) -> HashMap<String, OwnedTensor> {
    let feeds = inputs
        .iter()
        .map(|(name, shape, values)| (name.to_string(), OwnedTensor::from_f32(shape, values)))
        .collect();
    model.run(&feeds).expect("run model")
}

pub fn output_f32(outputs: &HashMap<String, OwnedTensor>, name: &str) -> Vec<f32> {
    outputs
        .get(name)
        .unwrap_or_else(|| panic!("missing output {name}"))
        .to_f32_vec()
        .expect("float32 output")
}

pub fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= 1e-5, "{actual:?} vs {expected:?}");
    }
}
