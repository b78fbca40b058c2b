use std::collections::HashMap;

use webnn_ep::backend::{
    Activation, ArrayBufferView, ArrayBufferViewMut, AutoPad, BackendError, BinaryOp,
    ClampOptions, Conv2dOptions, GruOptions, MlBackend, MlGraphBuilder, OperandDescriptor,
    OperandType, SplitSpec, UnaryOp,
};
use webnn_ep::options::ContextOptions;
use webnn_ep_backend_ref_cpu::{CpuGraphBuilder, CpuOp, CpuOperand, FaultPoint, RefCpuBackend};

fn f32_desc(dims: &[u32]) -> OperandDescriptor {
    OperandDescriptor::new(OperandType::Float32, dims.to_vec())
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn new_builder(backend: &RefCpuBackend) -> CpuGraphBuilder {
    let context = backend
        .create_context(&ContextOptions::default())
        .expect("context");
    backend.create_graph_builder(&context).expect("builder")
}

fn constant(builder: &mut CpuGraphBuilder, dims: &[u32], values: &[f32]) -> CpuOperand {
    let bytes = f32_bytes(values);
    builder
        .constant(
            &f32_desc(dims),
            ArrayBufferView::new(OperandType::Float32, &bytes),
        )
        .expect("constant")
}

fn dims_of(builder: &CpuGraphBuilder, operand: &CpuOperand) -> Vec<u32> {
    builder
        .descriptor(operand)
        .expect("descriptor")
        .dimensions
        .clone()
}

#[test]
fn same_lower_puts_the_extra_pad_first() {
    let backend = RefCpuBackend::new();
    let mut builder = new_builder(&backend);
    let x = builder.input("x", &f32_desc(&[1, 1, 5, 5])).expect("input");
    let w = constant(&mut builder, &[1, 1, 2, 2], &[1.0; 4]);
    let y = builder
        .conv2d(
            &x,
            &w,
            Conv2dOptions {
                auto_pad: AutoPad::SameLower,
                ..Conv2dOptions::default()
            },
        )
        .expect("conv2d");
    assert_eq!(dims_of(&builder, &y), vec![1, 1, 5, 5]);

    let graph = builder.build(&[("y".to_string(), y)]).expect("build");
    let padding = graph
        .nodes()
        .iter()
        .find_map(|node| match &node.op {
            CpuOp::Conv2d { params, .. } => Some(params.padding),
            _ => None,
        })
        .expect("conv2d node");
    assert_eq!(padding, [1, 0, 1, 0]);
}

#[test]
fn gru_without_sequence_returns_only_the_state() {
    let backend = RefCpuBackend::new();
    let mut builder = new_builder(&backend);
    let x = builder.input("x", &f32_desc(&[3, 2, 4])).expect("input");
    let w = constant(&mut builder, &[1, 15, 4], &[0.0; 60]);
    let r = constant(&mut builder, &[1, 15, 5], &[0.0; 75]);
    let outputs = builder
        .gru(&x, &w, &r, 3, 5, GruOptions::default())
        .expect("gru");
    assert_eq!(outputs.len(), 1);
    assert_eq!(dims_of(&builder, &outputs[0]), vec![1, 2, 5]);

    let err = builder
        .gru(&x, &w, &r, 2, 5, GruOptions::default())
        .expect_err("steps must match the input");
    assert!(matches!(err, BackendError::InvalidArgument { .. }));
}

#[test]
fn split_rejects_uneven_plans() {
    let backend = RefCpuBackend::new();
    let mut builder = new_builder(&backend);
    let x = builder.input("x", &f32_desc(&[2, 4])).expect("input");

    assert!(builder.split(&x, &SplitSpec::Count(3), 1).is_err());
    assert!(builder.split(&x, &SplitSpec::Sizes(vec![1, 2]), 1).is_err());
    assert!(builder.split(&x, &SplitSpec::Count(2), 2).is_err());

    let parts = builder
        .split(&x, &SplitSpec::Sizes(vec![3, 1]), 1)
        .expect("split");
    assert_eq!(dims_of(&builder, &parts[0]), vec![2, 3]);
    assert_eq!(dims_of(&builder, &parts[1]), vec![2, 1]);
}

#[test]
fn binary_broadcasts_from_the_right() {
    let backend = RefCpuBackend::new();
    let mut builder = new_builder(&backend);
    let a = builder.input("a", &f32_desc(&[2, 3])).expect("input");
    let row = constant(&mut builder, &[3], &[1.0, 2.0, 3.0]);
    let col = constant(&mut builder, &[4], &[0.0; 4]);

    let sum = builder.binary(BinaryOp::Add, &a, &row).expect("broadcast add");
    assert_eq!(dims_of(&builder, &sum), vec![2, 3]);
    assert!(builder.binary(BinaryOp::Mul, &a, &col).is_err());
}

#[test]
fn clamp_bounds_must_be_ordered() {
    let backend = RefCpuBackend::new();
    let mut builder = new_builder(&backend);
    let x = builder.input("x", &f32_desc(&[4])).expect("input");

    assert!(builder
        .activation_operator(&Activation::Clamp { min: 6.0, max: 0.0 })
        .is_err());
    assert!(builder
        .clamp(
            &x,
            ClampOptions {
                min_value: 1.0,
                max_value: -1.0,
            },
        )
        .is_err());
}

#[test]
fn build_needs_distinct_outputs() {
    let backend = RefCpuBackend::new();
    let mut builder = new_builder(&backend);
    let x = builder.input("x", &f32_desc(&[4])).expect("input");
    assert!(builder.input("x", &f32_desc(&[4])).is_err());
    let y = builder.unary(UnaryOp::Relu, &x).expect("relu");

    let empty = new_builder(&backend);
    assert!(empty.build(&[]).is_err());
    let err = builder
        .build(&[("y".to_string(), y), ("y".to_string(), x)])
        .expect_err("duplicate output name");
    assert!(err.to_string().contains("named twice"));
}

#[test]
fn injected_build_failure_surfaces_at_build() {
    let backend = RefCpuBackend::new();
    backend.inject_fault(FaultPoint::Build);
    let mut builder = new_builder(&backend);
    let x = builder.input("x", &f32_desc(&[4])).expect("input");
    let y = builder.unary(UnaryOp::Tanh, &x).expect("tanh");
    assert!(matches!(
        builder.build(&[("y".to_string(), y)]),
        Err(BackendError::Execution { .. })
    ));
}

#[test]
fn fill_sequence_cast_to_int32() {
    let backend = RefCpuBackend::new();
    let context = backend
        .create_context(&ContextOptions::default())
        .expect("context");
    let mut builder = backend.create_graph_builder(&context).expect("builder");
    let seq = builder
        .fill_sequence(OperandType::Float32, &[3], 0.0, 2.0)
        .expect("fill");
    let ints = builder.cast(&seq, OperandType::Int32).expect("cast");
    let desc = builder.descriptor(&ints).expect("descriptor").clone();
    assert_eq!(desc, OperandDescriptor::new(OperandType::Int32, vec![3]));

    let graph = builder.build(&[("y".to_string(), ints)]).expect("build");
    assert_eq!(graph.operation_kinds(), vec!["fillSequence", "cast"]);

    let mut out = vec![0u8; 12];
    let mut outputs = HashMap::from([(
        "y".to_string(),
        ArrayBufferViewMut::new(OperandType::Int32, &mut out),
    )]);
    backend
        .compute(&context, &graph, &HashMap::new(), &mut outputs)
        .expect("compute");
    drop(outputs);
    let values: Vec<i32> = out
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    assert_eq!(values, vec![0, 2, 4]);
}

#[test]
fn compute_checks_buffer_lengths() {
    let backend = RefCpuBackend::new();
    let context = backend
        .create_context(&ContextOptions::default())
        .expect("context");
    let mut builder = backend.create_graph_builder(&context).expect("builder");
    let x = builder.input("x", &f32_desc(&[4])).expect("input");
    let y = builder.leaky_relu(&x, 0.5).expect("leaky relu");
    let graph = builder.build(&[("y".to_string(), y)]).expect("build");

    let short = f32_bytes(&[1.0, -2.0]);
    let inputs = HashMap::from([(
        "x".to_string(),
        ArrayBufferView::new(OperandType::Float32, &short),
    )]);
    let mut out = vec![0u8; 16];
    let mut outputs = HashMap::from([(
        "y".to_string(),
        ArrayBufferViewMut::new(OperandType::Float32, &mut out),
    )]);
    assert!(backend
        .compute(&context, &graph, &inputs, &mut outputs)
        .is_err());

    let full = f32_bytes(&[1.0, -2.0, 3.0, -4.0]);
    let inputs = HashMap::from([(
        "x".to_string(),
        ArrayBufferView::new(OperandType::Float32, &full),
    )]);
    backend
        .compute(&context, &graph, &inputs, &mut outputs)
        .expect("compute");
    drop(outputs);
    assert_eq!(out, f32_bytes(&[1.0, -1.0, 3.0, -2.0]));
    assert_eq!(backend.compute_calls(), 2);
}
