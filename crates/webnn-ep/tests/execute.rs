mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use webnn_ep::graph::Dim;
use webnn_ep::{
    CompileError, ElementType, ExecuteError, GraphView, InputTensor, Node, NodeArg, OutputTensor,
    OwnedTensor, TensorProto,
};
use webnn_ep_backend_ref_cpu::{FaultPoint, RefCpuBackend};

use support::{
    assert_close, compile_single, compile_single_on, f32_arg, output_f32, provider, run_f32,
};

/// y = x * 2
fn doubling_graph() -> GraphView {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[4]));
    graph.add_output(f32_arg("y", &[4]));
    graph.add_initializer(TensorProto::from_f32("two", &[], &[2.0]));
    graph.add_node(Node::new("Mul", &["x", "two"], &["y"]));
    graph
}

#[test]
fn scalar_tensors_round_trip_as_rank_zero() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[]));
    graph.add_output(f32_arg("y", &[]));
    graph.add_node(Node::new("Relu", &["x"], &["y"]));

    let (_, model) = compile_single(&graph);
    assert!(model.is_scalar_output("y"));
    let x = model.boundary_info("x").expect("input info");
    assert_eq!(x.shape, vec![1]);
    assert!(x.logical_shape().is_empty());

    let outputs = run_f32(&model, &[("x", &[], &[3.5])]);
    let y = &outputs["y"];
    assert!(y.shape.is_empty());
    assert_eq!(y.to_f32_vec(), Some(vec![3.5]));
}

#[test]
fn concurrent_executes_are_serialized() {
    let backend = Arc::new(RefCpuBackend::with_compute_delay(Duration::from_millis(5)));
    let (backend, model) = compile_single_on(backend, &doubling_graph());

    thread::scope(|scope| {
        for t in 0..8 {
            let model = &model;
            scope.spawn(move || {
                let input = [t as f32; 4];
                let outputs = run_f32(model, &[("x", &[4], &input)]);
                assert_close(&output_f32(&outputs, "y"), &[2.0 * t as f32; 4]);
            });
        }
    });

    assert_eq!(backend.compute_calls(), 8);
    assert_eq!(backend.max_concurrent_computes(), 1);
}

#[test]
fn type_mismatch_leaves_the_model_usable() {
    let (_, model) = compile_single(&doubling_graph());

    let wrong = OwnedTensor {
        elem_type: ElementType::Int32,
        shape: vec![4],
        data: vec![0; 16],
    };
    let feeds = HashMap::from([("x".to_string(), wrong)]);
    let err = model.run(&feeds).expect_err("int32 input must be rejected");
    assert!(matches!(err, ExecuteError::TypeMismatch { ref name, .. } if name == "x"));

    let outputs = run_f32(&model, &[("x", &[4], &[1.0, 2.0, 3.0, 4.0])]);
    assert_close(&output_f32(&outputs, "y"), &[2.0, 4.0, 6.0, 8.0]);
}

#[test]
fn bindings_are_checked_before_compute() {
    let (backend, model) = compile_single(&doubling_graph());
    let x = OwnedTensor::from_f32(&[4], &[1.0; 4]);

    let mut y_data = vec![0u8; 16];
    let mut outputs = HashMap::from([(
        "y".to_string(),
        OutputTensor {
            elem_type: ElementType::Float32,
            shape: &[4],
            data: &mut y_data,
        },
    )]);
    let err = model
        .execute(&HashMap::new(), &mut outputs)
        .expect_err("missing input");
    assert!(matches!(err, ExecuteError::MissingBinding { ref name } if name == "x"));

    let short = [0u8; 8];
    let inputs = HashMap::from([(
        "x".to_string(),
        InputTensor {
            elem_type: ElementType::Float32,
            shape: &[4],
            data: &short,
        },
    )]);
    let err = model.execute(&inputs, &mut outputs).expect_err("short buffer");
    assert!(matches!(err, ExecuteError::BufferSize { expected: 16, actual: 8, .. }));

    let mut extra = HashMap::from([("x".to_string(), x.as_input())]);
    extra.insert("bogus".to_string(), x.as_input());
    let err = model.execute(&extra, &mut outputs).expect_err("unknown input");
    assert!(matches!(err, ExecuteError::UnknownTensor { ref name } if name == "bogus"));

    assert_eq!(backend.compute_calls(), 0);

    let inputs = HashMap::from([("x".to_string(), x.as_input())]);
    model.execute(&inputs, &mut outputs).expect("execute");
    drop(outputs);
    let y: Vec<f32> = y_data
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    assert_eq!(y, vec![2.0; 4]);
}

#[test]
fn oversized_shapes_are_rejected_without_panicking() {
    let (backend, model) = compile_single(&doubling_graph());
    let data = [0u8; 16];
    let mut y_data = vec![0u8; 16];
    let mut outputs = HashMap::from([(
        "y".to_string(),
        OutputTensor {
            elem_type: ElementType::Float32,
            shape: &[4],
            data: &mut y_data,
        },
    )]);

    for shape in [&[i64::MAX, 4][..], &[-4][..]] {
        let inputs = HashMap::from([(
            "x".to_string(),
            InputTensor {
                elem_type: ElementType::Float32,
                shape,
                data: &data,
            },
        )]);
        let err = model
            .execute(&inputs, &mut outputs)
            .expect_err("shape without a byte size");
        assert!(
            matches!(err, ExecuteError::InvalidShape { ref name, shape: ref got } if name == "x" && got == shape),
            "{err}"
        );
    }
    assert_eq!(backend.compute_calls(), 0);

    let inputs = HashMap::from([(
        "x".to_string(),
        InputTensor {
            elem_type: ElementType::Float32,
            shape: &[4],
            data: &data,
        },
    )]);
    model.execute(&inputs, &mut outputs).expect("execute");
    assert_eq!(backend.compute_calls(), 1);
}

#[test]
fn compute_failure_is_recoverable() {
    let (backend, model) = compile_single(&doubling_graph());
    backend.inject_fault(FaultPoint::Compute);
    let feeds = HashMap::from([("x".to_string(), OwnedTensor::from_f32(&[4], &[1.0; 4]))]);
    let err = model.run(&feeds).expect_err("injected failure");
    assert!(matches!(err, ExecuteError::Compute(_)));

    backend.clear_fault(FaultPoint::Compute);
    let outputs = model.run(&feeds).expect("run after clearing the fault");
    assert_eq!(outputs["y"].to_f32_vec(), Some(vec![2.0; 4]));
}

#[test]
fn backend_failures_abort_compilation() {
    let graph = doubling_graph();
    let cases = [
        FaultPoint::CreateContext,
        FaultPoint::CreateGraphBuilder,
        FaultPoint::Build,
    ];
    for point in cases {
        let backend = Arc::new(RefCpuBackend::new());
        backend.inject_fault(point);
        let mut provider = provider(&backend);
        let err = provider
            .compile_all(&graph)
            .expect_err("injected failure must abort compile");
        let expected = match (&err, point) {
            (CompileError::ContextCreation(_), FaultPoint::CreateContext) => true,
            (CompileError::GraphBuilderCreation(_), FaultPoint::CreateGraphBuilder) => true,
            (CompileError::GraphBuild(_), FaultPoint::Build) => true,
            _ => false,
        };
        assert!(expected, "{point:?} produced {err}");
    }
}

#[test]
fn dynamic_boundary_shape_fails_compilation() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[1, 4]));
    graph.add_output(f32_arg("y", &[1, 4]));
    graph.add_value(NodeArg::with_shape(
        "a",
        ElementType::Float32,
        vec![Dim::Param("n".into()), Dim::Value(4)],
    ));
    graph.add_node(Node::new("Relu", &["x"], &["a"]));
    graph.add_node(Node::new("Sigmoid", &["a"], &["y"]));

    let backend = Arc::new(RefCpuBackend::new());
    let mut provider = provider(&backend);
    let capabilities = provider.get_capability(&graph);
    assert_eq!(capabilities.len(), 1);
    assert_eq!(capabilities[0].outputs, vec!["a".to_string()]);

    let err = provider
        .compile(&graph, &capabilities[0])
        .expect_err("dynamic output shape");
    assert!(matches!(err, CompileError::DynamicShape { ref name } if name == "a"));
}

#[test]
fn boundary_positions_follow_capability_order() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("a", &[2]));
    graph.add_input(f32_arg("b", &[2]));
    graph.add_output(f32_arg("y", &[2]));
    graph.add_node(Node::new("Sub", &["b", "a"], &["y"]));

    let (_, model) = compile_single(&graph);
    assert_eq!(model.mapped_input_index("b"), Some(0));
    assert_eq!(model.mapped_input_index("a"), Some(1));
    assert_eq!(model.mapped_output_index("y"), Some(0));

    let outputs = run_f32(&model, &[("a", &[2], &[1.0, 2.0]), ("b", &[2], &[10.0, 20.0])]);
    assert_close(&output_f32(&outputs, "y"), &[9.0, 18.0]);
}
