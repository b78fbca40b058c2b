mod support;

use std::sync::Arc;

use webnn_ep::backend::Activation;
use webnn_ep::builders::ModelBuilder;
use webnn_ep::{init_op_builders, CompileError, GraphView, Node, ProviderOptions, TensorProto};
use webnn_ep_backend_ref_cpu::{CpuOp, RefCpuBackend};

use support::{assert_close, compile_single, f32_arg, output_f32, run_f32};

/// x -> Conv(3x3 ones, pads 1) -> c -> Relu -> r -> Reshape -> y
fn conv_relu_graph() -> GraphView {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[1, 1, 3, 3]));
    graph.add_output(f32_arg("y", &[1, 9]));
    graph.add_initializer(TensorProto::from_f32("w", &[1, 1, 3, 3], &[1.0; 9]));
    graph.add_initializer(TensorProto::from_i64("shape", &[2], &[1, 9]));
    graph.add_value(f32_arg("c", &[1, 1, 3, 3]));
    graph.add_value(f32_arg("r", &[1, 1, 3, 3]));
    graph.add_node(Node::new("Conv", &["x", "w"], &["c"]).attr("pads", vec![1i64, 1, 1, 1]));
    graph.add_node(Node::new("Relu", &["c"], &["r"]));
    graph.add_node(Node::new("Reshape", &["r", "shape"], &["y"]));
    graph
}

#[test]
fn relu_folds_into_conv() {
    let (_, model) = compile_single(&conv_relu_graph());
    let cpu_graph = model.backend_graph();
    assert_eq!(cpu_graph.count_kind("relu"), 0);
    assert_eq!(cpu_graph.fused_activations(), vec![("conv2d", Activation::Relu)]);

    let input: Vec<f32> = (1..=9).map(|v| v as f32 - 5.0).collect();
    let outputs = run_f32(&model, &[("x", &[1, 1, 3, 3], &input)]);
    assert_close(
        &output_f32(&outputs, "y"),
        &[0.0, 0.0, 0.0, 0.0, 0.0, 3.0, 4.0, 9.0, 8.0],
    );
}

#[test]
fn symmetric_pads_resolve_to_same_padding() {
    let (_, model) = compile_single(&conv_relu_graph());
    let conv = model
        .backend_graph()
        .nodes()
        .iter()
        .find_map(|node| match &node.op {
            CpuOp::Conv2d { params, .. } => Some(*params),
            _ => None,
        })
        .expect("conv2d node");
    assert_eq!(conv.padding, [1, 1, 1, 1]);
}

#[test]
fn conv_output_on_the_graph_boundary_keeps_relu_separate() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[1, 1, 3, 3]));
    graph.add_output(f32_arg("c", &[1, 1, 3, 3]));
    graph.add_output(f32_arg("y", &[1, 1, 3, 3]));
    graph.add_initializer(TensorProto::from_f32("w", &[1, 1, 3, 3], &[1.0; 9]));
    graph.add_node(Node::new("Conv", &["x", "w"], &["c"]).attr("pads", vec![1i64, 1, 1, 1]));
    graph.add_node(Node::new("Relu", &["c"], &["y"]));

    let (_, model) = compile_single(&graph);
    let cpu_graph = model.backend_graph();
    assert_eq!(cpu_graph.count_kind("relu"), 1);
    assert!(cpu_graph.fused_activations().is_empty());

    let input: Vec<f32> = (1..=9).map(|v| v as f32 - 5.0).collect();
    let outputs = run_f32(&model, &[("x", &[1, 1, 3, 3], &input)]);
    assert_close(
        &output_f32(&outputs, "c"),
        &[-8.0, -9.0, -4.0, -3.0, 0.0, 3.0, 4.0, 9.0, 8.0],
    );
    assert_close(
        &output_f32(&outputs, "y"),
        &[0.0, 0.0, 0.0, 0.0, 0.0, 3.0, 4.0, 9.0, 8.0],
    );
}

#[test]
fn relu_producing_a_graph_output_stays_standalone() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[1, 1, 3, 3]));
    graph.add_output(f32_arg("y", &[1, 1, 3, 3]));
    graph.add_initializer(TensorProto::from_f32("w", &[1, 1, 3, 3], &[1.0; 9]));
    graph.add_value(f32_arg("c", &[1, 1, 3, 3]));
    graph.add_node(Node::new("Conv", &["x", "w"], &["c"]).attr("pads", vec![1i64, 1, 1, 1]));
    graph.add_node(Node::new("Relu", &["c"], &["y"]));

    let (_, model) = compile_single(&graph);
    let cpu_graph = model.backend_graph();
    assert_eq!(cpu_graph.count_kind("relu"), 1);
    assert!(cpu_graph.fused_activations().is_empty());

    let input: Vec<f32> = (1..=9).map(|v| v as f32 - 5.0).collect();
    let outputs = run_f32(&model, &[("x", &[1, 1, 3, 3], &input)]);
    assert_close(
        &output_f32(&outputs, "y"),
        &[0.0, 0.0, 0.0, 0.0, 0.0, 3.0, 4.0, 9.0, 8.0],
    );
}

#[test]
fn relu_folds_into_batch_normalization() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[1, 2, 1, 2]));
    graph.add_output(f32_arg("y", &[1, 4]));
    graph.add_initializer(TensorProto::from_f32("scale", &[2], &[1.0, 1.0]));
    graph.add_initializer(TensorProto::from_f32("bias", &[2], &[0.0, 0.0]));
    graph.add_initializer(TensorProto::from_f32("mean", &[2], &[1.0, -1.0]));
    graph.add_initializer(TensorProto::from_f32("var", &[2], &[1.0, 1.0]));
    graph.add_initializer(TensorProto::from_i64("shape", &[2], &[1, 4]));
    graph.add_value(f32_arg("n", &[1, 2, 1, 2]));
    graph.add_value(f32_arg("r", &[1, 2, 1, 2]));
    graph.add_node(
        Node::new("BatchNormalization", &["x", "scale", "bias", "mean", "var"], &["n"])
            .attr("epsilon", 0.0f32),
    );
    graph.add_node(Node::new("Relu", &["n"], &["r"]));
    graph.add_node(Node::new("Reshape", &["r", "shape"], &["y"]));

    let (_, model) = compile_single(&graph);
    let cpu_graph = model.backend_graph();
    assert_eq!(cpu_graph.count_kind("relu"), 0);
    assert_eq!(
        cpu_graph.fused_activations(),
        vec![("batchNormalization", Activation::Relu)]
    );

    let outputs = run_f32(&model, &[("x", &[1, 2, 1, 2], &[0.0, 3.0, -2.0, 1.0])]);
    assert_close(&output_f32(&outputs, "y"), &[0.0, 2.0, 0.0, 2.0]);
}

#[test]
fn sigmoid_folds_into_conv_transpose() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[1, 1, 1, 1]));
    graph.add_output(f32_arg("y", &[1, 4]));
    graph.add_initializer(TensorProto::from_f32("w", &[1, 1, 2, 2], &[1.0, 0.0, -1.0, 2.0]));
    graph.add_initializer(TensorProto::from_i64("shape", &[2], &[1, 4]));
    graph.add_value(f32_arg("t", &[1, 1, 2, 2]));
    graph.add_value(f32_arg("s", &[1, 1, 2, 2]));
    graph.add_node(Node::new("ConvTranspose", &["x", "w"], &["t"]));
    graph.add_node(Node::new("Sigmoid", &["t"], &["s"]));
    graph.add_node(Node::new("Reshape", &["s", "shape"], &["y"]));

    let (_, model) = compile_single(&graph);
    let cpu_graph = model.backend_graph();
    assert_eq!(cpu_graph.count_kind("sigmoid"), 0);
    assert_eq!(
        cpu_graph.fused_activations(),
        vec![("convTranspose2d", Activation::Sigmoid)]
    );

    let sigmoid = |v: f32| 1.0 / (1.0 + (-v).exp());
    let outputs = run_f32(&model, &[("x", &[1, 1, 1, 1], &[1.5])]);
    assert_close(
        &output_f32(&outputs, "y"),
        &[sigmoid(1.5), sigmoid(0.0), sigmoid(-1.5), sigmoid(3.0)],
    );
}

#[test]
fn unregistered_op_fails_lowering() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[1, 4]));
    graph.add_output(f32_arg("y", &[1, 4]));
    graph.add_node(Node::new("Softmax", &["x"], &["y"]));

    let registry = init_op_builders::<RefCpuBackend>();
    let backend = Arc::new(RefCpuBackend::new());
    let builder = ModelBuilder::new(&graph, &registry, backend, &ProviderOptions::default())
        .expect("model builder");
    let err = builder.compile().expect_err("Softmax has no op builder");
    assert!(
        matches!(err, CompileError::NoOpBuilder { ref op_type, .. } if op_type == "Softmax"),
        "{err}"
    );
}

#[test]
fn shared_producer_output_is_not_fused() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("a", &[2, 3]));
    graph.add_output(f32_arg("y", &[2, 4]));
    graph.add_initializer(TensorProto::from_f32("b", &[3, 2], &[1.0; 6]));
    graph.add_value(f32_arg("g", &[2, 2]));
    graph.add_value(f32_arg("r1", &[2, 2]));
    graph.add_value(f32_arg("r2", &[2, 2]));
    graph.add_node(Node::new("Gemm", &["a", "b"], &["g"]));
    graph.add_node(Node::new("Relu", &["g"], &["r1"]));
    graph.add_node(Node::new("Sigmoid", &["g"], &["r2"]));
    graph.add_node(Node::new("Concat", &["r1", "r2"], &["y"]).attr("axis", 1i64));

    let (_, model) = compile_single(&graph);
    let cpu_graph = model.backend_graph();
    assert!(cpu_graph.fused_activations().is_empty());
    assert_eq!(cpu_graph.count_kind("relu"), 1);
    assert_eq!(cpu_graph.count_kind("sigmoid"), 1);
}

#[test]
fn clip_folds_into_gemm_as_clamp() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("a", &[1, 2]));
    graph.add_output(f32_arg("y", &[2, 1]));
    graph.add_initializer(TensorProto::from_f32("b", &[2, 2], &[1.0, 0.0, 0.0, 1.0]));
    graph.add_initializer(TensorProto::from_f32("lo", &[], &[0.0]));
    graph.add_initializer(TensorProto::from_f32("hi", &[], &[6.0]));
    graph.add_value(f32_arg("g", &[1, 2]));
    graph.add_value(f32_arg("c", &[1, 2]));
    graph.add_node(Node::new("Gemm", &["a", "b"], &["g"]));
    graph.add_node(Node::new("Clip", &["g", "lo", "hi"], &["c"]));
    graph.add_node(Node::new("Transpose", &["c"], &["y"]));

    let (_, model) = compile_single(&graph);
    let cpu_graph = model.backend_graph();
    assert_eq!(cpu_graph.count_kind("clamp"), 0);
    assert_eq!(
        cpu_graph.fused_activations(),
        vec![("gemm", Activation::Clamp { min: 0.0, max: 6.0 })]
    );

    let outputs = run_f32(&model, &[("a", &[1, 2], &[-3.0, 9.0])]);
    assert_close(&output_f32(&outputs, "y"), &[0.0, 6.0]);
}
