mod support;

use std::sync::Arc;

use webnn_ep::{CompileError, ElementType, GraphView, Node, NodeArg, TensorProto};
use webnn_ep_backend_ref_cpu::RefCpuBackend;

use support::{assert_close, compile_single, f32_arg, output_f32, provider, run_f32};

fn iota(n: usize) -> Vec<f32> {
    (0..n).map(|v| v as f32).collect()
}

#[test]
fn gemm_applies_transpose_alpha_and_beta() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("a", &[2, 3]));
    graph.add_output(f32_arg("y", &[2, 2]));
    graph.add_initializer(TensorProto::from_f32(
        "b",
        &[2, 3],
        &[1.0, 0.0, 1.0, 0.0, 1.0, 0.0],
    ));
    graph.add_initializer(TensorProto::from_f32("c", &[2], &[1.0, -1.0]));
    graph.add_node(
        Node::new("Gemm", &["a", "b", "c"], &["y"])
            .attr("transB", 1i64)
            .attr("alpha", 2.0f32)
            .attr("beta", 0.5f32),
    );

    let (_, model) = compile_single(&graph);
    let a: Vec<f32> = (1..=6).map(|v| v as f32).collect();
    let outputs = run_f32(&model, &[("a", &[2, 3], &a)]);
    assert_close(&output_f32(&outputs, "y"), &[8.5, 3.5, 20.5, 9.5]);
}

#[test]
fn matmul_broadcasts_batch_dimensions() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("a", &[2, 2, 3]));
    graph.add_output(f32_arg("y", &[2, 2, 1]));
    graph.add_initializer(TensorProto::from_f32("b", &[3, 1], &[1.0; 3]));
    graph.add_node(Node::new("MatMul", &["a", "b"], &["y"]));

    let (_, model) = compile_single(&graph);
    let a: Vec<f32> = (1..=12).map(|v| v as f32).collect();
    let outputs = run_f32(&model, &[("a", &[2, 2, 3], &a)]);
    assert_close(&output_f32(&outputs, "y"), &[6.0, 15.0, 24.0, 33.0]);
}

#[test]
fn split_reads_lengths_from_initializer() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[2, 4]));
    graph.add_output(f32_arg("head", &[2, 1]));
    graph.add_output(f32_arg("tail", &[2, 3]));
    graph.add_initializer(TensorProto::from_i64("lengths", &[2], &[1, 3]));
    graph.add_node(
        Node::new("Split", &["x", "lengths"], &["head", "tail"]).attr("axis", 1i64),
    );

    let (_, model) = compile_single(&graph);
    let outputs = run_f32(&model, &[("x", &[2, 4], &iota(8))]);
    assert_close(&output_f32(&outputs, "head"), &[0.0, 4.0]);
    assert_close(
        &output_f32(&outputs, "tail"),
        &[1.0, 2.0, 3.0, 5.0, 6.0, 7.0],
    );
}

#[test]
fn split_without_lengths_divides_evenly() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[6]));
    for name in ["p", "q", "r"] {
        graph.add_output(f32_arg(name, &[2]));
    }
    graph.add_node(Node::new("Split", &["x"], &["p", "q", "r"]));

    let (_, model) = compile_single(&graph);
    let outputs = run_f32(&model, &[("x", &[6], &iota(6))]);
    assert_close(&output_f32(&outputs, "p"), &[0.0, 1.0]);
    assert_close(&output_f32(&outputs, "q"), &[2.0, 3.0]);
    assert_close(&output_f32(&outputs, "r"), &[4.0, 5.0]);
}

#[test]
fn concat_reshape_and_transpose_move_data() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[2, 2]));
    graph.add_output(f32_arg("y", &[3, 2]));
    graph.add_initializer(TensorProto::from_f32("pad", &[2, 1], &[9.0, 9.0]));
    graph.add_initializer(TensorProto::from_i64("shape", &[2], &[0, -1]));
    graph.add_value(f32_arg("c", &[2, 3]));
    graph.add_value(f32_arg("r", &[2, 3]));
    graph.add_node(Node::new("Concat", &["x", "pad"], &["c"]).attr("axis", -1i64));
    graph.add_node(Node::new("Reshape", &["c", "shape"], &["r"]));
    graph.add_node(Node::new("Transpose", &["r"], &["y"]));

    let (_, model) = compile_single(&graph);
    let outputs = run_f32(&model, &[("x", &[2, 2], &[1.0, 2.0, 3.0, 4.0])]);
    assert_close(
        &output_f32(&outputs, "y"),
        &[1.0, 3.0, 2.0, 4.0, 9.0, 9.0],
    );
}

#[test]
fn transpose_honours_explicit_perm() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[1, 2, 3]));
    graph.add_output(f32_arg("y", &[3, 1, 2]));
    graph.add_node(Node::new("Transpose", &["x"], &["y"]).attr("perm", vec![2i64, 0, 1]));

    let (_, model) = compile_single(&graph);
    let outputs = run_f32(&model, &[("x", &[1, 2, 3], &iota(6))]);
    assert_close(
        &output_f32(&outputs, "y"),
        &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0],
    );
}

#[test]
fn nearest_resize_from_scales() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[1, 1, 2, 2]));
    graph.add_output(f32_arg("y", &[1, 1, 4, 4]));
    graph.add_initializer(TensorProto::from_f32("scales", &[4], &[1.0, 1.0, 2.0, 2.0]));
    graph.add_node(Node::new("Resize", &["x", "", "scales"], &["y"]));

    let (_, model) = compile_single(&graph);
    let outputs = run_f32(&model, &[("x", &[1, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0])]);
    assert_close(
        &output_f32(&outputs, "y"),
        &[
            1.0, 1.0, 2.0, 2.0, //
            1.0, 1.0, 2.0, 2.0, //
            3.0, 3.0, 4.0, 4.0, //
            3.0, 3.0, 4.0, 4.0,
        ],
    );
}

#[test]
fn linear_resize_from_sizes() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[1, 1, 2, 2]));
    graph.add_output(f32_arg("y", &[1, 1, 4, 4]));
    graph.add_initializer(TensorProto::from_i64("sizes", &[4], &[1, 1, 4, 4]));
    graph.add_node(
        Node::new("Resize", &["x", "", "", "sizes"], &["y"]).attr("mode", "linear"),
    );

    let (_, model) = compile_single(&graph);
    let outputs = run_f32(&model, &[("x", &[1, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0])]);
    assert_close(
        &output_f32(&outputs, "y"),
        &[
            1.0, 1.25, 1.75, 2.0, //
            1.5, 1.75, 2.25, 2.5, //
            2.5, 2.75, 3.25, 3.5, //
            3.0, 3.25, 3.75, 4.0,
        ],
    );
}

#[test]
fn float_range_becomes_a_constant_sequence() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[3]));
    graph.add_output(f32_arg("y", &[3]));
    graph.add_initializer(TensorProto::from_f32("start", &[], &[1.0]));
    graph.add_initializer(TensorProto::from_f32("limit", &[], &[2.5]));
    graph.add_initializer(TensorProto::from_f32("delta", &[], &[0.5]));
    graph.add_value(f32_arg("seq", &[3]));
    graph.add_node(Node::new("Range", &["start", "limit", "delta"], &["seq"]));
    graph.add_node(Node::new("Add", &["x", "seq"], &["y"]));

    let (_, model) = compile_single(&graph);
    assert_eq!(model.backend_graph().count_kind("cast"), 0);
    let outputs = run_f32(&model, &[("x", &[3], &[10.0, 20.0, 30.0])]);
    assert_close(&output_f32(&outputs, "y"), &[11.0, 21.5, 32.0]);
}

#[test]
fn int32_range_cannot_leave_the_partition() {
    let mut graph = GraphView::new(13);
    graph.add_output(NodeArg::new("y", ElementType::Int32, &[3]));
    graph.add_initializer(TensorProto::from_i32("start", &[], &[0]));
    graph.add_initializer(TensorProto::from_i32("limit", &[], &[5]));
    graph.add_initializer(TensorProto::from_i32("delta", &[], &[2]));
    graph.add_node(Node::new("Range", &["start", "limit", "delta"], &["y"]));

    let backend = Arc::new(RefCpuBackend::new());
    let mut provider = provider(&backend);
    let err = provider
        .compile_all(&graph)
        .expect_err("int32 boundary tensor");
    assert!(matches!(
        err,
        CompileError::UnsupportedType { ref name, elem_type: ElementType::Int32 } if name == "y"
    ));
}

#[test]
fn max_and_average_pool() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[1, 1, 4, 4]));
    graph.add_output(f32_arg("max", &[1, 1, 2, 2]));
    graph.add_output(f32_arg("avg", &[1, 1, 2, 2]));
    for (op, out) in [("MaxPool", "max"), ("AveragePool", "avg")] {
        graph.add_node(
            Node::new(op, &["x"], &[out])
                .attr("kernel_shape", vec![2i64, 2])
                .attr("strides", vec![2i64, 2]),
        );
    }

    let (_, model) = compile_single(&graph);
    let outputs = run_f32(&model, &[("x", &[1, 1, 4, 4], &iota(16))]);
    assert_close(&output_f32(&outputs, "max"), &[5.0, 7.0, 13.0, 15.0]);
    assert_close(&output_f32(&outputs, "avg"), &[2.5, 4.5, 10.5, 12.5]);
}

#[test]
fn global_average_pool_keeps_rank() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[1, 2, 2, 2]));
    graph.add_output(f32_arg("y", &[1, 2, 1, 1]));
    graph.add_node(Node::new("GlobalAveragePool", &["x"], &["y"]));

    let (_, model) = compile_single(&graph);
    let outputs = run_f32(&model, &[("x", &[1, 2, 2, 2], &iota(8))]);
    assert_eq!(outputs["y"].shape, vec![1, 2, 1, 1]);
    assert_close(&output_f32(&outputs, "y"), &[1.5, 5.5]);
}

#[test]
fn batch_normalization_uses_constant_statistics() {
    let mut graph = GraphView::new(15);
    graph.add_input(f32_arg("x", &[1, 2, 1, 2]));
    graph.add_output(f32_arg("y", &[1, 2, 1, 2]));
    graph.add_initializer(TensorProto::from_f32("scale", &[2], &[1.0, 2.0]));
    graph.add_initializer(TensorProto::from_f32("bias", &[2], &[0.0, 1.0]));
    graph.add_initializer(TensorProto::from_f32("mean", &[2], &[1.0, 3.0]));
    graph.add_initializer(TensorProto::from_f32("var", &[2], &[1.0, 4.0]));
    graph.add_node(
        Node::new(
            "BatchNormalization",
            &["x", "scale", "bias", "mean", "var"],
            &["y"],
        )
        .attr("epsilon", 0.0f32),
    );

    let (_, model) = compile_single(&graph);
    let outputs = run_f32(&model, &[("x", &[1, 2, 1, 2], &[1.0, 2.0, 3.0, 4.0])]);
    assert_close(&output_f32(&outputs, "y"), &[0.0, 1.0, 1.0, 2.0]);
}

#[test]
fn clip_and_leaky_relu_standalone() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[4]));
    graph.add_output(f32_arg("clipped", &[4]));
    graph.add_output(f32_arg("leaky", &[4]));
    graph.add_initializer(TensorProto::from_f32("lo", &[], &[0.0]));
    graph.add_initializer(TensorProto::from_f32("hi", &[], &[6.0]));
    graph.add_node(Node::new("Clip", &["x", "lo", "hi"], &["clipped"]));
    graph.add_node(Node::new("LeakyRelu", &["x"], &["leaky"]).attr("alpha", 0.1f32));

    let (_, model) = compile_single(&graph);
    let outputs = run_f32(&model, &[("x", &[4], &[-2.0, 0.5, 3.0, 10.0])]);
    assert_close(&output_f32(&outputs, "clipped"), &[0.0, 0.5, 3.0, 6.0]);
    assert_close(&output_f32(&outputs, "leaky"), &[-0.2, 0.5, 3.0, 10.0]);
}

#[test]
fn gru_returns_sequence_and_final_state() {
    let mut graph = GraphView::new(14);
    graph.add_input(f32_arg("x", &[2, 1, 1]));
    graph.add_output(f32_arg("y", &[2, 1, 1, 1]));
    graph.add_output(f32_arg("y_h", &[1, 1, 1]));
    // Only the candidate gate sees the input; update and reset sit at sigmoid(0).
    graph.add_initializer(TensorProto::from_f32("w", &[1, 3, 1], &[0.0, 0.0, 1.0]));
    graph.add_initializer(TensorProto::from_f32("r", &[1, 3, 1], &[0.0; 3]));
    graph.add_initializer(TensorProto::from_f32(
        "b",
        &[1, 6],
        &[0.0, 0.0, 0.5, 0.0, 0.0, 0.0],
    ));
    graph.add_initializer(TensorProto::from_i32("lens", &[1], &[2]));
    graph.add_node(
        Node::new("GRU", &["x", "w", "r", "b", "lens"], &["y", "y_h"]).attr("hidden_size", 1i64),
    );

    let (_, model) = compile_single(&graph);
    let outputs = run_f32(&model, &[("x", &[2, 1, 1], &[1.0, 2.0])]);

    let h1 = 0.5 * 1.5f32.tanh();
    let h2 = 0.5 * 2.5f32.tanh() + 0.5 * h1;
    assert_close(&output_f32(&outputs, "y"), &[h1, h2]);
    assert_close(&output_f32(&outputs, "y_h"), &[h2]);
}

#[test]
fn conv_transpose_upsamples_with_stride() {
    let mut graph = GraphView::new(13);
    graph.add_input(f32_arg("x", &[1, 1, 2, 2]));
    graph.add_output(f32_arg("y", &[1, 1, 4, 4]));
    graph.add_initializer(TensorProto::from_f32("w", &[1, 1, 2, 2], &[1.0; 4]));
    graph.add_node(
        Node::new("ConvTranspose", &["x", "w"], &["y"]).attr("strides", vec![2i64, 2]),
    );

    let (_, model) = compile_single(&graph);
    let outputs = run_f32(&model, &[("x", &[1, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0])]);
    assert_close(
        &output_f32(&outputs, "y"),
        &[
            1.0, 1.0, 2.0, 2.0, //
            1.0, 1.0, 2.0, 2.0, //
            3.0, 3.0, 4.0, 4.0, //
            3.0, 3.0, 4.0, 4.0,
        ],
    );
}
