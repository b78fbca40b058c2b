use std::collections::HashMap;
use std::sync::Arc;

use webnn_ep::backend::{
    Activation, BackendError, BackendResult, BinaryOp, GruWeightLayout, InterpolationMode,
    OperandDescriptor, OperandType, PoolKind, RecurrentDirection, UnaryOp,
};

use crate::kernels;

/// Handle of one value in a [`CpuGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuOperand(pub(crate) usize);

impl CpuOperand {
    pub fn id(self) -> usize {
        self.0
    }
}

/// Resolved spatial window parameters; padding is `[top, bottom, left, right]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowParams {
    pub padding: [usize; 4],
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
    pub groups: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemmParams {
    pub alpha: f32,
    pub beta: f32,
    pub a_transpose: bool,
    pub b_transpose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GruParams {
    pub steps: usize,
    pub hidden_size: usize,
    pub direction: RecurrentDirection,
    pub layout: GruWeightLayout,
    pub reset_after: bool,
    pub return_sequence: bool,
    pub has_bias: bool,
    pub has_recurrent_bias: bool,
    pub has_initial_hidden_state: bool,
    /// Gate activation, then candidate activation.
    pub activations: [Activation; 2],
}

impl GruParams {
    pub fn num_directions(&self) -> usize {
        match self.direction {
            RecurrentDirection::Both => 2,
            RecurrentDirection::Forward | RecurrentDirection::Backward => 1,
        }
    }
}

/// One recorded backend operation.
#[derive(Debug, Clone, PartialEq)]
pub enum CpuOp {
    Input {
        name: String,
    },
    Constant {
        values: Arc<[f32]>,
    },
    /// Inputs: input, filter, optional bias.
    Conv2d {
        params: WindowParams,
        has_bias: bool,
        activation: Option<Activation>,
    },
    ConvTranspose2d {
        params: WindowParams,
        has_bias: bool,
        activation: Option<Activation>,
    },
    MatMul,
    /// Inputs: a, b, optional c.
    Gemm {
        params: GemmParams,
        has_c: bool,
        activation: Option<Activation>,
    },
    /// Inputs: input, mean, variance, optional scale, optional bias.
    BatchNormalization {
        axis: usize,
        epsilon: f32,
        has_scale: bool,
        has_bias: bool,
        activation: Option<Activation>,
    },
    Concat {
        axis: usize,
    },
    Reshape,
    Resample2d {
        mode: InterpolationMode,
        scales: [f32; 2],
    },
    Transpose {
        perm: Vec<usize>,
    },
    /// Inputs: input, weight, recurrent weight, then the optional operands
    /// flagged in the params. Outputs: hidden state, then the sequence.
    Gru(GruParams),
    Split {
        axis: usize,
        sizes: Vec<usize>,
    },
    Clamp {
        min: f32,
        max: f32,
    },
    LeakyRelu {
        alpha: f32,
    },
    Unary(UnaryOp),
    Binary(BinaryOp),
    Pool2d {
        kind: PoolKind,
        window: [usize; 2],
        params: WindowParams,
    },
    FillSequence {
        start: f32,
        delta: f32,
    },
    Cast {
        to: OperandType,
    },
}

impl CpuOp {
    /// Operator name as the target graph API spells it.
    pub fn kind(&self) -> &'static str {
        match self {
            CpuOp::Input { .. } => "input",
            CpuOp::Constant { .. } => "constant",
            CpuOp::Conv2d { .. } => "conv2d",
            CpuOp::ConvTranspose2d { .. } => "convTranspose2d",
            CpuOp::MatMul => "matmul",
            CpuOp::Gemm { .. } => "gemm",
            CpuOp::BatchNormalization { .. } => "batchNormalization",
            CpuOp::Concat { .. } => "concat",
            CpuOp::Reshape => "reshape",
            CpuOp::Resample2d { .. } => "resample2d",
            CpuOp::Transpose { .. } => "transpose",
            CpuOp::Gru(_) => "gru",
            CpuOp::Split { .. } => "split",
            CpuOp::Clamp { .. } => "clamp",
            CpuOp::LeakyRelu { .. } => "leakyRelu",
            CpuOp::Unary(UnaryOp::Relu) => "relu",
            CpuOp::Unary(UnaryOp::Sigmoid) => "sigmoid",
            CpuOp::Unary(UnaryOp::Tanh) => "tanh",
            CpuOp::Binary(BinaryOp::Add) => "add",
            CpuOp::Binary(BinaryOp::Sub) => "sub",
            CpuOp::Binary(BinaryOp::Mul) => "mul",
            CpuOp::Binary(BinaryOp::Div) => "div",
            CpuOp::Pool2d {
                kind: PoolKind::Average,
                ..
            } => "averagePool2d",
            CpuOp::Pool2d {
                kind: PoolKind::Max,
                ..
            } => "maxPool2d",
            CpuOp::FillSequence { .. } => "fillSequence",
            CpuOp::Cast { .. } => "cast",
        }
    }

    pub fn fused_activation(&self) -> Option<Activation> {
        match self {
            CpuOp::Conv2d { activation, .. }
            | CpuOp::ConvTranspose2d { activation, .. }
            | CpuOp::Gemm { activation, .. }
            | CpuOp::BatchNormalization { activation, .. } => *activation,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpuNode {
    pub op: CpuOp,
    pub inputs: Vec<CpuOperand>,
    pub outputs: Vec<CpuOperand>,
}

/// Sealed backend graph: operations in insertion order plus named boundaries.
#[derive(Debug, Clone)]
pub struct CpuGraph {
    pub(crate) values: Vec<OperandDescriptor>,
    pub(crate) nodes: Vec<CpuNode>,
    pub(crate) inputs: Vec<(String, CpuOperand)>,
    pub(crate) outputs: Vec<(String, CpuOperand)>,
}

impl CpuGraph {
    pub fn nodes(&self) -> &[CpuNode] {
        &self.nodes
    }

    /// Kinds of every computing operation, excluding inputs and constants.
    pub fn operation_kinds(&self) -> Vec<&'static str> {
        self.nodes
            .iter()
            .filter(|node| !matches!(node.op, CpuOp::Input { .. } | CpuOp::Constant { .. }))
            .map(|node| node.op.kind())
            .collect()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.operation_kinds()
            .into_iter()
            .filter(|k| *k == kind)
            .count()
    }

    /// `(producer kind, activation)` for every operation carrying a fused activation.
    pub fn fused_activations(&self) -> Vec<(&'static str, Activation)> {
        self.nodes
            .iter()
            .filter_map(|node| node.op.fused_activation().map(|act| (node.op.kind(), act)))
            .collect()
    }

    pub fn input_descriptor(&self, name: &str) -> Option<&OperandDescriptor> {
        self.inputs
            .iter()
            .find(|(input, _)| input == name)
            .and_then(|(_, operand)| self.values.get(operand.0))
    }

    pub fn output_descriptor(&self, name: &str) -> Option<&OperandDescriptor> {
        self.outputs
            .iter()
            .find(|(output, _)| output == name)
            .and_then(|(_, operand)| self.values.get(operand.0))
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|(name, _)| name.as_str()).collect()
    }

    fn dims(&self, operand: CpuOperand) -> Vec<usize> {
        self.values
            .get(operand.0)
            .map(|desc| desc.dimensions.iter().map(|&d| d as usize).collect())
            .unwrap_or_default()
    }

    /// Interprets the graph in `f32`, keyed by input and output name.
    pub fn evaluate(
        &self,
        feeds: &HashMap<String, Vec<f32>>,
    ) -> BackendResult<HashMap<String, Vec<f32>>> {
        let mut values: Vec<Option<Vec<f32>>> = vec![None; self.values.len()];
        for node in &self.nodes {
            let results = self.evaluate_node(node, &values, feeds)?;
            if results.len() != node.outputs.len() {
                return Err(BackendError::execution(format!(
                    "{} produced {} results for {} outputs",
                    node.op.kind(),
                    results.len(),
                    node.outputs.len()
                )));
            }
            for (operand, data) in node.outputs.iter().zip(results) {
                values[operand.0] = Some(data);
            }
        }

        let mut outputs = HashMap::with_capacity(self.outputs.len());
        for (name, operand) in &self.outputs {
            let data = values
                .get(operand.0)
                .cloned()
                .flatten()
                .ok_or_else(|| BackendError::execution(format!("output '{name}' was not computed")))?;
            outputs.insert(name.clone(), data);
        }
        Ok(outputs)
    }

    fn evaluate_node(
        &self,
        node: &CpuNode,
        values: &[Option<Vec<f32>>],
        feeds: &HashMap<String, Vec<f32>>,
    ) -> BackendResult<Vec<Vec<f32>>> {
        let fetch = |slot: usize| -> BackendResult<&[f32]> {
            node.inputs
                .get(slot)
                .and_then(|operand| values.get(operand.0))
                .and_then(Option::as_deref)
                .ok_or_else(|| {
                    BackendError::execution(format!("{} input {slot} missing", node.op.kind()))
                })
        };
        let dims = |slot: usize| -> Vec<usize> {
            node.inputs
                .get(slot)
                .map(|&operand| self.dims(operand))
                .unwrap_or_default()
        };
        let out_dims = node
            .outputs
            .first()
            .map(|&operand| self.dims(operand))
            .unwrap_or_default();

        let single = match &node.op {
            CpuOp::Input { name } => feeds
                .get(name)
                .cloned()
                .ok_or_else(|| BackendError::execution(format!("input '{name}' not bound")))?,
            CpuOp::Constant { values } => values.to_vec(),
            CpuOp::Conv2d {
                params,
                has_bias,
                activation,
            } => {
                let bias = if *has_bias { Some(fetch(2)?) } else { None };
                let mut out = kernels::conv2d(
                    fetch(0)?,
                    &dims(0),
                    fetch(1)?,
                    &dims(1),
                    bias,
                    params,
                    &out_dims,
                );
                kernels::apply_activation(activation.as_ref(), &mut out);
                out
            }
            CpuOp::ConvTranspose2d {
                params,
                has_bias,
                activation,
            } => {
                let bias = if *has_bias { Some(fetch(2)?) } else { None };
                let mut out = kernels::conv_transpose2d(
                    fetch(0)?,
                    &dims(0),
                    fetch(1)?,
                    &dims(1),
                    bias,
                    params,
                    &out_dims,
                );
                kernels::apply_activation(activation.as_ref(), &mut out);
                out
            }
            CpuOp::MatMul => kernels::matmul(fetch(0)?, &dims(0), fetch(1)?, &dims(1), &out_dims),
            CpuOp::Gemm {
                params,
                has_c,
                activation,
            } => {
                let c_dims = dims(2);
                let c = if *has_c {
                    Some((fetch(2)?, c_dims.as_slice()))
                } else {
                    None
                };
                let mut out = kernels::gemm(fetch(0)?, &dims(0), fetch(1)?, &dims(1), c, params);
                kernels::apply_activation(activation.as_ref(), &mut out);
                out
            }
            CpuOp::BatchNormalization {
                axis,
                epsilon,
                has_scale,
                has_bias,
                activation,
            } => {
                let scale = if *has_scale { Some(fetch(3)?) } else { None };
                let bias_slot = if *has_scale { 4 } else { 3 };
                let bias = if *has_bias { Some(fetch(bias_slot)?) } else { None };
                let mut out = kernels::batch_normalization(
                    fetch(0)?,
                    &dims(0),
                    fetch(1)?,
                    fetch(2)?,
                    scale,
                    bias,
                    *axis,
                    *epsilon,
                );
                kernels::apply_activation(activation.as_ref(), &mut out);
                out
            }
            CpuOp::Concat { axis } => {
                let mut parts = Vec::with_capacity(node.inputs.len());
                let mut part_dims = Vec::with_capacity(node.inputs.len());
                for slot in 0..node.inputs.len() {
                    parts.push(fetch(slot)?);
                    part_dims.push(dims(slot));
                }
                kernels::concat(&parts, &part_dims, *axis)
            }
            CpuOp::Reshape => fetch(0)?.to_vec(),
            CpuOp::Resample2d { mode, scales } => {
                kernels::resample2d(fetch(0)?, &dims(0), *mode, *scales, &out_dims)
            }
            CpuOp::Transpose { perm } => kernels::transpose(fetch(0)?, &dims(0), perm, &out_dims),
            CpuOp::Gru(params) => {
                let mut next = 3;
                let mut optional = |present: bool| -> BackendResult<Option<&[f32]>> {
                    if present {
                        next += 1;
                        fetch(next - 1).map(Some)
                    } else {
                        Ok(None)
                    }
                };
                let bias = optional(params.has_bias)?;
                let recurrent_bias = optional(params.has_recurrent_bias)?;
                let initial = optional(params.has_initial_hidden_state)?;
                let (hidden, sequence) = kernels::gru(
                    fetch(0)?,
                    &dims(0),
                    fetch(1)?,
                    fetch(2)?,
                    bias,
                    recurrent_bias,
                    initial,
                    params,
                );
                let mut results = vec![hidden];
                if params.return_sequence {
                    results.push(sequence);
                }
                return Ok(results);
            }
            CpuOp::Split { axis, sizes } => {
                return Ok(kernels::split(fetch(0)?, &dims(0), *axis, sizes));
            }
            CpuOp::Clamp { min, max } => {
                let mut out = fetch(0)?.to_vec();
                kernels::apply_activation(
                    Some(&Activation::Clamp {
                        min: *min,
                        max: *max,
                    }),
                    &mut out,
                );
                out
            }
            CpuOp::LeakyRelu { alpha } => {
                let mut out = fetch(0)?.to_vec();
                kernels::apply_activation(Some(&Activation::LeakyRelu { alpha: *alpha }), &mut out);
                out
            }
            CpuOp::Unary(op) => {
                let activation = match op {
                    UnaryOp::Relu => Activation::Relu,
                    UnaryOp::Sigmoid => Activation::Sigmoid,
                    UnaryOp::Tanh => Activation::Tanh,
                };
                let mut out = fetch(0)?.to_vec();
                kernels::apply_activation(Some(&activation), &mut out);
                out
            }
            CpuOp::Binary(op) => {
                kernels::binary(*op, fetch(0)?, &dims(0), fetch(1)?, &dims(1), &out_dims)
            }
            CpuOp::Pool2d {
                kind,
                window,
                params,
            } => kernels::pool2d(*kind, fetch(0)?, &dims(0), *window, params, &out_dims),
            CpuOp::FillSequence { start, delta } => {
                let count = out_dims.iter().product();
                kernels::fill_sequence(count, *start, *delta)
            }
            CpuOp::Cast { to } => kernels::cast(fetch(0)?, *to),
        };
        Ok(vec![single])
    }
}
