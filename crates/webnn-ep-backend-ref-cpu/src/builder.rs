use std::collections::HashSet;
use std::sync::Arc;

use webnn_ep::backend::{
    Activation, ArrayBufferView, AutoPad, BackendError, BackendResult,
    BatchNormalizationOptions, BinaryOp, ClampOptions, Conv2dOptions, ConvTranspose2dOptions,
    FilterOperandLayout, GemmOptions, GruOptions, InputOperandLayout, MlGraphBuilder,
    OperandDescriptor, OperandType, Pool2dOptions, PoolKind, Resample2dOptions, SplitSpec,
    UnaryOp,
};

use crate::cpu::decode;
use crate::graph::{CpuGraph, CpuNode, CpuOp, CpuOperand, GemmParams, GruParams, WindowParams};
use crate::kernels::broadcast_shapes;

fn invalid(message: impl Into<String>) -> BackendError {
    BackendError::invalid_argument(message)
}

/// Head and tail padding for SAME_* auto-padding along one axis.
fn same_padding(size: usize, kernel: usize, stride: usize, dilation: usize, upper: bool) -> (usize, usize) {
    let dilated = (kernel - 1) * dilation + 1;
    let target = size.div_ceil(stride);
    let needed = (target.saturating_sub(1) * stride + dilated).saturating_sub(size);
    let head = if upper { needed / 2 } else { needed.div_ceil(2) };
    (head, needed - head)
}

fn resolve_padding(
    auto_pad: AutoPad,
    explicit: [u32; 4],
    spatial: [usize; 2],
    window: [usize; 2],
    strides: [usize; 2],
    dilations: [usize; 2],
) -> [usize; 4] {
    let upper = match auto_pad {
        AutoPad::Explicit => return explicit.map(|p| p as usize),
        AutoPad::SameUpper => true,
        AutoPad::SameLower => false,
    };
    let (top, bottom) = same_padding(spatial[0], window[0], strides[0], dilations[0], upper);
    let (left, right) = same_padding(spatial[1], window[1], strides[1], dilations[1], upper);
    [top, bottom, left, right]
}

/// Output extent of a sliding window, or `None` when the window does not fit.
fn window_output(size: usize, pad: (usize, usize), kernel: usize, stride: usize, dilation: usize) -> Option<usize> {
    let dilated = (kernel - 1) * dilation + 1;
    let padded = size + pad.0 + pad.1;
    (padded >= dilated).then(|| (padded - dilated) / stride + 1)
}

fn pair(values: [u32; 2], what: &str) -> BackendResult<[usize; 2]> {
    if values.contains(&0) {
        return Err(invalid(format!("{what} must be positive, got {values:?}")));
    }
    Ok(values.map(|v| v as usize))
}

/// Records operations and infers every operand's descriptor as it goes.
#[derive(Debug)]
pub struct CpuGraphBuilder {
    values: Vec<OperandDescriptor>,
    nodes: Vec<CpuNode>,
    inputs: Vec<(String, CpuOperand)>,
    fail_build: bool,
}

impl CpuGraphBuilder {
    pub(crate) fn new(fail_build: bool) -> Self {
        Self {
            values: Vec::new(),
            nodes: Vec::new(),
            inputs: Vec::new(),
            fail_build,
        }
    }

    pub fn descriptor(&self, operand: &CpuOperand) -> BackendResult<&OperandDescriptor> {
        self.values
            .get(operand.0)
            .ok_or_else(|| invalid(format!("unknown operand {}", operand.0)))
    }

    fn dims(&self, operand: &CpuOperand) -> BackendResult<Vec<usize>> {
        Ok(self
            .descriptor(operand)?
            .dimensions
            .iter()
            .map(|&d| d as usize)
            .collect())
    }

    fn operand_type(&self, operand: &CpuOperand) -> BackendResult<OperandType> {
        Ok(self.descriptor(operand)?.operand_type)
    }

    fn push(&mut self, op: CpuOp, inputs: Vec<CpuOperand>, outputs: Vec<OperandDescriptor>) -> Vec<CpuOperand> {
        let mut ids = Vec::with_capacity(outputs.len());
        for desc in outputs {
            ids.push(CpuOperand(self.values.len()));
            self.values.push(desc);
        }
        log::trace!("ref-cpu: {} -> {:?}", op.kind(), ids);
        self.nodes.push(CpuNode {
            op,
            inputs,
            outputs: ids.clone(),
        });
        ids
    }

    fn push_one(
        &mut self,
        op: CpuOp,
        inputs: Vec<CpuOperand>,
        operand_type: OperandType,
        dims: &[usize],
    ) -> CpuOperand {
        let desc = OperandDescriptor::new(operand_type, dims.iter().map(|&d| d as u32).collect());
        let ids = self.push(op, inputs, vec![desc]);
        ids[0]
    }

    fn expect_rank(&self, operand: &CpuOperand, rank: usize, what: &str) -> BackendResult<Vec<usize>> {
        let dims = self.dims(operand)?;
        if dims.len() != rank {
            return Err(invalid(format!("{what} must be {rank}-D, got {dims:?}")));
        }
        Ok(dims)
    }

    fn expect_dims(&self, operand: &CpuOperand, expected: &[usize], what: &str) -> BackendResult<()> {
        let dims = self.dims(operand)?;
        if dims != expected {
            return Err(invalid(format!("{what} must have shape {expected:?}, got {dims:?}")));
        }
        Ok(())
    }
}

impl MlGraphBuilder for CpuGraphBuilder {
    type Operand = CpuOperand;
    type Operator = Activation;
    type Graph = CpuGraph;

    fn input(&mut self, name: &str, desc: &OperandDescriptor) -> BackendResult<CpuOperand> {
        if self.inputs.iter().any(|(existing, _)| existing == name) {
            return Err(invalid(format!("input '{name}' declared twice")));
        }
        let ids = self.push(
            CpuOp::Input {
                name: name.to_string(),
            },
            Vec::new(),
            vec![desc.clone()],
        );
        self.inputs.push((name.to_string(), ids[0]));
        Ok(ids[0])
    }

    fn constant(
        &mut self,
        desc: &OperandDescriptor,
        data: ArrayBufferView<'_>,
    ) -> BackendResult<CpuOperand> {
        if data.operand_type != desc.operand_type || data.byte_length() != desc.byte_length() {
            return Err(invalid(format!(
                "constant buffer of {} {} bytes does not match {:?}",
                data.operand_type,
                data.byte_length(),
                desc
            )));
        }
        let values: Arc<[f32]> = Arc::from(decode(desc.operand_type, data.bytes));
        let ids = self.push(CpuOp::Constant { values }, Vec::new(), vec![desc.clone()]);
        Ok(ids[0])
    }

    fn activation_operator(&mut self, activation: &Activation) -> BackendResult<Activation> {
        if let Activation::Clamp { min, max } = activation {
            if min > max {
                return Err(invalid(format!("clamp min {min} exceeds max {max}")));
            }
        }
        Ok(*activation)
    }

    fn conv2d(
        &mut self,
        input: &CpuOperand,
        filter: &CpuOperand,
        options: Conv2dOptions<CpuOperand, Activation>,
    ) -> BackendResult<CpuOperand> {
        if options.input_layout != InputOperandLayout::Nchw
            || options.filter_layout != FilterOperandLayout::Oihw
        {
            return Err(BackendError::unimplemented(
                "conv2d",
                "only nchw input with oihw filter is supported",
            ));
        }
        let in_dims = self.expect_rank(input, 4, "conv2d input")?;
        let f_dims = self.expect_rank(filter, 4, "conv2d filter")?;
        let groups = options.groups.max(1) as usize;
        if in_dims[1] != f_dims[1] * groups || f_dims[0] % groups != 0 {
            return Err(invalid(format!(
                "conv2d channels do not match: input {in_dims:?}, filter {f_dims:?}, groups {groups}"
            )));
        }
        let strides = pair(options.strides, "strides")?;
        let dilations = pair(options.dilations, "dilations")?;
        let window = [f_dims[2], f_dims[3]];
        let padding = resolve_padding(
            options.auto_pad,
            options.padding,
            [in_dims[2], in_dims[3]],
            window,
            strides,
            dilations,
        );
        let (Some(oh), Some(ow)) = (
            window_output(in_dims[2], (padding[0], padding[1]), window[0], strides[0], dilations[0]),
            window_output(in_dims[3], (padding[2], padding[3]), window[1], strides[1], dilations[1]),
        ) else {
            return Err(invalid("conv2d window is larger than the padded input"));
        };

        let mut inputs = vec![*input, *filter];
        if let Some(bias) = &options.bias {
            self.expect_dims(bias, &[f_dims[0]], "conv2d bias")?;
            inputs.push(*bias);
        }
        let operand_type = self.operand_type(input)?;
        let op = CpuOp::Conv2d {
            params: WindowParams {
                padding,
                strides,
                dilations,
                groups,
            },
            has_bias: options.bias.is_some(),
            activation: options.activation,
        };
        Ok(self.push_one(op, inputs, operand_type, &[in_dims[0], f_dims[0], oh, ow]))
    }

    fn conv_transpose2d(
        &mut self,
        input: &CpuOperand,
        filter: &CpuOperand,
        options: ConvTranspose2dOptions<CpuOperand, Activation>,
    ) -> BackendResult<CpuOperand> {
        if options.input_layout != InputOperandLayout::Nchw
            || options.filter_layout != FilterOperandLayout::Iohw
        {
            return Err(BackendError::unimplemented(
                "convTranspose2d",
                "only nchw input with iohw filter is supported",
            ));
        }
        let in_dims = self.expect_rank(input, 4, "convTranspose2d input")?;
        let f_dims = self.expect_rank(filter, 4, "convTranspose2d filter")?;
        let groups = options.groups.max(1) as usize;
        if in_dims[1] != f_dims[0] || in_dims[1] % groups != 0 {
            return Err(invalid(format!(
                "convTranspose2d channels do not match: input {in_dims:?}, filter {f_dims:?}"
            )));
        }
        let strides = pair(options.strides, "strides")?;
        let dilations = pair(options.dilations, "dilations")?;
        let padding = options.padding.map(|p| p as usize);
        let out_size = |axis: usize| -> BackendResult<usize> {
            if let Some(sizes) = options.output_sizes {
                return Ok(sizes[axis] as usize);
            }
            let dilated = (f_dims[2 + axis] - 1) * dilations[axis] + 1;
            let full = (in_dims[2 + axis] - 1) * strides[axis]
                + dilated
                + options.output_padding[axis] as usize;
            full.checked_sub(padding[axis * 2] + padding[axis * 2 + 1])
                .filter(|&size| size > 0)
                .ok_or_else(|| invalid("convTranspose2d padding exceeds the output"))
        };
        let (oh, ow) = (out_size(0)?, out_size(1)?);
        let out_channels = f_dims[1] * groups;

        let mut inputs = vec![*input, *filter];
        if let Some(bias) = &options.bias {
            self.expect_dims(bias, &[out_channels], "convTranspose2d bias")?;
            inputs.push(*bias);
        }
        let operand_type = self.operand_type(input)?;
        let op = CpuOp::ConvTranspose2d {
            params: WindowParams {
                padding,
                strides,
                dilations,
                groups,
            },
            has_bias: options.bias.is_some(),
            activation: options.activation,
        };
        Ok(self.push_one(op, inputs, operand_type, &[in_dims[0], out_channels, oh, ow]))
    }

    fn matmul(&mut self, a: &CpuOperand, b: &CpuOperand) -> BackendResult<CpuOperand> {
        let a_dims = self.dims(a)?;
        let b_dims = self.dims(b)?;
        if a_dims.len() < 2 || b_dims.len() < 2 {
            return Err(invalid("matmul operands must be at least 2-D"));
        }
        let (m, k) = (a_dims[a_dims.len() - 2], a_dims[a_dims.len() - 1]);
        let (k2, n) = (b_dims[b_dims.len() - 2], b_dims[b_dims.len() - 1]);
        if k != k2 {
            return Err(invalid(format!("matmul inner dimensions differ: {a_dims:?} x {b_dims:?}")));
        }
        let mut out = broadcast_shapes(&a_dims[..a_dims.len() - 2], &b_dims[..b_dims.len() - 2])
            .ok_or_else(|| invalid(format!("matmul batch dims do not broadcast: {a_dims:?} x {b_dims:?}")))?;
        out.extend([m, n]);
        let operand_type = self.operand_type(a)?;
        Ok(self.push_one(CpuOp::MatMul, vec![*a, *b], operand_type, &out))
    }

    fn gemm(
        &mut self,
        a: &CpuOperand,
        b: &CpuOperand,
        options: GemmOptions<CpuOperand, Activation>,
    ) -> BackendResult<CpuOperand> {
        let a_dims = self.expect_rank(a, 2, "gemm a")?;
        let b_dims = self.expect_rank(b, 2, "gemm b")?;
        let (m, k) = if options.a_transpose {
            (a_dims[1], a_dims[0])
        } else {
            (a_dims[0], a_dims[1])
        };
        let (k2, n) = if options.b_transpose {
            (b_dims[1], b_dims[0])
        } else {
            (b_dims[0], b_dims[1])
        };
        if k != k2 {
            return Err(invalid(format!("gemm inner dimensions differ: {a_dims:?} x {b_dims:?}")));
        }
        let mut inputs = vec![*a, *b];
        if let Some(c) = &options.c {
            let c_dims = self.dims(c)?;
            if c_dims.len() > 2 || broadcast_shapes(&c_dims, &[m, n]).as_deref() != Some(&[m, n][..]) {
                return Err(invalid(format!("gemm c {c_dims:?} does not broadcast to [{m}, {n}]")));
            }
            inputs.push(*c);
        }
        let operand_type = self.operand_type(a)?;
        let op = CpuOp::Gemm {
            params: GemmParams {
                alpha: options.alpha,
                beta: options.beta,
                a_transpose: options.a_transpose,
                b_transpose: options.b_transpose,
            },
            has_c: options.c.is_some(),
            activation: options.activation,
        };
        Ok(self.push_one(op, inputs, operand_type, &[m, n]))
    }

    fn batch_normalization(
        &mut self,
        input: &CpuOperand,
        mean: &CpuOperand,
        variance: &CpuOperand,
        options: BatchNormalizationOptions<CpuOperand, Activation>,
    ) -> BackendResult<CpuOperand> {
        let dims = self.dims(input)?;
        let axis = options.axis as usize;
        if axis >= dims.len() {
            return Err(invalid(format!("batchNormalization axis {axis} out of range for {dims:?}")));
        }
        let channels = [dims[axis]];
        self.expect_dims(mean, &channels, "batchNormalization mean")?;
        self.expect_dims(variance, &channels, "batchNormalization variance")?;
        let mut inputs = vec![*input, *mean, *variance];
        for (operand, what) in [(&options.scale, "scale"), (&options.bias, "bias")] {
            if let Some(operand) = operand {
                self.expect_dims(operand, &channels, what)?;
                inputs.push(*operand);
            }
        }
        let operand_type = self.operand_type(input)?;
        let op = CpuOp::BatchNormalization {
            axis,
            epsilon: options.epsilon,
            has_scale: options.scale.is_some(),
            has_bias: options.bias.is_some(),
            activation: options.activation,
        };
        Ok(self.push_one(op, inputs, operand_type, &dims))
    }

    fn concat(&mut self, inputs: &[CpuOperand], axis: u32) -> BackendResult<CpuOperand> {
        let Some(first) = inputs.first() else {
            return Err(invalid("concat needs at least one input"));
        };
        let mut out = self.dims(first)?;
        let axis = axis as usize;
        if axis >= out.len() {
            return Err(invalid(format!("concat axis {axis} out of range for {out:?}")));
        }
        for operand in &inputs[1..] {
            let dims = self.dims(operand)?;
            let compatible = dims.len() == out.len()
                && dims
                    .iter()
                    .zip(&out)
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !compatible {
                return Err(invalid(format!("concat input {dims:?} does not match {out:?}")));
            }
            out[axis] += dims[axis];
        }
        let operand_type = self.operand_type(first)?;
        Ok(self.push_one(CpuOp::Concat { axis }, inputs.to_vec(), operand_type, &out))
    }

    fn reshape(&mut self, input: &CpuOperand, new_shape: &[u32]) -> BackendResult<CpuOperand> {
        let desc = self.descriptor(input)?;
        let target: usize = new_shape.iter().map(|&d| d as usize).product();
        if target != desc.element_count() {
            return Err(invalid(format!(
                "cannot reshape {:?} into {new_shape:?}",
                desc.dimensions
            )));
        }
        let operand_type = desc.operand_type;
        let dims: Vec<usize> = new_shape.iter().map(|&d| d as usize).collect();
        Ok(self.push_one(CpuOp::Reshape, vec![*input], operand_type, &dims))
    }

    fn resample2d(
        &mut self,
        input: &CpuOperand,
        options: Resample2dOptions,
    ) -> BackendResult<CpuOperand> {
        let dims = self.expect_rank(input, 4, "resample2d input")?;
        if options.axes != [2, 3] {
            return Err(BackendError::unimplemented(
                "resample2d",
                "only axes [2, 3] are supported",
            ));
        }
        let (h, w) = (dims[2], dims[3]);
        let (sizes, scales) = match (options.sizes, options.scales) {
            (Some([oh, ow]), _) => {
                let (oh, ow) = (oh as usize, ow as usize);
                ([oh, ow], [oh as f32 / h as f32, ow as f32 / w as f32])
            }
            (None, Some([sh, sw])) => {
                if sh <= 0.0 || sw <= 0.0 {
                    return Err(invalid("resample2d scales must be positive"));
                }
                let sizes = [(h as f32 * sh).floor() as usize, (w as f32 * sw).floor() as usize];
                (sizes, [sh, sw])
            }
            (None, None) => return Err(invalid("resample2d needs sizes or scales")),
        };
        if sizes.contains(&0) {
            return Err(invalid("resample2d output is empty"));
        }
        let operand_type = self.operand_type(input)?;
        let op = CpuOp::Resample2d {
            mode: options.mode,
            scales,
        };
        Ok(self.push_one(op, vec![*input], operand_type, &[dims[0], dims[1], sizes[0], sizes[1]]))
    }

    fn transpose(&mut self, input: &CpuOperand, permutation: &[u32]) -> BackendResult<CpuOperand> {
        let dims = self.dims(input)?;
        let perm: Vec<usize> = permutation.iter().map(|&p| p as usize).collect();
        let unique: HashSet<usize> = perm.iter().copied().collect();
        if perm.len() != dims.len() || unique.len() != dims.len() || perm.iter().any(|&p| p >= dims.len()) {
            return Err(invalid(format!("{permutation:?} is not a permutation of rank {}", dims.len())));
        }
        let out: Vec<usize> = perm.iter().map(|&p| dims[p]).collect();
        let operand_type = self.operand_type(input)?;
        Ok(self.push_one(CpuOp::Transpose { perm }, vec![*input], operand_type, &out))
    }

    fn gru(
        &mut self,
        input: &CpuOperand,
        weight: &CpuOperand,
        recurrent_weight: &CpuOperand,
        steps: u32,
        hidden_size: u32,
        options: GruOptions<CpuOperand, Activation>,
    ) -> BackendResult<Vec<CpuOperand>> {
        let in_dims = self.expect_rank(input, 3, "gru input")?;
        let (steps, hidden) = (steps as usize, hidden_size as usize);
        if steps != in_dims[0] {
            return Err(invalid(format!("gru steps {steps} do not match input {in_dims:?}")));
        }
        let activations = match options.activations.as_slice() {
            [] => [Activation::Sigmoid, Activation::Tanh],
            [gate, candidate] => [*gate, *candidate],
            other => {
                return Err(invalid(format!("gru expects 2 activations, got {}", other.len())))
            }
        };
        let params = GruParams {
            steps,
            hidden_size: hidden,
            direction: options.direction,
            layout: options.layout,
            reset_after: options.reset_after,
            return_sequence: options.return_sequence,
            has_bias: options.bias.is_some(),
            has_recurrent_bias: options.recurrent_bias.is_some(),
            has_initial_hidden_state: options.initial_hidden_state.is_some(),
            activations,
        };
        let dirs = params.num_directions();
        let batch = in_dims[1];
        self.expect_dims(weight, &[dirs, 3 * hidden, in_dims[2]], "gru weight")?;
        self.expect_dims(recurrent_weight, &[dirs, 3 * hidden, hidden], "gru recurrent weight")?;

        let mut inputs = vec![*input, *weight, *recurrent_weight];
        for (operand, expected, what) in [
            (&options.bias, vec![dirs, 3 * hidden], "gru bias"),
            (&options.recurrent_bias, vec![dirs, 3 * hidden], "gru recurrent bias"),
            (&options.initial_hidden_state, vec![dirs, batch, hidden], "gru initial hidden state"),
        ] {
            if let Some(operand) = operand {
                self.expect_dims(operand, &expected, what)?;
                inputs.push(*operand);
            }
        }

        let operand_type = self.operand_type(input)?;
        let hidden_desc = OperandDescriptor::new(
            operand_type,
            [dirs, batch, hidden].iter().map(|&d| d as u32).collect(),
        );
        let mut outputs = vec![hidden_desc];
        if params.return_sequence {
            outputs.push(OperandDescriptor::new(
                operand_type,
                [steps, dirs, batch, hidden].iter().map(|&d| d as u32).collect(),
            ));
        }
        Ok(self.push(CpuOp::Gru(params), inputs, outputs))
    }

    fn split(
        &mut self,
        input: &CpuOperand,
        splits: &SplitSpec,
        axis: u32,
    ) -> BackendResult<Vec<CpuOperand>> {
        let dims = self.dims(input)?;
        let axis = axis as usize;
        let Some(&axis_len) = dims.get(axis) else {
            return Err(invalid(format!("split axis {axis} out of range for {dims:?}")));
        };
        let sizes: Vec<usize> = match splits {
            SplitSpec::Count(0) => return Err(invalid("split count must be positive")),
            SplitSpec::Count(count) => {
                let count = *count as usize;
                if axis_len % count != 0 {
                    return Err(invalid(format!("{axis_len} is not divisible into {count} pieces")));
                }
                vec![axis_len / count; count]
            }
            SplitSpec::Sizes(sizes) => sizes.iter().map(|&s| s as usize).collect(),
        };
        if sizes.iter().sum::<usize>() != axis_len || sizes.contains(&0) {
            return Err(invalid(format!("split sizes {sizes:?} do not cover {axis_len}")));
        }
        let operand_type = self.operand_type(input)?;
        let outputs = sizes
            .iter()
            .map(|&size| {
                let mut piece = dims.clone();
                piece[axis] = size;
                OperandDescriptor::new(operand_type, piece.iter().map(|&d| d as u32).collect())
            })
            .collect();
        Ok(self.push(CpuOp::Split { axis, sizes }, vec![*input], outputs))
    }

    fn clamp(&mut self, input: &CpuOperand, options: ClampOptions) -> BackendResult<CpuOperand> {
        if options.min_value > options.max_value {
            return Err(invalid("clamp min exceeds max"));
        }
        let desc = self.descriptor(input)?.clone();
        let op = CpuOp::Clamp {
            min: options.min_value,
            max: options.max_value,
        };
        let ids = self.push(op, vec![*input], vec![desc]);
        Ok(ids[0])
    }

    fn leaky_relu(&mut self, input: &CpuOperand, alpha: f32) -> BackendResult<CpuOperand> {
        let desc = self.descriptor(input)?.clone();
        let ids = self.push(CpuOp::LeakyRelu { alpha }, vec![*input], vec![desc]);
        Ok(ids[0])
    }

    fn unary(&mut self, op: UnaryOp, input: &CpuOperand) -> BackendResult<CpuOperand> {
        let desc = self.descriptor(input)?.clone();
        let ids = self.push(CpuOp::Unary(op), vec![*input], vec![desc]);
        Ok(ids[0])
    }

    fn binary(&mut self, op: BinaryOp, a: &CpuOperand, b: &CpuOperand) -> BackendResult<CpuOperand> {
        let a_type = self.operand_type(a)?;
        if a_type != self.operand_type(b)? {
            return Err(invalid("binary operands must share one type"));
        }
        let a_dims = self.dims(a)?;
        let b_dims = self.dims(b)?;
        let out = broadcast_shapes(&a_dims, &b_dims)
            .ok_or_else(|| invalid(format!("{a_dims:?} and {b_dims:?} do not broadcast")))?;
        Ok(self.push_one(CpuOp::Binary(op), vec![*a, *b], a_type, &out))
    }

    fn pool2d(
        &mut self,
        kind: PoolKind,
        input: &CpuOperand,
        options: Pool2dOptions,
    ) -> BackendResult<CpuOperand> {
        if options.layout != InputOperandLayout::Nchw {
            return Err(BackendError::unimplemented("pool2d", "only nchw input is supported"));
        }
        let dims = self.expect_rank(input, 4, "pool2d input")?;
        let strides = pair(options.strides, "strides")?;
        let dilations = pair(options.dilations, "dilations")?;
        let window = match options.window_dimensions {
            Some(window) => pair(window, "window dimensions")?,
            None => [dims[2], dims[3]],
        };
        let padding = match options.window_dimensions {
            Some(_) => resolve_padding(
                options.auto_pad,
                options.padding,
                [dims[2], dims[3]],
                window,
                strides,
                dilations,
            ),
            None => [0; 4],
        };
        let (Some(oh), Some(ow)) = (
            window_output(dims[2], (padding[0], padding[1]), window[0], strides[0], dilations[0]),
            window_output(dims[3], (padding[2], padding[3]), window[1], strides[1], dilations[1]),
        ) else {
            return Err(invalid("pool2d window is larger than the padded input"));
        };
        let operand_type = self.operand_type(input)?;
        let op = CpuOp::Pool2d {
            kind,
            window,
            params: WindowParams {
                padding,
                strides,
                dilations,
                groups: 1,
            },
        };
        Ok(self.push_one(op, vec![*input], operand_type, &[dims[0], dims[1], oh, ow]))
    }

    fn fill_sequence(
        &mut self,
        operand_type: OperandType,
        shape: &[u32],
        start: f32,
        delta: f32,
    ) -> BackendResult<CpuOperand> {
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        Ok(self.push_one(CpuOp::FillSequence { start, delta }, Vec::new(), operand_type, &dims))
    }

    fn cast(&mut self, input: &CpuOperand, to: OperandType) -> BackendResult<CpuOperand> {
        let dims = self.dims(input)?;
        Ok(self.push_one(CpuOp::Cast { to }, vec![*input], to, &dims))
    }

    fn build(self, outputs: &[(String, CpuOperand)]) -> BackendResult<CpuGraph> {
        if self.fail_build {
            return Err(BackendError::execution("injected graph build failure"));
        }
        if outputs.is_empty() {
            return Err(invalid("graph has no outputs"));
        }
        let mut seen = HashSet::new();
        for (name, operand) in outputs {
            if !seen.insert(name.as_str()) {
                return Err(invalid(format!("output '{name}' named twice")));
            }
            self.descriptor(operand)?;
        }
        log::debug!(
            "ref-cpu: built graph with {} operations, {} inputs, {} outputs",
            self.nodes.len(),
            self.inputs.len(),
            outputs.len()
        );
        Ok(CpuGraph {
            values: self.values,
            nodes: self.nodes,
            inputs: self.inputs,
            outputs: outputs.to_vec(),
        })
    }
}
