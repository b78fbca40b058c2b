//! Naive `f32` kernels. Shapes are validated by the graph builder, so the
//! kernels index without further checks.

use half::f16;
use webnn_ep::backend::{
    Activation, BinaryOp, GruWeightLayout, InterpolationMode, OperandType, PoolKind,
    RecurrentDirection,
};

use crate::graph::{GemmParams, GruParams, WindowParams};

pub(crate) fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

pub(crate) fn unravel_index(mut index: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for (i, dim) in dims.iter().enumerate().rev() {
        coords[i] = index % *dim;
        index /= *dim;
    }
    coords
}

/// Numpy-style broadcast of two shapes, aligned from the right.
pub(crate) fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

/// Flat index into `in_dims` for a coordinate of the broadcast output.
fn broadcast_offset(out_coord: &[usize], in_dims: &[usize]) -> usize {
    let skip = out_coord.len() - in_dims.len();
    let mut index = 0;
    for (axis, &dim) in in_dims.iter().enumerate() {
        let coord = if dim == 1 { 0 } else { out_coord[skip + axis] };
        index = index * dim + coord;
    }
    index
}

fn activate(activation: &Activation, x: f32) -> f32 {
    match *activation {
        Activation::Relu => x.max(0.0),
        Activation::LeakyRelu { alpha } => {
            if x < 0.0 {
                alpha * x
            } else {
                x
            }
        }
        Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        Activation::Tanh => x.tanh(),
        Activation::Clamp { min, max } => x.max(min).min(max),
    }
}

pub(crate) fn apply_activation(activation: Option<&Activation>, values: &mut [f32]) {
    if let Some(activation) = activation {
        for value in values.iter_mut() {
            *value = activate(activation, *value);
        }
    }
}

/// Offset of a window tap along one axis, or `None` when it lands in padding.
fn tap(out: usize, k: usize, stride: usize, dilation: usize, pad: usize, size: usize) -> Option<usize> {
    let pos = (out * stride + k * dilation).checked_sub(pad)?;
    (pos < size).then_some(pos)
}

/// NCHW input, OIHW filter.
pub(crate) fn conv2d(
    input: &[f32],
    in_dims: &[usize],
    filter: &[f32],
    filter_dims: &[usize],
    bias: Option<&[f32]>,
    params: &WindowParams,
    out_dims: &[usize],
) -> Vec<f32> {
    let (batch, channels, h, w) = (in_dims[0], in_dims[1], in_dims[2], in_dims[3]);
    let (out_channels, group_in, kh, kw) =
        (filter_dims[0], filter_dims[1], filter_dims[2], filter_dims[3]);
    let (oh, ow) = (out_dims[2], out_dims[3]);
    let group_out = out_channels / params.groups;
    let [top, _, left, _] = params.padding;

    let mut out = vec![0.0f32; batch * out_channels * oh * ow];
    for b in 0..batch {
        for o in 0..out_channels {
            let group = o / group_out;
            for y in 0..oh {
                for x in 0..ow {
                    let mut acc = bias.map_or(0.0, |bias| bias[o]);
                    for ic in 0..group_in {
                        let c = group * group_in + ic;
                        for ky in 0..kh {
                            let Some(iy) =
                                tap(y, ky, params.strides[0], params.dilations[0], top, h)
                            else {
                                continue;
                            };
                            for kx in 0..kw {
                                let Some(ix) =
                                    tap(x, kx, params.strides[1], params.dilations[1], left, w)
                                else {
                                    continue;
                                };
                                acc += input[((b * channels + c) * h + iy) * w + ix]
                                    * filter[((o * group_in + ic) * kh + ky) * kw + kx];
                            }
                        }
                    }
                    out[((b * out_channels + o) * oh + y) * ow + x] = acc;
                }
            }
        }
    }
    out
}

/// NCHW input, IOHW filter; scatters every input pixel through the kernel.
pub(crate) fn conv_transpose2d(
    input: &[f32],
    in_dims: &[usize],
    filter: &[f32],
    filter_dims: &[usize],
    bias: Option<&[f32]>,
    params: &WindowParams,
    out_dims: &[usize],
) -> Vec<f32> {
    let (batch, channels, h, w) = (in_dims[0], in_dims[1], in_dims[2], in_dims[3]);
    let (group_out, kh, kw) = (filter_dims[1], filter_dims[2], filter_dims[3]);
    let (out_channels, oh, ow) = (out_dims[1], out_dims[2], out_dims[3]);
    let group_in = channels / params.groups;
    let [top, _, left, _] = params.padding;

    let mut out = vec![0.0f32; batch * out_channels * oh * ow];
    if let Some(bias) = bias {
        for (i, value) in out.iter_mut().enumerate() {
            *value = bias[(i / (oh * ow)) % out_channels];
        }
    }
    for b in 0..batch {
        for c in 0..channels {
            let group = c / group_in;
            for iy in 0..h {
                for ix in 0..w {
                    let value = input[((b * channels + c) * h + iy) * w + ix];
                    for og in 0..group_out {
                        let o = group * group_out + og;
                        for ky in 0..kh {
                            let Some(oy) = tap(iy, ky, params.strides[0], params.dilations[0], top, oh)
                            else {
                                continue;
                            };
                            for kx in 0..kw {
                                let Some(ox) =
                                    tap(ix, kx, params.strides[1], params.dilations[1], left, ow)
                                else {
                                    continue;
                                };
                                out[((b * out_channels + o) * oh + oy) * ow + ox] +=
                                    value * filter[((c * group_out + og) * kh + ky) * kw + kx];
                            }
                        }
                    }
                }
            }
        }
    }
    out
}

/// Batched matrix product; leading dimensions broadcast.
pub(crate) fn matmul(
    a: &[f32],
    a_dims: &[usize],
    b: &[f32],
    b_dims: &[usize],
    out_dims: &[usize],
) -> Vec<f32> {
    let (m, k) = (a_dims[a_dims.len() - 2], a_dims[a_dims.len() - 1]);
    let n = b_dims[b_dims.len() - 1];
    let batch_dims = &out_dims[..out_dims.len() - 2];
    let batch: usize = batch_dims.iter().product();

    let mut out = vec![0.0f32; batch * m * n];
    for bi in 0..batch {
        let coord = unravel_index(bi, batch_dims);
        let a_off = broadcast_offset(&coord, &a_dims[..a_dims.len() - 2]) * m * k;
        let b_off = broadcast_offset(&coord, &b_dims[..b_dims.len() - 2]) * k * n;
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0f32;
                for p in 0..k {
                    acc += a[a_off + i * k + p] * b[b_off + p * n + j];
                }
                out[(bi * m + i) * n + j] = acc;
            }
        }
    }
    out
}

/// `alpha * op(A) * op(B) + beta * C` with `C` broadcast to `[m, n]`.
pub(crate) fn gemm(
    a: &[f32],
    a_dims: &[usize],
    b: &[f32],
    b_dims: &[usize],
    c: Option<(&[f32], &[usize])>,
    params: &GemmParams,
) -> Vec<f32> {
    let (m, k) = if params.a_transpose {
        (a_dims[1], a_dims[0])
    } else {
        (a_dims[0], a_dims[1])
    };
    let n = if params.b_transpose {
        b_dims[0]
    } else {
        b_dims[1]
    };

    let mut out = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0f32;
            for p in 0..k {
                let av = if params.a_transpose {
                    a[p * m + i]
                } else {
                    a[i * k + p]
                };
                let bv = if params.b_transpose {
                    b[j * k + p]
                } else {
                    b[p * n + j]
                };
                acc += av * bv;
            }
            let mut value = params.alpha * acc;
            if let Some((c, c_dims)) = c {
                value += params.beta * c[broadcast_offset(&[i, j], c_dims)];
            }
            out[i * n + j] = value;
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn batch_normalization(
    input: &[f32],
    dims: &[usize],
    mean: &[f32],
    variance: &[f32],
    scale: Option<&[f32]>,
    bias: Option<&[f32]>,
    axis: usize,
    epsilon: f32,
) -> Vec<f32> {
    let inner: usize = dims[axis + 1..].iter().product();
    let channels = dims[axis];
    input
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let c = (i / inner) % channels;
            let normalized = (x - mean[c]) / (variance[c] + epsilon).sqrt();
            normalized * scale.map_or(1.0, |s| s[c]) + bias.map_or(0.0, |b| b[c])
        })
        .collect()
}

pub(crate) fn concat(parts: &[&[f32]], part_dims: &[Vec<usize>], axis: usize) -> Vec<f32> {
    let Some(first) = part_dims.first() else {
        return Vec::new();
    };
    let outer: usize = first[..axis].iter().product();
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for o in 0..outer {
        for (part, dims) in parts.iter().zip(part_dims) {
            let chunk: usize = dims[axis..].iter().product();
            out.extend_from_slice(&part[o * chunk..(o + 1) * chunk]);
        }
    }
    out
}

pub(crate) fn transpose(
    input: &[f32],
    in_dims: &[usize],
    perm: &[usize],
    out_dims: &[usize],
) -> Vec<f32> {
    let input_strides = compute_strides(in_dims);
    let mut result = vec![0.0f32; out_dims.iter().product()];
    for (idx, slot) in result.iter_mut().enumerate() {
        let out_coord = unravel_index(idx, out_dims);
        let mut in_index = 0usize;
        for (out_axis, &out_c) in out_coord.iter().enumerate() {
            in_index += out_c * input_strides[perm[out_axis]];
        }
        *slot = input[in_index];
    }
    result
}

/// Source coordinate under half-pixel mapping.
fn source_coord(out: usize, scale: f32) -> f32 {
    (out as f32 + 0.5) / scale - 0.5
}

/// Spatial resize of an NCHW tensor over H and W.
pub(crate) fn resample2d(
    input: &[f32],
    in_dims: &[usize],
    mode: InterpolationMode,
    scales: [f32; 2],
    out_dims: &[usize],
) -> Vec<f32> {
    let planes = in_dims[0] * in_dims[1];
    let (h, w) = (in_dims[2], in_dims[3]);
    let (oh, ow) = (out_dims[2], out_dims[3]);
    let clamp_index = |v: f32, size: usize| -> usize { (v.max(0.0) as usize).min(size - 1) };

    let mut out = Vec::with_capacity(planes * oh * ow);
    for plane in 0..planes {
        let src = &input[plane * h * w..(plane + 1) * h * w];
        for y in 0..oh {
            let sy = source_coord(y, scales[0]);
            for x in 0..ow {
                let sx = source_coord(x, scales[1]);
                let value = match mode {
                    // Ties round toward the lower index.
                    InterpolationMode::NearestNeighbor => {
                        let iy = clamp_index((sy - 0.5).ceil(), h);
                        let ix = clamp_index((sx - 0.5).ceil(), w);
                        src[iy * w + ix]
                    }
                    InterpolationMode::Linear => {
                        let fy = sy.clamp(0.0, (h - 1) as f32);
                        let fx = sx.clamp(0.0, (w - 1) as f32);
                        let (y0, x0) = (fy.floor() as usize, fx.floor() as usize);
                        let (y1, x1) = ((y0 + 1).min(h - 1), (x0 + 1).min(w - 1));
                        let (dy, dx) = (fy - y0 as f32, fx - x0 as f32);
                        let top = src[y0 * w + x0] * (1.0 - dx) + src[y0 * w + x1] * dx;
                        let bottom = src[y1 * w + x0] * (1.0 - dx) + src[y1 * w + x1] * dx;
                        top * (1.0 - dy) + bottom * dy
                    }
                };
                out.push(value);
            }
        }
    }
    out
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Returns `(final hidden state, full sequence)`.
///
/// Shapes: input `[steps, batch, input]`, weight `[dirs, 3 * hidden, input]`,
/// recurrent weight `[dirs, 3 * hidden, hidden]`, biases `[dirs, 3 * hidden]`,
/// initial state `[dirs, batch, hidden]`; the sequence is
/// `[steps, dirs, batch, hidden]`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn gru(
    input: &[f32],
    in_dims: &[usize],
    weight: &[f32],
    recurrent_weight: &[f32],
    bias: Option<&[f32]>,
    recurrent_bias: Option<&[f32]>,
    initial_hidden_state: Option<&[f32]>,
    params: &GruParams,
) -> (Vec<f32>, Vec<f32>) {
    let (steps, batch, input_size) = (params.steps, in_dims[1], in_dims[2]);
    let hidden = params.hidden_size;
    let dirs = params.num_directions();
    let (z_off, r_off, n_off) = match params.layout {
        GruWeightLayout::Zrn => (0, hidden, 2 * hidden),
        GruWeightLayout::Rzn => (hidden, 0, 2 * hidden),
    };
    let [gate_fn, candidate_fn] = params.activations;

    let mut final_state = vec![0.0f32; dirs * batch * hidden];
    let mut sequence = vec![0.0f32; steps * dirs * batch * hidden];
    for d in 0..dirs {
        let backward = match params.direction {
            RecurrentDirection::Backward => true,
            RecurrentDirection::Both => d == 1,
            RecurrentDirection::Forward => false,
        };
        let w = &weight[d * 3 * hidden * input_size..(d + 1) * 3 * hidden * input_size];
        let r = &recurrent_weight[d * 3 * hidden * hidden..(d + 1) * 3 * hidden * hidden];
        let wb = bias.map(|b| &b[d * 3 * hidden..(d + 1) * 3 * hidden]);
        let rb = recurrent_bias.map(|b| &b[d * 3 * hidden..(d + 1) * 3 * hidden]);
        let w_row = |row: usize| &w[row * input_size..(row + 1) * input_size];
        let r_row = |row: usize| &r[row * hidden..(row + 1) * hidden];
        let w_bias = |row: usize| wb.map_or(0.0, |b| b[row]);
        let r_bias = |row: usize| rb.map_or(0.0, |b| b[row]);

        let mut state = match initial_hidden_state {
            Some(h0) => h0[d * batch * hidden..(d + 1) * batch * hidden].to_vec(),
            None => vec![0.0f32; batch * hidden],
        };
        for s in 0..steps {
            let t = if backward { steps - 1 - s } else { s };
            let mut next = vec![0.0f32; batch * hidden];
            for b in 0..batch {
                let x = &input[(t * batch + b) * input_size..(t * batch + b + 1) * input_size];
                let h = &state[b * hidden..(b + 1) * hidden];
                let mut z = vec![0.0f32; hidden];
                let mut reset = vec![0.0f32; hidden];
                for j in 0..hidden {
                    let (zr, rr) = (z_off + j, r_off + j);
                    z[j] = activate(
                        &gate_fn,
                        dot(x, w_row(zr)) + dot(h, r_row(zr)) + w_bias(zr) + r_bias(zr),
                    );
                    reset[j] = activate(
                        &gate_fn,
                        dot(x, w_row(rr)) + dot(h, r_row(rr)) + w_bias(rr) + r_bias(rr),
                    );
                }
                for j in 0..hidden {
                    let nr = n_off + j;
                    let recurrent = if params.reset_after {
                        reset[j] * (dot(h, r_row(nr)) + r_bias(nr))
                    } else {
                        let gated: f32 = (0..hidden).map(|k| reset[k] * h[k] * r_row(nr)[k]).sum();
                        gated + r_bias(nr)
                    };
                    let candidate =
                        activate(&candidate_fn, dot(x, w_row(nr)) + w_bias(nr) + recurrent);
                    let value = (1.0 - z[j]) * candidate + z[j] * h[j];
                    next[b * hidden + j] = value;
                    sequence[((t * dirs + d) * batch + b) * hidden + j] = value;
                }
            }
            state = next;
        }
        final_state[d * batch * hidden..(d + 1) * batch * hidden].copy_from_slice(&state);
    }
    (final_state, sequence)
}

pub(crate) fn split(input: &[f32], dims: &[usize], axis: usize, sizes: &[usize]) -> Vec<Vec<f32>> {
    let outer: usize = dims[..axis].iter().product();
    let inner: usize = dims[axis + 1..].iter().product();
    let axis_len = dims[axis];

    let mut pieces = Vec::with_capacity(sizes.len());
    let mut offset = 0;
    for &size in sizes {
        let mut piece = Vec::with_capacity(outer * size * inner);
        for o in 0..outer {
            let start = (o * axis_len + offset) * inner;
            piece.extend_from_slice(&input[start..start + size * inner]);
        }
        pieces.push(piece);
        offset += size;
    }
    pieces
}

pub(crate) fn binary(
    op: BinaryOp,
    a: &[f32],
    a_dims: &[usize],
    b: &[f32],
    b_dims: &[usize],
    out_dims: &[usize],
) -> Vec<f32> {
    let count: usize = out_dims.iter().product();
    (0..count)
        .map(|idx| {
            let coord = unravel_index(idx, out_dims);
            let x = a[broadcast_offset(&coord, a_dims)];
            let y = b[broadcast_offset(&coord, b_dims)];
            match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
            }
        })
        .collect()
}

/// Padding taps are excluded from both the max and the average.
pub(crate) fn pool2d(
    kind: PoolKind,
    input: &[f32],
    in_dims: &[usize],
    window: [usize; 2],
    params: &WindowParams,
    out_dims: &[usize],
) -> Vec<f32> {
    let planes = in_dims[0] * in_dims[1];
    let (h, w) = (in_dims[2], in_dims[3]);
    let (oh, ow) = (out_dims[2], out_dims[3]);
    let [top, _, left, _] = params.padding;

    let mut out = Vec::with_capacity(planes * oh * ow);
    for plane in 0..planes {
        let src = &input[plane * h * w..(plane + 1) * h * w];
        for y in 0..oh {
            for x in 0..ow {
                let mut max = f32::NEG_INFINITY;
                let mut sum = 0.0f32;
                let mut count = 0usize;
                for ky in 0..window[0] {
                    let Some(iy) = tap(y, ky, params.strides[0], params.dilations[0], top, h) else {
                        continue;
                    };
                    for kx in 0..window[1] {
                        let Some(ix) = tap(x, kx, params.strides[1], params.dilations[1], left, w)
                        else {
                            continue;
                        };
                        let value = src[iy * w + ix];
                        max = max.max(value);
                        sum += value;
                        count += 1;
                    }
                }
                out.push(match kind {
                    PoolKind::Max => max,
                    PoolKind::Average if count == 0 => 0.0,
                    PoolKind::Average => sum / count as f32,
                });
            }
        }
    }
    out
}

pub(crate) fn fill_sequence(count: usize, start: f32, delta: f32) -> Vec<f32> {
    (0..count).map(|i| start + i as f32 * delta).collect()
}

/// Rounds values to what `to` can represent; integers truncate and saturate.
pub(crate) fn cast(values: &[f32], to: OperandType) -> Vec<f32> {
    let saturate = |v: f32, min: f32, max: f32| {
        if v.is_nan() {
            0.0
        } else {
            v.trunc().clamp(min, max)
        }
    };
    values
        .iter()
        .map(|&v| match to {
            OperandType::Float32 => v,
            OperandType::Float16 => f16::from_f32(v).to_f32(),
            OperandType::Int32 => saturate(v, i32::MIN as f32, i32::MAX as f32),
            OperandType::Uint32 => saturate(v, 0.0, u32::MAX as f32),
            OperandType::Int8 => saturate(v, i8::MIN as f32, i8::MAX as f32),
            OperandType::Uint8 => saturate(v, 0.0, u8::MAX as f32),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_aligns_from_the_right() {
        assert_eq!(broadcast_shapes(&[2, 3], &[3]), Some(vec![2, 3]));
        assert_eq!(broadcast_shapes(&[4, 1, 5], &[3, 1]), Some(vec![4, 3, 5]));
        assert_eq!(broadcast_shapes(&[2, 3], &[2]), None);
    }

    #[test]
    fn conv_with_same_padding_keeps_spatial_size() {
        let input: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let params = WindowParams {
            padding: [1, 1, 1, 1],
            strides: [1, 1],
            dilations: [1, 1],
            groups: 1,
        };
        let out = conv2d(
            &input,
            &[1, 1, 3, 3],
            &[1.0; 9],
            &[1, 1, 3, 3],
            None,
            &params,
            &[1, 1, 3, 3],
        );
        assert_eq!(out, vec![12.0, 21.0, 16.0, 27.0, 45.0, 33.0, 24.0, 39.0, 28.0]);
    }

    #[test]
    fn average_pool_ignores_padding() {
        let params = WindowParams {
            padding: [1, 1, 1, 1],
            strides: [2, 2],
            dilations: [1, 1],
            groups: 1,
        };
        let out = pool2d(
            PoolKind::Average,
            &[1.0, 2.0, 3.0, 4.0],
            &[1, 1, 2, 2],
            [2, 2],
            &params,
            &[1, 1, 2, 2],
        );
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn cast_truncates_and_saturates() {
        assert_eq!(
            cast(&[1.7, -1.7, 300.0], OperandType::Uint8),
            vec![1.0, 0.0, 255.0]
        );
    }
}
