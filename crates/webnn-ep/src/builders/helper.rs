//! Attribute, shape and padding helpers shared by the op builders.

use std::collections::HashSet;

use crate::graph::{AttributeValue, ElementType, GraphView, Node, NodeArg};
use crate::options::DeviceType;

/// Typed attribute access with defaults.
pub struct NodeAttrHelper<'a> {
    node: &'a Node,
}

impl<'a> NodeAttrHelper<'a> {
    pub fn new(node: &'a Node) -> Self {
        Self { node }
    }

    pub fn has_attr(&self, key: &str) -> bool {
        self.node.attributes.contains_key(key)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.node.attributes.get(key) {
            Some(AttributeValue::Int(value)) => *value,
            _ => default,
        }
    }

    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        match self.node.attributes.get(key) {
            Some(AttributeValue::Float(value)) => *value,
            Some(AttributeValue::Int(value)) => *value as f32,
            _ => default,
        }
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.node.attributes.get(key) {
            Some(AttributeValue::String(value)) => value.clone(),
            _ => default.to_string(),
        }
    }

    pub fn get_ints(&self, key: &str, default: &[i64]) -> Vec<i64> {
        match self.node.attributes.get(key) {
            Some(AttributeValue::Ints(values)) => values.clone(),
            _ => default.to_vec(),
        }
    }

    pub fn get_floats(&self, key: &str, default: &[f32]) -> Vec<f32> {
        match self.node.attributes.get(key) {
            Some(AttributeValue::Floats(values)) => values.clone(),
            _ => default.to_vec(),
        }
    }

    pub fn get_strings(&self, key: &str, default: &[&str]) -> Vec<String> {
        match self.node.attributes.get(key) {
            Some(AttributeValue::Strings(values)) => values.clone(),
            _ => default.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Static shape of a tensor slot; logs and returns `None` when it is unknown.
pub fn get_shape(arg: &NodeArg) -> Option<Vec<i64>> {
    let shape = arg.static_shape();
    if shape.is_none() {
        log::debug!("shape of '{}' is not statically known", arg.name);
    }
    shape
}

/// Looks up the declared static shape of tensor `name` in `graph`.
pub fn tensor_shape(graph: &GraphView, name: &str) -> Option<Vec<i64>> {
    match graph.node_arg(name) {
        Some(arg) => get_shape(arg),
        None => {
            log::debug!("tensor '{name}' has no declared type or shape");
            None
        }
    }
}

pub fn tensor_type(graph: &GraphView, name: &str) -> Option<ElementType> {
    graph.node_arg(name).and_then(|arg| arg.elem_type)
}

pub fn is_supported_data_type(elem_type: ElementType, device: DeviceType) -> bool {
    match elem_type {
        ElementType::Float32 => true,
        ElementType::Float16 => device == DeviceType::Gpu,
        _ => false,
    }
}

/// Checks that a boundary or input tensor has a known, static, non-empty shape
/// and a supported element type.
pub fn is_input_supported(arg: &NodeArg, parent_name: &str, device: DeviceType) -> bool {
    let name = &arg.name;
    let Some(shape) = arg.shape.as_ref() else {
        log::debug!("{parent_name}: input '{name}' has no shape");
        return false;
    };
    for dim in shape {
        match dim.as_static() {
            None => {
                log::debug!("{parent_name}: dynamic shape is not supported for input '{name}'");
                return false;
            }
            Some(0) => {
                log::debug!("{parent_name}: zero-sized dimension in input '{name}'");
                return false;
            }
            Some(_) => {}
        }
    }
    match arg.elem_type {
        Some(elem_type) if is_supported_data_type(elem_type, device) => true,
        Some(elem_type) => {
            log::debug!("{parent_name}: input '{name}' has unsupported type {elem_type}");
            false
        }
        None => {
            log::debug!("{parent_name}: input '{name}' has no element type");
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoPadType {
    NotSet,
    Valid,
    SameUpper,
    SameLower,
}

impl AutoPadType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NOTSET" | "" => Some(AutoPadType::NotSet),
            "VALID" => Some(AutoPadType::Valid),
            "SAME_UPPER" => Some(AutoPadType::SameUpper),
            "SAME_LOWER" => Some(AutoPadType::SameLower),
            _ => None,
        }
    }
}

/// Head and tail padding of one spatial axis under SAME_* auto-padding.
///
/// Uses the legacy target size `ceil(in / stride)`; the odd element goes to the
/// tail for SAME_UPPER and to the head for SAME_LOWER.
pub fn compute_same_padding(
    in_size: i64,
    kernel: i64,
    stride: i64,
    dilation: i64,
    upper: bool,
) -> (i64, i64) {
    let stride = stride.max(1);
    let dilated_kernel = dilation.max(1) * (kernel - 1) + 1;
    let target = (in_size + stride - 1) / stride;
    let needed = ((target - 1) * stride + dilated_kernel - in_size).max(0);
    let head = if upper { needed / 2 } else { (needed + 1) / 2 };
    (head, needed - head)
}

/// Resolves the auto-pad mode a convolution should use.
///
/// SAME_* pass through. VALID yields `Valid`. Under NOTSET, explicit pads
/// (`[top, left, bottom, right]`) are compared against both SAME derivations:
/// SAME_UPPER wins when both match, SAME_LOWER when only it matches, and
/// `NotSet` keeps the explicit values.
pub fn handle_auto_pad(
    input_shape: &[i64],
    weight_h: i64,
    weight_w: i64,
    onnx_pads: &[i64],
    strides: &[i64],
    dilations: &[i64],
    auto_pad: AutoPadType,
) -> Result<AutoPadType, String> {
    match auto_pad {
        AutoPadType::SameUpper | AutoPadType::SameLower | AutoPadType::Valid => {
            return Ok(auto_pad)
        }
        AutoPadType::NotSet => {}
    }
    if input_shape.len() != 4 {
        return Err(format!("expected a 4-D input, got rank {}", input_shape.len()));
    }
    if onnx_pads.len() != 4 || strides.len() != 2 || dilations.len() != 2 {
        return Err("pads, strides and dilations must describe two spatial axes".to_string());
    }
    let (in_h, in_w) = (input_shape[2], input_shape[3]);

    let derive = |upper: bool| {
        let (top, bottom) = compute_same_padding(in_h, weight_h, strides[0], dilations[0], upper);
        let (left, right) = compute_same_padding(in_w, weight_w, strides[1], dilations[1], upper);
        [top, left, bottom, right]
    };

    if onnx_pads == derive(true) {
        Ok(AutoPadType::SameUpper)
    } else if onnx_pads == derive(false) {
        Ok(AutoPadType::SameLower)
    } else {
        Ok(AutoPadType::NotSet)
    }
}

/// Reorders ONNX `[top, left, bottom, right]` pads into `[top, bottom, left, right]`.
pub fn onnx_pads_to_backend(pads: &[i64]) -> Option<[u32; 4]> {
    if pads.len() != 4 {
        return None;
    }
    let convert = |v: i64| u32::try_from(v).ok();
    Some([
        convert(pads[0])?,
        convert(pads[2])?,
        convert(pads[1])?,
        convert(pads[3])?,
    ])
}

pub fn handle_negative_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = rank as i64;
    let axis = if axis < 0 { axis + rank } else { axis };
    if (0..rank).contains(&axis) {
        Some(axis as usize)
    } else {
        None
    }
}

/// Reads the clamp range of a Clip node.
///
/// Before opset 11 the bounds are attributes; afterwards they are optional
/// inputs that must be constant initializers.
pub fn get_clip_min_max(graph: &GraphView, node: &Node) -> Option<(f32, f32)> {
    let mut min = f32::NEG_INFINITY;
    let mut max = f32::INFINITY;
    if node.since_version < 11 {
        let helper = NodeAttrHelper::new(node);
        min = helper.get_float("min", min);
        max = helper.get_float("max", max);
        return Some((min, max));
    }

    for (slot, bound) in [(1usize, &mut min), (2usize, &mut max)] {
        let Some(name) = node.input(slot) else {
            continue;
        };
        let Some(tensor) = graph.initializer(name) else {
            log::debug!("Clip [{}] bound '{name}' must be a constant initializer", node.name);
            return None;
        };
        match tensor.to_f32_vec() {
            Ok(values) if values.len() == 1 => *bound = values[0],
            Ok(_) => {
                log::debug!("Clip [{}] bound '{name}' must hold one value", node.name);
                return None;
            }
            Err(err) => {
                log::debug!("Clip [{}] cannot read bound '{name}': {err}", node.name);
                return None;
            }
        }
    }
    Some((min, max))
}

/// Hands out operand names that collide with nothing already in use.
#[derive(Debug, Default)]
pub struct UniqueNameGenerator {
    used: HashSet<String>,
    token: u64,
}

impl UniqueNameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, name: impl Into<String>) {
        self.used.insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    pub fn unique(&mut self, base: &str) -> String {
        loop {
            let candidate = format!("{base}_token_{}", self.token);
            self.token += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Dim, TensorProto};

    #[test]
    fn same_padding_puts_odd_element_by_mode() {
        // in=5, k=2, s=1: one pad element needed.
        assert_eq!(compute_same_padding(5, 2, 1, 1, true), (0, 1));
        assert_eq!(compute_same_padding(5, 2, 1, 1, false), (1, 0));
        // in=7, k=3, s=2: target 4, needed (3*2+3-7)=2.
        assert_eq!(compute_same_padding(7, 3, 2, 1, true), (1, 1));
        // dilation widens the kernel to 5.
        assert_eq!(compute_same_padding(8, 3, 1, 2, true), (2, 2));
    }

    #[test]
    fn explicit_pads_map_to_auto_pad() {
        let shape = [1, 1, 5, 5];
        let upper = handle_auto_pad(&shape, 2, 2, &[0, 0, 1, 1], &[1, 1], &[1, 1], AutoPadType::NotSet);
        assert_eq!(upper, Ok(AutoPadType::SameUpper));
        let lower = handle_auto_pad(&shape, 2, 2, &[1, 1, 0, 0], &[1, 1], &[1, 1], AutoPadType::NotSet);
        assert_eq!(lower, Ok(AutoPadType::SameLower));
        let other = handle_auto_pad(&shape, 2, 2, &[2, 0, 0, 0], &[1, 1], &[1, 1], AutoPadType::NotSet);
        assert_eq!(other, Ok(AutoPadType::NotSet));
    }

    #[test]
    fn symmetric_pads_prefer_same_upper() {
        let shape = [1, 1, 5, 5];
        let mode = handle_auto_pad(&shape, 3, 3, &[1, 1, 1, 1], &[1, 1], &[1, 1], AutoPadType::NotSet);
        assert_eq!(mode, Ok(AutoPadType::SameUpper));
    }

    #[test]
    fn pads_reorder_to_height_then_width() {
        assert_eq!(onnx_pads_to_backend(&[1, 2, 3, 4]), Some([1, 3, 2, 4]));
        assert_eq!(onnx_pads_to_backend(&[-1, 0, 0, 0]), None);
    }

    #[test]
    fn negative_axis_wraps_once() {
        assert_eq!(handle_negative_axis(-1, 4), Some(3));
        assert_eq!(handle_negative_axis(2, 4), Some(2));
        assert_eq!(handle_negative_axis(-5, 4), None);
        assert_eq!(handle_negative_axis(4, 4), None);
    }

    #[test]
    fn clip_bounds_from_inputs_and_attributes() {
        let mut graph = GraphView::new(13);
        graph.add_initializer(TensorProto::from_f32("lo", &[], &[0.0]));
        graph.add_initializer(TensorProto::from_f32("hi", &[], &[6.0]));
        let node = Node::new("Clip", &["x", "lo", "hi"], &["y"]).since(13);
        assert_eq!(get_clip_min_max(&graph, &node), Some((0.0, 6.0)));

        let only_max = Node::new("Clip", &["x", "", "hi"], &["y"]).since(13);
        assert_eq!(
            get_clip_min_max(&graph, &only_max),
            Some((f32::NEG_INFINITY, 6.0))
        );

        let dynamic = Node::new("Clip", &["x", "runtime_min"], &["y"]).since(13);
        assert_eq!(get_clip_min_max(&graph, &dynamic), None);

        let legacy = Node::new("Clip", &["x"], &["y"])
            .since(6)
            .attr("min", -1.0f32)
            .attr("max", 1.0f32);
        assert_eq!(get_clip_min_max(&graph, &legacy), Some((-1.0, 1.0)));
    }

    #[test]
    fn input_support_requires_static_nonzero_shape() {
        let ok = NodeArg::new("x", ElementType::Float32, &[1, 3]);
        assert!(is_input_supported(&ok, "test", DeviceType::Cpu));

        let zero = NodeArg::new("x", ElementType::Float32, &[0, 3]);
        assert!(!is_input_supported(&zero, "test", DeviceType::Cpu));

        let symbolic = NodeArg::with_shape("x", ElementType::Float32, vec![Dim::Unknown]);
        assert!(!is_input_supported(&symbolic, "test", DeviceType::Cpu));

        let half = NodeArg::new("x", ElementType::Float16, &[2]);
        assert!(!is_input_supported(&half, "test", DeviceType::Cpu));
        assert!(is_input_supported(&half, "test", DeviceType::Gpu));
    }

    #[test]
    fn generator_skips_reserved_names() {
        let mut names = UniqueNameGenerator::new();
        names.reserve("w_token_0");
        assert_eq!(names.unique("w"), "w_token_1");
        assert_eq!(names.unique("w"), "w_token_2");
    }

    #[test]
    fn generator_never_repeats_under_heavy_collision() {
        let mut names = UniqueNameGenerator::new();
        for i in 0..1000 {
            names.reserve(format!("b_token_{i}"));
        }
        let mut issued = HashSet::new();
        for _ in 0..1000 {
            let name = names.unique("b");
            assert!(issued.insert(name.clone()), "{name} issued twice");
            let index: u64 = name["b_token_".len()..].parse().expect("numeric suffix");
            assert!(index >= 1000, "{name} collides with a reserved name");
        }
    }
}
