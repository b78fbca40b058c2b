use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::ElementType;

/// Element types understood by the target graph API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperandType {
    Float32,
    Float16,
    Int32,
    Uint32,
    Int8,
    Uint8,
}

impl OperandType {
    pub fn from_element_type(elem_type: ElementType) -> Option<Self> {
        match elem_type {
            ElementType::Float32 => Some(OperandType::Float32),
            ElementType::Float16 => Some(OperandType::Float16),
            ElementType::Int32 => Some(OperandType::Int32),
            ElementType::Uint32 => Some(OperandType::Uint32),
            ElementType::Int8 => Some(OperandType::Int8),
            ElementType::Uint8 => Some(OperandType::Uint8),
            _ => None,
        }
    }

    pub fn element_type(self) -> ElementType {
        match self {
            OperandType::Float32 => ElementType::Float32,
            OperandType::Float16 => ElementType::Float16,
            OperandType::Int32 => ElementType::Int32,
            OperandType::Uint32 => ElementType::Uint32,
            OperandType::Int8 => ElementType::Int8,
            OperandType::Uint8 => ElementType::Uint8,
        }
    }

    pub fn byte_size(self) -> usize {
        match self {
            OperandType::Float32 | OperandType::Int32 | OperandType::Uint32 => 4,
            OperandType::Float16 => 2,
            OperandType::Int8 | OperandType::Uint8 => 1,
        }
    }
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperandType::Float32 => "float32",
            OperandType::Float16 => "float16",
            OperandType::Int32 => "int32",
            OperandType::Uint32 => "uint32",
            OperandType::Int8 => "int8",
            OperandType::Uint8 => "uint8",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperandDescriptor {
    pub operand_type: OperandType,
    pub dimensions: Vec<u32>,
}

impl OperandDescriptor {
    pub fn new(operand_type: OperandType, dimensions: Vec<u32>) -> Self {
        Self {
            operand_type,
            dimensions,
        }
    }

    pub fn element_count(&self) -> usize {
        self.dimensions.iter().map(|&d| d as usize).product()
    }

    pub fn byte_length(&self) -> usize {
        self.element_count() * self.operand_type.byte_size()
    }
}

/// Read-only byte window handed to the backend.
#[derive(Debug, Clone, Copy)]
pub struct ArrayBufferView<'a> {
    pub operand_type: OperandType,
    pub bytes: &'a [u8],
}

impl<'a> ArrayBufferView<'a> {
    pub fn new(operand_type: OperandType, bytes: &'a [u8]) -> Self {
        Self {
            operand_type,
            bytes,
        }
    }

    pub fn byte_length(&self) -> usize {
        self.bytes.len()
    }
}

/// Writable byte window the backend fills during compute.
#[derive(Debug)]
pub struct ArrayBufferViewMut<'a> {
    pub operand_type: OperandType,
    pub bytes: &'a mut [u8],
}

impl<'a> ArrayBufferViewMut<'a> {
    pub fn new(operand_type: OperandType, bytes: &'a mut [u8]) -> Self {
        Self {
            operand_type,
            bytes,
        }
    }

    pub fn byte_length(&self) -> usize {
        self.bytes.len()
    }
}

pub type NamedInputs<'a> = HashMap<String, ArrayBufferView<'a>>;
pub type NamedOutputs<'a> = HashMap<String, ArrayBufferViewMut<'a>>;

/// Activation that can run standalone or be fused into a producer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Relu,
    LeakyRelu { alpha: f32 },
    Sigmoid,
    Tanh,
    Clamp { min: f32, max: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoPad {
    #[default]
    Explicit,
    SameUpper,
    SameLower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputOperandLayout {
    #[default]
    Nchw,
    Nhwc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterOperandLayout {
    #[default]
    Oihw,
    Iohw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conv2dOptions<O, F> {
    /// `[top, bottom, left, right]`, ignored unless `auto_pad` is explicit.
    pub padding: [u32; 4],
    pub strides: [u32; 2],
    pub dilations: [u32; 2],
    pub auto_pad: AutoPad,
    pub groups: u32,
    pub input_layout: InputOperandLayout,
    pub filter_layout: FilterOperandLayout,
    pub bias: Option<O>,
    pub activation: Option<F>,
}

impl<O, F> Default for Conv2dOptions<O, F> {
    fn default() -> Self {
        Self {
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            auto_pad: AutoPad::Explicit,
            groups: 1,
            input_layout: InputOperandLayout::Nchw,
            filter_layout: FilterOperandLayout::Oihw,
            bias: None,
            activation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvTranspose2dOptions<O, F> {
    pub padding: [u32; 4],
    pub strides: [u32; 2],
    pub dilations: [u32; 2],
    pub output_padding: [u32; 2],
    pub output_sizes: Option<[u32; 2]>,
    pub groups: u32,
    pub input_layout: InputOperandLayout,
    pub filter_layout: FilterOperandLayout,
    pub bias: Option<O>,
    pub activation: Option<F>,
}

impl<O, F> Default for ConvTranspose2dOptions<O, F> {
    fn default() -> Self {
        Self {
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            output_padding: [0, 0],
            output_sizes: None,
            groups: 1,
            input_layout: InputOperandLayout::Nchw,
            filter_layout: FilterOperandLayout::Iohw,
            bias: None,
            activation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GemmOptions<O, F> {
    pub c: Option<O>,
    pub alpha: f32,
    pub beta: f32,
    pub a_transpose: bool,
    pub b_transpose: bool,
    pub activation: Option<F>,
}

impl<O, F> Default for GemmOptions<O, F> {
    fn default() -> Self {
        Self {
            c: None,
            alpha: 1.0,
            beta: 1.0,
            a_transpose: false,
            b_transpose: false,
            activation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormalizationOptions<O, F> {
    pub scale: Option<O>,
    pub bias: Option<O>,
    pub axis: u32,
    pub epsilon: f32,
    pub activation: Option<F>,
}

impl<O, F> Default for BatchNormalizationOptions<O, F> {
    fn default() -> Self {
        Self {
            scale: None,
            bias: None,
            axis: 1,
            epsilon: 1e-5,
            activation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClampOptions {
    pub min_value: f32,
    pub max_value: f32,
}

impl Default for ClampOptions {
    fn default() -> Self {
        Self {
            min_value: f32::NEG_INFINITY,
            max_value: f32::INFINITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationMode {
    #[default]
    NearestNeighbor,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resample2dOptions {
    pub mode: InterpolationMode,
    pub scales: Option<[f32; 2]>,
    pub sizes: Option<[u32; 2]>,
    pub axes: [u32; 2],
}

impl Default for Resample2dOptions {
    fn default() -> Self {
        Self {
            mode: InterpolationMode::NearestNeighbor,
            scales: None,
            sizes: None,
            axes: [2, 3],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Average,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pool2dOptions {
    /// `None` pools over the whole spatial extent.
    pub window_dimensions: Option<[u32; 2]>,
    pub padding: [u32; 4],
    pub strides: [u32; 2],
    pub dilations: [u32; 2],
    pub auto_pad: AutoPad,
    pub layout: InputOperandLayout,
}

impl Default for Pool2dOptions {
    fn default() -> Self {
        Self {
            window_dimensions: None,
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            auto_pad: AutoPad::Explicit,
            layout: InputOperandLayout::Nchw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecurrentDirection {
    #[default]
    Forward,
    Backward,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GruWeightLayout {
    #[default]
    Zrn,
    Rzn,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GruOptions<O, F> {
    pub bias: Option<O>,
    pub recurrent_bias: Option<O>,
    pub initial_hidden_state: Option<O>,
    pub reset_after: bool,
    pub return_sequence: bool,
    pub direction: RecurrentDirection,
    pub layout: GruWeightLayout,
    /// Gate activation then candidate activation; empty selects sigmoid and tanh.
    pub activations: Vec<F>,
}

impl<O, F> Default for GruOptions<O, F> {
    fn default() -> Self {
        Self {
            bias: None,
            recurrent_bias: None,
            initial_hidden_state: None,
            reset_after: true,
            return_sequence: false,
            direction: RecurrentDirection::Forward,
            layout: GruWeightLayout::Zrn,
            activations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitSpec {
    /// Split into this many equal pieces.
    Count(u32),
    Sizes(Vec<u32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Relu,
    Sigmoid,
    Tanh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}
