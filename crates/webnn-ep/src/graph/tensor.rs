use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};

/// Element types of host tensors, numbered like ONNX `TensorProto.DataType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Float32,
    Uint8,
    Int8,
    Uint16,
    Int16,
    Int32,
    Int64,
    String,
    Bool,
    Float16,
    Float64,
    Uint32,
    Uint64,
    Bfloat16,
}

impl ElementType {
    /// Maps a raw ONNX data type code to an element type.
    pub fn from_code(code: i32) -> Option<Self> {
        let ty = match code {
            1 => ElementType::Float32,
            2 => ElementType::Uint8,
            3 => ElementType::Int8,
            4 => ElementType::Uint16,
            5 => ElementType::Int16,
            6 => ElementType::Int32,
            7 => ElementType::Int64,
            8 => ElementType::String,
            9 => ElementType::Bool,
            10 => ElementType::Float16,
            11 => ElementType::Float64,
            12 => ElementType::Uint32,
            13 => ElementType::Uint64,
            16 => ElementType::Bfloat16,
            _ => return None,
        };
        Some(ty)
    }

    pub fn code(self) -> i32 {
        match self {
            ElementType::Float32 => 1,
            ElementType::Uint8 => 2,
            ElementType::Int8 => 3,
            ElementType::Uint16 => 4,
            ElementType::Int16 => 5,
            ElementType::Int32 => 6,
            ElementType::Int64 => 7,
            ElementType::String => 8,
            ElementType::Bool => 9,
            ElementType::Float16 => 10,
            ElementType::Float64 => 11,
            ElementType::Uint32 => 12,
            ElementType::Uint64 => 13,
            ElementType::Bfloat16 => 16,
        }
    }

    /// Storage size of one element, `None` for variable-length strings.
    pub fn byte_size(self) -> Option<usize> {
        match self {
            ElementType::Uint8 | ElementType::Int8 | ElementType::Bool => Some(1),
            ElementType::Uint16
            | ElementType::Int16
            | ElementType::Float16
            | ElementType::Bfloat16 => Some(2),
            ElementType::Float32 | ElementType::Int32 | ElementType::Uint32 => Some(4),
            ElementType::Float64 | ElementType::Int64 | ElementType::Uint64 => Some(8),
            ElementType::String => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementType::Float32 => "float32",
            ElementType::Uint8 => "uint8",
            ElementType::Int8 => "int8",
            ElementType::Uint16 => "uint16",
            ElementType::Int16 => "int16",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::String => "string",
            ElementType::Bool => "bool",
            ElementType::Float16 => "float16",
            ElementType::Float64 => "float64",
            ElementType::Uint32 => "uint32",
            ElementType::Uint64 => "uint64",
            ElementType::Bfloat16 => "bfloat16",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constant tensor owned by the host graph.
///
/// Data lives either in `raw_data` (little-endian image) or in one of the typed
/// fields, mirroring the two storage forms of an ONNX initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorProto {
    pub name: String,
    #[serde(default)]
    pub dims: Vec<i64>,
    pub data_type: ElementType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub float_data: Vec<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub int32_data: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub int64_data: Vec<i64>,
}

impl TensorProto {
    fn raw(name: impl Into<String>, dims: &[i64], data_type: ElementType, raw_data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            dims: dims.to_vec(),
            data_type,
            raw_data,
            float_data: Vec::new(),
            int32_data: Vec::new(),
            int64_data: Vec::new(),
        }
    }

    pub fn from_f32(name: impl Into<String>, dims: &[i64], values: &[f32]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::raw(name, dims, ElementType::Float32, bytes)
    }

    pub fn from_i32(name: impl Into<String>, dims: &[i64], values: &[i32]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::raw(name, dims, ElementType::Int32, bytes)
    }

    pub fn from_i64(name: impl Into<String>, dims: &[i64], values: &[i64]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::raw(name, dims, ElementType::Int64, bytes)
    }

    /// Builds a float tensor stored in the typed `float_data` field.
    pub fn with_float_data(name: impl Into<String>, dims: &[i64], values: Vec<f32>) -> Self {
        let mut tensor = Self::raw(name, dims, ElementType::Float32, Vec::new());
        tensor.float_data = values;
        tensor
    }

    /// Number of elements; a rank-0 tensor holds one.
    pub fn element_count(&self) -> Option<usize> {
        let mut count = 1usize;
        for &dim in &self.dims {
            let dim = usize::try_from(dim).ok()?;
            count = count.checked_mul(dim)?;
        }
        Some(count)
    }

    /// Reads every element as `f32`, accepting float32, int32 and int64 storage.
    pub fn to_f32_vec(&self) -> CompileResult<Vec<f32>> {
        let bytes = unpack_initializer(self)?;
        match self.data_type {
            ElementType::Float32 => Ok(bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()),
            ElementType::Int32 => Ok(bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
                .collect()),
            ElementType::Int64 => Ok(bytes
                .chunks_exact(8)
                .map(|c| {
                    i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
                })
                .collect()),
            other => Err(CompileError::invalid_initializer(
                &self.name,
                format!("cannot read {other} values as float"),
            )),
        }
    }

    /// Reads every element as `i64`, accepting int32 and int64 storage.
    pub fn to_i64_vec(&self) -> CompileResult<Vec<i64>> {
        let bytes = unpack_initializer(self)?;
        match self.data_type {
            ElementType::Int64 => Ok(bytes
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect()),
            ElementType::Int32 => Ok(bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
                .collect()),
            other => Err(CompileError::invalid_initializer(
                &self.name,
                format!("cannot read {other} values as integers"),
            )),
        }
    }
}

/// Returns the little-endian byte image of an initializer regardless of how it is stored.
pub fn unpack_initializer(tensor: &TensorProto) -> CompileResult<Vec<u8>> {
    let elem_size = tensor.data_type.byte_size().ok_or_else(|| {
        CompileError::invalid_initializer(&tensor.name, "variable-length elements cannot be unpacked")
    })?;
    let count = tensor
        .element_count()
        .ok_or_else(|| CompileError::invalid_initializer(&tensor.name, "invalid dimensions"))?;
    let expected = count
        .checked_mul(elem_size)
        .ok_or_else(|| CompileError::invalid_initializer(&tensor.name, "byte size overflows"))?;

    let bytes = if !tensor.raw_data.is_empty() {
        tensor.raw_data.clone()
    } else if !tensor.float_data.is_empty() {
        if tensor.data_type != ElementType::Float32 {
            return Err(CompileError::invalid_initializer(
                &tensor.name,
                format!("float_data used for {} tensor", tensor.data_type),
            ));
        }
        tensor.float_data.iter().flat_map(|v| v.to_le_bytes()).collect()
    } else if !tensor.int64_data.is_empty() {
        if tensor.data_type != ElementType::Int64 {
            return Err(CompileError::invalid_initializer(
                &tensor.name,
                format!("int64_data used for {} tensor", tensor.data_type),
            ));
        }
        tensor.int64_data.iter().flat_map(|v| v.to_le_bytes()).collect()
    } else if !tensor.int32_data.is_empty() {
        // int32_data also carries the narrower integer types and float16 bit patterns.
        match elem_size {
            4 => tensor.int32_data.iter().flat_map(|v| v.to_le_bytes()).collect(),
            2 => tensor
                .int32_data
                .iter()
                .flat_map(|v| (*v as u16).to_le_bytes())
                .collect(),
            1 => tensor.int32_data.iter().map(|v| *v as u8).collect(),
            _ => {
                return Err(CompileError::invalid_initializer(
                    &tensor.name,
                    format!("int32_data used for {} tensor", tensor.data_type),
                ))
            }
        }
    } else {
        Vec::new()
    };

    if bytes.len() != expected {
        return Err(CompileError::invalid_initializer(
            &tensor.name,
            format!("expected {expected} bytes, found {}", bytes.len()),
        ));
    }
    Ok(bytes)
}
