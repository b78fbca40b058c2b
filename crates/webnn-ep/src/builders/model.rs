//! Compiled partitions and the locked execution path over caller buffers.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::{
    ArrayBufferView, ArrayBufferViewMut, MlBackend, NamedInputs, NamedOutputs, OperandType,
};
use crate::error::{ExecuteError, ExecuteResult};
use crate::graph::ElementType;

/// Type and shape contract of one graph input or output.
///
/// Rank-0 tensors are stored with the promoted shape `[1]`; `is_scalar`
/// records that callers see them as rank 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorBoundaryInfo {
    pub elem_type: ElementType,
    pub shape: Vec<i64>,
    pub is_scalar: bool,
}

impl TensorBoundaryInfo {
    /// Shape as declared by the host graph.
    pub fn logical_shape(&self) -> Vec<i64> {
        if self.is_scalar {
            Vec::new()
        } else {
            self.shape.clone()
        }
    }

    /// `None` when the element count does not fit in `usize`.
    pub fn element_count(&self) -> Option<usize> {
        checked_element_count(&self.shape)
    }
}

/// Product of `shape`, or `None` for a negative dimension or on overflow.
fn checked_element_count(shape: &[i64]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| {
        acc.checked_mul(usize::try_from(dim).ok()?)
    })
}

/// Caller-owned input buffer.
#[derive(Debug, Clone, Copy)]
pub struct InputTensor<'a> {
    pub elem_type: ElementType,
    pub shape: &'a [i64],
    pub data: &'a [u8],
}

/// Caller-owned output buffer.
#[derive(Debug)]
pub struct OutputTensor<'a> {
    pub elem_type: ElementType,
    pub shape: &'a [i64],
    pub data: &'a mut [u8],
}

/// Tensor with owned storage, used by [`CompiledModel::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedTensor {
    pub elem_type: ElementType,
    pub shape: Vec<i64>,
    pub data: Vec<u8>,
}

impl OwnedTensor {
    pub fn from_f32(shape: &[i64], values: &[f32]) -> Self {
        Self {
            elem_type: ElementType::Float32,
            shape: shape.to_vec(),
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    /// `None` when the shape has no addressable byte size.
    pub fn zeros(elem_type: ElementType, shape: &[i64]) -> Option<Self> {
        let size = elem_type.byte_size().unwrap_or(0);
        let len = checked_element_count(shape)?.checked_mul(size)?;
        Some(Self {
            elem_type,
            shape: shape.to_vec(),
            data: vec![0u8; len],
        })
    }

    /// Reinterprets float32 storage; `None` for other element types.
    pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
        if self.elem_type != ElementType::Float32 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    pub fn as_input(&self) -> InputTensor<'_> {
        InputTensor {
            elem_type: self.elem_type,
            shape: &self.shape,
            data: &self.data,
        }
    }
}

/// Executable backend graph for one compiled partition.
///
/// The model is immutable after construction. Calls to [`execute`] may come
/// from several threads; they are serialized on an internal lock.
///
/// [`execute`]: CompiledModel::execute
pub struct CompiledModel<B: MlBackend> {
    backend: Arc<B>,
    context: B::Context,
    graph: B::Graph,
    inputs: Vec<String>,
    outputs: Vec<String>,
    scalar_outputs: HashSet<String>,
    boundary: HashMap<String, TensorBoundaryInfo>,
    input_map: HashMap<String, usize>,
    output_map: HashMap<String, usize>,
    exec_lock: Mutex<()>,
}

impl<B: MlBackend> CompiledModel<B> {
    pub(crate) fn new(
        backend: Arc<B>,
        context: B::Context,
        graph: B::Graph,
        inputs: Vec<String>,
        outputs: Vec<String>,
        scalar_outputs: HashSet<String>,
        boundary: HashMap<String, TensorBoundaryInfo>,
    ) -> Self {
        Self {
            backend,
            context,
            graph,
            inputs,
            outputs,
            scalar_outputs,
            boundary,
            input_map: HashMap::new(),
            output_map: HashMap::new(),
            exec_lock: Mutex::new(()),
        }
    }

    pub fn input_names(&self) -> &[String] {
        &self.inputs
    }

    pub fn output_names(&self) -> &[String] {
        &self.outputs
    }

    pub fn is_scalar_output(&self, name: &str) -> bool {
        self.scalar_outputs.contains(name)
    }

    pub fn boundary_info(&self, name: &str) -> Option<&TensorBoundaryInfo> {
        self.boundary.get(name)
    }

    pub fn backend_graph(&self) -> &B::Graph {
        &self.graph
    }

    pub(crate) fn set_input_map(&mut self, map: HashMap<String, usize>) {
        self.input_map = map;
    }

    pub(crate) fn set_output_map(&mut self, map: HashMap<String, usize>) {
        self.output_map = map;
    }

    /// Position of `name` among the host node's inputs.
    pub fn mapped_input_index(&self, name: &str) -> Option<usize> {
        self.input_map.get(name).copied()
    }

    pub fn mapped_output_index(&self, name: &str) -> Option<usize> {
        self.output_map.get(name).copied()
    }

    /// Runs the graph once against caller buffers.
    ///
    /// Every declared input and output must be bound. Failures leave the model
    /// usable for later calls.
    pub fn execute(
        &self,
        inputs: &HashMap<String, InputTensor<'_>>,
        outputs: &mut HashMap<String, OutputTensor<'_>>,
    ) -> ExecuteResult<()> {
        let _guard = self
            .exec_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for name in inputs.keys() {
            if !self.inputs.contains(name) {
                return Err(ExecuteError::UnknownTensor { name: name.clone() });
            }
        }
        for name in outputs.keys() {
            if !self.outputs.contains(name) {
                return Err(ExecuteError::UnknownTensor { name: name.clone() });
            }
        }

        let mut named_inputs: NamedInputs<'_> = HashMap::with_capacity(inputs.len());
        for name in &self.inputs {
            let tensor = inputs
                .get(name)
                .ok_or_else(|| ExecuteError::MissingBinding { name: name.clone() })?;
            let operand_type =
                self.check_binding(name, tensor.elem_type, tensor.shape, tensor.data.len())?;
            named_inputs.insert(name.clone(), ArrayBufferView::new(operand_type, tensor.data));
        }

        for name in &self.outputs {
            if !outputs.contains_key(name) {
                return Err(ExecuteError::MissingBinding { name: name.clone() });
            }
        }
        let mut named_outputs: NamedOutputs<'_> = HashMap::with_capacity(outputs.len());
        for (name, tensor) in outputs.iter_mut() {
            let operand_type =
                self.check_binding(name, tensor.elem_type, tensor.shape, tensor.data.len())?;
            named_outputs.insert(
                name.clone(),
                ArrayBufferViewMut::new(operand_type, &mut *tensor.data),
            );
        }

        self.backend
            .compute(&self.context, &self.graph, &named_inputs, &mut named_outputs)
            .map_err(|err| {
                log::warn!("{} compute failed: {err}", self.backend.backend_name());
                ExecuteError::Compute(err)
            })
    }

    /// Convenience wrapper that allocates every output.
    ///
    /// Outputs carry their declared shape, so scalars come back with shape `[]`.
    pub fn run(
        &self,
        inputs: &HashMap<String, OwnedTensor>,
    ) -> ExecuteResult<HashMap<String, OwnedTensor>> {
        let borrowed: HashMap<String, InputTensor<'_>> = inputs
            .iter()
            .map(|(name, tensor)| (name.clone(), tensor.as_input()))
            .collect();

        let mut results = HashMap::with_capacity(self.outputs.len());
        for name in &self.outputs {
            let info = self
                .boundary
                .get(name)
                .ok_or_else(|| ExecuteError::UnknownTensor { name: name.clone() })?;
            let shape = info.logical_shape();
            let tensor = OwnedTensor::zeros(info.elem_type, &shape).ok_or_else(|| {
                ExecuteError::InvalidShape {
                    name: name.clone(),
                    shape: shape.clone(),
                }
            })?;
            results.insert(name.clone(), tensor);
        }

        {
            let mut bound: HashMap<String, OutputTensor<'_>> = results
                .iter_mut()
                .map(|(name, tensor)| {
                    (
                        name.clone(),
                        OutputTensor {
                            elem_type: tensor.elem_type,
                            shape: &tensor.shape,
                            data: &mut tensor.data,
                        },
                    )
                })
                .collect();
            self.execute(&borrowed, &mut bound)?;
        }
        Ok(results)
    }

    fn check_binding(
        &self,
        name: &str,
        elem_type: ElementType,
        shape: &[i64],
        byte_len: usize,
    ) -> ExecuteResult<OperandType> {
        let info = self
            .boundary
            .get(name)
            .ok_or_else(|| ExecuteError::UnknownTensor {
                name: name.to_string(),
            })?;
        if elem_type != info.elem_type {
            return Err(ExecuteError::TypeMismatch {
                name: name.to_string(),
                expected: info.elem_type,
                actual: elem_type,
            });
        }
        let operand_type =
            OperandType::from_element_type(elem_type).ok_or_else(|| ExecuteError::TypeMismatch {
                name: name.to_string(),
                expected: info.elem_type,
                actual: elem_type,
            })?;
        let expected = checked_element_count(shape)
            .and_then(|count| count.checked_mul(operand_type.byte_size()))
            .ok_or_else(|| ExecuteError::InvalidShape {
                name: name.to_string(),
                shape: shape.to_vec(),
            })?;
        if byte_len != expected {
            return Err(ExecuteError::BufferSize {
                name: name.to_string(),
                expected,
                actual: byte_len,
            });
        }
        Ok(operand_type)
    }
}

impl<B: MlBackend> fmt::Debug for CompiledModel<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledModel")
            .field("backend", &self.backend.backend_name())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("scalar_outputs", &self.scalar_outputs)
            .finish()
    }
}
