use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use half::f16;
use webnn_ep::backend::{
    BackendError, BackendResult, ContextOptions, MlBackend, NamedInputs, NamedOutputs,
    OperandType,
};

use crate::builder::CpuGraphBuilder;
use crate::graph::CpuGraph;

/// Stage at which an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    CreateContext,
    CreateGraphBuilder,
    Build,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuContext {
    pub options: ContextOptions,
}

/// Interprets backend graphs on the host in `f32`.
///
/// Besides computing, the backend counts compute calls and the largest number
/// of computes it has seen overlap, and can be told to fail at a given stage.
#[derive(Debug, Default)]
pub struct RefCpuBackend {
    faults: Mutex<HashSet<FaultPoint>>,
    last_options: Mutex<Option<ContextOptions>>,
    compute_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    compute_calls: AtomicUsize,
}

impl RefCpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every compute for `delay`, widening the window in which
    /// overlapping calls would be observed.
    pub fn with_compute_delay(delay: Duration) -> Self {
        Self {
            compute_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn inject_fault(&self, point: FaultPoint) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(point);
    }

    pub fn clear_fault(&self, point: FaultPoint) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&point);
    }

    fn fault(&self, point: FaultPoint) -> bool {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&point)
    }

    /// Options passed to the most recent `create_context`.
    pub fn last_context_options(&self) -> Option<ContextOptions> {
        *self
            .last_options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn compute_calls(&self) -> usize {
        self.compute_calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_computes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Widens a typed buffer to `f32`.
pub(crate) fn decode(operand_type: OperandType, bytes: &[u8]) -> Vec<f32> {
    match operand_type {
        OperandType::Float32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        OperandType::Float16 => bytes
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        OperandType::Int32 => bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
            .collect(),
        OperandType::Uint32 => bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
            .collect(),
        OperandType::Int8 => bytes.iter().map(|&b| b as i8 as f32).collect(),
        OperandType::Uint8 => bytes.iter().map(|&b| b as f32).collect(),
    }
}

/// Narrows `values` into `out`; `out` must hold exactly one element per value.
pub(crate) fn encode(operand_type: OperandType, values: &[f32], out: &mut [u8]) {
    let size = operand_type.byte_size();
    for (value, chunk) in values.iter().zip(out.chunks_exact_mut(size)) {
        match operand_type {
            OperandType::Float32 => chunk.copy_from_slice(&value.to_le_bytes()),
            OperandType::Float16 => chunk.copy_from_slice(&f16::from_f32(*value).to_le_bytes()),
            OperandType::Int32 => chunk.copy_from_slice(&(*value as i32).to_le_bytes()),
            OperandType::Uint32 => chunk.copy_from_slice(&(*value as u32).to_le_bytes()),
            OperandType::Int8 => chunk[0] = *value as i8 as u8,
            OperandType::Uint8 => chunk[0] = *value as u8,
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MlBackend for RefCpuBackend {
    type Context = CpuContext;
    type Graph = CpuGraph;
    type Builder = CpuGraphBuilder;

    fn backend_name(&self) -> &str {
        "ref-cpu"
    }

    fn create_context(&self, options: &ContextOptions) -> BackendResult<CpuContext> {
        if self.fault(FaultPoint::CreateContext) {
            return Err(BackendError::execution("injected context creation failure"));
        }
        *self
            .last_options
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(*options);
        log::debug!("ref-cpu: context created with {options:?}");
        Ok(CpuContext { options: *options })
    }

    fn create_graph_builder(&self, _context: &CpuContext) -> BackendResult<CpuGraphBuilder> {
        if self.fault(FaultPoint::CreateGraphBuilder) {
            return Err(BackendError::execution("injected graph builder failure"));
        }
        Ok(CpuGraphBuilder::new(self.fault(FaultPoint::Build)))
    }

    fn compute(
        &self,
        _context: &CpuContext,
        graph: &CpuGraph,
        inputs: &NamedInputs<'_>,
        outputs: &mut NamedOutputs<'_>,
    ) -> BackendResult<()> {
        self.compute_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if self.fault(FaultPoint::Compute) {
            return Err(BackendError::execution("injected compute failure"));
        }
        if let Some(delay) = self.compute_delay {
            thread::sleep(delay);
        }

        let mut feeds = HashMap::with_capacity(inputs.len());
        for (name, _) in &graph.inputs {
            let view = inputs
                .get(name)
                .ok_or_else(|| BackendError::invalid_argument(format!("input '{name}' not bound")))?;
            let desc = graph
                .input_descriptor(name)
                .ok_or_else(|| BackendError::execution(format!("input '{name}' has no descriptor")))?;
            if view.operand_type != desc.operand_type || view.byte_length() != desc.byte_length() {
                return Err(BackendError::invalid_argument(format!(
                    "input '{name}' expects {} bytes of {}, got {} bytes of {}",
                    desc.byte_length(),
                    desc.operand_type,
                    view.byte_length(),
                    view.operand_type
                )));
            }
            feeds.insert(name.clone(), decode(view.operand_type, view.bytes));
        }

        let results = graph.evaluate(&feeds)?;

        for (name, view) in outputs.iter_mut() {
            let desc = graph
                .output_descriptor(name)
                .ok_or_else(|| BackendError::invalid_argument(format!("unknown output '{name}'")))?;
            if view.operand_type != desc.operand_type || view.byte_length() != desc.byte_length() {
                return Err(BackendError::invalid_argument(format!(
                    "output '{name}' expects {} bytes of {}, got {} bytes of {}",
                    desc.byte_length(),
                    desc.operand_type,
                    view.byte_length(),
                    view.operand_type
                )));
            }
            let values = results
                .get(name)
                .ok_or_else(|| BackendError::execution(format!("output '{name}' was not computed")))?;
            encode(desc.operand_type, values, &mut *view.bytes);
        }
        Ok(())
    }
}
