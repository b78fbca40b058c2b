//! Reference CPU backend for `webnn-ep`.
//!
//! Graphs are recorded op by op with full shape inference and interpreted on
//! the host at compute time. Every value is held as `f32` internally; typed
//! buffers are converted at the graph boundary.

mod builder;
pub mod cpu;
mod graph;
mod kernels;

pub use builder::CpuGraphBuilder;
pub use cpu::{CpuContext, FaultPoint, RefCpuBackend};
pub use graph::{CpuGraph, CpuNode, CpuOp, CpuOperand, GemmParams, GruParams, WindowParams};
