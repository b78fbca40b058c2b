//! Contract of the target graph API.
//!
//! A backend hands out an execution context, a graph builder bound to that
//! context, and a synchronous compute entry point. The builder exposes one
//! method per operator family; operands and fusion operators are opaque handles
//! owned by the builder's graph.

mod types;

use std::fmt;

pub use types::*;

pub use crate::options::ContextOptions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    Unimplemented { op: &'static str, reason: String },
    InvalidArgument { message: String },
    Execution { message: String },
}

impl BackendError {
    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        BackendError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unimplemented { op, reason } => {
                write!(f, "{op} is not implemented: {reason}")
            }
            BackendError::InvalidArgument { message } => {
                write!(f, "invalid argument: {message}")
            }
            BackendError::Execution { message } => {
                write!(f, "backend execution failure: {message}")
            }
        }
    }
}

impl std::error::Error for BackendError {}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Builder for one backend graph.
///
/// Every method appends to the graph under construction and returns the handle
/// of the produced operand; `build` seals the graph for the given named outputs.
pub trait MlGraphBuilder {
    type Operand: Clone + fmt::Debug;
    /// Activation that a producer can apply to its own result.
    type Operator: Clone + fmt::Debug;
    type Graph;

    fn input(&mut self, name: &str, desc: &OperandDescriptor) -> BackendResult<Self::Operand>;

    fn constant(
        &mut self,
        desc: &OperandDescriptor,
        data: ArrayBufferView<'_>,
    ) -> BackendResult<Self::Operand>;

    fn activation_operator(&mut self, activation: &Activation) -> BackendResult<Self::Operator>;

    fn conv2d(
        &mut self,
        input: &Self::Operand,
        filter: &Self::Operand,
        options: Conv2dOptions<Self::Operand, Self::Operator>,
    ) -> BackendResult<Self::Operand>;

    fn conv_transpose2d(
        &mut self,
        input: &Self::Operand,
        filter: &Self::Operand,
        options: ConvTranspose2dOptions<Self::Operand, Self::Operator>,
    ) -> BackendResult<Self::Operand>;

    fn matmul(&mut self, a: &Self::Operand, b: &Self::Operand) -> BackendResult<Self::Operand>;

    fn gemm(
        &mut self,
        a: &Self::Operand,
        b: &Self::Operand,
        options: GemmOptions<Self::Operand, Self::Operator>,
    ) -> BackendResult<Self::Operand>;

    fn batch_normalization(
        &mut self,
        input: &Self::Operand,
        mean: &Self::Operand,
        variance: &Self::Operand,
        options: BatchNormalizationOptions<Self::Operand, Self::Operator>,
    ) -> BackendResult<Self::Operand>;

    fn concat(&mut self, inputs: &[Self::Operand], axis: u32) -> BackendResult<Self::Operand>;

    fn reshape(&mut self, input: &Self::Operand, new_shape: &[u32])
        -> BackendResult<Self::Operand>;

    fn resample2d(
        &mut self,
        input: &Self::Operand,
        options: Resample2dOptions,
    ) -> BackendResult<Self::Operand>;

    fn transpose(
        &mut self,
        input: &Self::Operand,
        permutation: &[u32],
    ) -> BackendResult<Self::Operand>;

    /// Returns the final hidden state, followed by the full sequence when
    /// `return_sequence` is set.
    fn gru(
        &mut self,
        input: &Self::Operand,
        weight: &Self::Operand,
        recurrent_weight: &Self::Operand,
        steps: u32,
        hidden_size: u32,
        options: GruOptions<Self::Operand, Self::Operator>,
    ) -> BackendResult<Vec<Self::Operand>>;

    fn split(
        &mut self,
        input: &Self::Operand,
        splits: &SplitSpec,
        axis: u32,
    ) -> BackendResult<Vec<Self::Operand>>;

    fn clamp(&mut self, input: &Self::Operand, options: ClampOptions)
        -> BackendResult<Self::Operand>;

    fn leaky_relu(&mut self, input: &Self::Operand, alpha: f32) -> BackendResult<Self::Operand>;

    fn unary(&mut self, op: UnaryOp, input: &Self::Operand) -> BackendResult<Self::Operand>;

    fn binary(
        &mut self,
        op: BinaryOp,
        a: &Self::Operand,
        b: &Self::Operand,
    ) -> BackendResult<Self::Operand>;

    fn pool2d(
        &mut self,
        kind: PoolKind,
        input: &Self::Operand,
        options: Pool2dOptions,
    ) -> BackendResult<Self::Operand>;

    fn fill_sequence(
        &mut self,
        operand_type: OperandType,
        shape: &[u32],
        start: f32,
        delta: f32,
    ) -> BackendResult<Self::Operand>;

    fn cast(&mut self, input: &Self::Operand, to: OperandType) -> BackendResult<Self::Operand>;

    fn build(self, outputs: &[(String, Self::Operand)]) -> BackendResult<Self::Graph>;
}

/// Entry point of a target graph API implementation.
pub trait MlBackend: Send + Sync + 'static {
    type Context: Send + Sync;
    type Graph: Send + Sync;
    type Builder: MlGraphBuilder<Graph = Self::Graph>;

    /// Returns a human-readable backend identifier (e.g., `"ref-cpu"`).
    fn backend_name(&self) -> &str;

    fn create_context(&self, options: &ContextOptions) -> BackendResult<Self::Context>;

    fn create_graph_builder(&self, context: &Self::Context) -> BackendResult<Self::Builder>;

    /// Runs `graph` to completion, reading `inputs` and filling `outputs`.
    fn compute(
        &self,
        context: &Self::Context,
        graph: &Self::Graph,
        inputs: &NamedInputs<'_>,
        outputs: &mut NamedOutputs<'_>,
    ) -> BackendResult<()>;
}

pub type Operand<B> = <<B as MlBackend>::Builder as MlGraphBuilder>::Operand;
pub type Operator<B> = <<B as MlBackend>::Builder as MlGraphBuilder>::Operator;
