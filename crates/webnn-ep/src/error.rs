use thiserror::Error;

use crate::backend::BackendError;
use crate::graph::ElementType;

/// Fatal failure while lowering one subgraph; no compiled model is produced.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to create backend context: {0}")]
    ContextCreation(#[source] BackendError),
    #[error("failed to create graph builder: {0}")]
    GraphBuilderCreation(#[source] BackendError),
    #[error("failed to build backend graph: {0}")]
    GraphBuild(#[source] BackendError),
    #[error("no op builder registered for {op_type} node '{node}'")]
    NoOpBuilder { op_type: String, node: String },
    #[error("tensor '{name}' has unsupported element type {elem_type}")]
    UnsupportedType { name: String, elem_type: ElementType },
    #[error("tensor '{name}' has a dynamic or unknown shape")]
    DynamicShape { name: String },
    #[error("tensor '{name}' has no declared element type")]
    MissingType { name: String },
    #[error("initializer '{name}' is invalid: {reason}")]
    InvalidInitializer { name: String, reason: String },
    #[error("operand '{name}' has not been registered")]
    MissingOperand { name: String },
    #[error("operand '{name}' is already registered")]
    DuplicateOperand { name: String },
    #[error("{op_type} node '{node}' cannot be lowered: {reason}")]
    InvalidNode {
        op_type: String,
        node: String,
        reason: String,
    },
    #[error("backend rejected operator: {0}")]
    Backend(#[from] BackendError),
}

impl CompileError {
    pub fn invalid_initializer(name: &str, reason: impl Into<String>) -> Self {
        CompileError::InvalidInitializer {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_node(
        op_type: impl Into<String>,
        node: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CompileError::InvalidNode {
            op_type: op_type.into(),
            node: node.into(),
            reason: reason.into(),
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Per-call execution failure; the compiled model stays usable.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("tensor '{name}' expects {expected} but was bound as {actual}")]
    TypeMismatch {
        name: String,
        expected: ElementType,
        actual: ElementType,
    },
    #[error("'{name}' is not a boundary tensor of this model")]
    UnknownTensor { name: String },
    #[error("buffer for '{name}' holds {actual} bytes, expected {expected}")]
    BufferSize {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("no buffer bound for '{name}'")]
    MissingBinding { name: String },
    #[error("shape {shape:?} of '{name}' has no addressable byte size")]
    InvalidShape { name: String, shape: Vec<i64> },
    #[error("compute failed: {0}")]
    Compute(#[from] BackendError),
}

pub type ExecuteResult<T> = Result<T, ExecuteError>;
