pub mod backend;
pub mod builders;
mod env;
pub mod error;
pub mod graph;
pub mod options;
pub mod partition;
pub mod provider;

pub use backend::{BackendError, BackendResult, MlBackend, MlGraphBuilder};
pub use builders::{init_op_builders, CompiledModel, InputTensor, OutputTensor, OwnedTensor};
pub use error::{CompileError, CompileResult, ExecuteError, ExecuteResult};
pub use graph::{ElementType, GraphView, Node, NodeArg, TensorProto};
pub use options::{DevicePreference, PowerPreference, ProviderOptions};
pub use provider::{ComputeCapability, ExecutionProvider};
