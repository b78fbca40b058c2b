//! Operator-type registry of shared op builders.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{impl_ops, OpBuilder};
use crate::backend::MlBackend;

/// Mapping from operator type to its shared builder.
pub struct OpBuilderRegistry<B: MlBackend> {
    builders: HashMap<String, Arc<dyn OpBuilder<B>>>,
}

impl<B: MlBackend> OpBuilderRegistry<B> {
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registers `builder` for every type in `op_types`.
    ///
    /// A type that already has a builder keeps it.
    pub fn register(&mut self, op_types: &[&str], builder: Arc<dyn OpBuilder<B>>) {
        for op_type in op_types {
            self.builders
                .entry(op_type.to_string())
                .or_insert_with(|| Arc::clone(&builder));
        }
    }

    pub fn get(&self, op_type: &str) -> Option<&dyn OpBuilder<B>> {
        self.builders.get(op_type).map(|builder| builder.as_ref())
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.builders.contains_key(op_type)
    }

    /// Returns `true` when both types resolve to the same builder instance.
    pub fn shares_builder(&self, a: &str, b: &str) -> bool {
        match (self.builders.get(a), self.builders.get(b)) {
            (Some(x), Some(y)) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }

    pub fn op_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.builders.keys().cloned().collect();
        types.sort();
        types
    }
}

impl<B: MlBackend> Default for OpBuilderRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: MlBackend> fmt::Debug for OpBuilderRegistry<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpBuilderRegistry")
            .field("op_types", &self.op_types())
            .finish()
    }
}

/// Builds the registry of every supported operator type.
pub fn init_op_builders<B: MlBackend>() -> OpBuilderRegistry<B> {
    let mut registry = OpBuilderRegistry::new();
    impl_ops::register_all(&mut registry);
    registry
}
