// src/ops/registry.rs

//! Name -> constructor table used to rebuild operations from an
//! [`OperationSpec`] (e.g. on a remote worker).

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use super::builtin::{CommandOperation, CopyOperation, NoopOperation, ParallelCommands};
use super::{Operation, OperationSpec};

/// Builds an operation from its JSON parameters.
pub type OperationFactory = fn(&Value) -> Result<Arc<dyn Operation>>;

#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    factories: BTreeMap<String, OperationFactory>,
}

impl OperationRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in operation.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(CommandOperation::NAME, |params| {
            let op: CommandOperation = serde_json::from_value(params.clone())
                .context("decoding `command` parameters")?;
            Ok(Arc::new(op))
        });
        registry.register(ParallelCommands::NAME, |params| {
            let op: ParallelCommands = serde_json::from_value(params.clone())
                .context("decoding `parallel_commands` parameters")?;
            Ok(Arc::new(op))
        });
        registry.register(CopyOperation::NAME, |params| {
            let op: CopyOperation = serde_json::from_value(params.clone())
                .context("decoding `copy` parameters")?;
            Ok(Arc::new(op))
        });
        registry.register(NoopOperation::NAME, |_| Ok(Arc::new(NoopOperation)));
        registry
    }

    /// Register (or replace) a constructor.
    pub fn register(&mut self, name: impl Into<String>, factory: OperationFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|s| s.as_str())
    }

    /// Rebuild an operation from its spec.
    pub fn instantiate(&self, spec: &OperationSpec) -> Result<Arc<dyn Operation>> {
        let factory = self
            .factories
            .get(&spec.name)
            .ok_or_else(|| anyhow!("unknown operation '{}'", spec.name))?;
        factory(&spec.params)
    }
}
