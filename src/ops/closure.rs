// src/ops/closure.rs

use std::fmt;

use serde_json::Value;

use super::Operation;

type Body = dyn Fn() -> anyhow::Result<Value> + Send + Sync;

/// Operation backed by a Rust closure.
///
/// `params` is supplied by the caller and only feeds the task signature, so it
/// must change whenever the closure's behaviour should invalidate old outputs.
pub struct FnOperation {
    name: String,
    params: Value,
    body: Box<Body>,
}

impl FnOperation {
    pub fn new<F>(name: impl Into<String>, params: Value, body: F) -> Self
    where
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            body: Box::new(body),
        }
    }
}

impl fmt::Debug for FnOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnOperation")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Operation for FnOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> Value {
        self.params.clone()
    }

    fn run(&self) -> anyhow::Result<Value> {
        (self.body)()
    }
}
