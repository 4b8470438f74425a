// src/store/signature.rs

use std::path::Path;

use blake3::Hasher;

use crate::ops::OperationSpec;

/// Incrementally builds a task signature.
///
/// Every field is written with a tag and a length prefix so that different
/// field sequences can never produce the same byte stream.
pub struct SignatureBuilder {
    hasher: Hasher,
}

impl Default for SignatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureBuilder {
    pub fn new() -> Self {
        let mut hasher = Hasher::new();
        hasher.update(b"taskgraph-signature-v1");
        Self { hasher }
    }

    fn field(&mut self, tag: &[u8], value: &[u8]) {
        self.hasher.update(tag);
        self.hasher.update(&(value.len() as u64).to_le_bytes());
        self.hasher.update(value);
    }

    /// Operation name and canonical parameters.
    pub fn operation(&mut self, spec: &OperationSpec) -> &mut Self {
        self.field(b"op", spec.name.as_bytes());
        self.field(b"params", spec.params.to_string().as_bytes());
        self
    }

    /// A declared output path. Order matters.
    pub fn output(&mut self, path: &Path) -> &mut Self {
        self.field(b"out", path.to_string_lossy().as_bytes());
        self
    }

    /// Signature of a dependency task.
    pub fn upstream(&mut self, task: &str, signature: &str) -> &mut Self {
        self.field(b"dep", task.as_bytes());
        self.field(b"depsig", signature.as_bytes());
        self
    }

    /// A source input and its fingerprint (`None` when it does not exist
    /// locally, e.g. a `/vsicurl/` URL).
    pub fn input(&mut self, path: &Path, fingerprint: Option<&str>) -> &mut Self {
        self.field(b"in", path.to_string_lossy().as_bytes());
        self.field(b"infp", fingerprint.unwrap_or("absent").as_bytes());
        self
    }

    pub fn finish(&self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}
