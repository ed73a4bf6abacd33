//! Signature Registry
//!
//! In-memory table of declared call signatures. A name, once declared, keeps
//! its signature for the lifetime of the registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::error::{FfiError, FfiResult};
use super::types::{FunctionSignature, SemanticType};

/// Declared signatures keyed by name
#[derive(Debug, Default)]
pub struct SignatureRegistry {
    signatures: HashMap<String, Arc<FunctionSignature>>,
}

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the signature of `name`
    ///
    /// Redeclaring an identical signature returns the existing entry; a
    /// different one fails with [`FfiError::DuplicateSignature`].
    pub fn declare(
        &mut self,
        name: &str,
        params: Vec<SemanticType>,
        ret: SemanticType,
    ) -> FfiResult<Arc<FunctionSignature>> {
        self.declare_signature(name, FunctionSignature::new(name, params, ret))
    }

    /// Declare a complete signature under `key`
    ///
    /// `key` is usually the symbol name; the binding resolver passes a
    /// library-qualified name so each library is its own scope.
    pub fn declare_signature(
        &mut self,
        key: &str,
        signature: FunctionSignature,
    ) -> FfiResult<Arc<FunctionSignature>> {
        signature.validate()?;

        if let Some(existing) = self.signatures.get(key) {
            if **existing == signature {
                return Ok(Arc::clone(existing));
            }
            return Err(FfiError::DuplicateSignature {
                name: key.to_string(),
                existing: existing.to_string(),
                requested: signature.to_string(),
            });
        }

        debug!(key, signature = %signature, "declared signature");
        let signature = Arc::new(signature);
        self.signatures
            .insert(key.to_string(), Arc::clone(&signature));
        Ok(signature)
    }

    /// Look up a declared signature
    pub fn lookup(&self, key: &str) -> FfiResult<Arc<FunctionSignature>> {
        self.signatures
            .get(key)
            .cloned()
            .ok_or_else(|| FfiError::UnknownSignature(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.signatures.contains_key(key)
    }

    /// Declared keys, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.signatures.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}
