//! FFI error domain.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::types::SemanticType;

/// Result type for FFI operations.
pub type FfiResult<T> = Result<T, FfiError>;

/// Error type for FFI operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FfiError {
    #[error("Library not found: '{path}': {reason}")]
    LibraryNotFound { path: String, reason: String },

    #[error("Symbol '{symbol}' not found in '{library}'")]
    SymbolNotFound { symbol: String, library: String },

    #[error("'{name}' is already declared as `{existing}`, cannot redeclare as `{requested}`")]
    DuplicateSignature {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("No signature declared for '{0}'")]
    UnknownSignature(String),

    #[error("'{function}' expects {expected} arguments, got {got}")]
    Arity {
        function: String,
        expected: usize,
        got: usize,
    },

    #[error("Argument {index}: value {value} is out of range for {ty}")]
    Range {
        index: usize,
        value: i64,
        ty: SemanticType,
    },

    #[error("Argument {index}: {required} bytes exceed capacity {capacity}")]
    Capacity {
        index: usize,
        required: usize,
        capacity: usize,
    },

    #[error("Argument {index}: expected {expected}, got {got}")]
    TypeMismatch {
        index: usize,
        expected: SemanticType,
        got: &'static str,
    },

    #[error("Argument {index}: byte sequence contains an interior NUL")]
    InteriorNul { index: usize },

    #[error("Division by zero in '{function}'")]
    DivisionByZero { function: String },

    #[error("Native call '{function}' failed: {reason}")]
    NativeCall { function: String, reason: String },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
}

impl FfiError {
    /// The classification the scenario layer matches against
    pub fn kind(&self) -> ErrorKind {
        match self {
            FfiError::LibraryNotFound { .. } => ErrorKind::LibraryNotFound,
            FfiError::SymbolNotFound { .. } => ErrorKind::SymbolNotFound,
            FfiError::DuplicateSignature { .. } => ErrorKind::DuplicateSignature,
            FfiError::UnknownSignature(_) => ErrorKind::UnknownSignature,
            FfiError::Arity { .. } => ErrorKind::Arity,
            FfiError::Range { .. } => ErrorKind::Range,
            FfiError::Capacity { .. } => ErrorKind::Capacity,
            FfiError::TypeMismatch { .. } | FfiError::InteriorNul { .. } => {
                ErrorKind::TypeMismatch
            }
            FfiError::DivisionByZero { .. } => ErrorKind::DivisionByZero,
            FfiError::NativeCall { .. } => ErrorKind::NativeCall,
            FfiError::InvalidSignature(_) => ErrorKind::InvalidSignature,
        }
    }

    /// True for conditions raised by native code rather than by the harness
    pub fn is_native_fault(&self) -> bool {
        matches!(
            self,
            FfiError::DivisionByZero { .. } | FfiError::NativeCall { .. }
        )
    }
}

/// Error classification without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LibraryNotFound,
    SymbolNotFound,
    DuplicateSignature,
    UnknownSignature,
    Arity,
    Range,
    Capacity,
    TypeMismatch,
    DivisionByZero,
    NativeCall,
    InvalidSignature,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::LibraryNotFound => "library_not_found",
            ErrorKind::SymbolNotFound => "symbol_not_found",
            ErrorKind::DuplicateSignature => "duplicate_signature",
            ErrorKind::UnknownSignature => "unknown_signature",
            ErrorKind::Arity => "arity",
            ErrorKind::Range => "range",
            ErrorKind::Capacity => "capacity",
            ErrorKind::TypeMismatch => "type_mismatch",
            ErrorKind::DivisionByZero => "division_by_zero",
            ErrorKind::NativeCall => "native_call",
            ErrorKind::InvalidSignature => "invalid_signature",
        };
        write!(f, "{}", name)
    }
}
