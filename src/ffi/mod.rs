//! FFI Module for Nativecheck
//!
//! Binds, calls and validates functions exported by native shared libraries
//! with a flat C ABI.
//!
//! # Architecture
//!
//! ```text
//! Scenario / caller
//!       │
//!       ▼
//! BindingResolver   (load library once per path, find symbol)
//!       │
//!       ▼
//! SignatureRegistry (attach immutable signature)
//!       │
//!       ▼
//! Marshaller        (host values -> call-scoped native buffers)
//!       │
//!       ▼
//! Native Function Call
//!       │
//!       ▼
//! Result translation (copy-back, return value, fault rules)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use nativecheck::ffi::{BindingResolver, FunctionSignature, Value};
//!
//! let resolver = BindingResolver::new();
//! let sig = FunctionSignature::parse("int addition(int, int)").unwrap();
//! let addition = resolver.resolve("./libaddition.so", sig).unwrap();
//! assert_eq!(addition.call(&[Value::Int(5), Value::Int(7)]).unwrap(), Value::Int(12));
//! ```

mod error;
mod invoke;
mod loader;
mod marshal;
mod registry;
mod types;

pub use error::{ErrorKind, FfiError, FfiResult};
pub use invoke::{CallState, Invocation};
pub use loader::{BindingResolver, BoundFunction, NativeLibrary};
pub use marshal::{
    from_native, to_native, MarshalLimits, MarshalledBuffer, Marshaller, DEFAULT_MAX_CAPACITY,
};
pub use registry::SignatureRegistry;
pub use types::{FaultRule, FunctionSignature, SemanticType, Value, MAX_PARAMS};
