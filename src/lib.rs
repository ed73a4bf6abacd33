//! Nativecheck - signature-checked native call harness
//!
//! Binds functions exported by pre-compiled shared libraries, calls them with
//! host values and checks the results. Every bound function carries an
//! immutable signature that is validated on each call; arguments are
//! marshalled into call-scoped native buffers and writable buffers are copied
//! back once native code returns.
//!
//! # Features
//!
//! - **Signature registry**: C-style declarations, immutable once declared
//! - **Marshalling**: `int`, `const int*` + `size_t`, `const char*`, `char*`
//!   buffers with fixed capacity, `int*` out-parameters
//! - **Binding resolver**: one load per library path, thread-safe cache
//! - **Fault translation**: zero divisors and status codes become typed errors
//! - **Scenarios**: TOML-driven end-to-end checks, run from the `nck` CLI
//!
//! # Example
//!
//! ```no_run
//! use nativecheck::{BindingResolver, FaultRule, FfiError, FunctionSignature, Value};
//!
//! let resolver = BindingResolver::new();
//!
//! let sig = FunctionSignature::parse("int diviser(int, int)")
//!     .unwrap()
//!     .with_fault(FaultRule::ZeroDivisor(1));
//! let diviser = resolver.resolve("./libarith.so", sig).unwrap();
//!
//! assert_eq!(diviser.call(&[Value::Int(10), Value::Int(3)]).unwrap(), Value::Int(3));
//! assert!(matches!(
//!     diviser.call(&[Value::Int(10), Value::Int(0)]),
//!     Err(FfiError::DivisionByZero { .. })
//! ));
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod ffi;
pub mod logging;
pub mod scenario;

pub use config::{ConfigError, HarnessConfig};
pub use ffi::{
    BindingResolver, BoundFunction, CallState, ErrorKind, FaultRule, FfiError, FfiResult,
    FunctionSignature, MarshalLimits, SemanticType, SignatureRegistry, Value,
};
pub use scenario::{Scenario, ScenarioFile, ScenarioOutcome, ScenarioReport, ScenarioRunner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
