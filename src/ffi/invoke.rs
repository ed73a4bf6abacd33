//! Invocation & Result Translation
//!
//! Drives one call through validation, marshalling, the native call and
//! result translation, mapping native fault conditions into [`FfiError`].

use std::ffi::{c_char, CStr};
use std::fmt;

use tracing::{trace, warn};

use super::error::{FfiError, FfiResult};
use super::loader::BoundFunction;
use super::marshal::{MarshalledBuffer, Marshaller};
use super::types::{FaultRule, SemanticType, Value};

/// Lifecycle of a single invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    ArgumentsReceived,
    Validated,
    Marshalled,
    NativeCallInFlight,
    Succeeded,
    NativeFaultDetected,
    ResultTranslated,
    /// Arguments refused before any native memory was handed out
    Rejected,
}

impl CallState {
    /// Whether `next` is a legal successor of this state
    ///
    /// Pre-call guards move straight from `Marshalled` to
    /// `NativeFaultDetected` without entering native code.
    pub fn can_advance_to(self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (ArgumentsReceived, Validated)
                | (Validated, Marshalled)
                | (Marshalled, NativeCallInFlight)
                | (Marshalled, NativeFaultDetected)
                | (NativeCallInFlight, Succeeded)
                | (NativeCallInFlight, NativeFaultDetected)
                | (Succeeded, ResultTranslated)
                | (NativeFaultDetected, ResultTranslated)
                | (ArgumentsReceived, Rejected)
                | (Validated, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::ResultTranslated | CallState::Rejected)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State tracker for one invocation
#[derive(Debug)]
pub struct Invocation<'a> {
    function: &'a str,
    state: CallState,
    history: Vec<CallState>,
}

impl<'a> Invocation<'a> {
    pub fn new(function: &'a str) -> Self {
        Self {
            function,
            state: CallState::ArgumentsReceived,
            history: vec![CallState::ArgumentsReceived],
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Every state visited so far, in order
    pub fn history(&self) -> &[CallState] {
        &self.history
    }

    fn advance(&mut self, next: CallState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        trace!(function = self.function, from = %self.state, to = %next, "call state");
        self.state = next;
        self.history.push(next);
    }
}

impl BoundFunction {
    /// Invoke with the given arguments
    ///
    /// Writable arguments (`char*` buffers, `int*` cells) are updated in place
    /// with whatever native code left in them.
    pub fn invoke(&self, args: &mut [Value]) -> FfiResult<Value> {
        let mut invocation = Invocation::new(&self.signature.name);
        self.invoke_tracked(&mut invocation, args)
    }

    /// Invoke without observing writes to mutable arguments
    pub fn call(&self, args: &[Value]) -> FfiResult<Value> {
        let mut owned = args.to_vec();
        self.invoke(&mut owned)
    }

    /// Invoke while recording state transitions in `invocation`
    pub fn invoke_tracked(
        &self,
        invocation: &mut Invocation<'_>,
        args: &mut [Value],
    ) -> FfiResult<Value> {
        let sig = &*self.signature;

        if !sig.validate_args(args.len()) {
            invocation.advance(CallState::Rejected);
            return Err(FfiError::Arity {
                function: sig.name.clone(),
                expected: sig.params.len(),
                got: args.len(),
            });
        }
        invocation.advance(CallState::Validated);

        let marshaller = Marshaller::new(self.limits);
        let mut buffers = match self.marshal_args(&marshaller, args) {
            Ok(buffers) => buffers,
            Err(err) => {
                invocation.advance(CallState::Rejected);
                return Err(err);
            }
        };
        invocation.advance(CallState::Marshalled);

        if let Some(fault) = self.guard(&buffers) {
            invocation.advance(CallState::NativeFaultDetected);
            warn!(function = %sig.name, error = %fault, "native fault refused before call");
            invocation.advance(CallState::ResultTranslated);
            return Err(fault);
        }

        let words: Vec<u64> = buffers.iter_mut().map(MarshalledBuffer::as_word).collect();
        invocation.advance(CallState::NativeCallInFlight);
        // Safety: the symbol was resolved under this signature and every
        // pointer word refers to a buffer in `buffers`, alive until the end
        // of this function.
        let raw = unsafe { dispatch(self.addr, &words) };

        let copied_back: FfiResult<()> = buffers
            .iter()
            .zip(&sig.params)
            .enumerate()
            .filter(|(_, (_, ty))| ty.is_writable())
            .try_for_each(|(i, (buffer, ty))| {
                args[i] = marshaller.from_native(i, buffer, *ty)?;
                Ok(())
            });
        drop(buffers);

        match copied_back.and_then(|()| self.translate_return(raw)) {
            Ok(value) => {
                invocation.advance(CallState::Succeeded);
                invocation.advance(CallState::ResultTranslated);
                Ok(value)
            }
            Err(fault) => {
                invocation.advance(CallState::NativeFaultDetected);
                warn!(function = %sig.name, error = %fault, "native fault");
                invocation.advance(CallState::ResultTranslated);
                Err(fault)
            }
        }
    }

    fn marshal_args(
        &self,
        marshaller: &Marshaller,
        args: &[Value],
    ) -> FfiResult<Vec<MarshalledBuffer>> {
        let mut buffers = Vec::with_capacity(args.len());
        let mut seq_len = 0usize;

        for (i, (value, ty)) in args.iter().zip(&self.signature.params).enumerate() {
            let buffer = marshaller.to_native(i, value, *ty)?;
            match ty {
                SemanticType::I32Seq => seq_len = buffer.element_count().unwrap_or(0),
                SemanticType::Length => {
                    let count = buffer.word_value().unwrap_or(0);
                    if count as usize > seq_len {
                        return Err(FfiError::Range {
                            index: i,
                            value: count,
                            ty: *ty,
                        });
                    }
                }
                _ => {}
            }
            buffers.push(buffer);
        }
        Ok(buffers)
    }

    /// Apply pre-call fault rules to the marshalled arguments
    fn guard(&self, buffers: &[MarshalledBuffer]) -> Option<FfiError> {
        self.signature.faults.iter().find_map(|rule| match *rule {
            FaultRule::ZeroDivisor(index) => {
                let divisor = buffers.get(index).and_then(MarshalledBuffer::word_value);
                (divisor == Some(0)).then(|| FfiError::DivisionByZero {
                    function: self.signature.name.clone(),
                })
            }
            FaultRule::Status(_) => None,
        })
    }

    /// Convert the raw return word and apply post-call fault rules
    fn translate_return(&self, raw: u64) -> FfiResult<Value> {
        let sig = &*self.signature;
        let value = match sig.ret {
            SemanticType::Void => Value::Void,
            SemanticType::I32 => Value::Int(raw as u32 as i32 as i64),
            SemanticType::CStr => {
                let ptr = raw as usize as *const c_char;
                if ptr.is_null() {
                    return Err(FfiError::NativeCall {
                        function: sig.name.clone(),
                        reason: "returned a null string".to_string(),
                    });
                }
                // Safety: the signature declares a NUL-terminated string owned
                // by the library; it is copied before returning.
                let bytes = unsafe { CStr::from_ptr(ptr) }.to_bytes().to_vec();
                Value::Bytes(bytes)
            }
            other => {
                return Err(FfiError::InvalidSignature(format!(
                    "{} cannot be returned",
                    other
                )))
            }
        };

        for rule in &sig.faults {
            if let (FaultRule::Status(ok), Value::Int(code)) = (rule, &value) {
                if *code != *ok as i64 {
                    return Err(FfiError::NativeCall {
                        function: sig.name.clone(),
                        reason: format!("status {}", code),
                    });
                }
            }
        }
        Ok(value)
    }
}

/// Call the function at `addr` with register-sized arguments
///
/// Integer and pointer arguments share the general-purpose argument
/// registers on supported C ABIs, so one shape per arity covers every
/// signature the harness accepts.
///
/// # Safety
///
/// `addr` must be a function whose C signature matches `words` in count and
/// whose pointer arguments are valid for the duration of the call.
unsafe fn dispatch(addr: usize, words: &[u64]) -> u64 {
    type Fn0 = unsafe extern "C" fn() -> u64;
    type Fn1 = unsafe extern "C" fn(u64) -> u64;
    type Fn2 = unsafe extern "C" fn(u64, u64) -> u64;
    type Fn3 = unsafe extern "C" fn(u64, u64, u64) -> u64;
    type Fn4 = unsafe extern "C" fn(u64, u64, u64, u64) -> u64;
    type Fn5 = unsafe extern "C" fn(u64, u64, u64, u64, u64) -> u64;
    type Fn6 = unsafe extern "C" fn(u64, u64, u64, u64, u64, u64) -> u64;

    match *words {
        [] => std::mem::transmute::<usize, Fn0>(addr)(),
        [a] => std::mem::transmute::<usize, Fn1>(addr)(a),
        [a, b] => std::mem::transmute::<usize, Fn2>(addr)(a, b),
        [a, b, c] => std::mem::transmute::<usize, Fn3>(addr)(a, b, c),
        [a, b, c, d] => std::mem::transmute::<usize, Fn4>(addr)(a, b, c, d),
        [a, b, c, d, e] => std::mem::transmute::<usize, Fn5>(addr)(a, b, c, d, e),
        [a, b, c, d, e, f] => std::mem::transmute::<usize, Fn6>(addr)(a, b, c, d, e, f),
        // Signatures with more parameters are rejected at declaration.
        _ => unreachable!("arity above {}", super::types::MAX_PARAMS),
    }
}
