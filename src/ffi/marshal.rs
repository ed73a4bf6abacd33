//! Marshalling Layer
//!
//! Converts host [`Value`]s into call-scoped native memory and back. Every
//! block is owned by a [`MarshalledBuffer`] that lives exactly as long as the
//! invocation that created it; pointers handed to native code never outlive it.

use std::ffi::c_int;

use super::error::{FfiError, FfiResult};
use super::types::{SemanticType, Value};

/// Default upper bound on a mutable buffer's declared capacity (1 MiB)
pub const DEFAULT_MAX_CAPACITY: usize = 1 << 20;

/// Limits applied while marshalling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarshalLimits {
    /// Largest capacity a mutable buffer may declare
    pub max_capacity: usize,
}

impl Default for MarshalLimits {
    fn default() -> Self {
        Self {
            max_capacity: DEFAULT_MAX_CAPACITY,
        }
    }
}

/// Native-layout storage backing one argument
#[derive(Debug)]
enum Storage {
    /// Nothing to pass
    Empty,
    /// Integer passed by value
    Word(c_int),
    /// Element count passed by value
    Count(usize),
    /// Contiguous `int` array
    Ints(Vec<c_int>),
    /// NUL-terminated text block
    Bytes(Vec<u8>),
    /// Writable block: `capacity` bytes followed by one NUL guard byte
    Buffer(Vec<u8>),
    /// Single `int` cell native code writes through
    Cell(Box<c_int>),
}

/// A harness-owned block of memory in native layout
#[derive(Debug)]
pub struct MarshalledBuffer {
    ty: SemanticType,
    storage: Storage,
}

impl MarshalledBuffer {
    pub fn semantic_type(&self) -> SemanticType {
        self.ty
    }

    /// Number of bytes of native memory owned by this buffer
    pub fn native_len(&self) -> usize {
        match &self.storage {
            Storage::Empty => 0,
            Storage::Word(_) => std::mem::size_of::<c_int>(),
            Storage::Count(_) => std::mem::size_of::<usize>(),
            Storage::Ints(v) => std::mem::size_of_val(v.as_slice()),
            Storage::Bytes(b) | Storage::Buffer(b) => b.len(),
            Storage::Cell(_) => std::mem::size_of::<c_int>(),
        }
    }

    /// Raw native bytes, for byte-backed buffers
    ///
    /// A writable buffer reports its declared capacity; the guard byte is
    /// not part of it.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Bytes(b) => Some(b),
            Storage::Buffer(b) => Some(&b[..b.len() - 1]),
            _ => None,
        }
    }

    /// Element count of an integer sequence
    pub(crate) fn element_count(&self) -> Option<usize> {
        match &self.storage {
            Storage::Ints(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Value of a by-value integer argument
    pub(crate) fn word_value(&self) -> Option<i64> {
        match &self.storage {
            Storage::Word(v) => Some(*v as i64),
            Storage::Count(n) => Some(*n as i64),
            _ => None,
        }
    }

    /// The register-sized word handed to the native call
    ///
    /// Pointer words stay valid until this buffer is dropped.
    pub(crate) fn as_word(&mut self) -> u64 {
        match &mut self.storage {
            Storage::Empty => 0,
            Storage::Word(v) => *v as i64 as u64,
            Storage::Count(n) => *n as u64,
            Storage::Ints(v) => v.as_ptr() as u64,
            Storage::Bytes(b) | Storage::Buffer(b) => b.as_mut_ptr() as u64,
            Storage::Cell(c) => c.as_mut() as *mut c_int as u64,
        }
    }
}

/// Marshal a value with default limits
pub fn to_native(value: &Value, ty: SemanticType) -> FfiResult<MarshalledBuffer> {
    Marshaller::default().to_native(0, value, ty)
}

/// Read a host value back out of native memory
pub fn from_native(buffer: &MarshalledBuffer, ty: SemanticType) -> FfiResult<Value> {
    Marshaller::default().from_native(0, buffer, ty)
}

/// Converts values for one argument position at a time
#[derive(Debug, Clone, Copy, Default)]
pub struct Marshaller {
    limits: MarshalLimits,
}

impl Marshaller {
    pub fn new(limits: MarshalLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> MarshalLimits {
        self.limits
    }

    /// Convert `value` into native layout for argument `index`
    pub fn to_native(
        &self,
        index: usize,
        value: &Value,
        ty: SemanticType,
    ) -> FfiResult<MarshalledBuffer> {
        let mismatch = || FfiError::TypeMismatch {
            index,
            expected: ty,
            got: value.kind_name(),
        };

        let storage = match (ty, value) {
            (SemanticType::Void, Value::Void) => Storage::Empty,
            (SemanticType::I32, Value::Int(v)) => Storage::Word(narrow(index, *v, ty)?),
            (SemanticType::OutI32, Value::Int(v)) => {
                Storage::Cell(Box::new(narrow(index, *v, ty)?))
            }
            (SemanticType::Length, Value::Int(v)) => {
                let count = usize::try_from(*v).map_err(|_| FfiError::Range {
                    index,
                    value: *v,
                    ty,
                })?;
                Storage::Count(count)
            }
            (SemanticType::I32Seq, Value::Ints(values)) => Storage::Ints(
                values
                    .iter()
                    .map(|&v| narrow(index, v, ty))
                    .collect::<FfiResult<Vec<_>>>()?,
            ),
            (SemanticType::CStr, Value::Bytes(bytes)) => {
                if bytes.contains(&0) {
                    return Err(FfiError::InteriorNul { index });
                }
                let mut block = Vec::with_capacity(bytes.len() + 1);
                block.extend_from_slice(bytes);
                block.push(0);
                Storage::Bytes(block)
            }
            (SemanticType::MutBuffer, Value::Buffer { data, capacity }) => {
                if *capacity > self.limits.max_capacity {
                    return Err(FfiError::Capacity {
                        index,
                        required: *capacity,
                        capacity: self.limits.max_capacity,
                    });
                }
                if data.len() > *capacity {
                    return Err(FfiError::Capacity {
                        index,
                        required: data.len(),
                        capacity: *capacity,
                    });
                }
                if data.contains(&0) {
                    return Err(FfiError::InteriorNul { index });
                }
                // Native code sees the guard as a terminator even when `data`
                // fills the whole capacity.
                let mut block = vec![0u8; *capacity + 1];
                block[..data.len()].copy_from_slice(data);
                Storage::Buffer(block)
            }
            _ => return Err(mismatch()),
        };

        Ok(MarshalledBuffer { ty, storage })
    }

    /// Convert native memory for argument `index` back into a host value
    pub fn from_native(
        &self,
        index: usize,
        buffer: &MarshalledBuffer,
        ty: SemanticType,
    ) -> FfiResult<Value> {
        let value = match (ty, &buffer.storage) {
            (SemanticType::Void, Storage::Empty) => Value::Void,
            (SemanticType::I32, Storage::Word(v)) => Value::Int(*v as i64),
            (SemanticType::OutI32, Storage::Cell(c)) => Value::Int(**c as i64),
            (SemanticType::Length, Storage::Count(n)) => Value::Int(*n as i64),
            (SemanticType::I32Seq, Storage::Ints(v)) => {
                Value::Ints(v.iter().map(|&x| x as i64).collect())
            }
            (SemanticType::CStr, Storage::Bytes(b)) => Value::Bytes(until_nul(b).to_vec()),
            (SemanticType::MutBuffer, Storage::Buffer(b)) => {
                let capacity = b.len() - 1;
                Value::Buffer {
                    data: until_nul(&b[..capacity]).to_vec(),
                    capacity,
                }
            }
            _ => {
                return Err(FfiError::TypeMismatch {
                    index,
                    expected: ty,
                    got: "foreign buffer",
                })
            }
        };
        Ok(value)
    }
}

/// Narrow a host integer to the native `int` width
fn narrow(index: usize, value: i64, ty: SemanticType) -> FfiResult<c_int> {
    c_int::try_from(value).map_err(|_| FfiError::Range { index, value, ty })
}

/// The prefix of `bytes` before the first zero byte
fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}
