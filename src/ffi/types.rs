//! FFI Type System
//!
//! Semantic types, host values and call signatures for bound native functions.

use std::fmt;
use std::str::FromStr;

use super::error::{FfiError, FfiResult};

/// Maximum number of parameters a bound function may declare
pub const MAX_PARAMS: usize = 6;

/// Semantic types supported for parameters and return values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    /// No value (return only)
    Void,
    /// Signed 32-bit integer (`int`)
    I32,
    /// Read-only sequence of signed 32-bit integers (`const int*`)
    I32Seq,
    /// Element count for the preceding sequence (`size_t`)
    Length,
    /// Null-terminated byte sequence (`const char*`)
    CStr,
    /// Mutable fixed-capacity byte buffer (`char*`)
    MutBuffer,
    /// Single integer written back by native code (`int*`)
    OutI32,
}

impl SemanticType {
    /// Size in bytes of the value as it travels in an argument slot
    pub fn size(&self) -> usize {
        match self {
            SemanticType::Void => 0,
            SemanticType::I32 => 4,
            SemanticType::Length
            | SemanticType::I32Seq
            | SemanticType::CStr
            | SemanticType::MutBuffer
            | SemanticType::OutI32 => std::mem::size_of::<usize>(),
        }
    }

    /// Check if this type is passed as a pointer to harness-owned memory
    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            SemanticType::I32Seq
                | SemanticType::CStr
                | SemanticType::MutBuffer
                | SemanticType::OutI32
        )
    }

    /// Check if native code may write through this argument
    pub fn is_writable(&self) -> bool {
        matches!(self, SemanticType::MutBuffer | SemanticType::OutI32)
    }

    /// Check if this type may appear as a return type
    pub fn is_returnable(&self) -> bool {
        matches!(
            self,
            SemanticType::Void | SemanticType::I32 | SemanticType::CStr
        )
    }

    /// The C spelling used when printing signatures
    pub fn c_name(&self) -> &'static str {
        match self {
            SemanticType::Void => "void",
            SemanticType::I32 => "int",
            SemanticType::I32Seq => "const int*",
            SemanticType::Length => "size_t",
            SemanticType::CStr => "const char*",
            SemanticType::MutBuffer => "char*",
            SemanticType::OutI32 => "int*",
        }
    }

    /// Parse from a C or short-hand spelling
    pub fn from_str(s: &str) -> Option<Self> {
        match normalize_type(s).as_str() {
            "void" => Some(SemanticType::Void),
            "int" | "i32" | "int32_t" => Some(SemanticType::I32),
            "const int*" | "int const*" | "i32[]" | "ints" => Some(SemanticType::I32Seq),
            "size_t" | "usize" | "len" | "length" => Some(SemanticType::Length),
            "const char*" | "char const*" | "cstr" | "string" => Some(SemanticType::CStr),
            "char*" | "buffer" | "buf" => Some(SemanticType::MutBuffer),
            "int*" | "out_i32" | "out" => Some(SemanticType::OutI32),
            _ => None,
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.c_name())
    }
}

/// Collapse whitespace and glue `*` to the preceding token
fn normalize_type(s: &str) -> String {
    let joined = s
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    joined.replace(" *", "*")
}

/// A host-side value passed to or returned from a bound function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// No value
    Void,
    /// Host integer (checked against the native width when marshalled)
    Int(i64),
    /// Ordered integer sequence
    Ints(Vec<i64>),
    /// Byte sequence without the terminating zero
    Bytes(Vec<u8>),
    /// Mutable buffer content plus its declared capacity
    Buffer { data: Vec<u8>, capacity: usize },
}

impl Value {
    /// Byte sequence from text
    pub fn text(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }

    /// Mutable buffer with an explicit capacity
    pub fn buffer(data: impl Into<Vec<u8>>, capacity: usize) -> Self {
        Value::Buffer {
            data: data.into(),
            capacity,
        }
    }

    /// Mutable buffer sized for `data` plus its terminating zero
    pub fn text_buffer(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let capacity = data.len() + 1;
        Value::Buffer { data, capacity }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Bytes of a `Bytes` or `Buffer` value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Buffer { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Short name of the value's shape, used in type mismatch errors
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Int(_) => "integer",
            Value::Ints(_) => "integer sequence",
            Value::Bytes(_) => "bytes",
            Value::Buffer { .. } => "buffer",
        }
    }

    /// Parse a command-line argument according to the declared type
    ///
    /// Sequences are comma separated; buffers get a capacity of the text
    /// length plus one.
    pub fn parse_arg(ty: SemanticType, raw: &str) -> Option<Self> {
        match ty {
            SemanticType::I32 | SemanticType::Length | SemanticType::OutI32 => {
                raw.trim().parse().ok().map(Value::Int)
            }
            SemanticType::I32Seq => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse().ok())
                .collect::<Option<Vec<i64>>>()
                .map(Value::Ints),
            SemanticType::CStr => Some(Value::text(raw)),
            SemanticType::MutBuffer => Some(Value::text_buffer(raw.as_bytes())),
            SemanticType::Void => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "()"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Ints(vs) => {
                write!(f, "[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Bytes(b) => write!(f, "{:?}", String::from_utf8_lossy(b)),
            Value::Buffer { data, capacity } => {
                write!(f, "{:?}[{}]", String::from_utf8_lossy(data), capacity)
            }
        }
    }
}

/// How a native fault is detected and translated for one function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultRule {
    /// Refuse the call when the integer parameter at this index is zero
    ZeroDivisor(usize),
    /// The `int` return is a status code; anything but this value is a failure
    Status(i32),
}

impl fmt::Display for FaultRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultRule::ZeroDivisor(index) => write!(f, "zero_divisor:{}", index),
            FaultRule::Status(ok) => write!(f, "status:{}", ok),
        }
    }
}

impl FromStr for FaultRule {
    type Err = FfiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FfiError::InvalidSignature(format!("unknown fault rule '{}'", s));
        let (kind, arg) = s.trim().split_once(':').ok_or_else(invalid)?;
        match kind.trim() {
            "zero_divisor" => arg
                .trim()
                .parse()
                .map(FaultRule::ZeroDivisor)
                .map_err(|_| invalid()),
            "status" => arg
                .trim()
                .parse()
                .map(FaultRule::Status)
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

/// Function signature for a bound native function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    /// Exported symbol name
    pub name: String,
    /// Parameter types, in call order
    pub params: Vec<SemanticType>,
    /// Return type
    pub ret: SemanticType,
    /// Fault detection rules
    pub faults: Vec<FaultRule>,
}

impl FunctionSignature {
    /// Create a new function signature without fault rules
    pub fn new(name: impl Into<String>, params: Vec<SemanticType>, ret: SemanticType) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            faults: Vec::new(),
        }
    }

    /// Attach a fault rule
    pub fn with_fault(mut self, rule: FaultRule) -> Self {
        if !self.faults.contains(&rule) {
            self.faults.push(rule);
        }
        self
    }

    /// Validate argument count
    pub fn validate_args(&self, arg_count: usize) -> bool {
        arg_count == self.params.len()
    }

    /// Check the signature is one the harness can marshal and call
    pub fn validate(&self) -> FfiResult<()> {
        let invalid = |msg: String| Err(FfiError::InvalidSignature(format!("{}: {}", self, msg)));

        if self.name.is_empty() || self.name.contains('\0') {
            return invalid("symbol name must be non-empty and free of NUL".to_string());
        }
        if self.params.len() > MAX_PARAMS {
            return invalid(format!("at most {} parameters are supported", MAX_PARAMS));
        }
        if !self.ret.is_returnable() {
            return invalid(format!("{} cannot be returned", self.ret));
        }

        let mut seq_open = false;
        for (i, param) in self.params.iter().enumerate() {
            match param {
                SemanticType::Void => return invalid(format!("parameter {} is void", i)),
                SemanticType::I32Seq => seq_open = true,
                SemanticType::Length if !seq_open => {
                    return invalid(format!("length parameter {} has no preceding sequence", i))
                }
                _ => {}
            }
        }

        for rule in &self.faults {
            match *rule {
                FaultRule::ZeroDivisor(index) => {
                    if self.params.get(index) != Some(&SemanticType::I32) {
                        return invalid(format!("{} does not name an int parameter", rule));
                    }
                }
                FaultRule::Status(_) => {
                    if self.ret != SemanticType::I32 {
                        return invalid(format!("{} requires an int return", rule));
                    }
                }
            }
        }
        Ok(())
    }

    /// Parse from a C-style declaration
    ///
    /// Format: `return_type name(param_type [param_name], ...) [rule, ...]`
    pub fn parse(signature: &str) -> FfiResult<Self> {
        let invalid = |msg: &str| FfiError::InvalidSignature(format!("'{}': {}", signature, msg));
        let signature = signature.trim();

        let open = signature.find('(').ok_or_else(|| invalid("missing '('"))?;
        let close = signature.rfind(')').ok_or_else(|| invalid("missing ')'"))?;
        if close < open {
            return Err(invalid("unbalanced parentheses"));
        }

        let (ret_str, name) = split_trailing_ident(&signature[..open]);
        if name.is_empty() {
            return Err(invalid("missing function name"));
        }
        let ret = SemanticType::from_str(ret_str).ok_or_else(|| invalid("unknown return type"))?;

        let inner = signature[open + 1..close].trim();
        let mut params = Vec::new();
        if !inner.is_empty() && !inner.eq_ignore_ascii_case("void") {
            for param in inner.split(',') {
                params.push(parse_param(param).ok_or_else(|| invalid("unknown parameter type"))?);
            }
        }

        let mut sig = Self::new(name, params, ret);

        let rest = signature[close + 1..].trim();
        if !rest.is_empty() {
            let rules = rest
                .strip_prefix('[')
                .and_then(|r| r.strip_suffix(']'))
                .ok_or_else(|| invalid("trailing text after ')'"))?;
            for rule in rules.split(',').filter(|r| !r.trim().is_empty()) {
                sig = sig.with_fault(rule.parse()?);
            }
        }

        sig.validate()?;
        Ok(sig)
    }
}

/// Parse one parameter declaration, with or without a parameter name
fn parse_param(decl: &str) -> Option<SemanticType> {
    let decl = decl.trim();
    SemanticType::from_str(decl).or_else(|| {
        let (ty, name) = split_trailing_ident(decl);
        if name.is_empty() {
            None
        } else {
            SemanticType::from_str(ty)
        }
    })
}

/// Split `const char *texte` into (`const char *`, `texte`)
fn split_trailing_ident(decl: &str) -> (&str, &str) {
    let decl = decl.trim_end();
    let head = decl.trim_end_matches(|c: char| c.is_ascii_alphanumeric() || c == '_');
    (head.trim(), &decl[head.len()..])
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.ret, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")?;
        if !self.faults.is_empty() {
            write!(f, " [")?;
            for (i, rule) in self.faults.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", rule)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}
