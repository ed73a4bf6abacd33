//! Scenario Runner
//!
//! Table-driven end-to-end checks: each scenario names a library, a
//! signature, arguments and the expected outcome, and is run through a
//! [`BindingResolver`].
//!
//! ```toml
//! [[scenario]]
//! name = "addition"
//! library = "libarith.so"
//! signature = "int addition(int, int)"
//! args = [5, 7]
//! expect = 12
//!
//! [[scenario]]
//! name = "divide by zero"
//! library = "libarith.so"
//! signature = "int diviser(int, int)"
//! faults = ["zero_divisor:1"]
//! args = [10, 0]
//! expect_error = "division_by_zero"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::ffi::{
    BindingResolver, ErrorKind, FaultRule, FfiError, FunctionSignature, SemanticType, Value,
};

/// Scenario file errors.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse scenario file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A scenario argument or expected value as written in TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScenarioValue {
    Int(i64),
    Ints(Vec<i64>),
    Text(String),
    Buffer {
        buffer: String,
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl ScenarioValue {
    /// Convert into a host value; buffers default to text length plus one
    pub fn to_value(&self) -> Value {
        match self {
            ScenarioValue::Int(v) => Value::Int(*v),
            ScenarioValue::Ints(vs) => Value::Ints(vs.clone()),
            ScenarioValue::Text(s) => Value::text(s),
            ScenarioValue::Buffer { buffer, capacity } => match capacity {
                Some(capacity) => Value::buffer(buffer.as_bytes(), *capacity),
                None => Value::text_buffer(buffer.as_bytes()),
            },
        }
    }
}

/// One end-to-end check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Library path, relative paths resolved by the resolver's base directory
    pub library: PathBuf,
    /// C-style declaration, see [`FunctionSignature::parse`]
    pub signature: String,
    #[serde(default)]
    pub faults: Vec<String>,
    #[serde(default)]
    pub args: Vec<ScenarioValue>,
    /// Expected return value; absent means `void`
    #[serde(default)]
    pub expect: Option<ScenarioValue>,
    /// Expected error instead of a value
    #[serde(default)]
    pub expect_error: Option<ErrorKind>,
    /// Expected content of the first `char*` buffer after the call
    #[serde(default)]
    pub expect_buffer: Option<String>,
    /// Expected value of the first `int*` out-parameter after the call
    #[serde(default)]
    pub expect_out: Option<i64>,
}

impl Scenario {
    /// Parse the declaration and attach the listed fault rules
    pub fn function_signature(&self) -> Result<FunctionSignature, FfiError> {
        let mut signature = FunctionSignature::parse(&self.signature)?;
        for rule in &self.faults {
            signature = signature.with_fault(rule.parse::<FaultRule>()?);
        }
        signature.validate()?;
        Ok(signature)
    }
}

/// Contents of a scenario file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFile {
    #[serde(default, rename = "scenario")]
    pub scenarios: Vec<Scenario>,
}

impl ScenarioFile {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ScenarioError> {
        Ok(toml::from_str(content)?)
    }
}

/// Result of running a single scenario
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub name: String,
    pub passed: bool,
    /// Value returned by the call, if it succeeded
    pub actual: Option<Value>,
    /// Error raised by the harness or translated from native code
    pub error: Option<FfiError>,
    /// Why the scenario failed
    pub mismatch: Option<String>,
}

impl fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "[{}] {}", status, self.name)?;
        match (&self.actual, &self.error) {
            (Some(value), _) => write!(f, " -> {}", value)?,
            (None, Some(err)) => write!(f, " -> {}", err)?,
            (None, None) => {}
        }
        if let Some(reason) = &self.mismatch {
            write!(f, " ({})", reason)?;
        }
        Ok(())
    }
}

/// Summary of a scenario run
#[derive(Debug, Clone, Default)]
pub struct ScenarioReport {
    pub outcomes: Vec<ScenarioOutcome>,
}

impl ScenarioReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn get(&self, name: &str) -> Option<&ScenarioOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }
}

/// Runs scenarios against a binding resolver
pub struct ScenarioRunner<'a> {
    resolver: &'a BindingResolver,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(resolver: &'a BindingResolver) -> Self {
        Self { resolver }
    }

    /// Run every scenario in order
    pub fn run_all(&self, scenarios: &[Scenario]) -> ScenarioReport {
        let outcomes: Vec<ScenarioOutcome> = scenarios.iter().map(|s| self.run(s)).collect();
        let report = ScenarioReport { outcomes };
        info!(
            passed = report.passed(),
            failed = report.failed(),
            "scenario run finished"
        );
        report
    }

    /// Run a single scenario
    pub fn run(&self, scenario: &Scenario) -> ScenarioOutcome {
        debug!(name = %scenario.name, "running scenario");
        let mut args: Vec<Value> = scenario.args.iter().map(ScenarioValue::to_value).collect();

        let result = scenario
            .function_signature()
            .and_then(|sig| self.resolver.resolve(&scenario.library, sig))
            .and_then(|function| {
                let value = function.invoke(&mut args)?;
                Ok((function, value))
            });

        let mut outcome = ScenarioOutcome {
            name: scenario.name.clone(),
            passed: false,
            actual: None,
            error: None,
            mismatch: None,
        };

        match result {
            Ok((function, value)) => {
                let params = &function.signature().params;
                let first = |ty: SemanticType| {
                    params
                        .iter()
                        .position(|p| *p == ty)
                        .and_then(|i| args.get(i))
                };
                outcome.mismatch = check_value(scenario, &value)
                    .or_else(|| check_buffer(scenario, first(SemanticType::MutBuffer)))
                    .or_else(|| check_out(scenario, first(SemanticType::OutI32)));
                outcome.actual = Some(value);
            }
            Err(err) => {
                outcome.mismatch = match scenario.expect_error {
                    Some(kind) if kind == err.kind() => None,
                    Some(kind) => Some(format!("expected {}, got {}", kind, err.kind())),
                    None => Some(format!("unexpected error {}", err.kind())),
                };
                outcome.error = Some(err);
            }
        }

        outcome.passed = outcome.mismatch.is_none();
        outcome
    }
}

fn check_value(scenario: &Scenario, value: &Value) -> Option<String> {
    if let Some(kind) = scenario.expect_error {
        return Some(format!("expected {}, call succeeded", kind));
    }
    let expected = scenario
        .expect
        .as_ref()
        .map(ScenarioValue::to_value)
        .unwrap_or(Value::Void);
    (expected != *value).then(|| format!("expected {}, got {}", expected, value))
}

fn check_buffer(scenario: &Scenario, buffer: Option<&Value>) -> Option<String> {
    let expected = scenario.expect_buffer.as_ref()?;
    let Some(actual) = buffer.and_then(Value::as_bytes) else {
        return Some("no char* buffer to check".to_string());
    };
    (actual != expected.as_bytes()).then(|| {
        format!(
            "expected buffer {:?}, got {:?}",
            expected,
            String::from_utf8_lossy(actual)
        )
    })
}

fn check_out(scenario: &Scenario, out: Option<&Value>) -> Option<String> {
    let expected = scenario.expect_out?;
    match out.and_then(Value::as_int) {
        Some(actual) if actual == expected => None,
        Some(actual) => Some(format!("expected out {}, got {}", expected, actual)),
        None => Some("no int* out-parameter to check".to_string()),
    }
}
