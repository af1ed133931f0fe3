//! Language-agnostic outcome of a single execution attempt.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal state of an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The process exited with code 0.
    Success,
    /// The runtime failed, or the request could not be dispatched.
    Error,
    /// The process ran past the effective timeout and was killed.
    Timeout,
    /// The code was rejected before any process was spawned.
    SecurityViolation,
}

impl ExecutionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::SecurityViolation => "security_violation",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of executing (or refusing to execute) one snippet.
///
/// Built once by the executor that handled the request and read-only
/// afterwards: fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    status: ExecutionStatus,
    output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    execution_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    memory_used: Option<u64>,
    language: String,
    code: String,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

impl ExecutionResult {
    /// Successful run with the captured stdout.
    pub fn success(
        language: impl Into<String>,
        code: impl Into<String>,
        output: String,
        execution_time: f64,
    ) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output,
            error: None,
            execution_time,
            memory_used: None,
            language: language.into(),
            code: code.into(),
            metadata: HashMap::new(),
        }
    }

    /// Runtime failure. `output` keeps whatever stdout was produced first.
    pub fn error(
        language: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        output: String,
        execution_time: f64,
    ) -> Self {
        Self {
            status: ExecutionStatus::Error,
            output,
            error: Some(message.into()),
            execution_time,
            memory_used: None,
            language: language.into(),
            code: code.into(),
            metadata: HashMap::new(),
        }
    }

    /// Run killed after `timeout_secs`.
    pub fn timeout(
        language: impl Into<String>,
        code: impl Into<String>,
        timeout_secs: u64,
        partial_output: String,
        execution_time: f64,
    ) -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            output: partial_output,
            error: Some(format!(
                "Execution timed out after {timeout_secs} {}",
                if timeout_secs == 1 { "second" } else { "seconds" }
            )),
            execution_time,
            memory_used: None,
            language: language.into(),
            code: code.into(),
            metadata: HashMap::from([("timeout".to_string(), Value::from(timeout_secs))]),
        }
    }

    /// Pre-flight rejection. Nothing ran, so the duration is zero.
    pub fn security_violation(
        language: impl Into<String>,
        code: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            status: ExecutionStatus::SecurityViolation,
            output: String::new(),
            error: Some(reason.into()),
            execution_time: 0.0,
            memory_used: None,
            language: language.into(),
            code: code.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a best-effort memory reading.
    #[must_use]
    pub const fn with_memory_used(mut self, memory_used: Option<u64>) -> Self {
        self.memory_used = memory_used;
        self
    }

    /// Attach an executor-specific metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub const fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Wall-clock seconds spent on the attempt.
    pub const fn execution_time(&self) -> f64 {
        self.execution_time
    }

    pub const fn memory_used(&self) -> Option<u64> {
        self.memory_used
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub const fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Exit code of the child, when one ran to completion.
    pub fn returncode(&self) -> Option<i64> {
        self.metadata.get("returncode").and_then(Value::as_i64)
    }
}
