//! Invocation requests and results
//!
//! The invocation path never returns an error: every outcome, including an
//! unknown tool or an open circuit, is an [`InvocationResult`] carrying the
//! tool name and correlation ID.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A request to invoke one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Tool to invoke
    pub tool_name: String,

    /// Opaque arguments handed to the adapter
    #[serde(default)]
    pub arguments: Value,

    /// Caller-supplied or generated correlation ID
    #[serde(default = "generate_correlation_id")]
    pub correlation_id: String,
}

impl InvocationRequest {
    /// Create a request with a generated correlation ID
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            correlation_id: generate_correlation_id(),
        }
    }

    /// Create a request from JSON-encoded arguments
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Serialization`](crate::error::ToolgateError::Serialization)
    /// when `arguments` is not valid JSON.
    pub fn from_json(tool_name: impl Into<String>, arguments: &str) -> crate::error::Result<Self> {
        let arguments: Value = serde_json::from_str(arguments)?;
        Ok(Self::new(tool_name, arguments))
    }

    /// Builder: use a caller-supplied correlation ID
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// Overall outcome of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationStatus {
    /// Adapter succeeded, output within budget
    Success,
    /// Invocation did not succeed; see `error_kind`
    Failure,
    /// Rejected by the circuit breaker without calling the adapter
    CircuitOpen,
    /// Tool name was never registered
    UnknownTool,
    /// Adapter succeeded, output trimmed to budget
    BudgetTrimmed,
}

impl InvocationStatus {
    /// Stable wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationStatus::Success => "SUCCESS",
            InvocationStatus::Failure => "FAILURE",
            InvocationStatus::CircuitOpen => "CIRCUIT_OPEN",
            InvocationStatus::UnknownTool => "UNKNOWN_TOOL",
            InvocationStatus::BudgetTrimmed => "BUDGET_TRIMMED",
        }
    }

    /// Whether the adapter call succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationStatus::Success | InvocationStatus::BudgetTrimmed)
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an invocation did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Tool name was never registered
    UnknownTool,
    /// No resolution tier produced an existing location
    ToolNotResolvable,
    /// The circuit refused the call
    CircuitOpen,
    /// Adapter error or timeout
    InvocationFailure,
    /// Caller cancelled the call
    Cancelled,
}

impl ErrorKind {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::ToolNotResolvable => "tool_not_resolvable",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::InvocationFailure => "invocation_failure",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Whether this kind counts toward the breaker's consecutive failures
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, ErrorKind::InvocationFailure)
    }

    /// Result status reported for this kind
    pub fn status(&self) -> InvocationStatus {
        match self {
            ErrorKind::UnknownTool => InvocationStatus::UnknownTool,
            ErrorKind::CircuitOpen => InvocationStatus::CircuitOpen,
            ErrorKind::ToolNotResolvable | ErrorKind::InvocationFailure | ErrorKind::Cancelled => {
                InvocationStatus::Failure
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Tool that was requested
    pub tool_name: String,

    /// Correlation ID of the request
    pub correlation_id: String,

    /// Overall status
    pub status: InvocationStatus,

    /// Budgeted output, on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Human-readable failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    /// Failure classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Wall time spent in the runtime
    pub duration_ms: u64,

    /// Output size before budgeting, on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,

    /// Artifacts the tool reported as modified
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modified_artifacts: Vec<String>,
}

impl InvocationResult {
    /// Successful result; status reflects whether output was trimmed
    pub fn success(
        tool_name: impl Into<String>,
        correlation_id: impl Into<String>,
        output: String,
        trimmed: bool,
        original_size: usize,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            correlation_id: correlation_id.into(),
            status: if trimmed {
                InvocationStatus::BudgetTrimmed
            } else {
                InvocationStatus::Success
            },
            output: Some(output),
            error_detail: None,
            error_kind: None,
            duration_ms: 0,
            original_size: Some(original_size),
            modified_artifacts: Vec::new(),
        }
    }

    /// Unsuccessful result of the given kind
    pub fn failure(
        tool_name: impl Into<String>,
        correlation_id: impl Into<String>,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            correlation_id: correlation_id.into(),
            status: kind.status(),
            output: None,
            error_detail: Some(detail.into()),
            error_kind: Some(kind),
            duration_ms: 0,
            original_size: None,
            modified_artifacts: Vec::new(),
        }
    }

    /// Builder: set the duration
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Builder: set the modified artifacts
    pub fn with_modified_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.modified_artifacts = artifacts;
        self
    }

    /// Whether the adapter call succeeded
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the output was trimmed to budget
    pub fn is_trimmed(&self) -> bool {
        self.status == InvocationStatus::BudgetTrimmed
    }
}

/// Several invocations issued together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Correlation ID of the batch as a whole
    #[serde(default = "generate_correlation_id")]
    pub correlation_id: String,

    /// Requests to run concurrently
    pub requests: Vec<InvocationRequest>,
}

impl BatchRequest {
    /// Create a batch with a generated correlation ID
    pub fn new(requests: Vec<InvocationRequest>) -> Self {
        Self {
            correlation_id: generate_correlation_id(),
            requests,
        }
    }

    /// Builder: use a caller-supplied correlation ID
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// Results of a batch, in request order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Correlation ID of the batch
    pub correlation_id: String,

    /// Per-request results
    pub results: Vec<InvocationResult>,

    /// Number of results per status name
    pub outcomes: BTreeMap<String, usize>,
}

impl BatchResult {
    /// Collect results and tally their statuses
    pub fn new(correlation_id: impl Into<String>, results: Vec<InvocationResult>) -> Self {
        let mut outcomes = BTreeMap::new();
        for result in &results {
            *outcomes.entry(result.status.as_str().to_string()).or_insert(0) += 1;
        }
        Self {
            correlation_id: correlation_id.into(),
            results,
            outcomes,
        }
    }

    /// Number of requests in the batch
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the batch was empty
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
