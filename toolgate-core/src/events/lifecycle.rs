//! Lifecycle events emitted around tool invocations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Kind of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEventType {
    /// Emitted before the adapter is called
    Started,
    /// Terminal event for a successful invocation
    Completed,
    /// Terminal event for any unsuccessful invocation
    Failed,
    /// A tool modified an artifact
    CodeModified,
    /// A batch of invocations finished
    BatchCompleted,
}

impl LifecycleEventType {
    /// Whether this event ends an invocation
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleEventType::Completed | LifecycleEventType::Failed)
    }

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventType::Started => "started",
            LifecycleEventType::Completed => "completed",
            LifecycleEventType::Failed => "failed",
            LifecycleEventType::CodeModified => "code_modified",
            LifecycleEventType::BatchCompleted => "batch_completed",
        }
    }
}

/// Structured notification about a tool invocation
///
/// Ownership passes to the event bus on publish; nothing is retained here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Unique event ID
    pub id: Uuid,

    /// Event type
    #[serde(rename = "type")]
    pub event_type: LifecycleEventType,

    /// Tool the event concerns
    pub tool_name: String,

    /// Correlation ID of the originating request
    pub correlation_id: String,

    /// When the event was created
    pub timestamp: DateTime<Utc>,

    /// Event-specific data
    pub payload: Map<String, Value>,
}

impl LifecycleEvent {
    /// Create an event with an empty payload
    pub fn new(
        event_type: LifecycleEventType,
        tool_name: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            tool_name: tool_name.into(),
            correlation_id: correlation_id.into(),
            timestamp: Utc::now(),
            payload: Map::new(),
        }
    }

    /// Add a payload entry
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Invocation is about to call the adapter
    pub fn started(tool_name: &str, correlation_id: &str, args_digest: &str) -> Self {
        Self::new(LifecycleEventType::Started, tool_name, correlation_id)
            .with("args_digest", args_digest)
    }

    /// Invocation finished successfully
    pub fn completed(
        tool_name: &str,
        correlation_id: &str,
        duration_ms: u64,
        trimmed: bool,
        original_size: usize,
    ) -> Self {
        Self::new(LifecycleEventType::Completed, tool_name, correlation_id)
            .with("duration_ms", duration_ms)
            .with("trimmed", trimmed)
            .with("original_size", original_size as u64)
    }

    /// Invocation ended without success
    pub fn failed(
        tool_name: &str,
        correlation_id: &str,
        error_kind: &str,
        error_detail: &str,
        duration_ms: u64,
    ) -> Self {
        Self::new(LifecycleEventType::Failed, tool_name, correlation_id)
            .with("error_kind", error_kind)
            .with("error_detail", error_detail)
            .with("duration_ms", duration_ms)
    }

    /// A tool reported a modified artifact
    pub fn code_modified(tool_name: &str, correlation_id: &str, artifact: &str) -> Self {
        Self::new(LifecycleEventType::CodeModified, tool_name, correlation_id)
            .with("artifact", artifact)
    }

    /// A batch finished; `outcomes` maps status names to counts
    pub fn batch_completed(
        tool_name: &str,
        correlation_id: &str,
        count: usize,
        outcomes: &BTreeMap<String, usize>,
    ) -> Self {
        let distribution: Map<String, Value> = outcomes
            .iter()
            .map(|(status, n)| (status.clone(), Value::from(*n as u64)))
            .collect();
        Self::new(LifecycleEventType::BatchCompleted, tool_name, correlation_id)
            .with("count", count as u64)
            .with("outcomes", Value::Object(distribution))
    }

    /// Error detail recorded in the payload, if any
    pub fn error_detail(&self) -> Option<&str> {
        self.payload.get("error_detail").and_then(Value::as_str)
    }
}
