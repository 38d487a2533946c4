//! Tool registration and invocation
//!
//! This module is the runtime orchestrator. Key features:
//! - Bootstrap-time registration with duplicate detection
//! - Cached path resolution
//! - Per-tool circuit breaking
//! - Timeout and cancellation around the adapter call
//! - Output budgeting and lifecycle events
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use toolgate_core::tools::{InvocationRequest, ProcessAdapter, ToolRegistration, ToolRuntime};
//!
//! # async fn run() -> toolgate_core::error::Result<()> {
//! let runtime = ToolRuntime::builder()
//!     .register(
//!         ToolRegistration::new("search", 4_000, Duration::from_secs(30)),
//!         Arc::new(ProcessAdapter::new()),
//!     )
//!     .build()?;
//!
//! let result = runtime
//!     .invoke(InvocationRequest::new("search", serde_json::json!({"query": "todo"})))
//!     .await;
//! println!("{}: {:?}", result.status, result.output);
//! # Ok(())
//! # }
//! ```

mod adapter;
mod registry;
mod result;
mod runtime;

pub use adapter::{
    AdapterContext, AdapterError, AdapterOutput, FnAdapter, MODIFIED_PREFIX, ProcessAdapter,
    ToolAdapter, parse_process_stdout,
};
pub use registry::{
    DEFAULT_ADAPTER_LOCATOR, RegisteredTool, RegistryError, ToolRegistration, ToolRegistry,
};
pub use result::{
    BatchRequest, BatchResult, ErrorKind, InvocationRequest, InvocationResult, InvocationStatus,
};
pub use runtime::{
    BATCH_TOOL_NAME, CANCELLED_DETAIL, CIRCUIT_OPEN_DETAIL, TIMEOUT_DETAIL, ToolRuntime,
    ToolRuntimeBuilder, UNKNOWN_TOOL_DETAIL, args_digest,
};
