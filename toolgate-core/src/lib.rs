//! # Toolgate - Tool Invocation Runtime for Agents
//!
//! Toolgate resolves, invokes and governs calls to pluggable agent tools
//! (search, structural code modification, validation, code mapping):
//! - Deterministic path resolution with override precedence
//! - Per-tool output budgets with truncation
//! - Per-tool circuit breakers isolating failing tools
//! - Structured lifecycle events tagged with a correlation ID
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolgate_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ToolgateConfig::load()?;
//!
//!     let mut builder = ToolRuntime::builder().with_config(&config);
//!     for spec in &config.tools {
//!         builder = builder.register(
//!             ToolRegistration::from_spec(spec, &config),
//!             Arc::new(ProcessAdapter::new()),
//!         );
//!     }
//!     let runtime = builder.build()?;
//!
//!     let result = runtime
//!         .invoke(InvocationRequest::new("search", serde_json::json!({"query": "TODO"})))
//!         .await;
//!     println!("{} {:?}", result.status, result.output);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **paths**: pure resolver over four tiers with an injectable probe
//! - **budget**: pure trimming with a pluggable measure
//! - **circuit_breaker**: per-tool state machine with single-trial half-open
//! - **events**: fire-and-forget emission to an [`events::EventBus`]
//! - **tools**: registration and the runtime composing the above

pub mod budget;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod events;
pub mod paths;
pub mod tools;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::budget::{
        BudgetOutcome, BudgetUnit, ByteCount, CharCount, OutputBudget, OutputMeasure,
        TRUNCATION_MARKER, apply_budget,
    };
    pub use crate::circuit_breaker::{
        BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitSnapshot,
        CircuitStatus,
    };
    pub use crate::config::{
        BudgetConfig, EventConfig, ToolOverrides, ToolSpec, ToolgateConfig,
    };
    pub use crate::error::{Result, ToolgateError};
    pub use crate::events::{
        BusError, BusMessage, EventBus, EventEmitter, EventTopics, LifecycleEvent,
        LifecycleEventType, LocalBus, TracingBus,
    };
    pub use crate::paths::{
        FsProbe, LocationProbe, PathConfig, ResolveError, ResolvedPath, SourceTier, resolve,
    };
    pub use crate::tools::{
        AdapterContext, AdapterError, AdapterOutput, BatchRequest, BatchResult, ErrorKind,
        FnAdapter, InvocationRequest, InvocationResult, InvocationStatus, ProcessAdapter,
        RegistryError, ToolAdapter, ToolRegistration, ToolRegistry, ToolRuntime,
        ToolRuntimeBuilder,
    };
}
