//! Tool runtime
//!
//! Every invocation follows the same path:
//!
//! 1. registration lookup (unknown tools stop here)
//! 2. path resolution, cached per tool
//! 3. circuit breaker check, failing fast while open
//! 4. adapter call under the tool's timeout and the caller's cancellation
//! 5. output budgeting
//! 6. breaker update and lifecycle events
//!
//! The only shared mutable state is the path cache and one breaker per tool.

use super::adapter::{AdapterContext, AdapterOutput, ToolAdapter};
use super::registry::{RegisteredTool, ToolRegistration, ToolRegistry};
use super::result::{BatchRequest, BatchResult, ErrorKind, InvocationRequest, InvocationResult};
use crate::budget::OutputBudget;
use crate::circuit_breaker::{CircuitBreaker, CircuitSnapshot};
use crate::config::{EventConfig, ToolOverrides, ToolgateConfig};
use crate::error::{Result, ToolgateError};
use crate::events::{EventBus, EventEmitter, LifecycleEvent, TracingBus};
use crate::paths::{self, FsProbe, LocationProbe, PathConfig, ResolvedPath};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Tool name used on BATCH_COMPLETED events
pub const BATCH_TOOL_NAME: &str = "batch";

/// Detail reported when the circuit rejects a call
pub const CIRCUIT_OPEN_DETAIL: &str = "circuit open";

/// Detail reported for an unregistered tool
pub const UNKNOWN_TOOL_DETAIL: &str = "unknown tool";

/// Detail reported when the adapter exceeds its timeout
pub const TIMEOUT_DETAIL: &str = "timeout";

/// Detail reported when the caller cancels
pub const CANCELLED_DETAIL: &str = "cancelled";

/// Short SHA-256 digest of the arguments, published instead of their values
pub fn args_digest(arguments: &Value) -> String {
    let encoded = serde_json::to_vec(arguments).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

enum CallOutcome {
    Completed(AdapterOutput),
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Builder for [`ToolRuntime`]
pub struct ToolRuntimeBuilder {
    entries: Vec<(ToolRegistration, Arc<dyn ToolAdapter>)>,
    overrides: BTreeMap<String, ToolOverrides>,
    paths: PathConfig,
    probe: Arc<dyn LocationProbe>,
    budget: OutputBudget,
    events: EventConfig,
    bus: Option<Arc<dyn EventBus>>,
}

impl Default for ToolRuntimeBuilder {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            overrides: BTreeMap::new(),
            paths: PathConfig::default(),
            probe: Arc::new(FsProbe),
            budget: OutputBudget::default(),
            events: EventConfig::default(),
            bus: None,
        }
    }
}

impl ToolRuntimeBuilder {
    /// Create a builder with default settings and no tools
    pub fn new() -> Self {
        Self::default()
    }

    /// Take paths, budget, event and override settings from a configuration
    ///
    /// Tools listed in the configuration still need an adapter and are
    /// registered separately.
    pub fn with_config(mut self, config: &ToolgateConfig) -> Self {
        self.paths = config.paths.clone();
        self.budget = OutputBudget::new()
            .with_marker(config.budget.marker.clone())
            .with_measure(config.budget.unit.measure());
        self.events = config.events.clone();
        self.overrides = config.overrides.clone();
        self
    }

    /// Register a tool
    pub fn register(mut self, registration: ToolRegistration, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.entries.push((registration, adapter));
        self
    }

    /// Set per-tool overrides for one tool
    pub fn with_overrides(mut self, tool_name: impl Into<String>, overrides: ToolOverrides) -> Self {
        self.overrides.insert(tool_name.into(), overrides);
        self
    }

    /// Set the resolution layout
    pub fn with_paths(mut self, paths: PathConfig) -> Self {
        self.paths = paths;
        self
    }

    /// Set the probe deciding whether a candidate location exists
    pub fn with_probe(mut self, probe: Arc<dyn LocationProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Set the output budget enforcer
    pub fn with_budget(mut self, budget: OutputBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Set event delivery settings
    pub fn with_event_config(mut self, events: EventConfig) -> Self {
        self.events = events;
        self
    }

    /// Publish lifecycle events to `bus` (defaults to [`TracingBus`])
    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Validate registrations and start the runtime
    ///
    /// Must be called from within a Tokio runtime: the event publisher runs
    /// as a background task.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid or duplicate registration.
    pub fn build(self) -> Result<ToolRuntime> {
        let entries: Vec<_> = self
            .entries
            .into_iter()
            .map(|(registration, adapter)| {
                let registration = match self.overrides.get(&registration.name) {
                    Some(overrides) => registration.apply_overrides(overrides),
                    None => registration,
                };
                (registration, adapter)
            })
            .collect();
        let registry = ToolRegistry::build(entries)?;

        for name in self.overrides.keys() {
            if !registry.contains(name) {
                tracing::warn!(tool = %name, "Overrides configured for an unregistered tool");
            }
        }

        let breakers = registry
            .registrations()
            .map(|r| {
                (
                    r.name.clone(),
                    Arc::new(CircuitBreaker::new(r.name.clone(), r.breaker)),
                )
            })
            .collect();

        let bus = self.bus.unwrap_or_else(|| Arc::new(TracingBus));
        let emitter = EventEmitter::spawn(bus, &self.events);

        tracing::info!(tools = registry.len(), "Tool runtime started");

        Ok(ToolRuntime {
            registry,
            breakers,
            paths: self.paths,
            probe: self.probe,
            path_cache: RwLock::new(HashMap::new()),
            budget: self.budget,
            emitter,
        })
    }
}

/// Resolves, invokes and governs tool calls
pub struct ToolRuntime {
    registry: ToolRegistry,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    paths: PathConfig,
    probe: Arc<dyn LocationProbe>,
    path_cache: RwLock<HashMap<String, ResolvedPath>>,
    budget: OutputBudget,
    emitter: EventEmitter,
}

impl std::fmt::Debug for ToolRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRuntime")
            .field("tools", &self.registry.names())
            .field("paths", &self.paths)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl ToolRuntime {
    /// Start building a runtime
    pub fn builder() -> ToolRuntimeBuilder {
        ToolRuntimeBuilder::new()
    }

    /// Invoke a tool
    pub async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        self.invoke_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Invoke a tool, giving up when `cancel` fires
    ///
    /// Cancellation reaches the adapter through its context and by dropping
    /// the in-flight call. A cancelled call counts neither as a success nor
    /// as a failure for the breaker. Dropping the returned future counts as
    /// cancellation and still emits the terminal FAILED event.
    pub async fn invoke_with_cancel(
        &self,
        request: InvocationRequest,
        cancel: CancellationToken,
    ) -> InvocationResult {
        let started = Instant::now();
        let tool_name = request.tool_name.as_str();
        let correlation_id = request.correlation_id.as_str();

        let Some(tool) = self.registry.get(tool_name) else {
            tracing::debug!(tool = %tool_name, correlation_id = %correlation_id, "Unknown tool");
            return self.fail(&request, ErrorKind::UnknownTool, UNKNOWN_TOOL_DETAIL, started);
        };

        self.emitter.emit(LifecycleEvent::started(
            tool_name,
            correlation_id,
            &args_digest(&request.arguments),
        ));

        // A caller dropping this future still gets a terminal event
        let guard = TerminalGuard::arm(&self.emitter, &request, started);
        let result = self.execute(&request, tool, cancel, started).await;
        guard.disarm();
        result
    }

    /// Everything after STARTED; emits exactly one terminal event on return
    async fn execute(
        &self,
        request: &InvocationRequest,
        tool: &RegisteredTool,
        cancel: CancellationToken,
        started: Instant,
    ) -> InvocationResult {
        let tool_name = request.tool_name.as_str();
        let correlation_id = request.correlation_id.as_str();

        let resolved = match self.resolve_cached(tool_name).await {
            Ok(resolved) => resolved,
            Err(err) => {
                return self.fail(
                    request,
                    ErrorKind::ToolNotResolvable,
                    &err.to_string(),
                    started,
                );
            }
        };

        let Some(breaker) = self.breakers.get(tool_name) else {
            return self.fail(
                request,
                ErrorKind::InvocationFailure,
                "no circuit breaker for tool",
                started,
            );
        };
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejection) => {
                tracing::debug!(
                    tool = %tool_name,
                    correlation_id = %correlation_id,
                    retry_after_ms = rejection.retry_after.map(|d| d.as_millis() as u64),
                    "Circuit open, failing fast"
                );
                return self.fail(request, ErrorKind::CircuitOpen, CIRCUIT_OPEN_DETAIL, started);
            }
        };

        let registration = &tool.registration;
        let call_token = cancel.child_token();
        let ctx = AdapterContext::new(tool_name, correlation_id, resolved.resolved_location)
            .with_locator(registration.adapter_locator.clone())
            .with_cancellation(call_token.clone());

        tracing::debug!(
            tool = %tool_name,
            correlation_id = %correlation_id,
            tier = %resolved.source_tier,
            trial = permit.is_trial(),
            adapter = tool.adapter.kind(),
            "Invoking tool"
        );

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => CallOutcome::Cancelled,
            res = tokio::time::timeout(registration.timeout, tool.adapter.invoke(&request.arguments, &ctx)) => {
                match res {
                    Ok(Ok(output)) => CallOutcome::Completed(output),
                    Ok(Err(err)) => CallOutcome::Failed(err.to_string()),
                    Err(_) => CallOutcome::TimedOut,
                }
            }
        };

        match outcome {
            CallOutcome::Completed(output) => {
                permit.succeed();
                self.complete(request, registration, output, started)
            }
            CallOutcome::Failed(detail) => {
                permit.fail();
                self.fail(request, ErrorKind::InvocationFailure, &detail, started)
            }
            CallOutcome::TimedOut => {
                permit.fail();
                self.fail(request, ErrorKind::InvocationFailure, TIMEOUT_DETAIL, started)
            }
            CallOutcome::Cancelled => {
                call_token.cancel();
                drop(permit);
                self.fail(request, ErrorKind::Cancelled, CANCELLED_DETAIL, started)
            }
        }
    }

    fn complete(
        &self,
        request: &InvocationRequest,
        registration: &ToolRegistration,
        output: AdapterOutput,
        started: Instant,
    ) -> InvocationResult {
        let budgeted = self.budget.apply(&output.output, registration.max_output_budget);
        let duration_ms = elapsed_ms(started);

        for artifact in &output.modified_artifacts {
            self.emitter.emit(LifecycleEvent::code_modified(
                &request.tool_name,
                &request.correlation_id,
                artifact,
            ));
        }
        self.emitter.emit(LifecycleEvent::completed(
            &request.tool_name,
            &request.correlation_id,
            duration_ms,
            budgeted.trimmed,
            budgeted.original_size,
        ));

        let result = InvocationResult::success(
            &request.tool_name,
            &request.correlation_id,
            budgeted.output,
            budgeted.trimmed,
            budgeted.original_size,
        )
        .with_duration_ms(duration_ms)
        .with_modified_artifacts(output.modified_artifacts);

        tracing::debug!(
            tool = %request.tool_name,
            correlation_id = %request.correlation_id,
            status = %result.status,
            duration_ms,
            "Tool invocation completed"
        );
        result
    }

    fn fail(
        &self,
        request: &InvocationRequest,
        kind: ErrorKind,
        detail: &str,
        started: Instant,
    ) -> InvocationResult {
        let duration_ms = elapsed_ms(started);
        self.emitter.emit(LifecycleEvent::failed(
            &request.tool_name,
            &request.correlation_id,
            kind.as_str(),
            detail,
            duration_ms,
        ));

        let result = InvocationResult::failure(&request.tool_name, &request.correlation_id, kind, detail)
            .with_duration_ms(duration_ms);

        if kind.counts_as_failure() {
            tracing::warn!(
                tool = %request.tool_name,
                correlation_id = %request.correlation_id,
                status = %result.status,
                error_kind = %kind,
                duration_ms,
                error = %detail,
                "Tool invocation failed"
            );
        } else {
            tracing::debug!(
                tool = %request.tool_name,
                correlation_id = %request.correlation_id,
                status = %result.status,
                error_kind = %kind,
                duration_ms,
                "Tool invocation rejected"
            );
        }
        result
    }

    /// Invoke several tools concurrently
    ///
    /// Results come back in request order. One BATCH_COMPLETED event with the
    /// count and status distribution follows the individual events.
    pub async fn invoke_batch(&self, batch: BatchRequest) -> BatchResult {
        self.invoke_batch_with_cancel(batch, CancellationToken::new())
            .await
    }

    /// Invoke a batch, cancelling every member when `cancel` fires
    pub async fn invoke_batch_with_cancel(
        &self,
        batch: BatchRequest,
        cancel: CancellationToken,
    ) -> BatchResult {
        let calls = batch
            .requests
            .into_iter()
            .map(|request| self.invoke_with_cancel(request, cancel.child_token()));
        let results = futures::future::join_all(calls).await;

        let result = BatchResult::new(batch.correlation_id, results);
        self.emitter.emit(LifecycleEvent::batch_completed(
            BATCH_TOOL_NAME,
            &result.correlation_id,
            result.len(),
            &result.outcomes,
        ));

        tracing::debug!(
            correlation_id = %result.correlation_id,
            count = result.len(),
            "Batch completed"
        );
        result
    }

    fn cached_path(&self, tool_name: &str) -> Option<ResolvedPath> {
        self.path_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool_name)
            .cloned()
    }

    fn remember_path(&self, tool_name: &str, resolved: &ResolvedPath) {
        self.path_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool_name.to_string(), resolved.clone());
    }

    /// Cached resolution for the invoke path
    ///
    /// A miss runs the probe on the blocking pool.
    async fn resolve_cached(
        &self,
        tool_name: &str,
    ) -> std::result::Result<ResolvedPath, paths::ResolveError> {
        if let Some(hit) = self.cached_path(tool_name) {
            return Ok(hit);
        }

        let name = tool_name.to_string();
        let layout = self.paths.clone();
        let probe = Arc::clone(&self.probe);
        let resolved = match tokio::task::spawn_blocking(move || {
            paths::resolve(&name, &layout, probe.as_ref())
        })
        .await
        {
            Ok(resolved) => resolved?,
            Err(err) => {
                tracing::warn!(tool = %tool_name, error = %err, "Resolution task failed, resolving inline");
                paths::resolve(tool_name, &self.paths, self.probe.as_ref())?
            }
        };
        self.remember_path(tool_name, &resolved);
        Ok(resolved)
    }

    /// Resolve a registered tool's location, using the cache
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::UnknownTool`] for unregistered names and
    /// [`ToolgateError::Resolve`] when no tier has the tool.
    pub fn resolve_tool(&self, tool_name: &str) -> Result<ResolvedPath> {
        if !self.registry.contains(tool_name) {
            return Err(ToolgateError::UnknownTool(tool_name.to_string()));
        }
        if let Some(hit) = self.cached_path(tool_name) {
            return Ok(hit);
        }
        let resolved = paths::resolve(tool_name, &self.paths, self.probe.as_ref())?;
        self.remember_path(tool_name, &resolved);
        Ok(resolved)
    }

    /// Forget every cached resolution
    pub fn clear_path_cache(&self) {
        self.path_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::debug!("Path cache cleared");
    }

    /// Read-only view of a tool's breaker
    pub fn circuit_snapshot(&self, tool_name: &str) -> Option<CircuitSnapshot> {
        self.breakers.get(tool_name).map(|b| b.snapshot())
    }

    /// Force a tool's breaker back to closed
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::UnknownTool`] for unregistered names.
    pub fn reset_circuit(&self, tool_name: &str) -> Result<()> {
        let breaker = self
            .breakers
            .get(tool_name)
            .ok_or_else(|| ToolgateError::UnknownTool(tool_name.to_string()))?;
        breaker.reset();
        Ok(())
    }

    /// Registered tool names, in registration order
    pub fn tool_names(&self) -> Vec<&str> {
        self.registry.names()
    }

    /// Effective registration for a tool
    pub fn registration(&self, tool_name: &str) -> Option<&ToolRegistration> {
        self.registry.get(tool_name).map(|t| &t.registration)
    }

    /// Event emitter handle
    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Wait until queued lifecycle events have reached the bus
    pub async fn flush_events(&self) {
        self.emitter.flush().await;
    }
}

/// Emits FAILED "cancelled" if an invocation is dropped after STARTED
struct TerminalGuard<'a> {
    emitter: &'a EventEmitter,
    tool_name: &'a str,
    correlation_id: &'a str,
    started: Instant,
    armed: bool,
}

impl<'a> TerminalGuard<'a> {
    fn arm(emitter: &'a EventEmitter, request: &'a InvocationRequest, started: Instant) -> Self {
        Self {
            emitter,
            tool_name: &request.tool_name,
            correlation_id: &request.correlation_id,
            started,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TerminalGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let duration_ms = elapsed_ms(self.started);
        tracing::debug!(
            tool = %self.tool_name,
            correlation_id = %self.correlation_id,
            duration_ms,
            "Invocation dropped by caller"
        );
        self.emitter.emit(LifecycleEvent::failed(
            self.tool_name,
            self.correlation_id,
            ErrorKind::Cancelled.as_str(),
            CANCELLED_DETAIL,
            duration_ms,
        ));
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
