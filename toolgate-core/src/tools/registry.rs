//! Tool registrations
//!
//! Tools are data: a name bound to an adapter plus the limits the runtime
//! enforces around it. The registry is populated once at bootstrap and is
//! read-only afterwards.

use super::adapter::ToolAdapter;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::config::{ToolOverrides, ToolSpec, ToolgateConfig};
use crate::paths::is_valid_tool_name;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default entry point inside a resolved tool directory
pub const DEFAULT_ADAPTER_LOCATOR: &str = "run";

/// Bootstrap errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Tool with this name already exists
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    /// Name cannot be used as a single path component
    #[error("Invalid tool name '{0}': must be a single non-empty path component")]
    InvalidName(String),

    /// Output budget must be positive
    #[error("Tool '{0}' has a zero output budget")]
    InvalidBudget(String),

    /// Timeout must be positive
    #[error("Tool '{0}' has a zero timeout")]
    InvalidTimeout(String),

    /// Breaker threshold must be positive
    #[error("Tool '{0}' has a zero failure threshold")]
    InvalidThreshold(String),
}

/// Immutable description of a registered tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRegistration {
    /// Unique tool name
    pub name: String,

    /// Entry point inside the resolved tool directory
    pub adapter_locator: String,

    /// Largest output returned to the caller
    pub max_output_budget: usize,

    /// Upper bound on a single adapter call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Breaker parameters for this tool
    pub breaker: CircuitBreakerConfig,
}

impl ToolRegistration {
    /// Registration with the default locator and breaker parameters
    pub fn new(name: impl Into<String>, max_output_budget: usize, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            adapter_locator: DEFAULT_ADAPTER_LOCATOR.to_string(),
            max_output_budget,
            timeout,
            breaker: CircuitBreakerConfig::default(),
        }
    }

    /// Build from a `[[tools]]` entry, filling gaps from the config defaults
    pub fn from_spec(spec: &ToolSpec, config: &ToolgateConfig) -> Self {
        Self {
            name: spec.name.clone(),
            adapter_locator: spec.adapter.clone(),
            max_output_budget: spec
                .max_output_budget
                .unwrap_or(config.budget.default_budget),
            timeout: spec.timeout.unwrap_or(config.default_timeout),
            breaker: config.breaker,
        }
    }

    /// Builder: set the adapter locator
    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.adapter_locator = locator.into();
        self
    }

    /// Builder: set breaker parameters
    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Merge per-tool overrides over this registration
    pub fn apply_overrides(mut self, overrides: &ToolOverrides) -> Self {
        self.breaker = overrides.breaker(self.breaker);
        if let Some(budget) = overrides.max_output_budget {
            self.max_output_budget = budget;
        }
        if let Some(timeout) = overrides.timeout {
            self.timeout = timeout;
        }
        self
    }

    /// Check the registration's invariants
    pub fn validate(&self) -> Result<(), RegistryError> {
        if !is_valid_tool_name(&self.name) {
            return Err(RegistryError::InvalidName(self.name.clone()));
        }
        if self.max_output_budget == 0 {
            return Err(RegistryError::InvalidBudget(self.name.clone()));
        }
        if self.timeout.is_zero() {
            return Err(RegistryError::InvalidTimeout(self.name.clone()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(RegistryError::InvalidThreshold(self.name.clone()));
        }
        Ok(())
    }
}

/// A registration bound to the adapter that executes it
#[derive(Clone)]
pub struct RegisteredTool {
    /// Limits and identity
    pub registration: ToolRegistration,
    /// Adapter performing the call
    pub adapter: Arc<dyn ToolAdapter>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("registration", &self.registration)
            .field("adapter", &self.adapter.kind())
            .finish()
    }
}

/// Name-to-tool map populated once at bootstrap
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an ordered list, failing on the first bad entry
    pub fn build(
        entries: impl IntoIterator<Item = (ToolRegistration, Arc<dyn ToolAdapter>)>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for (registration, adapter) in entries {
            registry.register(registration, adapter)?;
        }
        Ok(registry)
    }

    /// Register a tool
    ///
    /// Returns an error if the registration is invalid or a tool with the
    /// same name is already registered.
    pub fn register(
        &mut self,
        registration: ToolRegistration,
        adapter: Arc<dyn ToolAdapter>,
    ) -> Result<(), RegistryError> {
        registration.validate()?;
        let name = registration.name.clone();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.order.push(name.clone());
        self.tools.insert(
            name,
            RegisteredTool {
                registration,
                adapter,
            },
        );
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Check if a tool is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Registrations in registration order
    pub fn registrations(&self) -> impl Iterator<Item = &ToolRegistration> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| &tool.registration)
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{AdapterOutput, FnAdapter};

    fn noop() -> Arc<dyn ToolAdapter> {
        Arc::new(FnAdapter::new(|_args, _ctx| async {
            Ok(AdapterOutput::text(""))
        }))
    }

    fn reg(name: &str) -> ToolRegistration {
        ToolRegistration::new(name, 100, Duration::from_secs(5))
    }

    #[test]
    fn test_duplicate_names_fail_fast() {
        let err = ToolRegistry::build(vec![
            (reg("search"), noop()),
            (reg("validate"), noop()),
            (reg("search"), noop()),
        ])
        .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTool("search".to_string()));
    }

    #[test]
    fn test_registration_order_preserved() {
        let registry = ToolRegistry::build(vec![
            (reg("validate"), noop()),
            (reg("codemap"), noop()),
            (reg("search"), noop()),
        ])
        .unwrap();
        assert_eq!(registry.names(), vec!["validate", "codemap", "search"]);
        assert_eq!(registry.len(), 3);
        assert!(registry.contains("codemap"));
        assert!(!registry.contains("missing"));
    }

    #[test]
    fn test_invalid_registrations() {
        let mut registry = ToolRegistry::new();
        assert_eq!(
            registry.register(reg("../escape"), noop()),
            Err(RegistryError::InvalidName("../escape".to_string()))
        );
        assert_eq!(
            registry.register(ToolRegistration::new("a", 0, Duration::from_secs(1)), noop()),
            Err(RegistryError::InvalidBudget("a".to_string()))
        );
        assert_eq!(
            registry.register(ToolRegistration::new("b", 10, Duration::ZERO), noop()),
            Err(RegistryError::InvalidTimeout("b".to_string()))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_overrides_merge() {
        let overrides = ToolOverrides {
            failure_threshold: Some(2),
            cooldown: None,
            max_output_budget: Some(50),
            timeout: None,
        };
        let merged = reg("search").apply_overrides(&overrides);
        assert_eq!(merged.breaker.failure_threshold, 2);
        assert_eq!(merged.breaker.cooldown, Duration::from_secs(30));
        assert_eq!(merged.max_output_budget, 50);
        assert_eq!(merged.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_spec_fills_defaults() {
        let config = ToolgateConfig::default();
        let mut spec = ToolSpec::new("codemap");
        spec.timeout = Some(Duration::from_secs(90));

        let registration = ToolRegistration::from_spec(&spec, &config);
        assert_eq!(registration.adapter_locator, "run");
        assert_eq!(registration.max_output_budget, config.budget.default_budget);
        assert_eq!(registration.timeout, Duration::from_secs(90));
        assert_eq!(registration.breaker, config.breaker);
    }
}
