//! Configuration types for Toolgate

use crate::budget::{BudgetUnit, TRUNCATION_MARKER};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{Result, ToolgateError};
use crate::paths::PathConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Configuration file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "toolgate.toml";

/// Variable naming an additional configuration file
pub const CONFIG_PATH_VAR: &str = "TOOLGATE_CONFIG_PATH";

/// Variable naming the override directory (highest resolution tier)
pub const OVERRIDE_DIR_VAR: &str = "TOOLGATE_TOOLKIT_DIR";

/// Variable naming the home-configuration root
pub const HOME_ROOT_VAR: &str = "TOOLGATE_HOME";

/// Prefix for nested environment overrides (`TOOLGATE_BREAKER__COOLDOWN=10s`)
pub const ENV_PREFIX: &str = "TOOLGATE_";

/// Main configuration for Toolgate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolgateConfig {
    /// Tool location resolution
    pub paths: PathConfig,

    /// Default breaker parameters for every tool
    pub breaker: CircuitBreakerConfig,

    /// Output budgeting
    pub budget: BudgetConfig,

    /// Lifecycle event delivery
    pub events: EventConfig,

    /// Timeout applied to tools that do not set their own
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Tools to register, in bootstrap order
    pub tools: Vec<ToolSpec>,

    /// Per-tool parameter overrides, keyed by tool name
    pub overrides: BTreeMap<String, ToolOverrides>,
}

impl Default for ToolgateConfig {
    fn default() -> Self {
        Self {
            paths: PathConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            budget: BudgetConfig::default(),
            events: EventConfig::default(),
            default_timeout: Duration::from_secs(30),
            tools: Vec::new(),
            overrides: BTreeMap::new(),
        }
    }
}

/// Output budget configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Budget for tools that do not set their own
    pub default_budget: usize,

    /// Unit the budget is counted in
    pub unit: BudgetUnit,

    /// Marker appended to trimmed output
    pub marker: String,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_budget: 8_000,
            unit: BudgetUnit::Chars,
            marker: TRUNCATION_MARKER.to_string(),
        }
    }
}

/// Event delivery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Events buffered before new ones are dropped
    pub queue_capacity: usize,

    /// Upper bound on a single publish to the bus
    #[serde(with = "humantime_serde")]
    pub publish_timeout: Duration,

    /// Topic for STARTED, COMPLETED, FAILED and BATCH_COMPLETED
    pub tool_execution_topic: String,

    /// Topic for CODE_MODIFIED
    pub code_modification_topic: String,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            publish_timeout: Duration::from_secs(5),
            tool_execution_topic: "tool.execution".to_string(),
            code_modification_topic: "tool.code_modified".to_string(),
        }
    }
}

/// A tool entry from the `[[tools]]` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool name
    pub name: String,

    /// Entry point inside the resolved tool directory
    #[serde(default = "default_adapter_locator")]
    pub adapter: String,

    /// Output budget; falls back to `budget.default_budget`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_budget: Option<usize>,

    /// Call timeout; falls back to `default_timeout`
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

fn default_adapter_locator() -> String {
    crate::tools::DEFAULT_ADAPTER_LOCATOR.to_string()
}

impl ToolSpec {
    /// Tool entry with the default entry point
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adapter: default_adapter_locator(),
            max_output_budget: None,
            timeout: None,
        }
    }
}

/// Per-tool overrides; unset fields keep the registration's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolOverrides {
    /// Consecutive failures before the circuit opens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,

    /// Cooldown before a trial call
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<Duration>,

    /// Output budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_budget: Option<usize>,

    /// Call timeout
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl ToolOverrides {
    /// Apply the breaker fields over `base`
    pub fn breaker(&self, base: CircuitBreakerConfig) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            cooldown: self.cooldown.unwrap_or(base.cooldown),
        }
    }
}

impl ToolgateConfig {
    /// Layered configuration sources.
    ///
    /// Loads in this order, later sources winning:
    /// 1. Default configuration
    /// 2. `toolgate.toml` in the working directory
    /// 3. The file named by `TOOLGATE_CONFIG_PATH`
    /// 4. `TOOLGATE_`-prefixed variables, nested keys split on `__`
    /// 5. `TOOLGATE_TOOLKIT_DIR` and `TOOLGATE_HOME`
    pub fn figment() -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(ToolgateConfig::default()))
            .merge(Toml::file(CONFIG_FILE_NAME));

        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .ignore(&["CONFIG_PATH", "TOOLKIT_DIR", "HOME"])
                    .split("__"),
            )
            .merge(
                Env::raw()
                    .only(&[OVERRIDE_DIR_VAR])
                    .map(|_| "paths.override_dir".into()),
            )
            .merge(
                Env::raw()
                    .only(&[HOME_ROOT_VAR])
                    .map(|_| "paths.home_config_root".into()),
            )
    }

    /// Load configuration from files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a source is malformed or the result fails
    /// validation.
    pub fn load() -> Result<Self> {
        let config: ToolgateConfig = Self::figment().extract().map_err(|e| {
            ToolgateError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: ToolgateConfig = Figment::new()
            .merge(Serialized::defaults(ToolgateConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .extract()
            .map_err(|e| {
                ToolgateError::Configuration(format!(
                    "Failed to load configuration file: {}",
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Overrides for `tool_name`, if any
    pub fn overrides_for(&self, tool_name: &str) -> Option<&ToolOverrides> {
        self.overrides.get(tool_name)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        fn invalid(field: &str, reason: &str) -> ToolgateError {
            ToolgateError::Configuration(format!("{field} {reason}"))
        }

        if self.breaker.failure_threshold == 0 {
            return Err(invalid("breaker.failure_threshold", "must be greater than zero"));
        }
        if self.budget.default_budget == 0 {
            return Err(invalid("budget.default_budget", "must be greater than zero"));
        }
        if self.default_timeout.is_zero() {
            return Err(invalid("default_timeout", "must be greater than zero"));
        }
        if self.events.queue_capacity == 0 {
            return Err(invalid("events.queue_capacity", "must be greater than zero"));
        }
        if self.events.publish_timeout.is_zero() {
            return Err(invalid("events.publish_timeout", "must be greater than zero"));
        }
        if self.events.tool_execution_topic.trim().is_empty() {
            return Err(invalid("events.tool_execution_topic", "must not be empty"));
        }
        if self.events.code_modification_topic.trim().is_empty() {
            return Err(invalid("events.code_modification_topic", "must not be empty"));
        }

        for spec in &self.tools {
            if spec.max_output_budget == Some(0) {
                return Err(invalid(
                    &format!("tools.{}.max_output_budget", spec.name),
                    "must be greater than zero",
                ));
            }
            if spec.timeout.is_some_and(|t| t.is_zero()) {
                return Err(invalid(
                    &format!("tools.{}.timeout", spec.name),
                    "must be greater than zero",
                ));
            }
        }

        for (name, o) in &self.overrides {
            if o.failure_threshold == Some(0) {
                return Err(invalid(
                    &format!("overrides.{name}.failure_threshold"),
                    "must be greater than zero",
                ));
            }
            if o.max_output_budget == Some(0) {
                return Err(invalid(
                    &format!("overrides.{name}.max_output_budget"),
                    "must be greater than zero",
                ));
            }
            if o.timeout.is_some_and(|t| t.is_zero()) {
                return Err(invalid(
                    &format!("overrides.{name}.timeout"),
                    "must be greater than zero",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::path::PathBuf;

    #[test]
    fn test_defaults_are_valid() {
        let config = ToolgateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(30));
        assert_eq!(config.events.tool_execution_topic, "tool.execution");
    }

    #[test]
    fn test_load_from_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "toolgate.toml",
                r#"
                default_timeout = "10s"

                [breaker]
                failure_threshold = 3
                cooldown = "1m"

                [budget]
                default_budget = 2000
                unit = "bytes"

                [[tools]]
                name = "search"
                max_output_budget = 500

                [[tools]]
                name = "codemod"
                adapter = "codemod.sh"
                timeout = "2m"

                [overrides.search]
                failure_threshold = 2
                timeout = "500ms"
                "#,
            )?;

            let config = ToolgateConfig::load().expect("config loads");
            assert_eq!(config.default_timeout, Duration::from_secs(10));
            assert_eq!(config.breaker.failure_threshold, 3);
            assert_eq!(config.breaker.cooldown, Duration::from_secs(60));
            assert_eq!(config.budget.unit, BudgetUnit::Bytes);
            assert_eq!(config.tools.len(), 2);
            assert_eq!(config.tools[0].name, "search");
            assert_eq!(config.tools[0].adapter, "run");
            assert_eq!(config.tools[1].timeout, Some(Duration::from_secs(120)));

            let search = config.overrides_for("search").expect("override present");
            assert_eq!(search.timeout, Some(Duration::from_millis(500)));
            let breaker = search.breaker(config.breaker);
            assert_eq!(breaker.failure_threshold, 2);
            assert_eq!(breaker.cooldown, Duration::from_secs(60));
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides() {
        Jail::expect_with(|jail| {
            jail.set_env("TOOLGATE_TOOLKIT_DIR", "/opt/toolkit");
            jail.set_env("TOOLGATE_HOME", "/etc/toolgate");
            jail.set_env("TOOLGATE_BREAKER__FAILURE_THRESHOLD", "7");
            jail.set_env("TOOLGATE_EVENTS__TOOL_EXECUTION_TOPIC", "agents.tools");

            let config = ToolgateConfig::load().expect("config loads");
            assert_eq!(
                config.paths.override_dir,
                Some(PathBuf::from("/opt/toolkit"))
            );
            assert_eq!(
                config.paths.home_config_root,
                Some(PathBuf::from("/etc/toolgate"))
            );
            assert_eq!(config.breaker.failure_threshold, 7);
            assert_eq!(config.events.tool_execution_topic, "agents.tools");
            Ok(())
        });
    }

    #[test]
    fn test_config_path_variable() {
        Jail::expect_with(|jail| {
            jail.create_file("toolgate.toml", "default_timeout = \"10s\"")?;
            jail.create_file("custom.toml", "default_timeout = \"20s\"")?;
            jail.set_env("TOOLGATE_CONFIG_PATH", "custom.toml");

            let config = ToolgateConfig::load().expect("config loads");
            assert_eq!(config.default_timeout, Duration::from_secs(20));
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = ToolgateConfig::default();
        config.budget.default_budget = 0;
        assert!(matches!(
            config.validate(),
            Err(ToolgateError::Configuration(msg)) if msg.contains("default_budget")
        ));

        let mut config = ToolgateConfig::default();
        config.events.code_modification_topic = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = ToolgateConfig::default();
        config.overrides.insert(
            "search".to_string(),
            ToolOverrides {
                failure_threshold: Some(0),
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "[budget]\ndefault_budget = 0")?;
            let err = ToolgateConfig::from_file("bad.toml").unwrap_err();
            assert!(err.to_string().contains("default_budget"));
            Ok(())
        });
    }
}
