//! Tool path resolution
//!
//! Locates a tool's adapter by walking an ordered set of configuration tiers:
//!
//! 1. `OVERRIDE_ENV`: `<override_dir>/<tool>` (from `TOOLGATE_TOOLKIT_DIR`)
//! 2. `HOME_CONFIG`: `<home_config_root>/tools/agent-toolkit/<tool>`, only
//!    considered when the root itself exists
//! 3. `USER_HOME`: `<home>/.agent-toolkit/tools/<tool>`
//! 4. `REPO_DEFAULT`: `<repo_root>/tools/<tool>`
//!
//! The first tier whose location exists wins. [`resolve`] is pure: all
//! filesystem access goes through a [`LocationProbe`], so layouts can be
//! simulated in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use toolgate_core::paths::{resolve, FsProbe, PathConfig};
//!
//! let config = PathConfig::default();
//! let resolved = resolve("search", &config, &FsProbe)?;
//! println!("{} from {}", resolved.resolved_location.display(), resolved.source_tier);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Subpath under the home-configuration root
pub const HOME_CONFIG_SUBPATH: &str = "tools/agent-toolkit";

/// Hidden subpath under the user's home directory
pub const USER_HOME_SUBPATH: &str = ".agent-toolkit/tools";

/// Subpath under the repository root
pub const REPO_DEFAULT_SUBPATH: &str = "tools";

/// Configuration tier a location was resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceTier {
    /// Explicit override directory
    OverrideEnv,
    /// Home-configuration root
    HomeConfig,
    /// User home directory
    UserHome,
    /// Repository-relative default
    RepoDefault,
}

impl SourceTier {
    /// All tiers, highest precedence first
    pub const ALL: [SourceTier; 4] = [
        SourceTier::OverrideEnv,
        SourceTier::HomeConfig,
        SourceTier::UserHome,
        SourceTier::RepoDefault,
    ];

    /// Stable upper-case name of the tier
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::OverrideEnv => "OVERRIDE_ENV",
            SourceTier::HomeConfig => "HOME_CONFIG",
            SourceTier::UserHome => "USER_HOME",
            SourceTier::RepoDefault => "REPO_DEFAULT",
        }
    }
}

impl fmt::Display for SourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successfully resolved tool location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPath {
    /// Tool the location belongs to
    pub tool_name: String,
    /// Location of the tool adapter
    pub resolved_location: PathBuf,
    /// Tier that produced the location
    pub source_tier: SourceTier,
}

/// Layered configuration consulted by the resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Override directory; tools live directly beneath it
    pub override_dir: Option<PathBuf>,

    /// Home-configuration root
    pub home_config_root: Option<PathBuf>,

    /// The invoking user's home directory
    pub user_home: Option<PathBuf>,

    /// Repository root for the default tier
    pub repo_root: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            override_dir: None,
            home_config_root: dirs::config_dir().map(|d| d.join("toolgate")),
            user_home: dirs::home_dir(),
            repo_root: PathBuf::from("."),
        }
    }
}

impl PathConfig {
    /// A config with no tiers configured except the repository root
    pub fn with_repo_root(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            override_dir: None,
            home_config_root: None,
            user_home: None,
            repo_root: repo_root.into(),
        }
    }

    /// Builder: set the override directory
    pub fn with_override_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.override_dir = Some(dir.into());
        self
    }

    /// Builder: set the home-configuration root
    pub fn with_home_config_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.home_config_root = Some(dir.into());
        self
    }

    /// Builder: set the user home directory
    pub fn with_user_home(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_home = Some(dir.into());
        self
    }
}

/// Decides whether a candidate location is valid
pub trait LocationProbe: Send + Sync {
    /// Returns true if the location exists
    fn exists(&self, path: &Path) -> bool;
}

/// Probe backed by the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl LocationProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

impl<F> LocationProbe for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn exists(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Why a tier did not produce a location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptNote {
    /// The tier has no configured base directory
    NotConfigured,
    /// The tier's root directory does not exist
    RootMissing,
    /// The candidate location does not exist
    Missing,
    /// The tool name is not a single path component
    InvalidName,
}

/// One tier consulted during a failed resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierAttempt {
    /// The tier consulted
    pub tier: SourceTier,
    /// Candidate location, when the tier produced one
    pub location: Option<PathBuf>,
    /// Why the tier was rejected
    pub note: AttemptNote,
}

impl fmt::Display for TierAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.location, self.note) {
            (Some(location), _) => write!(f, "{} ({})", self.tier, location.display()),
            (None, AttemptNote::NotConfigured) => write!(f, "{} (not configured)", self.tier),
            (None, AttemptNote::RootMissing) => write!(f, "{} (root missing)", self.tier),
            (None, AttemptNote::InvalidName) => write!(f, "{} (invalid tool name)", self.tier),
            (None, AttemptNote::Missing) => write!(f, "{}", self.tier),
        }
    }
}

/// Resolution failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// No tier yielded a valid location
    #[error("Tool '{tool_name}' is not resolvable; tried {}", describe_attempts(.attempts))]
    ToolNotResolvable {
        /// The tool that failed to resolve
        tool_name: String,
        /// Every tier consulted, in precedence order
        attempts: Vec<TierAttempt>,
    },
}

impl ResolveError {
    /// Tiers consulted during the failed resolution
    pub fn attempts(&self) -> &[TierAttempt] {
        match self {
            ResolveError::ToolNotResolvable { attempts, .. } => attempts,
        }
    }
}

fn describe_attempts(attempts: &[TierAttempt]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Returns true if `name` is usable as a single path component
pub fn is_valid_tool_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Candidate location for one tier, or the reason the tier has none
fn candidate(
    tier: SourceTier,
    tool_name: &str,
    config: &PathConfig,
    probe: &dyn LocationProbe,
) -> Result<PathBuf, AttemptNote> {
    match tier {
        SourceTier::OverrideEnv => config
            .override_dir
            .as_ref()
            .map(|dir| dir.join(tool_name))
            .ok_or(AttemptNote::NotConfigured),
        SourceTier::HomeConfig => {
            let root = config
                .home_config_root
                .as_ref()
                .ok_or(AttemptNote::NotConfigured)?;
            if !probe.exists(root) {
                return Err(AttemptNote::RootMissing);
            }
            Ok(root.join(HOME_CONFIG_SUBPATH).join(tool_name))
        }
        SourceTier::UserHome => config
            .user_home
            .as_ref()
            .map(|home| home.join(USER_HOME_SUBPATH).join(tool_name))
            .ok_or(AttemptNote::NotConfigured),
        SourceTier::RepoDefault => Ok(config.repo_root.join(REPO_DEFAULT_SUBPATH).join(tool_name)),
    }
}

/// Resolve a tool's adapter location
///
/// Pure given its inputs: the probe is the only way the filesystem is
/// observed.
///
/// # Errors
///
/// Returns [`ResolveError::ToolNotResolvable`] listing every tier consulted
/// when none yields an existing location.
pub fn resolve(
    tool_name: &str,
    config: &PathConfig,
    probe: &dyn LocationProbe,
) -> Result<ResolvedPath, ResolveError> {
    if !is_valid_tool_name(tool_name) {
        return Err(ResolveError::ToolNotResolvable {
            tool_name: tool_name.to_string(),
            attempts: SourceTier::ALL
                .iter()
                .map(|&tier| TierAttempt {
                    tier,
                    location: None,
                    note: AttemptNote::InvalidName,
                })
                .collect(),
        });
    }

    let mut attempts = Vec::with_capacity(SourceTier::ALL.len());
    for tier in SourceTier::ALL {
        match candidate(tier, tool_name, config, probe) {
            Ok(location) if probe.exists(&location) => {
                tracing::debug!(
                    tool = tool_name,
                    tier = %tier,
                    location = %location.display(),
                    "Resolved tool location"
                );
                return Ok(ResolvedPath {
                    tool_name: tool_name.to_string(),
                    resolved_location: location,
                    source_tier: tier,
                });
            }
            Ok(location) => attempts.push(TierAttempt {
                tier,
                location: Some(location),
                note: AttemptNote::Missing,
            }),
            Err(note) => attempts.push(TierAttempt {
                tier,
                location: None,
                note,
            }),
        }
    }

    Err(ResolveError::ToolNotResolvable {
        tool_name: tool_name.to_string(),
        attempts,
    })
}
