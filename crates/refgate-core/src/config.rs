use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::authz::CommitPolicy;
use crate::error::ConfigError;
use crate::exec::{DEFAULT_TIMEOUT, ExitPolarity, OnTimeout, ProcessEvaluator};
use crate::filter::AuthFilter;

/// Environment variable that overrides `[filter] program`.
pub const AUTH_FILTER_ENV: &str = "REFGATE_AUTH_FILTER";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefgateConfig {
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub authz: AuthzConfig,
    #[serde(default)]
    pub site: SiteConfig,
}

/// The external policy program. No `program` means every gate authorizes.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    pub program: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub on_timeout: OnTimeout,
    #[serde(default)]
    pub exit_polarity: ExitPolarity,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            program: None,
            timeout_secs: default_timeout_secs(),
            on_timeout: OnTimeout::default(),
            exit_polarity: ExitPolarity::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthzConfig {
    #[serde(default)]
    pub commit_policy: CommitPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_max_commit_count")]
    pub max_commit_count: usize,
    pub cache_root: Option<PathBuf>,
}

fn default_max_commit_count() -> usize {
    50
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            max_commit_count: default_max_commit_count(),
            cache_root: None,
        }
    }
}

impl RefgateConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// `~/.config/refgate/refgate.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("refgate")
            .join("refgate.toml")
    }

    /// Load `path` if given, else the default path if it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    tracing::debug!(path = %default.display(), "No config file, using defaults");
                    Self::default()
                }
            }
        };

        if let Ok(program) = std::env::var(AUTH_FILTER_ENV)
            && !program.is_empty()
        {
            config.filter.program = Some(PathBuf::from(program));
        }

        Ok(config)
    }

    /// The filter described by `[filter]`, unconfigured when no program is set.
    pub fn build_filter(&self) -> AuthFilter {
        match &self.filter.program {
            Some(program) => {
                let evaluator = ProcessEvaluator::new(program.clone())
                    .with_timeout(Duration::from_secs(self.filter.timeout_secs))
                    .with_on_timeout(self.filter.on_timeout)
                    .with_polarity(self.filter.exit_polarity);
                AuthFilter::new(Arc::new(evaluator))
            }
            None => AuthFilter::unconfigured(),
        }
    }
}
