//! Configuration loading for the diver worker.
//!
//! Read once from a TOML file at startup. Secrets may be left out of the
//! file and supplied through the environment instead.

use diver_core::constants::DEFAULT_EXPORT_WAIT_HINT_MS;
use diver_core::Deadline;
use diver_geometry::RunConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "DIVER_CONFIG";
pub const SEARCH_TOKEN_ENV: &str = "DIVER_SEARCH_BEARER_TOKEN";
pub const GEOMETRY_TICKET_ENV: &str = "DIVER_GEOMETRY_TICKET";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    pub search: SearchConfig,
    pub geometry: GeometryConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    pub api_base_url: String,
    #[serde(default, deserialize_with = "optional_secret")]
    pub bearer_token: Option<SecretString>,
    pub query: String,
    /// Page size of one search call (10..=100)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeometryConfig {
    pub model_view_url: String,
    #[serde(default, deserialize_with = "optional_secret")]
    pub ticket: Option<SecretString>,
    /// Negative means unbounded
    #[serde(default = "unbounded_ms")]
    pub customization_max_wait_ms: i64,
    /// Negative means unbounded
    #[serde(default = "unbounded_ms")]
    pub export_max_wait_ms: i64,
    #[serde(default = "default_export_wait_hint_ms")]
    pub export_wait_hint_ms: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    pub request_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleSection {
    pub interval_secs: u64,
    pub run_on_start: bool,
    /// Hard limit on one invocation, across search and every wait
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            run_on_start: true,
            invocation_timeout_secs: default_invocation_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or DIVER_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl WorkerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let mut config = Self::from_path(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Replace secrets with values found by `lookup`, when present.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(SEARCH_TOKEN_ENV) {
            self.search.bearer_token = Some(SecretString::new(token.into()));
        }
        if let Some(ticket) = lookup(GEOMETRY_TICKET_ENV) {
            self.geometry.ticket = Some(SecretString::new(ticket.into()));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search.api_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "search.api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !has_secret(&self.search.bearer_token) {
            return Err(ConfigError::InvalidValue {
                field: "search.bearer_token",
                reason: format!("must be set in the file or via {}", SEARCH_TOKEN_ENV),
            });
        }
        if self.search.query.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "search.query",
                reason: "must not be empty".to_string(),
            });
        }
        if !(10..=100).contains(&self.search.max_results) {
            return Err(ConfigError::InvalidValue {
                field: "search.max_results",
                reason: "must be between 10 and 100".to_string(),
            });
        }
        if self.geometry.model_view_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "geometry.model_view_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !has_secret(&self.geometry.ticket) {
            return Err(ConfigError::InvalidValue {
                field: "geometry.ticket",
                reason: format!("must be set in the file or via {}", GEOMETRY_TICKET_ENV),
            });
        }
        if self.http.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http.request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.schedule.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "schedule.interval_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if self.schedule.invocation_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "schedule.invocation_timeout_secs",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            customization_max_wait: Deadline::from_millis(self.geometry.customization_max_wait_ms),
            export_max_wait: Deadline::from_millis(self.geometry.export_max_wait_ms),
            export_wait_hint_ms: self.geometry.export_wait_hint_ms,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.http.request_timeout_ms)
    }
}

/// Take a secret out of its optional slot, failing with the field name.
pub fn required_secret(
    secret: Option<SecretString>,
    field: &'static str,
) -> Result<SecretString, ConfigError> {
    secret.ok_or(ConfigError::InvalidValue {
        field,
        reason: "must be set".to_string(),
    })
}

fn has_secret(secret: &Option<SecretString>) -> bool {
    secret
        .as_ref()
        .is_some_and(|s| !s.expose_secret().trim().is_empty())
}

fn optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(|s| SecretString::new(s.into())))
}

fn default_max_results() -> u32 {
    10
}

fn unbounded_ms() -> i64 {
    -1
}

fn default_export_wait_hint_ms() -> u64 {
    DEFAULT_EXPORT_WAIT_HINT_MS
}

fn default_invocation_timeout_secs() -> u64 {
    180
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
