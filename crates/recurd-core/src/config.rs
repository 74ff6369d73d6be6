use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 30 * 60; // ceiling per job invocation

/// Top-level config (recurd.toml + RECURD_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecurdConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the dispatch loop wakes up to look for due timers.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Hard ceiling for a single job invocation. The job's cancellation
    /// token fires when it elapses.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// Register the built-in `log`, `test` and `fail` functions at boot.
    #[serde(default = "bool_true")]
    pub sample_functions: bool,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            execution_timeout_secs: default_execution_timeout_secs(),
            sample_functions: true,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_execution_timeout_secs() -> u64 {
    DEFAULT_EXECUTION_TIMEOUT_SECS
}
fn default_db_path() -> String {
    home_dir().join("recurd.db").to_string_lossy().into_owned()
}

fn home_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".recurd")
}

impl RecurdConfig {
    /// Load config from a TOML file with RECURD_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. RECURD_CONFIG env var
    ///   3. ~/.recurd/recurd.toml
    ///
    /// Nested keys are separated by a double underscore, e.g.
    /// `RECURD_SCHEDULER__TICK_INTERVAL_MS=500`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("RECURD_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        tracing::debug!(path = %path, "loading configuration");
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("RECURD_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::ConfigError::Invalid(e.to_string()))
    }
}

fn default_config_path() -> String {
    home_dir().join("recurd.toml").to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_nothing_is_configured() {
        let config = RecurdConfig::from_figment(Figment::new()).unwrap();
        assert_eq!(config.gateway.port, DEFAULT_PORT);
        assert_eq!(config.gateway.bind, DEFAULT_BIND);
        assert_eq!(config.scheduler.tick_interval(), Duration::from_secs(1));
        assert_eq!(
            config.scheduler.execution_timeout(),
            Duration::from_secs(30 * 60)
        );
        assert!(config.scheduler.sample_functions);
        assert!(config.database.path.ends_with("recurd.db"));
    }

    #[test]
    fn toml_sections_override_defaults() {
        let toml = r#"
            [gateway]
            port = 8081

            [database]
            path = "/tmp/jobs.db"

            [scheduler]
            tick_interval_ms = 250
            sample_functions = false
        "#;
        let config =
            RecurdConfig::from_figment(Figment::new().merge(Toml::string(toml))).unwrap();
        assert_eq!(config.gateway.port, 8081);
        assert_eq!(config.gateway.bind, DEFAULT_BIND);
        assert_eq!(config.database.path, "/tmp/jobs.db");
        assert_eq!(config.scheduler.tick_interval(), Duration::from_millis(250));
        assert_eq!(
            config.scheduler.execution_timeout_secs,
            DEFAULT_EXECUTION_TIMEOUT_SECS
        );
        assert!(!config.scheduler.sample_functions);
    }

    #[test]
    fn bad_types_surface_as_config_errors() {
        let toml = r#"
            [gateway]
            port = "not-a-port"
        "#;
        let err = RecurdConfig::from_figment(Figment::new().merge(Toml::string(toml)))
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn zero_durations_are_clamped() {
        let config = SchedulerConfig {
            tick_interval_ms: 0,
            execution_timeout_secs: 0,
            sample_functions: false,
        };
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
        assert_eq!(config.execution_timeout(), Duration::from_secs(1));
    }
}
