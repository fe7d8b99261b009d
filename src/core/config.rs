//! Configuration management with layered hierarchy

use miette::Diagnostic;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::core::Project;

/// Largest SLA or expiry window accepted, in days
pub const MAX_DAYS: i64 = 3_650;

/// A merged configuration value the engine cannot work with
#[derive(Debug, Error, Diagnostic)]
#[error("config value {key} = {value} is out of range (expected {expected})")]
#[diagnostic(
    code(sitecare::config),
    help("fix the value in .sitecare/config.yaml, the global config, or the environment")
)]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub expected: String,
}

/// SLA days per defect severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SlaPolicy {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self {
            critical: 3,
            high: 5,
            medium: 7,
            low: 14,
        }
    }
}

/// SiteCare configuration with layered hierarchy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default actor id stamped on audit fields
    pub actor: Option<String>,

    /// Log level filter (overridden by RUST_LOG)
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,

    /// Deadline for every store call, in milliseconds
    pub store_timeout_ms: u64,

    /// Days before end date at which a warranty counts as expiring
    pub expiry_threshold_days: i64,

    /// Period of the background warranty sweep
    pub sweep_interval_secs: u64,

    /// Remediation deadlines for QA defects
    pub sla: SlaPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            actor: None,
            log_level: "warn".to_string(),
            log_json: false,
            store_timeout_ms: 5_000,
            expiry_threshold_days: 30,
            sweep_interval_secs: 3_600,
            sla: SlaPolicy::default(),
        }
    }
}

/// Partial config as read from one YAML layer
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigLayer {
    actor: Option<String>,
    log_level: Option<String>,
    log_json: Option<bool>,
    store_timeout_ms: Option<u64>,
    expiry_threshold_days: Option<i64>,
    sweep_interval_secs: Option<u64>,
    sla: Option<SlaPolicy>,
}

impl Config {
    /// Load configuration for one project, merging in priority order
    ///
    /// Built-in defaults, then the global user config
    /// (~/.config/sitecare/config.yaml), then the project's
    /// `.sitecare/config.yaml`, then environment variables. The merged
    /// result is validated.
    pub fn load_for(project: &Project) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(global_path) = Self::global_config_path() {
            config.merge_file(&global_path);
        }
        config.merge_file(&project.config_path());
        config.merge_env();
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would overflow date math or stall the sweep
    pub fn validate(&self) -> Result<(), ConfigError> {
        let days = [
            ("sla.critical", self.sla.critical),
            ("sla.high", self.sla.high),
            ("sla.medium", self.sla.medium),
            ("sla.low", self.sla.low),
            ("expiry_threshold_days", self.expiry_threshold_days),
        ];
        for (key, value) in days {
            if !(1..=MAX_DAYS).contains(&value) {
                return Err(ConfigError {
                    key,
                    value: value.to_string(),
                    expected: format!("1..={}", MAX_DAYS),
                });
            }
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError {
                key: "sweep_interval_secs",
                value: "0".to_string(),
                expected: "at least 1".to_string(),
            });
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError {
                key: "store_timeout_ms",
                value: "0".to_string(),
                expected: "at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Get the path to the global config file
    fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "sitecare")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    fn merge_file(&mut self, path: &std::path::Path) {
        if !path.exists() {
            return;
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yml::from_str::<ConfigLayer>(&contents) {
                Ok(layer) => self.merge(layer),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring invalid config file")
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read config file")
            }
        }
    }

    fn merge_env(&mut self) {
        if let Ok(actor) = std::env::var("SITECARE_ACTOR") {
            self.actor = Some(actor);
        }
        if let Ok(level) = std::env::var("SITECARE_LOG") {
            self.log_level = level;
        }
        if let Some(ms) = std::env::var("SITECARE_STORE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.store_timeout_ms = ms;
        }
    }

    /// Merge another layer into this one (other takes precedence)
    fn merge(&mut self, other: ConfigLayer) {
        if other.actor.is_some() {
            self.actor = other.actor;
        }
        if let Some(level) = other.log_level {
            self.log_level = level;
        }
        if let Some(json) = other.log_json {
            self.log_json = json;
        }
        if let Some(ms) = other.store_timeout_ms {
            self.store_timeout_ms = ms;
        }
        if let Some(days) = other.expiry_threshold_days {
            self.expiry_threshold_days = days;
        }
        if let Some(secs) = other.sweep_interval_secs {
            self.sweep_interval_secs = secs;
        }
        if let Some(sla) = other.sla {
            self.sla = sla;
        }
    }

    /// Get the actor id, falling back to the login name
    pub fn actor(&self) -> String {
        if let Some(ref actor) = self.actor {
            return actor.clone();
        }

        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert_eq!(config.expiry_threshold_days, 30);
        assert_eq!(config.sla, SlaPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let layer = |yaml: &str| {
            let mut config = Config::default();
            config.merge(serde_yml::from_str(yaml).unwrap());
            config.validate()
        };

        let err = layer("sla:\n  high: 100000000000000\n").unwrap_err();
        assert_eq!(err.key, "sla.high");
        assert_eq!(layer("sla:\n  low: -2\n").unwrap_err().key, "sla.low");
        assert_eq!(
            layer("expiry_threshold_days: 9223372036854775807\n")
                .unwrap_err()
                .key,
            "expiry_threshold_days"
        );
        assert_eq!(
            layer("sweep_interval_secs: 0\n").unwrap_err().key,
            "sweep_interval_secs"
        );
        assert_eq!(
            layer("store_timeout_ms: 0\n").unwrap_err().key,
            "store_timeout_ms"
        );
        assert!(layer("sla:\n  critical: 1\n  low: 3650\n").is_ok());
    }

    #[test]
    fn test_load_for_rejects_invalid_project_config() {
        let tmp = tempfile::tempdir().unwrap();
        let project = Project::init(tmp.path()).unwrap();
        std::fs::write(project.config_path(), "sweep_interval_secs: 0\n").unwrap();

        let err = Config::load_for(&project).unwrap_err();
        assert_eq!(err.key, "sweep_interval_secs");
    }

    #[test]
    fn test_layer_overrides_only_present_fields() {
        let mut config = Config::default();
        let layer: ConfigLayer = serde_yml::from_str(
            "actor: site-office\nsla:\n  critical: 1\nexpiry_threshold_days: 45\n",
        )
        .unwrap();
        config.merge(layer);

        assert_eq!(config.actor(), "site-office");
        assert_eq!(config.expiry_threshold_days, 45);
        assert_eq!(config.sla.critical, 1);
        // Unspecified SLA entries keep their defaults
        assert_eq!(config.sla.low, 14);
        assert_eq!(config.store_timeout_ms, 5_000);
    }
}
