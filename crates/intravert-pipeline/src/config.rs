//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use intravert_types::{duration_serde, IntravertError, Result};

/// Environment variable overriding [`EngineConfig::default_timeout`], in milliseconds.
pub const DEFAULT_TIMEOUT_ENV: &str = "INTRAVERT_DEFAULT_TIMEOUT_MS";

/// Configuration for the pipeline engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline applied when the first step declares no timeout.
    #[serde(with = "duration_serde")]
    pub default_timeout: Duration,
    /// Upper bound for caller-declared timeouts.
    #[serde(with = "duration_serde")]
    pub max_timeout: Duration,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
    /// Keyspaces hidden from `listkeyspaces`.
    pub system_keyspaces: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
            max_timeout: Duration::from_secs(300),
            event_capacity: 256,
            system_keyspaces: vec![
                "system".to_string(),
                "system_auth".to_string(),
                "system_traces".to_string(),
            ],
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&data)
            .map_err(|e| IntravertError::Config(format!("{}: {}", path.display(), e)))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in practice).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(DEFAULT_TIMEOUT_ENV) {
            let ms: u64 = raw.trim().parse().map_err(|e| {
                IntravertError::Config(format!("{} must be milliseconds: {}", DEFAULT_TIMEOUT_ENV, e))
            })?;
            self.default_timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_timeout.is_zero() {
            return Err(IntravertError::Config("default_timeout must be positive".into()));
        }
        if self.max_timeout.is_zero() {
            return Err(IntravertError::Config("max_timeout must be positive".into()));
        }
        if self.default_timeout > self.max_timeout {
            return Err(IntravertError::Config(format!(
                "default_timeout ({}ms) exceeds max_timeout ({}ms)",
                self.default_timeout.as_millis(),
                self.max_timeout.as_millis()
            )));
        }
        if self.event_capacity == 0 {
            return Err(IntravertError::Config("event_capacity must be positive".into()));
        }
        Ok(())
    }
}
