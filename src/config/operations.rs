//! Config loading, validation, and derived values.

use super::model::Config;
use crate::context::{ProcessId, StoreLayout};
use crate::error::{LockError, Result};
use chrono::Duration;
use std::path::Path;

/// Slack between a lock's default expiry and the collector run that reaps it.
const GC_SLACK_MINUTES: i64 = 10;

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(LockError::UserError)` - Read or parse error, or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            LockError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Load config from `path` if the file exists, otherwise use defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| LockError::UserError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            LockError::UserError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `system_workspace` must be non-empty
    /// - `lock_gc_interval_minutes` must exceed the 10 minute expiry slack
    /// - `feed_channel_capacity` must be positive
    pub fn validate(&self) -> Result<()> {
        if self.system_workspace.trim().is_empty() {
            return Err(LockError::UserError(
                "config validation failed: system_workspace must not be empty".to_string(),
            ));
        }

        if i64::from(self.lock_gc_interval_minutes) <= GC_SLACK_MINUTES {
            return Err(LockError::UserError(format!(
                "config validation failed: lock_gc_interval_minutes must be greater than {} (found {})",
                GC_SLACK_MINUTES, self.lock_gc_interval_minutes
            )));
        }

        if self.feed_channel_capacity == 0 {
            return Err(LockError::UserError(
                "config validation failed: feed_channel_capacity must be greater than 0"
                    .to_string(),
            ));
        }

        if let Some(id) = &self.process_id
            && id.trim().is_empty()
        {
            return Err(LockError::UserError(
                "config validation failed: process_id must not be empty when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Age given to locks acquired without a timeout.
    pub fn default_lock_age(&self) -> Duration {
        Duration::minutes(i64::from(self.lock_gc_interval_minutes) - GC_SLACK_MINUTES)
    }

    /// How far an external collector should push out the expiry of a lock it
    /// finds still held.
    pub fn lock_extension_interval(&self) -> Duration {
        Duration::minutes(i64::from(self.lock_gc_interval_minutes) + GC_SLACK_MINUTES)
    }

    /// The configured process id, or a freshly generated one.
    pub fn resolve_process_id(&self) -> ProcessId {
        match &self.process_id {
            Some(id) => ProcessId::new(id.clone()),
            None => ProcessId::generate(),
        }
    }

    /// Store layout for `store_dir`, relative to the working directory.
    pub fn store_layout(&self) -> Result<StoreLayout> {
        StoreLayout::resolve_from_cwd(&self.store_dir)
    }
}
