//! Store configuration, read from `.abelana/config.yaml`.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Config file name within the .abelana directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Tunables for the engines, the task runner and the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Maximum entries returned by one profile or timeline page
    pub timeline_batch_size: usize,

    /// Distinct moderator approvals needed to unflag a photo
    pub approvals_required: u32,

    /// Attempts before a task that failed for an unclassified reason is
    /// dead-lettered. Store contention never counts against this.
    pub task_max_attempts: u32,

    /// Base retry delay, doubled per failed attempt
    pub task_retry_backoff_ms: u64,

    /// Upper bound on the retry delay
    pub task_max_backoff_ms: u64,

    /// How long a write waits on another writer before reporting a conflict
    pub busy_timeout_ms: u64,

    /// How often the daemon drains the task queue
    pub drain_interval_ms: u64,

    /// Tasks run per drain round
    pub drain_batch_size: usize,

    /// Emit per-operation trace logs from the engines
    pub verbose: bool,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeline_batch_size: 300,
            approvals_required: 2,
            task_max_attempts: 5,
            task_retry_backoff_ms: 1000,
            task_max_backoff_ms: 60_000,
            busy_timeout_ms: 5000,
            drain_interval_ms: 100,
            drain_batch_size: 100,
            verbose: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load the config from a `.abelana` directory; a missing file means defaults.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path).context("Failed to read config.yaml")?;
        let config: Config = serde_yaml::from_str(&text).context("Failed to parse config.yaml")?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config unless one already exists.
    pub fn write_if_missing(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            return Ok(());
        }
        let text = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(&path, text).context("Failed to write config.yaml")?;
        Ok(())
    }

    /// Reject values that would stall paging or the task runner.
    pub fn validate(&self) -> Result<()> {
        if self.timeline_batch_size == 0 {
            eyre::bail!("timeline_batch_size must be at least 1");
        }
        if self.approvals_required == 0 {
            eyre::bail!("approvals_required must be at least 1");
        }
        if self.task_max_attempts == 0 {
            eyre::bail!("task_max_attempts must be at least 1");
        }
        if self.drain_batch_size == 0 {
            eyre::bail!("drain_batch_size must be at least 1");
        }
        Ok(())
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Delay before the next attempt after `attempts` failures.
    pub fn retry_delay_ms(&self, attempts: u32) -> i64 {
        let shift = attempts.saturating_sub(1).min(16);
        let delay = self.task_retry_backoff_ms.saturating_mul(1 << shift);
        delay.min(self.task_max_backoff_ms) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.timeline_batch_size, 300);
        assert_eq!(config.approvals_required, 2);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(CONFIG_FILE),
            "timeline_batch_size: 20\nverbose: true\n",
        )
        .unwrap();

        let config = Config::load(temp_dir.path()).unwrap();
        assert_eq!(config.timeline_batch_size, 20);
        assert!(config.verbose);
        assert_eq!(config.task_max_attempts, 5);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(CONFIG_FILE), "timeline_batch_size: 0\n").unwrap();
        assert!(Config::load(temp_dir.path()).is_err());
    }

    #[test]
    fn test_write_if_missing_does_not_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let custom = Config {
            timeline_batch_size: 7,
            ..Config::default()
        };
        custom.write_if_missing(temp_dir.path()).unwrap();
        Config::default().write_if_missing(temp_dir.path()).unwrap();

        let loaded = Config::load(temp_dir.path()).unwrap();
        assert_eq!(loaded.timeline_batch_size, 7);
    }

    #[test]
    fn test_retry_delay_doubles() {
        let config = Config {
            task_retry_backoff_ms: 100,
            ..Config::default()
        };
        assert_eq!(config.retry_delay_ms(1), 100);
        assert_eq!(config.retry_delay_ms(2), 200);
        assert_eq!(config.retry_delay_ms(4), 800);
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let config = Config {
            task_retry_backoff_ms: 1000,
            task_max_backoff_ms: 5000,
            ..Config::default()
        };
        assert_eq!(config.retry_delay_ms(3), 4000);
        assert_eq!(config.retry_delay_ms(4), 5000);
        assert_eq!(config.retry_delay_ms(1000), 5000);
    }
}
