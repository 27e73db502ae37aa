//! Batch orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Tunables for the batch orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Concurrency ceiling used until an operator or job option sets one.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,

    /// Hard upper bound for the concurrency ceiling.
    /// Each running job holds a live page context, so this stays small.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// How long the throttle stays lowered after a failure (milliseconds).
    #[serde(default = "default_cooldown")]
    pub cooldown_ms: u64,

    /// Accumulated result size above which at most two jobs run.
    #[serde(default = "default_low_water")]
    pub storage_low_water_bytes: u64,

    /// Accumulated result size above which only one job runs.
    #[serde(default = "default_high_water")]
    pub storage_high_water_bytes: u64,

    /// Deadline for a page context to finish loading (milliseconds).
    #[serde(default = "default_load_timeout")]
    pub load_timeout_ms: u64,

    /// Extra wait after load so in-page handlers can attach (milliseconds).
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Per-attempt extraction timeout (milliseconds).
    #[serde(default = "default_extract_timeout")]
    pub extract_timeout_ms: u64,

    /// Per-attempt extraction timeout when images are bundled locally (milliseconds).
    #[serde(default = "default_extract_timeout_local_archive")]
    pub extract_timeout_local_archive_ms: u64,

    /// Extraction attempts per job.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between extraction attempts (milliseconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Delay before a freed slot is refilled (milliseconds).
    #[serde(default = "default_backfill_delay")]
    pub backfill_delay_ms: u64,

    /// Minimum interval between persists triggered by progress reports (milliseconds).
    #[serde(default = "default_progress_persist_interval")]
    pub progress_persist_interval_ms: u64,

    /// Capacity of the command channel in front of the orchestrator loop.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_concurrency() -> usize {
    1
}

fn default_max_concurrency() -> usize {
    3
}

fn default_cooldown() -> u64 {
    45_000 // 45 seconds
}

fn default_low_water() -> u64 {
    350 * MIB
}

fn default_high_water() -> u64 {
    650 * MIB
}

fn default_load_timeout() -> u64 {
    30_000
}

fn default_settle_delay() -> u64 {
    4_000
}

fn default_extract_timeout() -> u64 {
    6 * 60_000 // 6 minutes
}

fn default_extract_timeout_local_archive() -> u64 {
    12 * 60_000 // 12 minutes
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2_000
}

fn default_backfill_delay() -> u64 {
    300
}

fn default_progress_persist_interval() -> u64 {
    1_500
}

fn default_command_buffer() -> usize {
    256
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_concurrency(),
            max_concurrency: default_max_concurrency(),
            cooldown_ms: default_cooldown(),
            storage_low_water_bytes: default_low_water(),
            storage_high_water_bytes: default_high_water(),
            load_timeout_ms: default_load_timeout(),
            settle_delay_ms: default_settle_delay(),
            extract_timeout_ms: default_extract_timeout(),
            extract_timeout_local_archive_ms: default_extract_timeout_local_archive(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            backfill_delay_ms: default_backfill_delay(),
            progress_persist_interval_ms: default_progress_persist_interval(),
            command_buffer: default_command_buffer(),
        }
    }
}

impl BatchConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Extraction timeout, longer when the job bundles images locally.
    pub fn extract_timeout(&self, local_archive: bool) -> Duration {
        if local_archive {
            Duration::from_millis(self.extract_timeout_local_archive_ms)
        } else {
            Duration::from_millis(self.extract_timeout_ms)
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn backfill_delay(&self) -> Duration {
        Duration::from_millis(self.backfill_delay_ms)
    }

    pub fn progress_persist_interval(&self) -> Duration {
        Duration::from_millis(self.progress_persist_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BatchConfig::default();
        assert_eq!(config.default_concurrency, 1);
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.cooldown_ms, 45_000);
        assert_eq!(config.storage_low_water_bytes, 350 * 1024 * 1024);
        assert_eq!(config.storage_high_water_bytes, 650 * 1024 * 1024);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backfill_delay_ms, 300);
        assert_eq!(config.progress_persist_interval_ms, 1_500);
    }

    #[test]
    fn test_extract_timeout_longer_for_local_archive() {
        let config = BatchConfig::default();
        assert_eq!(config.extract_timeout(false), Duration::from_secs(360));
        assert_eq!(config.extract_timeout(true), Duration::from_secs(720));
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: BatchConfig = toml::from_str("").unwrap();
        assert_eq!(config, BatchConfig::default());
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
            default_concurrency = 2
            cooldown_ms = 1000
            settle_delay_ms = 0
        "#;
        let config: BatchConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.default_concurrency, 2);
        assert_eq!(config.cooldown_ms, 1000);
        assert_eq!(config.settle_delay_ms, 0);
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.retry_delay_ms, 2_000);
    }
}
