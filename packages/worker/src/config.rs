use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{DatabaseAppConfig, MqAppConfig, TransientStoreConfig};

/// Worker-specific configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Unique identifier for this worker instance. Default: "worker-1".
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Messages each stage consumer handles at once. Default: 10. The
    /// grading concurrency cap is separate (`grading.max_concurrent_tasks`).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Sandbox executable. Default: "firejail".
    #[serde(default = "default_sandbox_bin")]
    pub sandbox_bin: String,
    /// Root under which uploads/, compiled/ and execute/ live.
    /// Default: "work".
    #[serde(default = "default_workdir")]
    pub workdir: String,
    #[serde(default)]
    pub grading: GradingLimits,
}

fn default_worker_id() -> String {
    "worker-1".into()
}
fn default_batch_size() -> usize {
    10
}
fn default_sandbox_bin() -> String {
    "firejail".into()
}
fn default_workdir() -> String {
    "work".into()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            batch_size: default_batch_size(),
            sandbox_bin: default_sandbox_bin(),
            workdir: default_workdir(),
            grading: GradingLimits::default(),
        }
    }
}

/// Resource policy applied to every sandboxed run.
#[derive(Debug, Deserialize, Clone)]
pub struct GradingLimits {
    /// Process-wide cap on concurrently running sandboxed executions.
    /// Default: 4.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// A submission is allowed this multiple of the reference solution's
    /// wall time. Default: 10.
    #[serde(default = "default_time_limit_multiplier")]
    pub time_limit_multiplier: f64,
    /// Lower bound on the timeout so short-reference tests are not starved.
    /// Default: 10 s.
    #[serde(default = "default_floor_timeout_secs")]
    pub floor_timeout_secs: u64,
    /// Base captured-output cap in bytes. Default: 200 KiB.
    #[serde(default = "default_output_cap_bytes")]
    pub output_cap_bytes: usize,
    /// Multiplier applied to the base cap. Default: 5.
    #[serde(default = "default_output_cap_multiplier")]
    pub output_cap_multiplier: usize,
    /// Stack limit handed to `ulimit -s`, in KiB. Default: 16384.
    #[serde(default = "default_stack_kib")]
    pub stack_kib: u32,
}

fn default_max_concurrent_tasks() -> usize {
    4
}
fn default_time_limit_multiplier() -> f64 {
    10.0
}
fn default_floor_timeout_secs() -> u64 {
    10
}
fn default_output_cap_bytes() -> usize {
    200 * 1024
}
fn default_output_cap_multiplier() -> usize {
    5
}
fn default_stack_kib() -> u32 {
    16384
}

impl Default for GradingLimits {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            time_limit_multiplier: default_time_limit_multiplier(),
            floor_timeout_secs: default_floor_timeout_secs(),
            output_cap_bytes: default_output_cap_bytes(),
            output_cap_multiplier: default_output_cap_multiplier(),
            stack_kib: default_stack_kib(),
        }
    }
}

impl GradingLimits {
    /// Wall-clock timeout for one run: the reference wall time scaled by
    /// the multiplier, never below the floor.
    pub fn wall_timeout_for(&self, ref_real_ms: f64) -> Duration {
        let scaled = (ref_real_ms.max(0.0) / 1000.0) * self.time_limit_multiplier;
        let floor = self.floor_timeout_secs as f64;
        Duration::from_secs_f64(scaled.max(floor))
    }

    pub fn output_cap(&self) -> usize {
        self.output_cap_bytes * self.output_cap_multiplier
    }
}

/// Worker application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub database: DatabaseAppConfig,
    #[serde(default)]
    pub transient: TransientStoreConfig,
}

impl WorkerAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("MARKER_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("MARKER").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_floor_applies_to_short_references() {
        let limits = GradingLimits::default();
        // 100 ms reference scaled by 10 is 1 s, below the 10 s floor.
        assert_eq!(limits.wall_timeout_for(100.0), Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_scales_with_reference_time() {
        let limits = GradingLimits::default();
        // 5 s reference scaled by 10 is 50 s.
        assert_eq!(limits.wall_timeout_for(5000.0), Duration::from_secs(50));
    }

    #[test]
    fn test_output_cap_multiplies_base() {
        let limits = GradingLimits::default();
        assert_eq!(limits.output_cap(), 200 * 1024 * 5);
    }

    #[test]
    fn test_defaults() {
        let config = WorkerAppConfig::default();
        assert_eq!(config.worker.id, "worker-1");
        assert_eq!(config.worker.sandbox_bin, "firejail");
        assert_eq!(config.mq.compile_queue_name, "compile_jobs");
        assert_eq!(config.mq.execute_queue_name, "execute_jobs");
        assert_eq!(config.worker.grading.max_concurrent_tasks, 4);
    }
}
