//! Periodic background task table.

use serde::Deserialize;

use super::ConfigError;

/// Smallest allowed task interval; smaller configured values are clamped.
pub const CRON_MIN_INTERVAL_SECS: u64 = 180;

/// One scheduled task. `target` names a function registered at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct CronTaskConfig {
    pub name: String,

    /// Lower priority runs first when several tasks start together.
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Seconds between runs, clamped to [`CRON_MIN_INTERVAL_SECS`].
    pub interval_secs: u64,

    /// Registered target function name.
    pub target: String,
}

fn default_priority() -> u32 {
    42
}

/// `[cron]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    pub enable: bool,

    /// Task table. The defaults keep the builtin cache tidy; removing them
    /// disables cache housekeeping entirely.
    pub tasks: Vec<CronTaskConfig>,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            enable: true,
            tasks: vec![
                CronTaskConfig {
                    name: "cache_clean_soft".into(),
                    priority: 42,
                    interval_secs: 60 * 15,
                    target: "cache_clean".into(),
                },
                CronTaskConfig {
                    name: "cache_clean_force_all".into(),
                    priority: 42,
                    interval_secs: 3600 * 24 * 7,
                    target: "cache_flush".into(),
                },
            ],
        }
    }
}

impl CronConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        for task in &self.tasks {
            if task.name.is_empty() || task.target.is_empty() {
                return Err(ConfigError::Validation(
                    "cron.tasks entries need a name and a target".into(),
                ));
            }
        }
        Ok(())
    }

    /// Effective interval for a task after clamping.
    pub fn effective_interval(task: &CronTaskConfig) -> u64 {
        task.interval_secs.max(CRON_MIN_INTERVAL_SECS)
    }
}
