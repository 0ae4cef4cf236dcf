use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound on `frame_budget_ms`.
pub const MAX_FRAME_BUDGET_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Time budget of one frame, used by `LocalScheduler::frame_deadline`.
    pub frame_budget_ms: u64,
    /// Emit a trace event for every idle task invocation.
    pub trace_tasks: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_budget_ms: 16,
            trace_tasks: false,
        }
    }
}

impl SchedulerConfig {
    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(self.frame_budget_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_budget_ms == 0 {
            return Err(ConfigError::Invalid(
                "frame_budget_ms must be greater than zero".to_string(),
            ));
        }
        if self.frame_budget_ms > MAX_FRAME_BUDGET_MS {
            return Err(ConfigError::Invalid(format!(
                "frame_budget_ms must be at most {MAX_FRAME_BUDGET_MS}, got {}",
                self.frame_budget_ms
            )));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
