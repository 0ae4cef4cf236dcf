use cadence_scheduler::{ConfigError, SchedulerConfig, TimerKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Scripted work fed to the simulated host loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub scheduler: SchedulerConfig,
    pub frames: u32,
    pub idle_tasks: Vec<IdleTaskSpec>,
    pub timers: Vec<TimerSpec>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            frames: 60,
            idle_tasks: Vec::new(),
            timers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleTaskSpec {
    pub label: String,
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Simulated work, capped by the drain deadline.
    #[serde(default)]
    pub work_ms: u64,
    /// Cancel right after posting.
    #[serde(default)]
    pub cancel: bool,
    /// Return an error instead of succeeding.
    #[serde(default)]
    pub fail: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSpec {
    pub label: String,
    pub kind: TimerKind,
    pub delay_ms: u64,
    /// Stop a repeating timer after this many callbacks.
    #[serde(default)]
    pub fires: Option<u32>,
}

impl WorkloadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        if self.frames == 0 {
            return Err(ConfigError::Invalid("frames must be greater than zero".into()));
        }
        if let Some(timer) = self
            .timers
            .iter()
            .find(|timer| timer.kind == TimerKind::Repeating && timer.delay_ms == 0)
        {
            return Err(ConfigError::Invalid(format!(
                "repeating timer '{}' needs a non-zero delay",
                timer.label
            )));
        }
        Ok(())
    }

    /// Applies command-line overrides and validates the result.
    pub fn apply_overrides(
        &mut self,
        frames: Option<u32>,
        frame_budget_ms: Option<u64>,
    ) -> Result<(), ConfigError> {
        if let Some(frames) = frames {
            self.frames = frames;
        }
        if let Some(budget) = frame_budget_ms {
            self.scheduler.frame_budget_ms = budget;
        }
        self.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let workload: Self = serde_json::from_str(json)?;
        workload.validate()?;
        Ok(workload)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
