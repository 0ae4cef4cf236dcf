use thiserror::Error;

/// Failure raised by a callback running against the script runtime.
///
/// The scheduler never swallows these: run reports collect them and
/// [`LocalScheduler`](crate::LocalScheduler) hands each one to
/// [`SchedulerClient::report_error`](crate::SchedulerClient::report_error).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The script threw and nothing caught it.
    #[error("uncaught exception: {0}")]
    Exception(String),

    /// The runtime is shutting down and refused to run script code.
    #[error("script runtime is terminating")]
    Terminated,
}

impl ScriptError {
    pub fn exception(message: impl Into<String>) -> Self {
        Self::Exception(message.into())
    }
}

/// Result type every scheduled callback returns.
pub type TaskResult = Result<(), ScriptError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
