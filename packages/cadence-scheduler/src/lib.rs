pub mod animation;
pub mod clock;
pub mod config;
pub mod error;
pub mod idle;
pub mod lock;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod timer;

use std::time::{Duration, Instant};

/// The scheduling surface exposed to script-facing code.
/// Hosts drive the queues through [`LocalScheduler`]; bindings only need this.
pub trait Scheduler {
    /// Schedule a microtask, run at the next microtask checkpoint.
    /// Used for promise reactions and other continuations.
    fn post_microtask(&self, task: MicrotaskCallback);

    /// Schedule a normal task. Stops the idle drain in progress.
    fn schedule_task(&self, task: TaskCallback);

    /// Schedule deferred work, ready after `delay` (immediately when `None`).
    fn schedule_idle_task(&self, task: IdleCallback, delay: Option<Duration>) -> TaskId;

    /// Unknown or already-run ids are ignored.
    fn cancel_idle_task(&self, id: TaskId);

    fn request_animation_frame(&self, callback: AnimationFrameCallback) -> AnimationFrameId;

    fn cancel_animation_frame(&self, id: AnimationFrameId);

    /// Get the current time (monotonic).
    fn now(&self) -> Instant;
}

pub use animation::{AnimationFrameCallback, AnimationFrameId};
pub use clock::{Clock, ManualClock, SystemClock, saturating_deadline};
pub use config::{MAX_FRAME_BUDGET_MS, SchedulerConfig};
pub use error::{ConfigError, ScriptError, TaskResult};
pub use idle::{IdleCallback, IdleRunReport, IdleTask, IdleTaskQueue, StopHandle};
pub use lock::{lock_script, try_lock_script};
pub use queue::{MicrotaskCallback, TaskCallback, TaskPoster};
pub use scheduler::{LocalScheduler, LoggingClient, SchedulerClient, SchedulerState};
pub use task::{SequenceCounter, TaskId, compare_sequence, compare_tasks, next_task_id};
pub use timer::{Timer, TimerKind, TimerQueue, registered_timer_count};
