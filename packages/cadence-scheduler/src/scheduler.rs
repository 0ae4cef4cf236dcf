use crate::Scheduler;
use crate::animation::{AnimationFrameCallback, AnimationFrameId, AnimationFrameQueue};
use crate::clock::{Clock, SystemClock, saturating_deadline};
use crate::config::SchedulerConfig;
use crate::error::ScriptError;
use crate::idle::{IdleCallback, IdleRunReport, IdleTaskQueue, StopHandle};
use crate::queue::{MicrotaskCallback, MicrotaskQueue, TaskCallback, TaskPoster, TaskQueue};
use crate::task::TaskId;
use crate::timer::{Timer, TimerKind, TimerQueue};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Host seam: what the scheduler needs from the embedding application.
pub trait SchedulerClient {
    /// Host error channel for failures raised by scheduled callbacks.
    fn report_error(&self, error: ScriptError) {
        tracing::warn!(%error, "uncaught error in scheduled callback");
    }

    fn did_request_animation_frame(&self) {}

    fn did_cancel_animation_frame(&self) {}

    /// The normal task queue went from empty to non-empty; the host should
    /// arrange a `process_tasks` call.
    fn did_schedule_task(&self) {}

    /// Called at the end of `begin_frame` with the frame deadline.
    fn enter_idle(&self, _deadline: Instant) {}
}

/// Client that only logs errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingClient;

impl SchedulerClient for LoggingClient {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Initialized,
    Running,
    Sleep,
}

/// Single-threaded scheduler owning every queue of one script thread.
pub struct LocalScheduler {
    client: Rc<dyn SchedulerClient>,
    clock: Rc<dyn Clock>,
    config: SchedulerConfig,
    microtasks: MicrotaskQueue,
    tasks: Arc<TaskQueue>,
    idle: Rc<IdleTaskQueue>,
    timers: Rc<TimerQueue>,
    animation_frames: AnimationFrameQueue,
    state: Cell<SchedulerState>,
}

impl LocalScheduler {
    pub fn new(client: Rc<dyn SchedulerClient>) -> Self {
        Self::with_clock(client, Rc::new(SystemClock))
    }

    pub fn with_clock(client: Rc<dyn SchedulerClient>, clock: Rc<dyn Clock>) -> Self {
        Self::with_config(client, clock, SchedulerConfig::default())
    }

    pub fn with_config(
        client: Rc<dyn SchedulerClient>,
        clock: Rc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let idle = Rc::new(IdleTaskQueue::new(clock.clone()));
        idle.set_trace_tasks(config.trace_tasks);
        Self {
            client,
            timers: Rc::new(TimerQueue::new(clock.clone())),
            clock,
            config,
            microtasks: MicrotaskQueue::new(),
            tasks: Arc::new(TaskQueue::new()),
            idle,
            animation_frames: AnimationFrameQueue::new(),
            state: Cell::new(SchedulerState::Initialized),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> SchedulerState {
        self.state.get()
    }

    pub fn idle_queue(&self) -> &Rc<IdleTaskQueue> {
        &self.idle
    }

    pub fn timer_queue(&self) -> &Rc<TimerQueue> {
        &self.timers
    }

    pub fn create_timer(&self, kind: TimerKind) -> Timer {
        Timer::new(kind, self)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.idle.stop_handle()
    }

    /// Handle other threads use to post normal tasks.
    pub fn task_poster(&self) -> TaskPoster {
        TaskPoster::new(self.tasks.clone(), self.idle.stop_handle())
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.tasks.is_empty() || !self.microtasks.is_empty()
    }

    fn report_errors(&self, errors: impl IntoIterator<Item = ScriptError>) {
        for error in errors {
            self.client.report_error(error);
        }
    }

    /// Microtask checkpoint. Returns how many microtasks ran.
    pub fn run_microtasks(&self) -> usize {
        let report = self.microtasks.run();
        self.report_errors(report.errors);
        report.ran
    }

    /// Failures are forwarded to the client and also left in the report.
    pub fn run_idle_tasks(&self, deadline: Instant) -> IdleRunReport {
        let report = self.idle.run_idle_tasks(deadline);
        self.report_errors(report.errors.iter().cloned());
        report
    }

    /// Runs normal tasks, with a microtask checkpoint whenever the queue
    /// runs dry, until both queues are empty.
    pub fn process_tasks(&self) {
        let _span = tracing::trace_span!("process_tasks").entered();
        self.state.set(SchedulerState::Running);
        loop {
            let Some(task) = self.tasks.take_task() else {
                self.run_microtasks();
                if self.tasks.is_empty() {
                    break;
                }
                continue;
            };
            if let Err(error) = task() {
                self.client.report_error(error);
            }
        }
        self.state.set(SchedulerState::Sleep);
    }

    /// Frame entry point: animation-frame callbacks first, then idle work
    /// while time remains before `deadline`.
    pub fn begin_frame(&self, deadline: Instant) {
        let _span = tracing::trace_span!("begin_frame").entered();
        let errors = self.animation_frames.did_begin_frame(self.clock.now());
        self.report_errors(errors);
        if self.clock.now() < deadline {
            self.run_idle_tasks(deadline);
        }
        self.client.enter_idle(deadline);
    }

    /// Fires every due low-level timer. Script timers only post idle tasks
    /// here; their callbacks run in a later idle drain.
    pub fn fire_timers(&self) -> usize {
        self.timers.fire_due()
    }

    /// Earliest instant at which a timer fires or a waiting idle task
    /// becomes due.
    pub fn next_wake_time(&self) -> Option<Instant> {
        match (self.timers.next_fire_time(), self.idle.next_run_time()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn frame_deadline(&self) -> Instant {
        saturating_deadline(self.clock.now(), self.config.frame_budget())
    }
}

impl Scheduler for LocalScheduler {
    fn post_microtask(&self, task: MicrotaskCallback) {
        self.microtasks.post(task);
    }

    fn schedule_task(&self, task: TaskCallback) {
        let _span = tracing::trace_span!("schedule_task").entered();
        if self.tasks.give_task(task) {
            self.client.did_schedule_task();
        }
        self.idle.stop_idle_tasks();
    }

    fn schedule_idle_task(&self, task: IdleCallback, delay: Option<Duration>) -> TaskId {
        let _span = tracing::trace_span!("schedule_idle_task").entered();
        self.idle.schedule(task, delay)
    }

    fn cancel_idle_task(&self, id: TaskId) {
        self.idle.cancel_task(id);
    }

    fn request_animation_frame(&self, callback: AnimationFrameCallback) -> AnimationFrameId {
        let id = self.animation_frames.give(callback);
        self.client.did_request_animation_frame();
        id
    }

    fn cancel_animation_frame(&self, id: AnimationFrameId) {
        self.animation_frames.cancel(id);
        self.client.did_cancel_animation_frame();
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }
}
