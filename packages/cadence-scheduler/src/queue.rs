use crate::error::{ScriptError, TaskResult};
use crate::idle::StopHandle;
use crate::task::{TaskId, next_task_id};
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::Arc;

pub type MicrotaskCallback = Box<dyn FnOnce() -> TaskResult>;

/// Callback for the normal task queue. These may be posted from any thread.
pub type TaskCallback = Box<dyn FnOnce() -> TaskResult + Send>;

struct Microtask {
    id: TaskId,
    callback: MicrotaskCallback,
}

/// Outcome of one microtask checkpoint.
#[derive(Debug, Default)]
pub struct MicrotaskReport {
    pub ran: usize,
    pub errors: Vec<ScriptError>,
}

/// FIFO of continuations run at the end of each unit of script execution.
/// Since the scheduler is single-threaded, we use RefCell<VecDeque>.
#[derive(Default)]
pub struct MicrotaskQueue {
    queue: RefCell<VecDeque<Microtask>>,
    draining: Cell<bool>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, callback: MicrotaskCallback) {
        let id = next_task_id();
        tracing::trace!(task = %id, "post microtask");
        self.queue.borrow_mut().push_back(Microtask { id, callback });
    }

    fn pop(&self) -> Option<Microtask> {
        self.queue.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Runs until the queue is empty, including microtasks posted by the
    /// ones being run. A nested call from inside a microtask is a no-op; the
    /// outer drain picks the new work up.
    pub fn run(&self) -> MicrotaskReport {
        let mut report = MicrotaskReport::default();
        if self.draining.replace(true) {
            return report;
        }
        let _reset = DrainGuard(&self.draining);

        while let Some(task) = self.pop() {
            report.ran += 1;
            if let Err(error) = (task.callback)() {
                tracing::debug!(task = %task.id, %error, "microtask failed");
                report.errors.push(error);
            }
        }
        report
    }
}

/// Clears the draining flag even if a microtask unwinds.
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Regular tasks handed over from other threads (I/O completions, view
/// events). Guarded by a mutex, unlike the script-thread-only queues.
#[derive(Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<TaskCallback>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the queue held no task before this one.
    pub fn give_task(&self, task: TaskCallback) -> bool {
        let mut tasks = self.tasks.lock();
        tasks.push_back(task);
        tasks.len() == 1
    }

    pub fn take_task(&self) -> Option<TaskCallback> {
        self.tasks.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }
}

/// Cross-thread handle for posting normal tasks. Posting always asks the
/// idle drain in progress to stop so the new task is not starved.
#[derive(Clone)]
pub struct TaskPoster {
    queue: Arc<TaskQueue>,
    stop: StopHandle,
}

impl TaskPoster {
    pub(crate) fn new(queue: Arc<TaskQueue>, stop: StopHandle) -> Self {
        Self { queue, stop }
    }

    /// Queues `task`. Returns true when the host should schedule a
    /// `process_tasks` call, i.e. the queue was empty before.
    pub fn post(&self, task: TaskCallback) -> bool {
        let needs_processing = self.queue.give_task(task);
        self.stop.stop();
        needs_processing
    }
}
