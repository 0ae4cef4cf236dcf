//! Deferred work drained inside a caller-supplied time budget.
//!
//! Tasks that are due live in a FIFO so simultaneously-due work runs in the
//! order it was posted; tasks with a future target time wait in a min-heap
//! ordered by [`compare_tasks`]. Cancellation only sets a flag. A canceled
//! task is reclaimed when it is next popped, from either structure.

use crate::clock::{Clock, saturating_deadline};
use crate::error::{ScriptError, TaskResult};
use crate::task::{SequenceCounter, TaskId, compare_tasks, global_sequence};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

/// Idle callbacks receive the deadline of the drain that runs them.
pub type IdleCallback = Box<dyn FnOnce(Instant) -> TaskResult>;

pub struct IdleTask {
    id: TaskId,
    run_at: Option<Instant>,
    callback: IdleCallback,
    canceled: bool,
}

impl IdleTask {
    /// `run_at == None` means ready immediately.
    pub fn new(id: TaskId, run_at: Option<Instant>, callback: IdleCallback) -> Self {
        Self {
            id,
            run_at,
            callback,
            canceled: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn run_at(&self) -> Option<Instant> {
        self.run_at
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    pub fn cancel(&mut self) {
        self.canceled = true;
    }

    fn run(self, deadline: Instant) -> TaskResult {
        (self.callback)(deadline)
    }
}

struct WaitingEntry {
    run_at: Instant,
    id: TaskId,
}

// BinaryHeap is a max-heap, so the comparison is reversed.
impl Ord for WaitingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_tasks(other.run_at, other.id, self.run_at, self.id)
    }
}

impl PartialOrd for WaitingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for WaitingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.id == other.id
    }
}

impl Eq for WaitingEntry {}

/// Thread-safe request to abandon the idle drain in progress.
///
/// This is a hint, read once between task invocations. It never interrupts
/// a running callback and one request ends at most one drain.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(AtomicOrdering::Relaxed)
    }

    fn reset(&self) {
        self.flag.store(false, AtomicOrdering::Relaxed);
    }
}

/// What one [`IdleTaskQueue::run_idle_tasks`] call did.
#[derive(Debug, Default)]
pub struct IdleRunReport {
    pub ran: usize,
    pub canceled: usize,
    pub stopped: bool,
    pub errors: Vec<ScriptError>,
}

pub struct IdleTaskQueue {
    clock: Rc<dyn Clock>,
    sequence: &'static SequenceCounter,
    ready: RefCell<VecDeque<TaskId>>,
    waiting: RefCell<BinaryHeap<WaitingEntry>>,
    tasks: RefCell<FxHashMap<TaskId, IdleTask>>,
    stop: StopHandle,
    trace_tasks: Cell<bool>,
}

impl IdleTaskQueue {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self::with_sequence(clock, global_sequence())
    }

    pub fn with_sequence(clock: Rc<dyn Clock>, sequence: &'static SequenceCounter) -> Self {
        Self {
            clock,
            sequence,
            ready: RefCell::new(VecDeque::new()),
            waiting: RefCell::new(BinaryHeap::new()),
            tasks: RefCell::new(FxHashMap::default()),
            stop: StopHandle::default(),
            trace_tasks: Cell::new(false),
        }
    }

    /// Emit a trace event for every task invocation.
    pub fn set_trace_tasks(&self, enabled: bool) {
        self.trace_tasks.set(enabled);
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Builds a task from `callback` and queues it. A missing or zero delay
    /// makes the task ready immediately; a delay past the end of the clock's
    /// range is clamped there.
    pub fn schedule(&self, callback: IdleCallback, delay: Option<Duration>) -> TaskId {
        let run_at = delay
            .filter(|delay| !delay.is_zero())
            .map(|delay| saturating_deadline(self.clock.now(), delay));
        self.give_task(IdleTask::new(self.sequence.next(), run_at, callback))
    }

    pub fn give_task(&self, task: IdleTask) -> TaskId {
        let id = task.id;
        match task.run_at {
            None => self.ready.borrow_mut().push_back(id),
            Some(run_at) => self.waiting.borrow_mut().push(WaitingEntry { run_at, id }),
        }
        let previous = self.tasks.borrow_mut().insert(id, task);
        debug_assert!(previous.is_none(), "idle task {id} registered twice");
        tracing::trace!(task = %id, "give idle task");
        id
    }

    /// Marks the task canceled. Unknown or already-run ids are ignored.
    pub fn cancel_task(&self, id: TaskId) {
        if let Some(task) = self.tasks.borrow_mut().get_mut(&id) {
            tracing::trace!(task = %id, "cancel idle task");
            task.cancel();
        }
    }

    pub fn stop_idle_tasks(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.borrow().contains_key(&id)
    }

    /// Registered tasks, canceled-but-unreclaimed ones included.
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.borrow().len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.borrow().len()
    }

    /// Earliest target time among waiting tasks that are still live.
    pub fn next_run_time(&self) -> Option<Instant> {
        let tasks = self.tasks.borrow();
        self.waiting
            .borrow()
            .iter()
            .filter(|entry| tasks.get(&entry.id).is_some_and(|task| !task.canceled))
            .map(|entry| entry.run_at)
            .min()
    }

    /// Moves every waiting task whose target time has arrived to the back
    /// of the ready FIFO, in heap order. Canceled ones are dropped here.
    fn promote_due_tasks(&self, now: Instant) -> usize {
        let mut reclaimed = 0;
        let mut waiting = self.waiting.borrow_mut();
        let mut ready = self.ready.borrow_mut();
        let mut tasks = self.tasks.borrow_mut();
        while waiting.peek().is_some_and(|entry| entry.run_at <= now) {
            let Some(entry) = waiting.pop() else {
                break;
            };
            match tasks.get(&entry.id) {
                Some(task) if task.canceled => {
                    tasks.remove(&entry.id);
                    reclaimed += 1;
                }
                Some(_) => ready.push_back(entry.id),
                None => {}
            }
        }
        reclaimed
    }

    fn take_ready(&self) -> Option<IdleTask> {
        let id = self.ready.borrow_mut().pop_front()?;
        self.tasks.borrow_mut().remove(&id)
    }

    /// Runs due tasks until the ready FIFO is exhausted, `deadline` passes,
    /// or a stop is requested.
    ///
    /// Only the tasks that were ready when the drain started are eligible;
    /// anything posted by a callback waits for the next call.
    pub fn run_idle_tasks(&self, deadline: Instant) -> IdleRunReport {
        let _span = tracing::trace_span!("run_idle_tasks").entered();
        let mut report = IdleRunReport::default();

        let now = self.clock.now();
        report.canceled += self.promote_due_tasks(now);

        let mut remaining = self.ready.borrow().len();
        while remaining > 0 {
            if self.clock.now() >= deadline {
                break;
            }
            if self.stop.is_stop_requested() {
                report.stopped = true;
                break;
            }
            remaining -= 1;

            let Some(task) = self.take_ready() else {
                continue;
            };
            if task.canceled {
                report.canceled += 1;
                continue;
            }

            let id = task.id;
            if self.trace_tasks.get() {
                tracing::trace!(task = %id, "run idle task");
            }
            report.ran += 1;
            if let Err(error) = task.run(deadline) {
                tracing::debug!(task = %id, %error, "idle task failed");
                report.errors.push(error);
            }
        }

        self.stop.reset();
        tracing::debug!(
            ran = report.ran,
            canceled = report.canceled,
            left = self.len(),
            "idle drain finished"
        );
        report
    }
}
