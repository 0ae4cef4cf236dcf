//! One-shot and repeating script timers.
//!
//! [`TimerQueue`] is the low-level source: it only knows when handlers are
//! due. A script-facing [`Timer`] never calls its callback from the source
//! directly. Each fire posts an idle task, and that task re-enters the
//! script runtime under the script lock, so timer callbacks go through the
//! same deadline and cancellation path as any other idle work.

use crate::clock::{Clock, saturating_deadline};
use crate::error::TaskResult;
use crate::idle::IdleTaskQueue;
use crate::lock::lock_script;
use crate::scheduler::LocalScheduler;
use crate::task::TaskId;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

new_key_type! {
    /// Handle to an armed entry of a [`TimerQueue`].
    pub struct TimerHandle;
}

struct ArmedTimer {
    fire_at: Instant,
    period: Option<Duration>,
    on_fire: Rc<dyn Fn()>,
}

struct FireEntry {
    fire_at: Instant,
    sequence: u64,
    handle: TimerHandle,
}

// Reverse ordering for min-heap (earliest fire time first)
impl Ord for FireEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for FireEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FireEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.sequence == other.sequence
    }
}

impl Eq for FireEntry {}

/// Low-level timer source polled by the host loop.
///
/// Disarming only removes the slot; the heap entry left behind is skipped
/// when it surfaces because its handle no longer resolves.
pub struct TimerQueue {
    clock: Rc<dyn Clock>,
    armed: RefCell<SlotMap<TimerHandle, ArmedTimer>>,
    heap: RefCell<BinaryHeap<FireEntry>>,
    next_sequence: Cell<u64>,
}

impl TimerQueue {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            armed: RefCell::new(SlotMap::with_key()),
            heap: RefCell::new(BinaryHeap::new()),
            next_sequence: Cell::new(0),
        }
    }

    fn push_entry(&self, fire_at: Instant, handle: TimerHandle) {
        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence.wrapping_add(1));
        self.heap.borrow_mut().push(FireEntry {
            fire_at,
            sequence,
            handle,
        });
    }

    /// Arms `on_fire` to run after `delay`, and every `delay` after that
    /// when `repeating`.
    pub fn arm(&self, delay: Duration, repeating: bool, on_fire: Rc<dyn Fn()>) -> TimerHandle {
        let fire_at = saturating_deadline(self.clock.now(), delay);
        let handle = self.armed.borrow_mut().insert(ArmedTimer {
            fire_at,
            period: repeating.then_some(delay),
            on_fire,
        });
        self.push_entry(fire_at, handle);
        handle
    }

    pub fn disarm(&self, handle: TimerHandle) -> bool {
        self.armed.borrow_mut().remove(handle).is_some()
    }

    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.armed.borrow().contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.armed.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.borrow().is_empty()
    }

    pub fn next_fire_time(&self) -> Option<Instant> {
        self.armed.borrow().values().map(|timer| timer.fire_at).min()
    }

    /// Runs the handler of every timer due at the current time. Repeating
    /// timers are re-armed one period from now; a zero period fires at most
    /// once per call.
    pub fn fire_due(&self) -> usize {
        let now = self.clock.now();
        let mut due: SmallVec<[Rc<dyn Fn()>; 4]> = SmallVec::new();
        let mut rearmed: SmallVec<[(Instant, TimerHandle); 4]> = SmallVec::new();

        {
            let mut heap = self.heap.borrow_mut();
            let mut armed = self.armed.borrow_mut();
            while heap.peek().is_some_and(|entry| entry.fire_at <= now) {
                let Some(entry) = heap.pop() else {
                    break;
                };
                let period = match armed.get(entry.handle) {
                    Some(timer) if timer.fire_at == entry.fire_at => {
                        due.push(timer.on_fire.clone());
                        timer.period
                    }
                    // Disarmed, or superseded by a later arming.
                    _ => continue,
                };
                match period {
                    Some(period) => {
                        let fire_at = saturating_deadline(now, period);
                        if let Some(timer) = armed.get_mut(entry.handle) {
                            timer.fire_at = fire_at;
                        }
                        rearmed.push((fire_at, entry.handle));
                    }
                    None => {
                        armed.remove(entry.handle);
                    }
                }
            }
        }

        for (fire_at, handle) in rearmed {
            self.push_entry(fire_at, handle);
        }
        for on_fire in &due {
            on_fire();
        }
        due.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    OneShot,
    Repeating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

pub type TimerCallback = Rc<dyn Fn() -> TaskResult>;

thread_local! {
    // Holds timer objects while they are running, so a timer whose last
    // handle was dropped still fires.
    static TIMER_LIST: RefCell<FxHashMap<TimerId, Rc<TimerCore>>> =
        RefCell::new(FxHashMap::default());
}

fn register(core: &Rc<TimerCore>) {
    let previous = TIMER_LIST.with(|list| list.borrow_mut().insert(core.id, core.clone()));
    drop(previous);
}

fn unregister(id: TimerId) {
    // Dropping the entry may run TimerCore::drop, so it happens after the
    // borrow is released. try_with: this can run during thread teardown.
    let removed = TIMER_LIST
        .try_with(|list| list.borrow_mut().remove(&id))
        .ok()
        .flatten();
    drop(removed);
}

/// Number of timers currently kept alive on this thread.
pub fn registered_timer_count() -> usize {
    TIMER_LIST.with(|list| list.borrow().len())
}

#[derive(Default)]
struct TimerState {
    handle: Option<TimerHandle>,
    callback: Option<TimerCallback>,
    generation: u64,
    pending_fires: SmallVec<[TaskId; 2]>,
}

struct TimerCore {
    id: TimerId,
    kind: TimerKind,
    timers: Rc<TimerQueue>,
    idle: Rc<IdleTaskQueue>,
    state: RefCell<TimerState>,
}

impl TimerCore {
    /// Invalidates every outstanding fire: disarms the low-level timer and
    /// cancels fire tasks that have not run yet.
    fn invalidate(&self) {
        let (handle, pending) = {
            let mut state = self.state.borrow_mut();
            state.generation += 1;
            (state.handle.take(), std::mem::take(&mut state.pending_fires))
        };
        if let Some(handle) = handle {
            self.timers.disarm(handle);
        }
        for task_id in pending {
            self.idle.cancel_task(task_id);
        }
    }

    fn start(self: &Rc<Self>, delay: Duration, callback: TimerCallback) {
        self.invalidate();
        let (generation, previous) = {
            let mut state = self.state.borrow_mut();
            (state.generation, state.callback.replace(callback))
        };
        drop(previous);
        register(self);

        let weak = Rc::downgrade(self);
        let on_fire: Rc<dyn Fn()> = Rc::new(move || {
            if let Some(core) = weak.upgrade() {
                core.did_fire(generation);
            }
        });
        let handle = self
            .timers
            .arm(delay, self.kind == TimerKind::Repeating, on_fire);
        self.state.borrow_mut().handle = Some(handle);
        tracing::debug!(timer = self.id.0, ?delay, kind = ?self.kind, "timer started");
    }

    fn stop(&self) {
        self.invalidate();
        let callback = self.state.borrow_mut().callback.take();
        drop(callback);
        unregister(self.id);
    }

    fn is_running(&self) -> bool {
        self.state
            .borrow()
            .handle
            .is_some_and(|handle| self.timers.is_armed(handle))
    }

    fn did_fire(self: &Rc<Self>, generation: u64) {
        {
            let mut state = self.state.borrow_mut();
            if state.generation != generation {
                return;
            }
            if self.kind == TimerKind::OneShot {
                // The source dropped its entry when it fired.
                state.handle = None;
            }
        }

        let weak = Rc::downgrade(self);
        let task_id = self.idle.schedule(
            Box::new(move |_deadline| match weak.upgrade() {
                Some(core) => core.deliver(generation),
                None => Ok(()),
            }),
            None,
        );
        self.state.borrow_mut().pending_fires.push(task_id);
        tracing::trace!(timer = self.id.0, task = %task_id, "timer fired");
    }

    fn deliver(&self, generation: u64) -> TaskResult {
        let callback = {
            let mut state = self.state.borrow_mut();
            if state.generation != generation {
                return Ok(());
            }
            // The running task has already left the idle registry.
            let idle = &self.idle;
            state.pending_fires.retain(|task_id| idle.contains(*task_id));
            state.callback.clone()
        };
        let Some(callback) = callback else {
            return Ok(());
        };

        let result = {
            let _script_lock = lock_script();
            callback()
        };

        if self.kind == TimerKind::OneShot {
            let finished = {
                let state = self.state.borrow();
                state.generation == generation && state.pending_fires.is_empty()
            };
            // Unless the callback restarted us, this was the last fire.
            if finished {
                let callback = self.state.borrow_mut().callback.take();
                drop(callback);
                unregister(self.id);
            }
        }
        result
    }
}

impl Drop for TimerCore {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(handle) = state.handle.take() {
            self.timers.disarm(handle);
        }
        for task_id in state.pending_fires.drain(..) {
            self.idle.cancel_task(task_id);
        }
    }
}

/// Script-facing timer. Cloning yields another handle to the same timer.
///
/// While running, the timer is kept alive by a per-thread registry, so
/// dropping every handle does not cancel it; call [`Timer::stop`] for that.
#[derive(Clone)]
pub struct Timer {
    core: Rc<TimerCore>,
}

impl Timer {
    pub fn new(kind: TimerKind, scheduler: &LocalScheduler) -> Self {
        Self::with_queues(
            kind,
            scheduler.timer_queue().clone(),
            scheduler.idle_queue().clone(),
        )
    }

    pub fn one_shot(scheduler: &LocalScheduler) -> Self {
        Self::new(TimerKind::OneShot, scheduler)
    }

    pub fn repeating(scheduler: &LocalScheduler) -> Self {
        Self::new(TimerKind::Repeating, scheduler)
    }

    /// Builds a timer over explicit queues, for hosts that do not use
    /// [`LocalScheduler`].
    pub fn with_queues(kind: TimerKind, timers: Rc<TimerQueue>, idle: Rc<IdleTaskQueue>) -> Self {
        let id = TimerId(NEXT_TIMER_ID.fetch_add(1, AtomicOrdering::Relaxed));
        Self {
            core: Rc::new(TimerCore {
                id,
                kind,
                timers,
                idle,
                state: RefCell::new(TimerState::default()),
            }),
        }
    }

    pub fn id(&self) -> TimerId {
        self.core.id
    }

    pub fn kind(&self) -> TimerKind {
        self.core.kind
    }

    /// Arms the timer, replacing any previous arming and callback.
    pub fn start<F>(&self, delay: Duration, callback: F)
    where
        F: Fn() -> TaskResult + 'static,
    {
        self.core.start(delay, Rc::new(callback));
    }

    /// Safe to call on a timer that is not running.
    pub fn stop(&self) {
        self.core.stop();
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.core.id)
            .field("kind", &self.core.kind)
            .field("running", &self.is_running())
            .finish()
    }
}
