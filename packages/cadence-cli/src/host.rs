use crate::workload::{IdleTaskSpec, TimerSpec, WorkloadConfig};
use anyhow::Result;
use cadence_scheduler::{
    LocalScheduler, Scheduler, SchedulerClient, ScriptError, SystemClock, Timer, TimerKind,
};
use serde::Serialize;
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval};

/// Counters collected over one simulated run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct HostStats {
    pub frames: u32,
    pub idle_ran: usize,
    pub timer_callbacks: usize,
    pub errors: usize,
}

#[derive(Default)]
struct HostClient {
    errors: Cell<usize>,
    task_wakeups: Cell<usize>,
}

impl SchedulerClient for HostClient {
    fn report_error(&self, error: ScriptError) {
        self.errors.set(self.errors.get() + 1);
        tracing::warn!(%error, "script callback failed");
    }

    fn did_schedule_task(&self) {
        self.task_wakeups.set(self.task_wakeups.get() + 1);
    }

    fn enter_idle(&self, deadline: Instant) {
        let slack = deadline.saturating_duration_since(Instant::now());
        tracing::trace!(?slack, "host idle");
    }
}

fn post_idle_task(scheduler: &LocalScheduler, spec: &IdleTaskSpec, ran: Rc<Cell<usize>>) {
    let label = spec.label.clone();
    let work = Duration::from_millis(spec.work_ms);
    let fail = spec.fail;
    let id = scheduler.schedule_idle_task(
        Box::new(move |deadline| {
            ran.set(ran.get() + 1);
            let budget = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(work.min(budget));
            tracing::debug!(task = %label, "idle task ran");
            if fail {
                return Err(ScriptError::exception(format!("{label} failed")));
            }
            Ok(())
        }),
        spec.delay_ms.map(Duration::from_millis),
    );
    if spec.cancel {
        scheduler.cancel_idle_task(id);
        tracing::debug!(task = %spec.label, %id, "idle task canceled");
    }
}

fn start_timer(scheduler: &LocalScheduler, spec: &TimerSpec, fired: Rc<Cell<usize>>) -> Timer {
    let timer = scheduler.create_timer(spec.kind);
    let this = timer.clone();
    let label = spec.label.clone();
    let limit = spec.fires;
    let count = Cell::new(0u32);
    timer.start(Duration::from_millis(spec.delay_ms), move || {
        count.set(count.get() + 1);
        fired.set(fired.get() + 1);
        tracing::debug!(timer = %label, fire = count.get(), "timer callback");
        if this.kind() == TimerKind::Repeating && limit.is_some_and(|limit| count.get() >= limit) {
            this.stop();
        }
        Ok(())
    });
    timer
}

/// Drives a workload through a frame loop paced by a tokio interval.
pub async fn run(workload: &WorkloadConfig) -> Result<HostStats> {
    let client = Rc::new(HostClient::default());
    let scheduler = LocalScheduler::with_config(
        client.clone(),
        Rc::new(SystemClock),
        workload.scheduler.clone(),
    );

    let idle_ran = Rc::new(Cell::new(0));
    let timer_callbacks = Rc::new(Cell::new(0));
    for spec in &workload.idle_tasks {
        post_idle_task(&scheduler, spec, idle_ran.clone());
    }
    let timers: Vec<Timer> = workload
        .timers
        .iter()
        .map(|spec| start_timer(&scheduler, spec, timer_callbacks.clone()))
        .collect();

    let mut stats = HostStats::default();
    let mut ticker = interval(scheduler.config().frame_budget());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for frame in 0..workload.frames {
        ticker.tick().await;
        let _span = tracing::debug_span!("frame", frame).entered();

        let fired = scheduler.fire_timers();
        scheduler.process_tasks();
        scheduler.begin_frame(scheduler.frame_deadline());
        scheduler.run_microtasks();
        stats.frames += 1;
        tracing::trace!(fired, pending = scheduler.idle_queue().len(), "frame done");
    }

    for timer in &timers {
        timer.stop();
    }

    stats.idle_ran = idle_ran.get();
    stats.timer_callbacks = timer_callbacks.get();
    stats.errors = client.errors.get();
    tracing::info!(
        frames = stats.frames,
        idle_ran = stats.idle_ran,
        timer_callbacks = stats.timer_callbacks,
        errors = stats.errors,
        wakeups = client.task_wakeups.get(),
        "workload finished"
    );
    Ok(stats)
}
