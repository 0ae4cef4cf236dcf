use cadence_scheduler::{
    Clock, IdleTask, IdleTaskQueue, LocalScheduler, LoggingClient, ManualClock, Scheduler,
    SequenceCounter, TaskId,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn queue() -> (Rc<IdleTaskQueue>, Rc<ManualClock>) {
    let clock = Rc::new(ManualClock::new());
    (Rc::new(IdleTaskQueue::new(clock.clone())), clock)
}

fn logging_task(log: &Rc<RefCell<Vec<u32>>>, value: u32) -> cadence_scheduler::IdleCallback {
    let log = log.clone();
    Box::new(move |_| {
        log.borrow_mut().push(value);
        Ok(())
    })
}

#[test]
fn test_ready_tasks_run_in_post_order() {
    let (queue, clock) = queue();
    let log = Rc::new(RefCell::new(Vec::new()));

    for value in 1..=5 {
        queue.schedule(logging_task(&log, value), None);
    }

    let report = queue.run_idle_tasks(clock.now() + ms(10));
    assert_eq!(report.ran, 5);
    assert_eq!(*log.borrow(), vec![1, 2, 3, 4, 5]);
    assert!(queue.is_empty());
}

#[test]
fn test_scenario_delayed_task_waits_for_its_time() {
    let (queue, clock) = queue();
    let log = Rc::new(RefCell::new(Vec::new()));

    queue.schedule(logging_task(&log, 1), Some(ms(0)));
    queue.schedule(logging_task(&log, 2), Some(ms(0)));
    let third = queue.schedule(logging_task(&log, 3), Some(ms(100)));

    queue.run_idle_tasks(clock.now() + ms(1));
    assert_eq!(*log.borrow(), vec![1, 2]);
    assert!(queue.contains(third));
    assert_eq!(queue.waiting_len(), 1);

    clock.advance(ms(150));
    queue.run_idle_tasks(clock.now() + ms(50));
    assert_eq!(*log.borrow(), vec![1, 2, 3]);
    assert!(queue.is_empty());
}

#[test]
fn test_shorter_delay_becomes_ready_first() {
    let (queue, clock) = queue();
    let log = Rc::new(RefCell::new(Vec::new()));

    queue.schedule(logging_task(&log, 10), Some(ms(10)));
    queue.schedule(logging_task(&log, 5), Some(ms(5)));
    assert_eq!(queue.next_run_time(), Some(clock.now() + ms(5)));

    clock.advance(ms(7));
    queue.run_idle_tasks(clock.now() + ms(1));
    assert_eq!(*log.borrow(), vec![5]);

    clock.advance(ms(3));
    queue.run_idle_tasks(clock.now() + ms(1));
    assert_eq!(*log.borrow(), vec![5, 10]);
}

#[test]
fn test_equal_target_times_keep_post_order() {
    let (queue, clock) = queue();
    let log = Rc::new(RefCell::new(Vec::new()));

    for value in 1..=4 {
        queue.schedule(logging_task(&log, value), Some(ms(20)));
    }

    clock.advance(ms(20));
    queue.run_idle_tasks(clock.now() + ms(1));
    assert_eq!(*log.borrow(), vec![1, 2, 3, 4]);
}

#[test]
fn test_canceled_task_never_runs_and_is_reclaimed() {
    let (queue, clock) = queue();
    let log = Rc::new(RefCell::new(Vec::new()));

    let delayed = queue.schedule(logging_task(&log, 1), Some(ms(10)));
    let ready = queue.schedule(logging_task(&log, 2), None);
    queue.cancel_task(delayed);
    queue.cancel_task(ready);
    queue.cancel_task(ready);
    // Cancellation is lazy: both entries stay until popped.
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.next_run_time(), None);

    clock.advance(ms(20));
    let report = queue.run_idle_tasks(clock.now() + ms(5));
    assert!(log.borrow().is_empty());
    assert_eq!(report.ran, 0);
    assert_eq!(report.canceled, 2);
    assert!(!queue.contains(delayed));
    assert!(!queue.contains(ready));
    assert!(queue.is_empty());
}

#[test]
fn test_cancel_unknown_or_finished_id_is_silent() {
    let (queue, clock) = queue();
    let id = queue.schedule(Box::new(|_| Ok(())), None);
    queue.run_idle_tasks(clock.now() + ms(1));

    queue.cancel_task(id);
    queue.cancel_task(TaskId::from_raw(-42));
    assert!(queue.is_empty());
}

#[test]
fn test_stop_halts_after_the_running_task() {
    let (queue, clock) = queue();
    let log = Rc::new(RefCell::new(Vec::new()));
    let stop = queue.stop_handle();

    {
        let log = log.clone();
        queue.schedule(
            Box::new(move |_| {
                log.borrow_mut().push(1);
                stop.stop();
                Ok(())
            }),
            None,
        );
    }
    queue.schedule(logging_task(&log, 2), None);
    queue.schedule(logging_task(&log, 3), None);

    let report = queue.run_idle_tasks(clock.now() + ms(10));
    assert!(report.stopped);
    assert_eq!(*log.borrow(), vec![1]);
    assert_eq!(queue.ready_len(), 2);

    // The stop request was consumed by the aborted drain.
    let report = queue.run_idle_tasks(clock.now() + ms(10));
    assert!(!report.stopped);
    assert_eq!(*log.borrow(), vec![1, 2, 3]);
}

#[test]
fn test_stop_from_another_thread() {
    let (queue, clock) = queue();
    let log = Rc::new(RefCell::new(Vec::new()));
    queue.schedule(logging_task(&log, 1), None);

    let stop = queue.stop_handle();
    std::thread::spawn(move || stop.stop()).join().unwrap();

    let report = queue.run_idle_tasks(clock.now() + ms(10));
    assert!(report.stopped);
    assert!(log.borrow().is_empty());
    assert!(!queue.stop_handle().is_stop_requested());
}

#[test]
fn test_budget_exceeded_leaves_tasks_queued() {
    let (queue, clock) = queue();
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        let clock = clock.clone();
        queue.schedule(
            Box::new(move |_| {
                log.borrow_mut().push(1);
                clock.advance(ms(2));
                Ok(())
            }),
            None,
        );
    }
    let second = queue.schedule(logging_task(&log, 2), None);

    let report = queue.run_idle_tasks(clock.now() + ms(1));
    assert_eq!(report.ran, 1);
    assert!(!report.stopped);
    assert!(queue.contains(second));

    queue.run_idle_tasks(clock.now() + ms(1));
    assert_eq!(*log.borrow(), vec![1, 2]);
}

#[test]
fn test_promotion_runs_even_when_budget_is_spent() {
    let (queue, clock) = queue();
    let log = Rc::new(RefCell::new(Vec::new()));
    queue.schedule(logging_task(&log, 1), Some(ms(5)));

    clock.advance(ms(5));
    let deadline = clock.now();
    queue.run_idle_tasks(deadline);
    assert!(log.borrow().is_empty());
    assert_eq!(queue.waiting_len(), 0);
    assert_eq!(queue.ready_len(), 1);
}

#[test]
fn test_reposted_task_waits_for_next_drain() {
    let (queue, clock) = queue();
    let runs = Rc::new(RefCell::new(0));

    fn repost(queue: Rc<IdleTaskQueue>, runs: Rc<RefCell<u32>>) -> cadence_scheduler::IdleCallback {
        Box::new(move |_| {
            *runs.borrow_mut() += 1;
            let next = repost(queue.clone(), runs.clone());
            queue.schedule(next, None);
            Ok(())
        })
    }

    queue.schedule(repost(queue.clone(), runs.clone()), None);

    queue.run_idle_tasks(clock.now() + ms(10));
    assert_eq!(*runs.borrow(), 1);
    assert_eq!(queue.ready_len(), 1);

    queue.run_idle_tasks(clock.now() + ms(10));
    assert_eq!(*runs.borrow(), 2);
}

#[test]
fn test_failed_task_is_still_removed() {
    let (queue, clock) = queue();
    let log = Rc::new(RefCell::new(Vec::new()));

    let failing = queue.schedule(
        Box::new(|_| Err(cadence_scheduler::ScriptError::Terminated)),
        None,
    );
    queue.schedule(logging_task(&log, 2), None);

    let report = queue.run_idle_tasks(clock.now() + ms(1));
    assert_eq!(report.errors, vec![cadence_scheduler::ScriptError::Terminated]);
    assert_eq!(report.ran, 2);
    assert!(!queue.contains(failing));
    assert_eq!(*log.borrow(), vec![2]);
}

#[test]
fn test_callback_receives_the_drain_deadline() {
    let (queue, clock) = queue();
    let seen = Rc::new(RefCell::new(None));
    {
        let seen = seen.clone();
        queue.schedule(
            Box::new(move |deadline| {
                *seen.borrow_mut() = Some(deadline);
                Ok(())
            }),
            None,
        );
    }

    let deadline = clock.now() + ms(8);
    queue.run_idle_tasks(deadline);
    assert_eq!(*seen.borrow(), Some(deadline));
}

#[test]
fn test_sequence_rollover_keeps_creation_order() {
    let clock = Rc::new(ManualClock::new());
    let sequence: &'static SequenceCounter =
        Box::leak(Box::new(SequenceCounter::starting_at(i32::MAX)));
    let queue = IdleTaskQueue::with_sequence(clock.clone(), sequence);
    let log = Rc::new(RefCell::new(Vec::new()));

    let before = queue.schedule(logging_task(&log, 1), Some(ms(3)));
    let after = queue.schedule(logging_task(&log, 2), Some(ms(3)));
    assert_eq!(before.raw(), i32::MAX);
    assert_eq!(after.raw(), i32::MIN);
    assert!(before.is_before(after));

    clock.advance(ms(3));
    queue.run_idle_tasks(clock.now() + ms(1));
    assert_eq!(*log.borrow(), vec![1, 2]);
}

#[test]
fn test_give_task_with_explicit_ids_across_rollover() {
    let (queue, clock) = queue();
    let log = Rc::new(RefCell::new(Vec::new()));
    let run_at = Some(clock.now() + ms(1));

    // Given out of order; the wrapped id was issued later.
    queue.give_task(IdleTask::new(TaskId::from_raw(i32::MIN + 2), run_at, logging_task(&log, 2)));
    queue.give_task(IdleTask::new(TaskId::from_raw(i32::MAX - 2), run_at, logging_task(&log, 1)));

    clock.advance(ms(1));
    queue.run_idle_tasks(clock.now() + ms(1));
    assert_eq!(*log.borrow(), vec![1, 2]);
}

#[test]
fn test_schedule_task_stops_an_idle_drain() {
    let clock = Rc::new(ManualClock::new());
    let scheduler = Rc::new(LocalScheduler::with_clock(
        Rc::new(LoggingClient),
        clock.clone(),
    ));
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        let sch = scheduler.clone();
        scheduler.schedule_idle_task(
            Box::new(move |_| {
                log.borrow_mut().push(1);
                sch.schedule_task(Box::new(|| Ok(())));
                Ok(())
            }),
            None,
        );
    }
    scheduler.schedule_idle_task(logging_task(&log, 2), None);

    let report = scheduler.run_idle_tasks(clock.now() + ms(10));
    assert!(report.stopped);
    assert_eq!(*log.borrow(), vec![1]);
    assert!(scheduler.has_pending_tasks());

    scheduler.process_tasks();
    scheduler.run_idle_tasks(clock.now() + ms(10));
    assert_eq!(*log.borrow(), vec![1, 2]);
}

#[test]
fn test_huge_delay_never_becomes_due() {
    let clock = Rc::new(ManualClock::new());
    let scheduler = LocalScheduler::with_clock(Rc::new(LoggingClient), clock.clone());
    let log = Rc::new(RefCell::new(Vec::new()));

    let far = scheduler.schedule_idle_task(logging_task(&log, 1), Some(Duration::MAX));
    scheduler.schedule_idle_task(logging_task(&log, 2), Some(ms(5)));
    assert!(scheduler.next_wake_time().is_some_and(|at| at > clock.now()));

    clock.advance(Duration::from_secs(365 * 24 * 60 * 60));
    let report = scheduler.run_idle_tasks(clock.now() + ms(10));
    assert_eq!(report.ran, 1);
    assert_eq!(*log.borrow(), vec![2]);
    assert!(scheduler.idle_queue().contains(far));

    scheduler.cancel_idle_task(far);
    assert_eq!(scheduler.idle_queue().next_run_time(), None);
}
