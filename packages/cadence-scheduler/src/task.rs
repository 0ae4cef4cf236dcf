use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering as AtomicOrdering};
use std::time::Instant;

/// Sequence number stamped on every task and microtask at creation.
///
/// Ids wrap around after 2^32 allocations, so they are compared with
/// [`TaskId::is_before`] rather than `<`. There is intentionally no `Ord`
/// impl: the wrapping rule is not a total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(i32);

impl TaskId {
    pub const fn from_raw(value: i32) -> Self {
        Self(value)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// True when `self` was issued before `other`, tolerating one rollover
    /// between them.
    pub fn is_before(self, other: TaskId) -> bool {
        other.0.wrapping_sub(self.0) > 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic id source. One instance is shared by the whole process, but
/// embedders and tests may build their own.
#[derive(Debug)]
pub struct SequenceCounter {
    last: AtomicI32,
}

impl SequenceCounter {
    /// A counter whose first issued id is `first`.
    pub const fn starting_at(first: i32) -> Self {
        Self {
            last: AtomicI32::new(first.wrapping_sub(1)),
        }
    }

    pub fn next(&self) -> TaskId {
        // fetch_add wraps on overflow, which is exactly what the
        // subtraction comparison expects.
        let previous = self.last.fetch_add(1, AtomicOrdering::Relaxed);
        TaskId(previous.wrapping_add(1))
    }
}

static TASK_SEQUENCE: SequenceCounter = SequenceCounter::starting_at(1);

pub fn global_sequence() -> &'static SequenceCounter {
    &TASK_SEQUENCE
}

/// Issues the next id from the process-wide counter.
pub fn next_task_id() -> TaskId {
    TASK_SEQUENCE.next()
}

/// Orders two sequence numbers, earlier-issued first.
pub fn compare_sequence(a: TaskId, b: TaskId) -> Ordering {
    if a == b {
        Ordering::Equal
    } else if a.is_before(b) {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Ordering used by the idle queue's waiting heap: earlier target time
/// first, then earlier sequence number.
pub fn compare_tasks(time_a: Instant, id_a: TaskId, time_b: Instant, id_b: TaskId) -> Ordering {
    time_a
        .cmp(&time_b)
        .then_with(|| compare_sequence(id_a, id_b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn counter_is_strictly_increasing() {
        let counter = SequenceCounter::starting_at(10);
        let a = counter.next();
        let b = counter.next();
        assert_eq!(a.raw(), 10);
        assert_eq!(b.raw(), 11);
        assert!(a.is_before(b));
        assert!(!b.is_before(a));
    }

    #[test]
    fn counter_wraps_past_max() {
        let counter = SequenceCounter::starting_at(i32::MAX);
        let last = counter.next();
        let wrapped = counter.next();
        assert_eq!(last.raw(), i32::MAX);
        assert_eq!(wrapped.raw(), i32::MIN);
        assert!(last.is_before(wrapped));
        assert_eq!(compare_sequence(last, wrapped), Ordering::Less);
    }

    #[test]
    fn equal_times_fall_back_to_sequence() {
        let now = Instant::now();
        let early = TaskId::from_raw(i32::MAX - 1);
        let late = TaskId::from_raw(i32::MIN + 1);
        assert_eq!(compare_tasks(now, early, now, late), Ordering::Less);
        assert_eq!(compare_tasks(now, late, now, early), Ordering::Greater);

        let later = now + Duration::from_millis(1);
        assert_eq!(compare_tasks(later, early, now, late), Ordering::Greater);
    }
}
