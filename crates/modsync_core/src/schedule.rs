//! Deferred task queue driven by an injectable clock.
//!
//! # Responsibility
//! - Hold "run after delay" work as plain data with cancellation.
//! - Release due tasks in deadline order when the owner polls.
//!
//! # Invariants
//! - Tasks never run on their own; the owner drains them on its dispatch
//!   context via `take_due`.
//! - A cancelled task is never returned.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time source for scheduled work.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Moves time forward by `by`.
    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.offset_ms.fetch_add(millis, Ordering::SeqCst);
    }

    /// Milliseconds elapsed since construction.
    pub fn elapsed_ms(&self) -> u64 {
        self.offset_ms.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.elapsed_ms())
    }
}

/// Handle returned by `TaskQueue::schedule`, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

/// Deadline-ordered queue of deferred tasks.
pub struct TaskQueue<T> {
    clock: Arc<dyn Clock>,
    next_id: u64,
    queue: BTreeMap<(Instant, TaskId), T>,
    deadlines: HashMap<TaskId, Instant>,
}

impl<T> TaskQueue<T> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            next_id: 0,
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Schedules `task` to become due after `delay`.
    pub fn schedule(&mut self, delay: Duration, task: T) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        let deadline = self.clock.now() + delay;
        self.queue.insert((deadline, id), task);
        self.deadlines.insert(id, deadline);
        id
    }

    /// Cancels a pending task. Returns `false` when it already ran or was
    /// cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => self.queue.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }

    /// Removes and returns every task whose deadline has passed, earliest
    /// first. Ties run in scheduling order.
    pub fn take_due(&mut self) -> Vec<T> {
        let now = self.clock.now();
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((_, id), task) = entry.remove_entry();
            self.deadlines.remove(&id);
            due.push(task);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::{ManualClock, TaskQueue};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn releases_tasks_in_deadline_order() {
        let clock = Arc::new(ManualClock::new());
        let mut queue = TaskQueue::new(clock.clone());
        queue.schedule(Duration::from_millis(300), "third");
        queue.schedule(Duration::from_millis(100), "first");
        queue.schedule(Duration::from_millis(200), "second");

        assert!(queue.take_due().is_empty());
        clock.advance(Duration::from_millis(250));
        assert_eq!(queue.take_due(), vec!["first", "second"]);
        clock.advance(Duration::from_millis(100));
        assert_eq!(queue.take_due(), vec!["third"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn cancelled_tasks_never_run() {
        let clock = Arc::new(ManualClock::new());
        let mut queue = TaskQueue::new(clock.clone());
        let id = queue.schedule(Duration::from_millis(10), "timeout");
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));

        clock.advance(Duration::from_secs(1));
        assert!(queue.take_due().is_empty());
    }

    #[test]
    fn equal_deadlines_keep_scheduling_order() {
        let clock = Arc::new(ManualClock::new());
        let mut queue = TaskQueue::new(clock.clone());
        queue.schedule(Duration::ZERO, 1);
        queue.schedule(Duration::ZERO, 2);
        queue.schedule(Duration::ZERO, 3);
        assert_eq!(queue.take_due(), vec![1, 2, 3]);
    }
}
