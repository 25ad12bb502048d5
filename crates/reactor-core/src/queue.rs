//! `Queue`: an ordered sink for tasks, with optional scheduled-at instants
//! and a single downstream notifier.

use crate::clock::{MonotonicClock, SystemClock, Task, TimedTask};
use crate::error::{ErrorKind, ErrorPtr};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Invoked once per push after installation, and once per pending item at
/// installation time (the "catch-up" notification described in the module
/// docs).
pub type Notifier = Arc<dyn Fn() + Send + Sync>;

struct Inner {
    pending: VecDeque<TimedTask>,
    notifier: Option<Notifier>,
}

/// An ordered sequence of `TimedTask`s, a priority integer, a parallelism
/// hint, and a single installed notifier.
///
/// # Why
/// Separating the queue from the scheduler and dispatcher (rather than a
/// single "runtime" object, as naive ports tend to do) is what lets
/// `DirectScheduler` skip locking in its hot path: a queue with exactly one
/// reader never needs the round-robin bookkeeping a shared scheduler
/// requires.
pub struct Queue {
    inner: Mutex<Inner>,
    priority: i32,
    parallelism: usize,
    clock: Arc<dyn MonotonicClock>,
}

impl Queue {
    pub fn new(priority: i32, parallelism: usize) -> Arc<Self> {
        Self::with_clock(priority, parallelism, Arc::new(SystemClock))
    }

    /// Like [`Queue::new`], but reads "now" from `clock` instead of
    /// [`SystemClock`] — for tests that need to control readiness of timed
    /// tasks deterministically rather than racing real wall-clock time.
    pub fn with_clock(priority: i32, parallelism: usize, clock: Arc<dyn MonotonicClock>) -> Arc<Self> {
        Arc::new(Queue {
            inner: Mutex::new(Inner {
                pending: VecDeque::new(),
                notifier: None,
            }),
            priority,
            parallelism,
            clock,
        })
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Pushes a task that is runnable as soon as it is popped.
    pub fn push(&self, task: Task) {
        self.push_timed(TimedTask::now(task));
    }

    /// Pushes a task that only becomes visible to `pop` once `run_at` has
    /// passed.
    pub fn push_at(&self, task: Task, run_at: Instant) {
        self.push_timed(TimedTask::at(task, run_at));
    }

    fn push_timed(&self, timed: TimedTask) {
        let notifier = {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            inner.pending.push_back(timed);
            inner.notifier.clone()
        };
        if let Some(notifier) = notifier {
            notifier();
        }
    }

    /// Installs `notifier`, returning the number of items already queued so
    /// the caller (normally a [`crate::scheduler::Scheduler`]) can synthesize
    /// catch-up pokes for a queue that filled up before anyone was watching
    /// it.
    pub fn set_notifier(&self, notifier: Notifier) -> usize {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.notifier = Some(notifier);
        inner.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner.pending.is_empty()
    }

    /// Pops the first ready task in FIFO order among tasks that are either
    /// untimed or whose instant has already passed. Timed tasks not yet
    /// ready are left in place rather than reordered.
    pub fn pop(&self) -> Result<TimedTask, ErrorPtr> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let position = inner.pending.iter().position(|t| t.is_ready(now));
        match position {
            Some(index) => Ok(inner.pending.remove(index).expect("index came from position")),
            None => Err(ErrorPtr::new(ErrorKind::ValueAbsent, "pop on empty queue")),
        }
    }

    /// The earliest `run_at` among tasks not yet ready, if any — used by a
    /// dispatcher to know how long it may safely sleep.
    pub fn next_ready_at(&self) -> Option<Instant> {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner
            .pending
            .iter()
            .filter_map(|t| t.run_at)
            .min()
    }

    /// Whether at least one task is ready right now.
    pub fn has_ready(&self) -> bool {
        let now = self.clock.now();
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner.pending.iter().any(|t| t.is_ready(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn pop_on_empty_queue_is_value_absent() {
        let queue = Queue::new(0, 1);
        let err = queue.pop().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValueAbsent);
    }

    #[test]
    fn fifo_among_untimed_tasks() {
        let queue = Queue::new(0, 1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            queue.push(Box::new(move || order.lock().unwrap().push(i)));
        }
        for _ in 0..3 {
            (queue.pop().unwrap().task)();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn timed_tasks_are_invisible_until_ready() {
        let queue = Queue::new(0, 1);
        queue.push_at(Box::new(|| {}), Instant::now() + Duration::from_secs(3600));
        assert!(queue.pop().is_err());
    }

    struct FakeClock(Mutex<Instant>);

    impl crate::clock::MonotonicClock for FakeClock {
        fn now(&self) -> Instant {
            *self.0.lock().expect("fake clock mutex poisoned")
        }
    }

    #[test]
    fn with_clock_lets_a_fake_clock_gate_readiness() {
        let origin = Instant::now();
        let clock = Arc::new(FakeClock(Mutex::new(origin)));
        let queue = Queue::with_clock(0, 1, clock.clone());
        queue.push_at(Box::new(|| {}), origin + Duration::from_secs(10));
        assert!(queue.pop().is_err());

        *clock.0.lock().unwrap() = origin + Duration::from_secs(11);
        assert!(queue.pop().is_ok());
    }

    #[test]
    fn notifier_reports_current_backlog_then_fires_once_per_push() {
        let queue = Queue::new(0, 1);
        queue.push(Box::new(|| {}));
        queue.push(Box::new(|| {}));

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let backlog = queue.set_notifier(Arc::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(backlog, 2);

        queue.push(Box::new(|| {}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        queue.push(Box::new(|| {}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
