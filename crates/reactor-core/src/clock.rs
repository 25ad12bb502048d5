//! Task and Clock: the smallest units a queue and a dispatcher operate on.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// A nothrow nullary action. Rust cannot enforce "nothrow" at the type
/// level; dispatchers catch panics escaping a `Task` and route them to the
/// uncaught-exception handler instead, which is the practical equivalent.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Either a plain task, or one scheduled to become runnable at a future
/// instant. Ordered by `run_at` so a dispatcher can keep a time-ordered set
/// of not-yet-runnable tasks.
pub struct TimedTask {
    pub task: Task,
    pub run_at: Option<Instant>,
}

impl std::fmt::Debug for TimedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedTask")
            .field("task", &"<task>")
            .field("run_at", &self.run_at)
            .finish()
    }
}

impl TimedTask {
    pub fn now(task: Task) -> Self {
        TimedTask { task, run_at: None }
    }

    pub fn at(task: Task, run_at: Instant) -> Self {
        TimedTask {
            task,
            run_at: Some(run_at),
        }
    }

    /// True when this task may run immediately given `reference`.
    pub fn is_ready(&self, reference: Instant) -> bool {
        match self.run_at {
            Some(at) => at <= reference,
            None => true,
        }
    }
}

/// A monotonic clock abstraction, primarily so tests can substitute a fake
/// one. Production code uses [`SystemClock`], which wraps
/// [`std::time::Instant`].
pub trait MonotonicClock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl MonotonicClock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Orders `TimedTask`s by `run_at`, treating "no instant" as "ready now"
/// (the earliest possible ordering key). Used by the blocking dispatcher's
/// internal time-ordered set.
pub(crate) struct TimedTaskKey(pub Instant);

impl PartialEq for TimedTaskKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for TimedTaskKey {}
impl PartialOrd for TimedTaskKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimedTaskKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

/// Convenience helper shared by dispatchers: the duration to wait before the
/// earliest pending instant, saturating at zero if it has already passed.
pub(crate) fn wait_duration(reference: Instant, target: Instant) -> Duration {
    target.saturating_duration_since(reference)
}
