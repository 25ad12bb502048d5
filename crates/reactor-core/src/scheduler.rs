//! `Scheduler`: connects queues to a dispatcher and picks the next task
//! fairly across queues.

use crate::clock::TimedTask;
use crate::error::{ErrorKind, ErrorPtr};
use crate::queue::Queue;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Picks the next runnable task out of a set of registered queues.
///
/// Implementors do not need to be lock-free, but [`DirectScheduler`] exists
/// precisely because the common case — one queue per dispatcher worker —
/// never needs the round-robin bookkeeping below.
pub trait Scheduler: Send + Sync + 'static {
    /// Registers a queue and wires its notifier to `on_pending`, which the
    /// dispatcher supplies to be woken whenever a task becomes available.
    fn add_queue(&self, queue: Arc<Queue>, on_pending: Arc<dyn Fn() + Send + Sync>) -> Result<(), ErrorPtr>;

    /// Pops and returns the next task to run, or `None` if nothing is ready.
    fn next_task(&self) -> Option<TimedTask>;

    /// The earliest future instant among all registered queues' not-yet-ready
    /// tasks, used by a dispatcher to bound how long it may sleep.
    fn next_ready_at(&self) -> Option<std::time::Instant>;
}

struct Band {
    queues: Vec<Arc<Queue>>,
    cursor: usize,
}

/// Round-robins within a priority band; strictly higher priority preempts
/// lower. Ties within a band are broken by round-robin position, not
/// arrival time.
pub struct RoundRobinScheduler {
    bands: Mutex<BTreeMap<i32, Band>>,
}

impl Default for RoundRobinScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinScheduler {
    pub fn new() -> Self {
        RoundRobinScheduler {
            bands: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Scheduler for RoundRobinScheduler {
    fn add_queue(&self, queue: Arc<Queue>, on_pending: Arc<dyn Fn() + Send + Sync>) -> Result<(), ErrorPtr> {
        let priority = queue.priority();
        let backlog = queue.set_notifier(on_pending.clone());
        {
            let mut bands = self.bands.lock().expect("scheduler mutex poisoned");
            bands
                .entry(priority)
                .or_insert_with(|| Band {
                    queues: Vec::new(),
                    cursor: 0,
                })
                .queues
                .push(queue);
        }
        for _ in 0..backlog {
            on_pending();
        }
        Ok(())
    }

    fn next_task(&self) -> Option<TimedTask> {
        let mut bands = self.bands.lock().expect("scheduler mutex poisoned");
        // BTreeMap iterates ascending; priorities are modeled so that a
        // larger integer means higher priority, hence `.rev()`.
        for (_priority, band) in bands.iter_mut().rev() {
            let n = band.queues.len();
            if n == 0 {
                continue;
            }
            for step in 0..n {
                let idx = (band.cursor + step) % n;
                if let Ok(task) = band.queues[idx].pop() {
                    band.cursor = (idx + 1) % n;
                    return Some(task);
                }
            }
        }
        None
    }

    fn next_ready_at(&self) -> Option<std::time::Instant> {
        let bands = self.bands.lock().expect("scheduler mutex poisoned");
        bands
            .values()
            .flat_map(|band| band.queues.iter())
            .filter_map(|q| q.next_ready_at())
            .min()
    }
}

/// The common fast path: exactly one queue, registered once, no band
/// bookkeeping.
pub struct DirectScheduler {
    queue: Mutex<Option<Arc<Queue>>>,
}

impl Default for DirectScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectScheduler {
    pub fn new() -> Self {
        DirectScheduler {
            queue: Mutex::new(None),
        }
    }
}

impl Scheduler for DirectScheduler {
    fn add_queue(&self, queue: Arc<Queue>, on_pending: Arc<dyn Fn() + Send + Sync>) -> Result<(), ErrorPtr> {
        let mut slot = self.queue.lock().expect("scheduler mutex poisoned");
        if slot.is_some() {
            return Err(ErrorPtr::new(
                ErrorKind::Scheduling,
                "direct scheduler accepts exactly one queue",
            ));
        }
        let backlog = queue.set_notifier(on_pending.clone());
        *slot = Some(queue);
        for _ in 0..backlog {
            on_pending();
        }
        Ok(())
    }

    fn next_task(&self) -> Option<TimedTask> {
        let slot = self.queue.lock().expect("scheduler mutex poisoned");
        slot.as_ref().and_then(|q| q.pop().ok())
    }

    fn next_ready_at(&self) -> Option<std::time::Instant> {
        let slot = self.queue.lock().expect("scheduler mutex poisoned");
        slot.as_ref().and_then(|q| q.next_ready_at())
    }
}
