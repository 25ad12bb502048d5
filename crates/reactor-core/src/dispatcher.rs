//! Dispatchers: running executors that drain a [`Scheduler`] until told to
//! stop.
//!
//! Two implementations are provided: a single-thread dispatcher that owns
//! the calling thread, and a thread-pool dispatcher running N workers. Both
//! share the same wake/termination plumbing so the control-flow bugs
//! (missed wakeups, double-termination) only have to be gotten right once.

use crate::clock::{wait_duration, MonotonicClock, SystemClock};
use crate::error::route_uncaught;
use crate::scheduler::Scheduler;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Upper bound on how long the run loop sleeps when no timed task is
/// pending, so a missed wakeup degrades to a brief poll delay instead of an
/// indefinite stall.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a dispatcher winds down when `terminate` is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationMode {
    /// Drain all scheduled and newly added tasks, then stop.
    Linger,
    /// Finish in-flight tasks, discard the rest.
    Annihilate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Constructed,
    Started,
    Terminating(TerminationMode),
    Terminated,
}

/// A single capability interface for anything that can drain a scheduler
/// until told to stop.
pub trait Dispatcher: Send + Sync + 'static {
    /// Blocks the calling thread (or, for a pool, spawns its workers and
    /// blocks until they are all running) until the dispatcher terminates.
    fn start(&self);
    /// Wakes the dispatcher to reconsider its scheduler; called by a
    /// [`Scheduler::add_queue`] notifier whenever a task becomes available.
    fn poke(&self);
    fn terminate(&self, mode: TerminationMode);
    fn await_termination(&self);
    fn parallelism(&self) -> usize;
    fn state(&self) -> DispatcherState;
}

/// Shared wake/termination bookkeeping used by both dispatcher flavors.
struct Control {
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn MonotonicClock>,
    state: Mutex<DispatcherState>,
    state_cv: Condvar,
    wake_generation: Mutex<u64>,
    wake_cv: Condvar,
}

impl Control {
    fn new(scheduler: Arc<dyn Scheduler>, clock: Arc<dyn MonotonicClock>) -> Self {
        Control {
            scheduler,
            clock,
            state: Mutex::new(DispatcherState::Constructed),
            state_cv: Condvar::new(),
            wake_generation: Mutex::new(0),
            wake_cv: Condvar::new(),
        }
    }

    fn poke(&self) {
        let mut generation = self.wake_generation.lock().expect("wake mutex poisoned");
        *generation = generation.wrapping_add(1);
        self.wake_cv.notify_all();
    }

    fn set_state(&self, new_state: DispatcherState) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        *state = new_state;
        self.state_cv.notify_all();
    }

    fn state(&self) -> DispatcherState {
        *self.state.lock().expect("state mutex poisoned")
    }

    fn await_termination(&self) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        while !matches!(*state, DispatcherState::Terminated) {
            state = self.state_cv.wait(state).expect("state mutex poisoned");
        }
    }

    /// True once termination has been requested and, for `Linger`, once the
    /// scheduler has nothing left pending.
    fn should_exit(&self) -> bool {
        match self.state() {
            DispatcherState::Terminating(TerminationMode::Annihilate) => true,
            DispatcherState::Terminating(TerminationMode::Linger) => {
                self.scheduler.next_ready_at().is_none()
            }
            _ => false,
        }
    }

    /// Runs one iteration of the shared fetch/run/sleep loop. Returns `true`
    /// if the loop should keep going.
    fn step(&self) -> bool {
        if let Some(timed) = self.scheduler.next_task() {
            run_task(timed.task);
            return true;
        }
        if self.should_exit() {
            return false;
        }
        let wait_for = self
            .scheduler
            .next_ready_at()
            .map(|at| wait_duration(self.clock.now(), at))
            // No timed task pending: still bound the wait so a notifier
            // race (push happens between `next_task` returning `None` and
            // the lock below being taken) cannot stall the loop forever.
            .unwrap_or(IDLE_POLL_INTERVAL)
            .max(Duration::from_millis(1));
        let generation = self.wake_generation.lock().expect("wake mutex poisoned");
        let before = *generation;
        let _ = self
            .wake_cv
            .wait_timeout_while(generation, wait_for, |g| *g == before)
            .expect("wake mutex poisoned");
        true
    }
}

fn run_task(task: crate::clock::Task) {
    let result = panic::catch_unwind(AssertUnwindSafe(task));
    if let Err(payload) = result {
        let message = panic_message(&payload);
        route_uncaught(&crate::error::ErrorPtr::new(
            crate::error::ErrorKind::Programmer,
            format!("task panicked: {message}"),
        ));
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Single-thread runner. `start()` blocks the calling thread.
pub struct BlockingDispatcher {
    control: Control,
}

impl BlockingDispatcher {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        Self::with_clock(scheduler, Arc::new(SystemClock))
    }

    /// Like [`BlockingDispatcher::new`], but sleeps against `clock` instead
    /// of [`SystemClock`] — for deterministic tests of the idle-wait path.
    pub fn with_clock(scheduler: Arc<dyn Scheduler>, clock: Arc<dyn MonotonicClock>) -> Arc<Self> {
        Arc::new(BlockingDispatcher {
            control: Control::new(scheduler, clock),
        })
    }

    /// Convenience for callers who don't want to block the current thread:
    /// runs `start()` on a fresh background thread.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatcher = self.clone();
        thread::Builder::new()
            .name("reactor-core-blocking".into())
            .spawn(move || dispatcher.start())
            .expect("failed to spawn blocking dispatcher thread")
    }
}

impl Dispatcher for BlockingDispatcher {
    fn start(&self) {
        self.control.set_state(DispatcherState::Started);
        loop {
            if !self.control.step() {
                break;
            }
        }
        self.control.set_state(DispatcherState::Terminated);
    }

    fn poke(&self) {
        self.control.poke();
    }

    fn terminate(&self, mode: TerminationMode) {
        self.control.set_state(DispatcherState::Terminating(mode));
        self.control.poke();
    }

    fn await_termination(&self) {
        self.control.await_termination();
    }

    fn parallelism(&self) -> usize {
        1
    }

    fn state(&self) -> DispatcherState {
        self.control.state()
    }
}

/// N worker threads sharing one [`Scheduler`].
pub struct ThreadPoolDispatcher {
    control: Arc<Control>,
    worker_count: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl ThreadPoolDispatcher {
    pub fn new(scheduler: Arc<dyn Scheduler>, worker_count: usize) -> Arc<Self> {
        Self::with_clock(scheduler, worker_count, Arc::new(SystemClock))
    }

    /// Like [`ThreadPoolDispatcher::new`], but sleeps against `clock`
    /// instead of [`SystemClock`].
    pub fn with_clock(scheduler: Arc<dyn Scheduler>, worker_count: usize, clock: Arc<dyn MonotonicClock>) -> Arc<Self> {
        Arc::new(ThreadPoolDispatcher {
            control: Arc::new(Control::new(scheduler, clock)),
            worker_count: worker_count.max(1),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }
}

impl Dispatcher for ThreadPoolDispatcher {
    fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.control.set_state(DispatcherState::Started);
        let mut workers = self.workers.lock().expect("worker list mutex poisoned");
        for index in 0..self.worker_count {
            let control = self.control.clone();
            let handle = thread::Builder::new()
                .name(format!("reactor-core-pool-{index}"))
                .spawn(move || loop {
                    if !control.step() {
                        break;
                    }
                })
                .expect("failed to spawn thread-pool worker");
            workers.push(handle);
        }
    }

    fn poke(&self) {
        self.control.poke();
    }

    fn terminate(&self, mode: TerminationMode) {
        self.control.set_state(DispatcherState::Terminating(mode));
        self.control.poke();
    }

    fn await_termination(&self) {
        let mut workers = self.workers.lock().expect("worker list mutex poisoned");
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        self.control.set_state(DispatcherState::Terminated);
    }

    fn parallelism(&self) -> usize {
        self.worker_count
    }

    fn state(&self) -> DispatcherState {
        self.control.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Queue;
    use crate::scheduler::DirectScheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn blocking_dispatcher_drains_then_stops_in_linger_mode() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(DirectScheduler::new());
        let dispatcher = BlockingDispatcher::new(scheduler.clone());
        let queue = Queue::new(0, 1);
        {
            let dispatcher = dispatcher.clone();
            scheduler
                .add_queue(queue.clone(), Arc::new(move || dispatcher.poke()))
                .unwrap();
        }

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            queue.push(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let handle = dispatcher.spawn();
        dispatcher.terminate(TerminationMode::Linger);
        dispatcher.await_termination();
        handle.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn thread_pool_dispatcher_runs_tasks_across_workers() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(DirectScheduler::new());
        let dispatcher = ThreadPoolDispatcher::new(scheduler.clone(), 4);
        let queue = Queue::new(0, 1);
        {
            let dispatcher = dispatcher.clone();
            scheduler
                .add_queue(queue.clone(), Arc::new(move || dispatcher.poke()))
                .unwrap();
        }

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = counter.clone();
            queue.push(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        dispatcher.start();
        dispatcher.terminate(TerminationMode::Linger);
        dispatcher.await_termination();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert_eq!(dispatcher.parallelism(), 4);
    }

    #[test]
    fn panicking_task_is_routed_to_uncaught_handler_not_propagated() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(DirectScheduler::new());
        let dispatcher = BlockingDispatcher::new(scheduler.clone());
        let queue = Queue::new(0, 1);
        {
            let dispatcher = dispatcher.clone();
            scheduler
                .add_queue(queue.clone(), Arc::new(move || dispatcher.poke()))
                .unwrap();
        }
        queue.push(Box::new(|| panic!("boom")));
        let ran_after = Arc::new(AtomicBool::new(false));
        {
            let ran_after = ran_after.clone();
            queue.push(Box::new(move || ran_after.store(true, Ordering::SeqCst)));
        }

        let handle = dispatcher.spawn();
        dispatcher.terminate(TerminationMode::Linger);
        dispatcher.await_termination();
        handle.join().unwrap();
        assert!(ran_after.load(Ordering::SeqCst));
    }
}
