//! Timers: promises that settle after a delay.

use crate::clock::{MonotonicClock, SystemClock};
use crate::promise::{self, Promise};
use crate::queue::Queue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Produces a `Promise<()>` that settles once `duration` has elapsed.
pub trait TimerDispatcher: Send + Sync + 'static {
    fn delay(&self, duration: Duration) -> Promise<()>;
}

/// A timer backed by a single background thread that wakes for the nearest
/// pending deadline, posting each expired entry's completion to its own
/// queue. Named after the running joke in the scheduling literature that
/// every "just sleep until the next thing" timer is a degenerate one-slot
/// timing wheel.
pub struct WheelTimerDispatcher {
    inner: Arc<Inner>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

struct Entry {
    fire_at: Instant,
}

struct Inner {
    pending: Mutex<Vec<(Entry, Arc<crate::state::UniqueState<()>>)>>,
    wake: Condvar,
    wake_mutex: Mutex<()>,
    shutdown: AtomicBool,
    clock: Arc<dyn MonotonicClock>,
}

impl WheelTimerDispatcher {
    pub fn new() -> Arc<Self> {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Like [`WheelTimerDispatcher::new`], but reads "now" from `clock`
    /// instead of [`SystemClock`] — lets a test drive fire times without
    /// real sleeps.
    pub fn with_clock(clock: Arc<dyn MonotonicClock>) -> Arc<Self> {
        let inner = Arc::new(Inner {
            pending: Mutex::new(Vec::new()),
            wake: Condvar::new(),
            wake_mutex: Mutex::new(()),
            shutdown: AtomicBool::new(false),
            clock,
        });
        let worker_inner = inner.clone();
        let worker = thread::Builder::new()
            .name("reactor-core-timer".into())
            .spawn(move || Self::run(worker_inner))
            .expect("failed to spawn timer thread");
        Arc::new(WheelTimerDispatcher {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn run(inner: Arc<Inner>) {
        loop {
            if inner.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let now = inner.clock.now();
            let mut fired = Vec::new();
            let wait_for = {
                let mut pending = inner.pending.lock().expect("timer mutex poisoned");
                let mut earliest: Option<Duration> = None;
                pending.retain(|(entry, state)| {
                    if entry.fire_at <= now {
                        fired.push(state.clone());
                        false
                    } else {
                        let remaining = entry.fire_at.saturating_duration_since(now);
                        earliest = Some(earliest.map_or(remaining, |e| e.min(remaining)));
                        true
                    }
                });
                earliest
            };
            for state in fired {
                // Settling here posts every registered continuation to its
                // own registration queue; nothing further to push.
                state.resolve(());
            }
            let guard = inner.wake_mutex.lock().expect("timer wake mutex poisoned");
            let timeout = wait_for.unwrap_or(Duration::from_millis(50));
            let _ = inner.wake.wait_timeout(guard, timeout);
        }
    }
}

impl Drop for WheelTimerDispatcher {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wake.notify_all();
        if let Some(handle) = self.worker.lock().expect("timer worker mutex poisoned").take() {
            let _ = handle.join();
        }
    }
}

impl TimerDispatcher for WheelTimerDispatcher {
    fn delay(&self, duration: Duration) -> Promise<()> {
        let queue = Queue::new(0, 1);
        let state = crate::state::UniqueState::<()>::new();
        let entry = Entry {
            fire_at: self.inner.clock.now() + duration,
        };
        {
            let mut pending = self.inner.pending.lock().expect("timer mutex poisoned");
            pending.push((entry, state.clone()));
        }
        self.inner.wake.notify_all();
        Promise::from_parts(state, queue)
    }
}

/// A test-only timer that settles immediately, ignoring `duration`, so
/// combinators that use a timer can be exercised without real sleeps.
pub struct ImmediateTimerDispatcher {
    queue: Arc<Queue>,
}

impl ImmediateTimerDispatcher {
    pub fn new(queue: Arc<Queue>) -> Arc<Self> {
        Arc::new(ImmediateTimerDispatcher { queue })
    }
}

impl TimerDispatcher for ImmediateTimerDispatcher {
    fn delay(&self, _duration: Duration) -> Promise<()> {
        promise::with(self.queue.clone(), ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_timer_settles_without_waiting() {
        let queue = Queue::new(0, 1);
        let timer = ImmediateTimerDispatcher::new(queue.clone());
        let promise = timer.delay(Duration::from_secs(3600));
        assert!(promise.is_settled());
    }

    #[test]
    fn wheel_timer_settles_after_delay() {
        let timer = WheelTimerDispatcher::new();
        let promise = timer.delay(Duration::from_millis(20));
        assert!(!promise.is_settled());
        thread::sleep(Duration::from_millis(100));
        assert!(promise.is_settled());
    }

    struct FakeClock(Mutex<Instant>);

    impl MonotonicClock for FakeClock {
        fn now(&self) -> Instant {
            *self.0.lock().expect("fake clock mutex poisoned")
        }
    }

    #[test]
    fn wheel_timer_fires_only_once_the_injected_clock_reaches_the_deadline() {
        let origin = Instant::now();
        let clock = Arc::new(FakeClock(Mutex::new(origin)));
        let timer = WheelTimerDispatcher::with_clock(clock.clone());
        let promise = timer.delay(Duration::from_secs(10));

        thread::sleep(Duration::from_millis(60));
        assert!(!promise.is_settled(), "deadline hasn't passed on the fake clock yet");

        *clock.0.lock().unwrap() = origin + Duration::from_secs(11);
        thread::sleep(Duration::from_millis(100));
        assert!(promise.is_settled());
    }
}
