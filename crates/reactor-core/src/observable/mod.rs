//! `Observable<T>`: a push-based stream built on top of a back-pressured
//! [`crate::channel::Channel`].

mod operators;
mod pump;

use crate::channel::Channel;
use crate::clock::Task;
use crate::error::ErrorPtr;
use crate::promise::panic_to_error;
use crate::queue::Queue;
use crate::timer::TimerDispatcher;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A stream of values, backed by a channel a producer writes into and a
/// single consumer (an operator chain, ending in [`Observable::consume`])
/// reads from.
pub struct Observable<T> {
    channel: Arc<Channel<T>>,
    queue: Arc<Queue>,
}

/// A disposable handle to a producer registered by [`create`] or [`timer`].
/// Breaks the cyclic reference a producer closure would otherwise hold back
/// to its own registration (the closure captures the flag this checks,
/// rather than the subscription itself): disposing stops the next
/// `on_next`/re-arm from running, without requiring the producer to be
/// dropped first.
#[derive(Clone)]
pub struct Subscription {
    disposed: Arc<AtomicBool>,
}

impl Subscription {
    fn new() -> (Self, Arc<AtomicBool>) {
        let disposed = Arc::new(AtomicBool::new(false));
        (Subscription { disposed: disposed.clone() }, disposed)
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Passed to a [`create`] producer in place of a raw channel handle. Maps
/// directly onto the channel's writable operations, but also honors
/// disposal: once the paired [`Subscription`] is disposed, `on_next`
/// reports `false` without writing, the same signal a closed downstream
/// gives.
pub struct Observer<T> {
    channel: Arc<Channel<T>>,
    disposed: Arc<AtomicBool>,
}

impl<T: Send + 'static> Observer<T> {
    /// Writes `value` downstream. Returns `false` when the subscription has
    /// been disposed or the channel has closed/filled past its slack — in
    /// either case the producer should stop emitting.
    pub fn on_next(&self, value: T) -> bool {
        if self.disposed.load(Ordering::SeqCst) {
            return false;
        }
        self.channel.write(value)
    }

    pub fn on_completed(&self) {
        self.channel.close();
    }

    pub fn on_error(&self, error: ErrorPtr) {
        self.channel.close_with_error(error);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl<T: Send + 'static> Observable<T> {
    pub fn channel(&self) -> &Arc<Channel<T>> {
        &self.channel
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }
}

/// A stream with no values that closes immediately.
pub fn empty<T: Send + 'static>(queue: Arc<Queue>) -> Observable<T> {
    let channel = Channel::new(queue.clone(), 1);
    channel.close();
    Observable { channel, queue }
}

/// A stream that never produces a value and never closes.
pub fn never<T: Send + 'static>(queue: Arc<Queue>) -> Observable<T> {
    let channel = Channel::new(queue.clone(), 0);
    Observable { channel, queue }
}

/// A stream over a fixed, already-known list of values — writes every one,
/// then closes. Distinct from [`from`] only in that callers reach for it
/// with a literal list (`just(queue, [1, 2, 3])`) rather than a general
/// iterator; the two share an implementation.
pub fn just<T: Send + 'static>(queue: Arc<Queue>, values: impl IntoIterator<Item = T>) -> Observable<T> {
    from(queue, values)
}

/// A stream over a fixed, already-known sequence of values.
pub fn from<T: Send + 'static>(queue: Arc<Queue>, values: impl IntoIterator<Item = T>) -> Observable<T> {
    let channel = Channel::new(queue.clone(), 16);
    for value in values {
        let _ = channel.write(value);
    }
    channel.close();
    Observable { channel, queue }
}

/// `count` consecutive integers starting at `start`.
pub fn range(queue: Arc<Queue>, start: i64, count: usize) -> Observable<i64> {
    from(queue, (0..count as i64).map(move |i| start + i))
}

/// `count` unit values, useful for triggering side effects a fixed number
/// of times.
pub fn range_void(queue: Arc<Queue>, count: usize) -> Observable<()> {
    from(queue, std::iter::repeat(()).take(count))
}

/// Posts a task to `queue` that invokes `producer(observer)`; the producer
/// runs on the queue's own dispatcher rather than synchronously on the
/// calling thread, so it is free to block or loop for as long as the
/// dispatcher permits. A panic inside `producer` closes the stream with an
/// error, the same as [`start`]. The returned [`Subscription`] lets a
/// caller stop delivery early without waiting for `producer` to notice on
/// its own.
pub fn create<T, F>(queue: Arc<Queue>, producer: F) -> (Observable<T>, Subscription)
where
    T: Send + 'static,
    F: FnOnce(Observer<T>) + Send + 'static,
{
    let channel = Channel::new(queue.clone(), 16);
    let (subscription, disposed) = Subscription::new();
    let channel_for_panic = channel.clone();
    let observer = Observer { channel: channel.clone(), disposed };
    queue.push(Box::new(move || {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| producer(observer))) {
            if !channel_for_panic.is_closed() {
                channel_for_panic.close_with_error(panic_to_error(payload));
            }
        }
    }));
    (Observable { channel, queue }, subscription)
}

/// A single value produced by running `f`; a panic inside `f` closes the
/// stream with an error instead of propagating.
pub fn start<T, F>(queue: Arc<Queue>, f: F) -> Observable<T>
where
    T: Send + 'static,
    F: FnOnce() -> T,
{
    let channel = Channel::new(queue.clone(), 1);
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => {
            let _ = channel.write(value);
            channel.close();
        }
        Err(payload) => channel.close_with_error(panic_to_error(payload)),
    }
    Observable { channel, queue }
}

/// `value` emitted once per `duration`, with the nth emission's delivery
/// instant pinned to `base + n*duration` rather than drifting by however
/// long the previous tick's continuation took to run. Stops re-arming once
/// the downstream channel closes or the returned [`Subscription`] is
/// disposed; it never settles a terminal outcome on its own otherwise.
pub fn timer<V>(
    queue: Arc<Queue>,
    timer_dispatcher: Arc<dyn TimerDispatcher>,
    duration: Duration,
    value: V,
) -> (Observable<V>, Subscription)
where
    V: Clone + Send + 'static,
{
    let channel = Channel::new(queue.clone(), 1);
    let (subscription, disposed) = Subscription::new();
    let base = Instant::now();
    arm_tick(channel.clone(), queue.clone(), timer_dispatcher, duration, value, base, 1, disposed);
    (Observable { channel, queue }, subscription)
}

/// Registers one pending tick of [`timer`]. Each firing re-registers the
/// next tick on `queue` — the caller's real, scheduler-registered queue —
/// rather than on whatever disposable queue the timer dispatcher's promise
/// happens to carry, which nothing would ever drain.
fn arm_tick<V>(
    channel: Arc<Channel<V>>,
    queue: Arc<Queue>,
    timer_dispatcher: Arc<dyn TimerDispatcher>,
    period: Duration,
    value: V,
    base: Instant,
    tick: u32,
    disposed: Arc<AtomicBool>,
) where
    V: Clone + Send + 'static,
{
    let next_fire = base + period * tick;
    let wait = next_fire.saturating_duration_since(Instant::now());
    let (delay_state, _) = timer_dispatcher.delay(wait).into_parts();
    let delay_state_for_task = delay_state.clone();
    let registration_queue = queue.clone();
    let task: Task = Box::new(move || {
        let _ = delay_state_for_task.take();
        if disposed.load(Ordering::SeqCst) || channel.is_closed() {
            return;
        }
        if !channel.write(value.clone()) {
            return;
        }
        arm_tick(channel, queue, timer_dispatcher, period, value, base, tick + 1, disposed);
    });
    delay_state.on_settle(task, registration_queue);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ImmediateTimerDispatcher;
    use std::sync::Mutex;

    fn drain_all(queue: &Arc<Queue>) {
        while let Ok(timed) = queue.pop() {
            (timed.task)();
        }
    }

    #[test]
    fn create_runs_the_producer_on_the_queue_not_synchronously() {
        let queue = Queue::new(0, 1);
        let ran = Arc::new(AtomicBool::new(false));
        let ran_for_producer = ran.clone();
        let (observable, _subscription) = create::<i32, _>(queue.clone(), move |observer| {
            ran_for_producer.store(true, Ordering::SeqCst);
            assert!(observer.on_next(1));
            observer.on_completed();
        });
        assert!(!ran.load(Ordering::SeqCst), "producer must not run before the queue is drained");
        drain_all(&queue);
        assert!(ran.load(Ordering::SeqCst));
        assert!(observable.channel().is_closed());
    }

    #[test]
    fn create_producer_panic_closes_the_stream_with_an_error() {
        let queue = Queue::new(0, 1);
        let (observable, _subscription) = create::<i32, _>(queue.clone(), |_observer: Observer<i32>| {
            panic!("boom");
        });
        drain_all(&queue);
        assert!(observable.channel().is_closed());
    }

    #[test]
    fn disposing_before_the_producer_runs_makes_on_next_report_false() {
        let queue = Queue::new(0, 1);
        let results = Arc::new(Mutex::new(Vec::new()));
        let results_for_producer = results.clone();
        let (_observable, subscription) = create::<i32, _>(queue.clone(), move |observer| {
            results_for_producer.lock().unwrap().push(observer.on_next(1));
            results_for_producer.lock().unwrap().push(observer.on_next(2));
        });
        subscription.dispose();
        drain_all(&queue);
        assert_eq!(*results.lock().unwrap(), vec![false, false]);
    }

    #[test]
    fn timer_emits_more_than_once_on_the_callers_queue() {
        let queue = Queue::new(0, 1);
        let dispatcher = ImmediateTimerDispatcher::new(queue.clone());
        let (observable, _subscription) = timer(queue.clone(), dispatcher, Duration::from_millis(5), 7);
        drain_all(&queue);
        // Capacity 1 plus a slack-of-one write means two emissions land in
        // the buffer with nobody reading; the third re-arm observes the
        // write failing and stops on its own.
        let first = observable.channel().read();
        let second = observable.channel().read();
        assert!(first.is_settled());
        assert!(second.is_settled());
        assert!(!observable.channel().is_closed());
    }

    #[test]
    fn disposing_a_timer_subscription_stops_it_from_rearming() {
        let queue = Queue::new(0, 1);
        let dispatcher = ImmediateTimerDispatcher::new(queue.clone());
        let (observable, subscription) = timer(queue.clone(), dispatcher, Duration::from_millis(5), 7);
        subscription.dispose();
        drain_all(&queue);
        assert!(!observable.channel().read().is_settled());
        assert!(!observable.channel().is_closed());
    }
}
