//! `Promise<T>`: the read side of a settled value, plus its combinators.
//!
//! Every combinator consumes `self` and returns a fresh `Promise<U>`,
//! matching the unique/single-consumer contract carried by [`UniqueState`].
//! [`SharedPromise`] relaxes that to many consumers at the cost of requiring
//! `T: Clone`.

mod combinators;

use crate::clock::Task;
use crate::error::{ErrorKind, ErrorPtr, ReactorError};
use crate::expected::Expected;
use crate::queue::Queue;
use crate::state::{SharedState, UniqueState};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub use combinators::{all, delay};

/// The read side of a value that settles at most once.
pub struct Promise<T> {
    state: Arc<UniqueState<T>>,
    queue: Arc<Queue>,
}

impl<T> Promise<T> {
    pub(crate) fn from_parts(state: Arc<UniqueState<T>>, queue: Arc<Queue>) -> Self {
        Promise { state, queue }
    }

    /// Splits a promise into its raw settlement state and the queue it was
    /// registered on. Used by combinators that need to re-register a
    /// continuation on a *different*, caller-chosen queue instead of the one
    /// the promise already carries — see `promise::combinators::delay` and
    /// `observable::timer`.
    pub(crate) fn into_parts(self) -> (Arc<UniqueState<T>>, Arc<Queue>) {
        (self.state, self.queue)
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn is_settled(&self) -> bool {
        self.state.is_settled()
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Runs `body` once the upstream settles, on `queue`, with panics from
    /// `body` itself turned into the output's error (the nothrow-violation
    /// rule applied uniformly across every combinator built on this).
    fn continue_with<U, F>(self, queue: Arc<Queue>, body: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(Expected<T>) -> Expected<U> + Send + 'static,
    {
        let Promise {
            state: upstream_state,
            queue: registration_queue,
        } = self;
        let output_state = UniqueState::<U>::new();
        let out = output_state.clone();
        let state_for_task = upstream_state.clone();
        let task: Task = Box::new(move || {
            let outcome = state_for_task.take();
            let settled = match panic::catch_unwind(AssertUnwindSafe(|| body(outcome))) {
                Ok(settled) => settled,
                Err(payload) => Expected::Error(panic_to_error(payload)),
            };
            out.settle(settled);
        });
        upstream_state.on_settle(task, registration_queue);
        Promise {
            state: output_state,
            queue,
        }
    }

    /// Transforms a value outcome with `f`; an error outcome passes through
    /// untouched.
    pub fn then<U, F>(self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let queue = self.queue.clone();
        self.continue_with(queue, move |outcome| outcome.map(f))
    }

    /// Transforms a value outcome into a fresh promise and adopts its
    /// eventual settlement, rather than resolving synchronously. Use this
    /// instead of [`Promise::then`] whenever `f` itself needs to do
    /// asynchronous work before the chain can continue.
    pub fn then_promise<U, F>(self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let Promise {
            state: upstream_state,
            queue: registration_queue,
        } = self;
        let queue = registration_queue.clone();
        let output_state = UniqueState::<U>::new();
        let out = output_state.clone();
        let state_for_task = upstream_state.clone();
        let task: Task = Box::new(move || {
            let outcome = state_for_task.take();
            match outcome {
                Expected::Value(v) => match panic::catch_unwind(AssertUnwindSafe(|| f(v))) {
                    Ok(next) => adopt(out, next),
                    Err(payload) => out.settle(Expected::Error(panic_to_error(payload))),
                },
                Expected::Error(e) => out.settle(Expected::Error(e)),
            }
        });
        upstream_state.on_settle(task, registration_queue);
        Promise {
            state: output_state,
            queue,
        }
    }

    /// Transforms an error outcome with `f`, recovering it into a value; a
    /// value outcome passes through untouched.
    pub fn fail<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce(ErrorPtr) -> T + Send + 'static,
    {
        let queue = self.queue.clone();
        self.continue_with(queue, move |outcome| match outcome {
            Expected::Value(v) => Expected::Value(v),
            Expected::Error(e) => Expected::Value(f(e)),
        })
    }

    /// Like [`Promise::fail`], but only when the error's kind equals `kind`;
    /// otherwise the error passes through unrecovered.
    pub fn fail_kind<F>(self, kind: ErrorKind, f: F) -> Promise<T>
    where
        F: FnOnce(ErrorPtr) -> T + Send + 'static,
    {
        let queue = self.queue.clone();
        self.continue_with(queue, move |outcome| match outcome {
            Expected::Value(v) => Expected::Value(v),
            Expected::Error(e) => {
                if e.is_kind(&kind) {
                    Expected::Value(f(e))
                } else {
                    Expected::Error(e)
                }
            }
        })
    }

    /// Runs `f` with a reference to the value, for side effects only; a
    /// panic inside `f` replaces the value outcome with an error. An error
    /// outcome always passes through regardless of `f`.
    pub fn tap<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let queue = self.queue.clone();
        self.continue_with(queue, move |outcome| match outcome {
            Expected::Value(v) => {
                f(&v);
                Expected::Value(v)
            }
            Expected::Error(e) => Expected::Error(e),
        })
    }

    /// Runs `f` with a reference to the error, for side effects only; a
    /// panic inside `f` replaces it with the panic's own error. A value
    /// outcome always passes through regardless of `f`.
    pub fn tap_error<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce(&ErrorPtr) + Send + 'static,
    {
        let queue = self.queue.clone();
        self.continue_with(queue, move |outcome| match outcome {
            Expected::Value(v) => Expected::Value(v),
            Expected::Error(e) => {
                f(&e);
                Expected::Error(e)
            }
        })
    }

    /// Runs `f` regardless of outcome; a panic inside `f` replaces the
    /// outcome with an error, otherwise the original outcome passes through
    /// unchanged.
    pub fn finally<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = self.queue.clone();
        self.continue_with(queue, move |outcome| {
            f();
            outcome
        })
    }

    /// Awaits the upstream, discards its value, and resolves with `value`;
    /// an upstream error still propagates.
    pub fn forward<U>(self, value: U) -> Promise<U>
    where
        U: Send + 'static,
    {
        let queue = self.queue.clone();
        self.continue_with(queue, move |outcome| match outcome {
            Expected::Value(_) => Expected::Value(value),
            Expected::Error(e) => Expected::Error(e),
        })
    }

    /// [`Promise::forward`] to `()`, for chains kept only for their
    /// side effects.
    pub fn strip(self) -> Promise<()> {
        self.forward(())
    }

    /// Turns either outcome into a resolved `Expected<T>`, so failure no
    /// longer terminates the chain.
    pub fn reflect(self) -> Promise<Expected<T>> {
        let queue = self.queue.clone();
        self.continue_with(queue, Expected::Value)
    }

    /// Suspends the chain for `duration` on `timer` before passing the
    /// outcome through unchanged.
    pub fn delay(self, duration: std::time::Duration, timer: Arc<dyn crate::timer::TimerDispatcher>) -> Promise<T> {
        combinators::delay(self, duration, timer)
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// One-way upgrade to a multi-consumer [`SharedPromise`].
    pub fn share(self) -> SharedPromise<T> {
        SharedPromise {
            state: self.state.into_shared(),
            queue: self.queue,
        }
    }
}

/// Registers a continuation on `next` that forwards its eventual settlement
/// into `output`, used by `then_promise` to adopt a promise returned from a
/// user callback instead of resolving synchronously.
fn adopt<U: Send + 'static>(output: Arc<UniqueState<U>>, next: Promise<U>) {
    let Promise {
        state: next_state,
        queue: next_queue,
    } = next;
    let state_for_task = next_state.clone();
    let task: Task = Box::new(move || {
        let outcome = state_for_task.take();
        output.settle(outcome);
    });
    next_state.on_settle(task, next_queue);
}

/// The multi-consumer form of [`Promise`]: every call to [`SharedPromise::then`]
/// independently observes a cloned outcome.
pub struct SharedPromise<T: Clone> {
    state: SharedState<T>,
    queue: Arc<Queue>,
}

impl<T: Clone + Send + 'static> SharedPromise<T> {
    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn is_settled(&self) -> bool {
        self.state.is_settled()
    }

    pub fn then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let output_state = UniqueState::<U>::new();
        let out = output_state.clone();
        let state = self.state.clone();
        let task: Task = Box::new(move || {
            let outcome = state.get();
            let settled = match panic::catch_unwind(AssertUnwindSafe(|| outcome.map(f))) {
                Ok(settled) => settled,
                Err(payload) => Expected::Error(panic_to_error(payload)),
            };
            out.settle(settled);
        });
        self.state.on_settle(task, self.queue.clone());
        Promise {
            state: output_state,
            queue: self.queue.clone(),
        }
    }
}

impl<T: Clone> Clone for SharedPromise<T> {
    fn clone(&self) -> Self {
        SharedPromise {
            state: self.state.clone(),
            queue: self.queue.clone(),
        }
    }
}

/// Turns a caught panic payload into an `ErrorPtr`, used at every boundary
/// where a user callback runs under `catch_unwind`.
pub(crate) fn panic_to_error(payload: Box<dyn Any + Send>) -> ErrorPtr {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    ErrorPtr::new(ErrorKind::Programmer, format!("panicked: {message}"))
}

/// Already-resolved promise.
pub fn with<T: Send + 'static>(queue: Arc<Queue>, value: T) -> Promise<T> {
    let state = UniqueState::new();
    state.resolve(value);
    Promise { state, queue }
}

/// Already-rejected promise.
pub fn reject<T: Send + 'static>(queue: Arc<Queue>, error: ErrorPtr) -> Promise<T> {
    let state = UniqueState::new();
    state.reject(error);
    Promise { state, queue }
}

/// Runs `f` synchronously and resolves with its return value; a panic
/// rejects instead of propagating.
pub fn make_promise<T, F>(queue: Arc<Queue>, f: F) -> Promise<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let state = UniqueState::<T>::new();
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => state.resolve(value),
        Err(payload) => state.reject(panic_to_error(payload)),
    }
    Promise { state, queue }
}

/// Hands `f` a [`crate::deferrer::Deferrer`] for manual settlement — the
/// escape hatch for callbacks that settle from another thread or after
/// registering with an external event source.
pub fn make_promise_with_deferrer<T, F>(queue: Arc<Queue>, f: F) -> Promise<T>
where
    T: Send + 'static,
    F: FnOnce(crate::deferrer::Deferrer<T>) + Send + 'static,
{
    let deferrer = crate::deferrer::Deferrer::new(queue);
    let promise = deferrer.promise();
    f(deferrer);
    promise
}

/// Wraps a plain synchronous function so it returns a `Promise<T>`;
/// equivalent to [`make_promise`]. Wrapping a function that already returns
/// a `Promise` is unnecessary — just call it directly.
pub fn promisify<T, F>(queue: Arc<Queue>, f: F) -> Promise<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    make_promise(queue, f)
}

/// An attachment carrying one outcome per input to [`all`], retrievable from
/// the combined error via `error.attachment::<CombinedAttempts<T>>()`.
pub struct CombinedAttempts<T>(pub Vec<Expected<T>>);

impl<T: fmt::Debug> fmt::Debug for CombinedAttempts<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CombinedAttempts").field(&self.0).finish()
    }
}

impl<T: fmt::Debug> fmt::Display for CombinedAttempts<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

pub(crate) fn combined_error<T>(attempts: Vec<Expected<T>>) -> ErrorPtr
where
    T: fmt::Debug + Send + Sync + 'static,
{
    ReactorError::new(ErrorKind::Combined, "one or more promises failed")
        .with_attachment(CombinedAttempts(attempts))
        .into_ptr()
}

pub(crate) type Slots<T> = Arc<Mutex<Vec<Option<Expected<T>>>>>;
pub(crate) type Remaining = Arc<AtomicUsize>;

pub(crate) fn new_slots<T>(n: usize) -> Slots<T> {
    Arc::new(Mutex::new((0..n).map(|_| None).collect()))
}

pub(crate) fn new_remaining(n: usize) -> Remaining {
    Arc::new(AtomicUsize::new(n))
}

pub(crate) fn decrement(remaining: &Remaining) -> bool {
    remaining.fetch_sub(1, Ordering::AcqRel) == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn run_ready(queue: &Arc<Queue>) {
        while let Ok(timed) = queue.pop() {
            (timed.task)();
        }
    }

    #[test]
    fn then_transforms_value_and_passes_through_error() {
        let queue = Queue::new(0, 1);
        let promise = with(queue.clone(), 3).then(|v| v * 2);
        run_ready(&queue);
        assert!(promise.is_settled());
    }

    #[test]
    fn fail_recovers_an_error_outcome() {
        let queue = Queue::new(0, 1);
        let promise = reject::<i32>(queue.clone(), ErrorPtr::new(ErrorKind::Timer, "late"))
            .fail(|_e| 99);
        run_ready(&queue);
        assert!(promise.is_settled());
    }

    #[test]
    fn finally_runs_on_both_outcomes() {
        let queue = Queue::new(0, 1);
        let ran = Arc::new(Mutex::new(false));
        let ran_clone = ran.clone();
        let promise = with(queue.clone(), 1).finally(move || {
            *ran_clone.lock().unwrap() = true;
        });
        run_ready(&queue);
        assert!(promise.is_settled());
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn share_allows_multiple_then_calls() {
        let queue = Queue::new(0, 1);
        let shared = with(queue.clone(), 5).share();
        let a = shared.then(|v| v + 1);
        let b = shared.then(|v| v + 2);
        run_ready(&queue);
        assert!(a.is_settled());
        assert!(b.is_settled());
    }
}
