//! `State<T>`: owns the settled `Expected<T>` and a [`Signal`]; exists in a
//! unique (single-consumer, move-only) or shared (multi-consumer, `Clone`)
//! form.

use crate::clock::Task;
use crate::error::ErrorPtr;
use crate::expected::Expected;
use crate::queue::Queue;
use crate::signal::Signal;
use std::sync::{Arc, Mutex};

/// The single-consumer form: the settled value is consumed exactly once via
/// [`UniqueState::take`].
pub struct UniqueState<T> {
    value: Mutex<Option<Expected<T>>>,
    signal: Signal,
}

impl<T> UniqueState<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(UniqueState {
            value: Mutex::new(None),
            signal: Signal::new(),
        })
    }

    pub fn resolve(&self, value: T) {
        self.settle(Expected::Value(value));
    }

    pub fn reject(&self, error: ErrorPtr) {
        self.settle(Expected::Error(error));
    }

    /// Settles with a whole outcome at once (used when adopting another
    /// promise's result, e.g. in `then`'s promise-chaining branch).
    pub fn settle(&self, outcome: Expected<T>) {
        let mut slot = self.value.lock().expect("state mutex poisoned");
        assert!(slot.is_none(), "a deferrer must settle at most once");
        *slot = Some(outcome);
        drop(slot);
        self.signal.settle();
    }

    pub fn is_settled(&self) -> bool {
        self.signal.is_settled()
    }

    /// Registers a continuation to run on `queue` once settled.
    pub fn on_settle(&self, task: Task, queue: Arc<Queue>) {
        self.signal.push(task, queue);
    }

    /// Consumes the settled outcome. Panics if called before settlement or
    /// more than once — callers only reach this path from a continuation
    /// scheduled via `on_settle`, which only runs post-settlement.
    pub fn take(&self) -> Expected<T> {
        self.value
            .lock()
            .expect("state mutex poisoned")
            .take()
            .expect("state polled before settlement")
    }
}

impl<T: Clone> UniqueState<T> {
    /// One-way upgrade to the shared, multi-consumer form.
    pub fn into_shared(self: Arc<Self>) -> SharedState<T> {
        SharedState(self)
    }
}

/// The multi-consumer form: every clone independently observes the same
/// settled outcome via [`SharedState::get`], which clones rather than
/// consumes.
pub struct SharedState<T: Clone>(Arc<UniqueState<T>>);

impl<T: Clone> SharedState<T> {
    pub fn new() -> Self {
        SharedState(UniqueState::new())
    }

    pub fn resolve(&self, value: T) {
        self.0.resolve(value);
    }

    pub fn reject(&self, error: ErrorPtr) {
        self.0.reject(error);
    }

    pub fn is_settled(&self) -> bool {
        self.0.is_settled()
    }

    pub fn on_settle(&self, task: Task, queue: Arc<Queue>) {
        self.0.on_settle(task, queue);
    }

    pub fn get(&self) -> Expected<T> {
        self.0
            .value
            .lock()
            .expect("state mutex poisoned")
            .as_ref()
            .expect("state polled before settlement")
            .clone()
    }
}

impl<T: Clone> Default for SharedState<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for SharedState<T> {
    fn clone(&self) -> Self {
        SharedState(self.0.clone())
    }
}
