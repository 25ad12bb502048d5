//! `Deferrer<T>`: the write side of a promise.

use crate::error::ErrorPtr;
use crate::promise::Promise;
use crate::queue::Queue;
use crate::state::UniqueState;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Settles a [`Promise<T>`] at most once, either with a value or an error.
pub struct Deferrer<T> {
    state: Arc<UniqueState<T>>,
    queue: Arc<Queue>,
}

impl<T> Clone for Deferrer<T> {
    fn clone(&self) -> Self {
        Deferrer {
            state: self.state.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl<T> Deferrer<T> {
    pub fn new(queue: Arc<Queue>) -> Self {
        Deferrer {
            state: UniqueState::new(),
            queue,
        }
    }

    /// The read-side handle. May be called multiple times before
    /// settlement; each call returns an independent `Promise` over the same
    /// underlying state (only one of them may ultimately `take()` it,
    /// matching the unique/single-consumer contract).
    pub fn promise(&self) -> Promise<T> {
        Promise::from_parts(self.state.clone(), self.queue.clone())
    }

    pub fn resolve(&self, value: T) {
        self.state.resolve(value);
    }

    pub fn reject(&self, error: ErrorPtr) {
        self.state.reject(error);
    }

    /// Calls `f`. If it returns a value, resolves; if it panics, rejects
    /// with the panic turned into an `ErrorPtr` (the nothrow-violation
    /// detector described in the crate's concurrency model).
    pub fn resolve_by_calling<F>(&self, f: F)
    where
        F: FnOnce() -> T,
    {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => self.resolve(value),
            Err(payload) => self.reject(crate::promise::panic_to_error(payload)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Queue;

    #[test]
    fn resolve_by_calling_rejects_on_panic() {
        let queue = Queue::new(0, 1);
        let deferrer = Deferrer::<i32>::new(queue);
        let promise = deferrer.promise();
        deferrer.resolve_by_calling(|| panic!("boom"));
        assert!(promise.is_settled());
    }

    #[test]
    fn resolve_by_calling_resolves_on_success() {
        let queue = Queue::new(0, 1);
        let deferrer = Deferrer::<i32>::new(queue);
        let promise = deferrer.promise();
        deferrer.resolve_by_calling(|| 42);
        assert!(promise.is_settled());
    }
}
