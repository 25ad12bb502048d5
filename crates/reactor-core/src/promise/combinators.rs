//! Combinators that need more than one upstream promise, or a dependency
//! outside the promise/state pair itself (`all`, `delay`).

use super::{combined_error, decrement, new_remaining, new_slots, panic_to_error, Promise};
use crate::clock::Task;
use crate::expected::Expected;
use crate::queue::Queue;
use crate::state::UniqueState;
use crate::timer::TimerDispatcher;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Waits for every promise in `promises` to settle, preserving input order
/// in the resulting `Vec`. If any reject, the combined promise rejects with
/// `ErrorKind::Combined`, carrying every outcome (value or error) as a
/// [`super::CombinedAttempts`] attachment.
pub fn all<T>(promises: Vec<Promise<T>>, queue: Arc<Queue>) -> Promise<Vec<T>>
where
    T: fmt::Debug + Send + Sync + 'static,
{
    let count = promises.len();
    let output_state = UniqueState::<Vec<T>>::new();
    if count == 0 {
        output_state.resolve(Vec::new());
        return Promise::from_parts(output_state, queue);
    }

    let slots = new_slots::<T>(count);
    let remaining = new_remaining(count);

    for (index, promise) in promises.into_iter().enumerate() {
        let Promise {
            state: upstream_state,
            queue: registration_queue,
        } = promise;
        let slots = slots.clone();
        let remaining = remaining.clone();
        let output_state = output_state.clone();
        let state_for_task = upstream_state.clone();
        let task: Task = Box::new(move || {
            let outcome = state_for_task.take();
            {
                let mut guard = slots.lock().expect("all() slots mutex poisoned");
                guard[index] = Some(outcome);
            }
            if decrement(&remaining) {
                let results: Vec<Expected<T>> = std::mem::take(&mut *slots.lock().expect("all() slots mutex poisoned"))
                    .into_iter()
                    .map(|slot| slot.expect("every slot is filled once remaining reaches zero"))
                    .collect();
                let all_ok = results.iter().all(Expected::has_value);
                if all_ok {
                    let values = results
                        .into_iter()
                        .map(|outcome| match outcome {
                            Expected::Value(v) => v,
                            Expected::Error(_) => unreachable!("checked by all_ok above"),
                        })
                        .collect();
                    output_state.resolve(values);
                } else {
                    output_state.reject(combined_error(results));
                }
            }
        });
        upstream_state.on_settle(task, registration_queue);
    }

    Promise::from_parts(output_state, queue)
}

/// Awaits the upstream, then suspends for `duration` on `timer` before
/// emitting the (unchanged) outcome, error included.
pub fn delay<T>(promise: Promise<T>, duration: Duration, timer: Arc<dyn TimerDispatcher>) -> Promise<T>
where
    T: Send + 'static,
{
    let Promise {
        state: upstream_state,
        queue: registration_queue,
    } = promise;
    let output_state = UniqueState::<T>::new();
    let out = output_state.clone();
    let queue = registration_queue.clone();
    let registration_queue_for_delay = registration_queue.clone();
    let state_for_task = upstream_state.clone();
    let task: Task = Box::new(move || {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| state_for_task.take())) {
            Ok(outcome) => outcome,
            Err(payload) => Expected::Error(panic_to_error(payload)),
        };
        let delay_promise = timer.delay(duration);
        let Promise {
            state: delay_state, ..
        } = delay_promise;
        // Continue on the original chain's queue rather than the timer's
        // own disposable one, so this only needs the caller's scheduler to
        // already be wired up.
        let continuation_queue = registration_queue_for_delay.clone();
        let out_for_delay = out.clone();
        let delay_state_for_task = delay_state.clone();
        let settle_task: Task = Box::new(move || {
            let _ = delay_state_for_task.take();
            out_for_delay.settle(outcome);
        });
        delay_state.on_settle(settle_task, continuation_queue);
    });
    upstream_state.on_settle(task, registration_queue);
    Promise::from_parts(output_state, queue)
}
