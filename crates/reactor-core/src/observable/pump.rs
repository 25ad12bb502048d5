//! The shared consume loop every operator is built from: read one item,
//! hand it to a callback, and recurse until the channel reaches end of
//! stream or errors.

use crate::channel::Channel;
use crate::deferrer::Deferrer;
use crate::error::ErrorKind;
use crate::expected::Expected;
use crate::promise::{panic_to_error, Promise};
use crate::queue::Queue;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Drains `source`, calling `on_item` for every value, until it closes. A
/// panic inside `on_item` closes `source` with that error (so any other
/// reader sees it too) and rejects the returned promise instead of
/// unwinding through the dispatcher. Resolves once the channel reaches a
/// clean end of stream; rejects with whatever error the channel closed
/// with otherwise.
pub(crate) fn drive<T, F>(source: Arc<Channel<T>>, queue: Arc<Queue>, on_item: F) -> Promise<()>
where
    T: Send + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    let done = Deferrer::<()>::new(queue.clone());
    let result = done.promise();
    step(source, queue, Arc::new(on_item), done);
    result
}

fn step<T: Send + 'static>(
    source: Arc<Channel<T>>,
    queue: Arc<Queue>,
    on_item: Arc<dyn Fn(T) + Send + Sync>,
    done: Deferrer<()>,
) {
    let source_next = source.clone();
    let queue_next = queue.clone();
    let on_item_next = on_item.clone();
    let done_next = done.clone();
    let _chain: Promise<()> = source.read().reflect().then(move |outcome| match outcome {
        Expected::Value(value) => match panic::catch_unwind(AssertUnwindSafe(|| on_item_next(value))) {
            Ok(()) => step(source_next, queue_next, on_item_next, done_next),
            Err(payload) => {
                let error = panic_to_error(payload);
                source_next.close_with_error(error.clone());
                done_next.reject(error);
            }
        },
        Expected::Error(e) => {
            if e.is_kind(&ErrorKind::EndOfStream) {
                done_next.resolve(());
            } else {
                done_next.reject(e);
            }
        }
    });
}

/// Like [`drive`], but `on_item` returns a `Promise<()>` that must settle
/// before the next value is read — for operators whose callback is itself
/// asynchronous (`map_async`, `consume_async`) and must preserve order.
pub(crate) fn drive_async<T, F>(source: Arc<Channel<T>>, queue: Arc<Queue>, on_item: F) -> Promise<()>
where
    T: Send + 'static,
    F: Fn(T) -> Promise<()> + Send + Sync + 'static,
{
    let done = Deferrer::<()>::new(queue.clone());
    let result = done.promise();
    step_async(source, queue, Arc::new(on_item), done);
    result
}

fn step_async<T: Send + 'static>(
    source: Arc<Channel<T>>,
    queue: Arc<Queue>,
    on_item: Arc<dyn Fn(T) -> Promise<()> + Send + Sync>,
    done: Deferrer<()>,
) {
    let source_next = source.clone();
    let queue_next = queue.clone();
    let on_item_for_call = on_item.clone();
    let on_item_next = on_item.clone();
    let done_next = done.clone();
    let _chain: Promise<()> = source.read().reflect().then(move |outcome| match outcome {
        Expected::Value(value) => match panic::catch_unwind(AssertUnwindSafe(|| on_item_for_call(value))) {
            Ok(next) => {
                let _wait: Promise<()> = next.reflect().then(move |settled| match settled {
                    Expected::Value(()) => step_async(source_next, queue_next, on_item_next, done_next),
                    Expected::Error(e) => {
                        source_next.close_with_error(e.clone());
                        done_next.reject(e);
                    }
                });
            }
            Err(payload) => {
                let error = panic_to_error(payload);
                source_next.close_with_error(error.clone());
                done_next.reject(error);
            }
        },
        Expected::Error(e) => {
            if e.is_kind(&ErrorKind::EndOfStream) {
                done.resolve(());
            } else {
                done.reject(e);
            }
        }
    });
}
