use super::{pump, Observable};
use crate::channel::Channel;
use crate::error::{ErrorKind, ErrorPtr};
use crate::promise::Promise;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

impl<T: Send + 'static> Observable<T> {
    /// Drains the stream, calling `on_item` for every value. Resolves once
    /// the stream closes cleanly; rejects with whatever error it closed
    /// with otherwise.
    pub fn consume<F>(self, on_item: F) -> Promise<()>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        pump::drive(self.channel, self.queue, on_item)
    }

    /// Like [`Observable::consume`], but `on_item` returns a `Promise<()>`
    /// that must settle before the next value is read.
    pub fn consume_async<F>(self, on_item: F) -> Promise<()>
    where
        F: Fn(T) -> Promise<()> + Send + Sync + 'static,
    {
        pump::drive_async(self.channel, self.queue, on_item)
    }

    /// Transforms every value with `f`.
    pub fn map<U, F>(self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let queue = self.queue.clone();
        let sink = Channel::new(queue.clone(), 16);
        let sink_for_write = sink.clone();
        let done = pump::drive(self.channel, self.queue, move |value| {
            let _ = sink_for_write.write(f(value));
        });
        close_sink_on_finish(done, sink.clone());
        Observable { channel: sink, queue }
    }

    /// Like [`Observable::map`], but `f` returns a `Promise<U>` that is
    /// awaited before the mapped value is emitted; order is preserved.
    pub fn map_async<U, F>(self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Promise<U> + Send + Sync + 'static,
    {
        let queue = self.queue.clone();
        let sink = Channel::new(queue.clone(), 16);
        let sink_for_write = sink.clone();
        let done = pump::drive_async(self.channel, self.queue, move |value| {
            let sink_for_write = sink_for_write.clone();
            f(value).then(move |mapped| {
                let _ = sink_for_write.write(mapped);
            })
        });
        close_sink_on_finish(done, sink.clone());
        Observable { channel: sink, queue }
    }

    /// Groups every `n` values into one `Vec`, flushing a shorter final
    /// group when the stream closes with a non-empty remainder. `n == 0` is
    /// a programmer error: the returned observable closes immediately with
    /// `ErrorKind::Programmer`.
    pub fn buffer(self, n: usize) -> Observable<Vec<T>> {
        let queue = self.queue.clone();
        if n == 0 {
            let sink = Channel::new(queue.clone(), 1);
            sink.close_with_error(ErrorPtr::new(ErrorKind::Programmer, "buffer(0) is invalid"));
            return Observable { channel: sink, queue };
        }
        let sink = Channel::new(queue.clone(), 16);
        let sink_for_item = sink.clone();
        let pending: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));
        let pending_for_item = pending.clone();
        let done = pump::drive(self.channel, self.queue, move |value| {
            let mut guard = pending_for_item.lock().expect("buffer mutex poisoned");
            guard.push(value);
            if guard.len() == n {
                let batch = std::mem::take(&mut *guard);
                drop(guard);
                let _ = sink_for_item.write(batch);
            }
        });
        let sink_for_close = sink.clone();
        let sink_for_err = sink.clone();
        let _finish: Promise<()> = done
            .then(move |_| {
                let mut guard = pending.lock().expect("buffer mutex poisoned");
                if !guard.is_empty() {
                    let batch = std::mem::take(&mut *guard);
                    drop(guard);
                    let _ = sink_for_close.write(batch);
                }
                sink_for_close.close();
            })
            .fail(move |e| {
                sink_for_err.close_with_error(e);
            });
        Observable { channel: sink, queue }
    }

    /// Partitions values by `key_fn`. The first value seen for a key opens a
    /// fresh inner [`Observable`] and emits `(key, inner)` downstream;
    /// subsequent values with that key route to the same inner observable.
    /// On upstream close-ok every inner observable closes ok; on close-err
    /// every inner observable closes with that error.
    pub fn group_by<K, F>(self, key_fn: F) -> Observable<(K, Observable<T>)>
    where
        K: Hash + Eq + Clone + Send + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let queue = self.queue.clone();
        let sink = Channel::new(queue.clone(), 16);
        let inner_channels: Arc<Mutex<HashMap<K, Arc<Channel<T>>>>> = Arc::new(Mutex::new(HashMap::new()));
        let inner_channels_for_item = inner_channels.clone();
        let sink_for_item = sink.clone();
        let queue_for_item = queue.clone();
        let done = pump::drive(self.channel, self.queue, move |value| {
            let key = key_fn(&value);
            let mut guard = inner_channels_for_item.lock().expect("group_by mutex poisoned");
            let inner = match guard.get(&key) {
                Some(inner) => inner.clone(),
                None => {
                    let inner = Channel::new(queue_for_item.clone(), 16);
                    guard.insert(key.clone(), inner.clone());
                    let observable = Observable { channel: inner.clone(), queue: queue_for_item.clone() };
                    let _ = sink_for_item.write((key, observable));
                    inner
                }
            };
            drop(guard);
            let _ = inner.write(value);
        });
        let inner_channels_for_close = inner_channels.clone();
        let sink_for_close = sink.clone();
        let inner_channels_for_err = inner_channels.clone();
        let sink_for_err = sink.clone();
        let _finish: Promise<()> = done
            .then(move |_| {
                let guard = inner_channels_for_close.lock().expect("group_by mutex poisoned");
                for inner in guard.values() {
                    inner.close();
                }
                drop(guard);
                sink_for_close.close();
            })
            .fail(move |e| {
                let guard = inner_channels_for_err.lock().expect("group_by mutex poisoned");
                for inner in guard.values() {
                    inner.close_with_error(e.clone());
                }
                drop(guard);
                sink_for_err.close_with_error(e);
            });
        Observable { channel: sink, queue }
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    /// Replays every value from the source, in order, `times` times in a
    /// row, buffering the whole source in memory first.
    pub fn repeat(self, times: usize) -> Observable<T> {
        let queue = self.queue.clone();
        let sink = Channel::new(queue.clone(), 16);
        let captured: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));
        let captured_for_item = captured.clone();
        let done = pump::drive(self.channel, self.queue, move |value| {
            captured_for_item.lock().expect("repeat mutex poisoned").push(value);
        });
        let sink_for_close = sink.clone();
        let sink_for_err = sink.clone();
        let _finish: Promise<()> = done
            .then(move |_| {
                let values = captured.lock().expect("repeat mutex poisoned").clone();
                for _ in 0..times {
                    for value in &values {
                        let _ = sink_for_close.write(value.clone());
                    }
                }
                sink_for_close.close();
            })
            .fail(move |e| {
                sink_for_err.close_with_error(e);
            });
        Observable { channel: sink, queue }
    }
}

fn close_sink_on_finish<U: Send + 'static>(done: Promise<()>, sink: Arc<Channel<U>>) {
    let sink_for_err = sink.clone();
    let _finish: Promise<()> = done
        .then(move |_| sink.close())
        .fail(move |e| sink_for_err.close_with_error(e));
}
