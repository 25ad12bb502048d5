//! `Channel<T>`: a bounded, back-pressured FIFO between a writer and a
//! single reader.

use crate::deferrer::Deferrer;
use crate::error::{ErrorKind, ErrorPtr};
use crate::promise::{self, Promise};
use crate::queue::Queue;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Invoked whenever the channel transitions from "should not send" back to
/// "should send" — a writer that honored `should_send()` waits on this to
/// know when to resume.
pub type ResumeNotification = Arc<dyn Fn() + Send + Sync>;

enum ChannelState {
    Open,
    ClosedOk,
    ClosedErr(ErrorPtr),
}

struct Inner<T> {
    buffer: VecDeque<T>,
    capacity: usize,
    state: ChannelState,
    readers: VecDeque<Deferrer<T>>,
    resume_notification: Option<ResumeNotification>,
}

/// A bounded FIFO channel. Writers are expected to honor
/// [`Channel::should_send`] for back-pressure; the channel itself still
/// accepts one write past capacity (a slack of one) so a writer that just
/// checked `should_send()` and got `true` never has its write rejected by a
/// race with a concurrent write.
pub struct Channel<T> {
    inner: Mutex<Inner<T>>,
    queue: Arc<Queue>,
}

impl<T: Send + 'static> Channel<T> {
    pub fn new(queue: Arc<Queue>, capacity: usize) -> Arc<Self> {
        Arc::new(Channel {
            inner: Mutex::new(Inner {
                buffer: VecDeque::new(),
                capacity,
                state: ChannelState::Open,
                readers: VecDeque::new(),
                resume_notification: None,
            }),
            queue,
        })
    }

    /// Enqueues `value` if the channel is open and has room. Returns `false`
    /// without enqueuing when the channel has already closed, or when the
    /// buffer already holds the one-past-capacity slack write (see the
    /// struct docs); callers that need to distinguish "closed" from
    /// "backlog full" should check [`Channel::is_closed`] before writing,
    /// rather than inspect this return value.
    pub fn write(&self, value: T) -> bool {
        let waiting_reader = {
            let mut inner = self.inner.lock().expect("channel mutex poisoned");
            if !matches!(inner.state, ChannelState::Open) {
                return false;
            }
            if let Some(reader) = inner.readers.pop_front() {
                reader
            } else {
                if inner.buffer.len() > inner.capacity.max(1) {
                    return false;
                }
                inner.buffer.push_back(value);
                return true;
            }
        };
        waiting_reader.resolve(value);
        true
    }

    /// Reads the next value, as a promise that settles once one is
    /// available (immediately, if the buffer is non-empty). Reading from a
    /// channel that is `ClosedOk` with an empty buffer settles with a
    /// `ValueAbsent` error; reading one `ClosedErr` always surfaces that
    /// error.
    pub fn read(&self) -> Promise<T> {
        let mut inner = self.inner.lock().expect("channel mutex poisoned");
        if let Some(value) = inner.buffer.pop_front() {
            self.notify_resume_locked(&mut inner);
            return promise::with(self.queue.clone(), value);
        }
        match &inner.state {
            ChannelState::Open => {
                let deferrer = Deferrer::new(self.queue.clone());
                let promise = deferrer.promise();
                inner.readers.push_back(deferrer);
                promise
            }
            ChannelState::ClosedOk => promise::reject(
                self.queue.clone(),
                ErrorPtr::new(ErrorKind::EndOfStream, "channel closed with no more values"),
            ),
            ChannelState::ClosedErr(e) => promise::reject(self.queue.clone(), e.clone()),
        }
    }

    /// Closes the channel successfully; further writes fail, but buffered
    /// values already written remain readable.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("channel mutex poisoned");
        if matches!(inner.state, ChannelState::Open) {
            inner.state = ChannelState::ClosedOk;
        }
        self.fail_pending_readers(&mut inner, || {
            ErrorPtr::new(ErrorKind::EndOfStream, "channel closed with no more values")
        });
    }

    /// Closes the channel with an error; further reads (including any
    /// already-buffered values) surface `error` instead.
    pub fn close_with_error(&self, error: ErrorPtr) {
        let mut inner = self.inner.lock().expect("channel mutex poisoned");
        inner.buffer.clear();
        let for_readers = error.clone();
        inner.state = ChannelState::ClosedErr(error);
        self.fail_pending_readers(&mut inner, move || for_readers.clone());
    }

    fn fail_pending_readers<F>(&self, inner: &mut Inner<T>, make_error: F)
    where
        F: Fn() -> ErrorPtr,
    {
        for reader in inner.readers.drain(..) {
            reader.reject(make_error());
        }
    }

    pub fn is_closed(&self) -> bool {
        !matches!(
            self.inner.lock().expect("channel mutex poisoned").state,
            ChannelState::Open
        )
    }

    /// Whether a writer should currently send: false once buffered items
    /// reach capacity, so a well-behaved producer pauses.
    pub fn should_send(&self) -> bool {
        let inner = self.inner.lock().expect("channel mutex poisoned");
        inner.buffer.len() < inner.capacity.max(1)
    }

    /// Installs the callback fired when the channel transitions back into
    /// `should_send() == true` after having been full.
    pub fn set_resume_notification(&self, notification: ResumeNotification) {
        self.inner.lock().expect("channel mutex poisoned").resume_notification = Some(notification);
    }

    /// Drops every buffered value without delivering it to a reader.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("channel mutex poisoned");
        let was_full = inner.buffer.len() >= inner.capacity.max(1);
        inner.buffer.clear();
        if was_full {
            if let Some(notification) = inner.resume_notification.clone() {
                notification();
            }
        }
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    fn notify_resume_locked(&self, inner: &mut Inner<T>) {
        if inner.buffer.len() + 1 == inner.capacity.max(1) {
            if let Some(notification) = inner.resume_notification.clone() {
                notification();
            }
        }
    }
}
