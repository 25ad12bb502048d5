//! `Signal`: a one-shot latch that fans settlement out to whichever queues
//! are waiting on it.

use crate::clock::Task;
use crate::queue::Queue;
use std::sync::{Arc, Mutex};

enum SignalState {
    Pending(Vec<(Task, Arc<Queue>)>),
    Settled,
}

/// Accumulates `{task, queue}` continuations while pending; once settled,
/// posts every accumulated continuation to its queue (in insertion order)
/// and posts any subsequent push immediately.
pub struct Signal {
    state: Mutex<SignalState>,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    pub fn new() -> Self {
        Signal {
            state: Mutex::new(SignalState::Pending(Vec::new())),
        }
    }

    /// Registers `task` to run on `queue` once the signal settles; runs it
    /// immediately (by posting to `queue`) if it already has.
    pub fn push(&self, task: Task, queue: Arc<Queue>) {
        let mut state = self.state.lock().expect("signal mutex poisoned");
        match &mut *state {
            SignalState::Pending(continuations) => continuations.push((task, queue)),
            SignalState::Settled => {
                drop(state);
                queue.push(task);
            }
        }
    }

    /// Marks the signal settled. Continuations are snapshotted and cleared
    /// under the lock, then posted to their queues *outside* the lock so a
    /// continuation that itself touches the signal cannot deadlock.
    pub fn settle(&self) {
        let continuations = {
            let mut state = self.state.lock().expect("signal mutex poisoned");
            match std::mem::replace(&mut *state, SignalState::Settled) {
                SignalState::Pending(continuations) => continuations,
                SignalState::Settled => Vec::new(),
            }
        };
        for (task, queue) in continuations {
            queue.push(task);
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(*self.state.lock().expect("signal mutex poisoned"), SignalState::Settled)
    }
}
