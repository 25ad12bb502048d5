//! A cooperative promise/future execution substrate, plus a reactive
//! observable layer built on top of back-pressured channels.
//!
//! The execution substrate is a small stack of single-purpose pieces —
//! [`queue::Queue`], [`scheduler::Scheduler`], [`dispatcher::Dispatcher`],
//! [`context::ExecutionContext`] — wired together by
//! [`context::make_execution_context`]. [`promise::Promise`] and
//! [`deferrer::Deferrer`] sit on top of [`state::UniqueState`] /
//! [`state::SharedState`], settling through a [`signal::Signal`].
//! [`observable::Observable`] wraps a [`channel::Channel`] with the
//! reactive operators.

pub mod bytes;
pub mod channel;
pub mod clock;
pub mod config;
pub mod context;
pub mod deferrer;
pub mod dispatcher;
pub mod error;
pub mod expected;
pub mod observable;
pub mod promise;
pub mod queue;
pub mod scheduler;
pub mod scope;
pub mod signal;
pub mod state;
pub mod timer;

pub use bytes::ByteBlock;
pub use channel::Channel;
pub use clock::{MonotonicClock, SystemClock, Task};
pub use config::RuntimeConfig;
pub use context::{make_execution_context, ExecutionContext};
pub use deferrer::Deferrer;
pub use dispatcher::{BlockingDispatcher, Dispatcher, DispatcherState, TerminationMode, ThreadPoolDispatcher};
pub use error::{ErrorKind, ErrorPtr, ReactorError};
pub use expected::Expected;
pub use observable::{Observable, Observer, Subscription};
pub use promise::{Promise, SharedPromise};
pub use queue::Queue;
pub use scheduler::{DirectScheduler, RoundRobinScheduler, Scheduler};
pub use scope::{InitOptions, Scope};
pub use state::{SharedState, UniqueState};
pub use timer::{ImmediateTimerDispatcher, TimerDispatcher, WheelTimerDispatcher};
