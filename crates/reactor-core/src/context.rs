//! `ExecutionContext`: the `{dispatcher, scheduler, queue}` bundle handed to
//! user code.

use crate::dispatcher::Dispatcher;
use crate::queue::Queue;
use crate::scheduler::Scheduler;
use std::sync::Arc;

/// Bundles a dispatcher, the scheduler it drains, and a default queue that
/// feeds it — the unit user code actually interacts with.
#[derive(Clone)]
pub struct ExecutionContext {
    dispatcher: Arc<dyn Dispatcher>,
    scheduler: Arc<dyn Scheduler>,
    queue: Arc<Queue>,
}

impl ExecutionContext {
    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// The default queue continuations use when no other queue is given.
    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }
}

/// Factory that wires a dispatcher class and a scheduler class together: a
/// queue is created, registered with the scheduler, and the scheduler's
/// notifications are bound to poke the dispatcher.
pub fn make_execution_context(
    dispatcher: Arc<dyn Dispatcher>,
    scheduler: Arc<dyn Scheduler>,
    queue_priority: i32,
    queue_parallelism: usize,
) -> Result<ExecutionContext, crate::error::ErrorPtr> {
    let queue = Queue::new(queue_priority, queue_parallelism);
    let poke_dispatcher = dispatcher.clone();
    scheduler.add_queue(queue.clone(), Arc::new(move || poke_dispatcher.poke()))?;
    Ok(ExecutionContext {
        dispatcher,
        scheduler,
        queue,
    })
}
