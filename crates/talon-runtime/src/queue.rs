//! Action queue: hands work from arbitrary threads to the host's tick thread.
//!
//! Multi-producer, single-consumer. Producers hold an [`ActionSender`] and
//! may enqueue from any thread; the tick thread calls [`ActionQueue::drain`].
//! An action enqueued while a drain is running, including by the action being
//! executed, runs in that same drain.

use std::fmt;
use std::sync::OnceLock;
use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use talon_core::guard::isolate;
use talon_core::types::QueuedAction;
use talon_plugin::api::context::ActionSink;

/// Cloneable, thread-safe producer handle.
#[derive(Clone)]
pub struct ActionSender {
    tx: Sender<QueuedAction>,
}

impl ActionSender {
    /// Queues `action` for the next drain.
    pub fn enqueue(&self, action: impl FnOnce() + Send + 'static) {
        self.send(Box::new(action));
    }

    /// Queues an already-boxed action; `None` is ignored.
    pub fn enqueue_action(&self, action: Option<QueuedAction>) {
        match action {
            Some(action) => self.send(action),
            None => debug!("Ignoring empty action"),
        }
    }

    fn send(&self, action: QueuedAction) {
        if self.tx.send(action).is_err() {
            debug!("Action queue is gone; action dropped");
        }
    }
}

impl ActionSink for ActionSender {
    fn enqueue(&self, action: QueuedAction) {
        self.send(action);
    }
}

impl fmt::Debug for ActionSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSender")
            .field("pending", &self.tx.len())
            .finish()
    }
}

/// FIFO queue of actions drained on one consumer thread.
pub struct ActionQueue {
    tx: Sender<QueuedAction>,
    rx: Receiver<QueuedAction>,
    consumer: OnceLock<ThreadId>,
}

impl ActionQueue {
    /// Creates an empty, unbounded queue.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            consumer: OnceLock::new(),
        }
    }

    /// Returns a producer handle.
    pub fn sender(&self) -> ActionSender {
        ActionSender {
            tx: self.tx.clone(),
        }
    }

    /// Queues `action` for the next drain. Never rejects.
    pub fn enqueue(&self, action: impl FnOnce() + Send + 'static) {
        self.enqueue_action(Some(Box::new(action)));
    }

    /// Queues an already-boxed action; `None` is ignored.
    pub fn enqueue_action(&self, action: Option<QueuedAction>) {
        if let Some(action) = action {
            // Cannot fail: `self.rx` keeps the channel connected.
            let _ = self.tx.send(action);
        }
    }

    /// Runs queued actions in FIFO order until the queue is empty, returning
    /// how many ran. A panicking action is logged and the drain continues.
    ///
    /// Must always be called from the same thread; the first caller becomes
    /// the consumer.
    pub fn drain(&self) -> usize {
        let current = thread::current().id();
        let consumer = *self.consumer.get_or_init(|| current);
        debug_assert_eq!(
            consumer, current,
            "ActionQueue drained from a thread other than its consumer"
        );

        let mut executed = 0;
        loop {
            match self.rx.try_recv() {
                Ok(action) => {
                    executed += 1;
                    if let Err(panic) = isolate(action) {
                        warn!(index = executed, panic = %panic, "Queued action panicked");
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if executed > 0 {
            debug!(executed, "Action queue drained");
        }
        executed
    }

    /// Discards pending actions without running them, returning how many.
    pub fn clear(&self) -> usize {
        let discarded = self.rx.try_iter().count();
        if discarded > 0 {
            debug!(discarded, "Action queue cleared");
        }
        discarded
    }

    /// Approximate number of pending actions; exact only without concurrent producers.
    pub fn pending_count(&self) -> usize {
        self.rx.len()
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionQueue")
            .field("pending", &self.pending_count())
            .field("consumer", &self.consumer.get())
            .finish()
    }
}
