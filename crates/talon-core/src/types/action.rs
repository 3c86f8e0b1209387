//! Work items handed across threads to the host's execution context.

/// An opaque, zero-argument unit of work.
///
/// Ownership moves to the queue on enqueue; the action runs at most once, on
/// the consumer thread.
pub type QueuedAction = Box<dyn FnOnce() + Send + 'static>;
