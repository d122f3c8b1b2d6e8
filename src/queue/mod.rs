//! Generic single-concurrency work queue
//!
//! Callers enqueue items; a dispatcher hands batches of ready items to one
//! [`BatchRunner`] and waits for its [`Completion`] before dispatching again.

pub mod completion;
pub mod sequential;

pub use completion::{Completion, CompletionReceiver};
pub use sequential::{AdmissionPolicy, BatchRunner, QueueError, SequentialQueue};
