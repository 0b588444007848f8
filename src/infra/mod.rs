//! Storage backing the clocks' queues.

pub mod queue;

pub use queue::InMemoryQueue;
