//! Time-ordered queue backends.

pub mod memory;

pub use memory::InMemoryQueue;
