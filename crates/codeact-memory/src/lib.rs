//! Conversation memory.
//!
//! An ordered message log persisted as one JSON file per (conversation,
//! task). Every append runs the same pipeline: sanitize, classify, detect
//! repeated assistant output, de-duplicate, derive pruning keys, prune old
//! occurrences of the same tool call, enforce the character budget, then
//! persist atomically.

pub mod keys;
pub mod prune;
pub mod store;

pub use store::{Memory, MemoryConfig, MemoryError};
