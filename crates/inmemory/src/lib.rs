//! In-process backends for backbone.
//!
//! [`InMemoryStreamLog`] implements the consumer-group protocol (pending
//! entries, idle claims, delivery counters) without a broker, and
//! [`InMemoryHashStorage`] is a hash-style storage strategy. Nothing persists
//! past the process.

mod hash_storage;
mod stream_log;

pub use {hash_storage::InMemoryHashStorage, stream_log::InMemoryStreamLog};
