//! Broker contract: an append-only stream with consumer groups.

use std::time::Duration;

use async_trait::async_trait;

use crate::{Result, envelope::EntryFields};

/// One entry handed out to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Broker-assigned entry id, used for acknowledgment.
    pub id: String,
    pub fields: EntryFields,
    /// Times this entry has been delivered, this delivery included.
    pub delivery_count: u32,
}

impl StreamEntry {
    /// Earlier deliveries, `None` on the first one.
    pub fn retries(&self) -> Option<u32> {
        match self.delivery_count {
            0 | 1 => None,
            n => Some(n - 1),
        }
    }
}

/// An entry delivered to a group member but not acknowledged yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle: Duration,
    pub delivery_count: u32,
}

/// Durable log addressed by stream key.
///
/// Delivery is group-scoped and at-least-once: an entry read by a consumer
/// stays pending for that consumer until acked, and a claim can move it to
/// another consumer once it has been idle long enough.
#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Short transport name recorded in announcement metadata.
    fn channel_type(&self) -> &str;

    /// Append an entry, returning its broker id.
    async fn append(&self, key: &str, fields: EntryFields) -> Result<String>;

    /// Create the group if missing, positioned at the start of the stream.
    async fn ensure_group(&self, key: &str, group: &str) -> Result<()>;

    /// Up to `count` entries never delivered to this group, oldest first.
    async fn read_group(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Move up to `count` entries pending for at least `min_idle` (on any
    /// member) to `consumer` and deliver them again.
    async fn claim(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Mark entries consumed for the group. Returns how many were pending.
    async fn ack(&self, key: &str, group: &str, ids: &[String]) -> Result<usize>;

    /// Entries currently pending in the group.
    async fn pending(&self, key: &str, group: &str) -> Result<Vec<PendingEntry>>;
}
