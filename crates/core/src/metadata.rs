//! Routing identity and per-message metadata.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// Routing coordinates of a stream.
///
/// [`Route::key`] is the broker stream key and the storage lookup prefix;
/// producer and consumer must derive the same value or payload resolution fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Route {
    pub environment: String,
    pub uri: String,
    pub partition: String,
    pub shard: String,
}

impl Route {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    #[must_use]
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    #[must_use]
    pub fn with_shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = shard.into();
        self
    }

    /// `{environment}:{uri}:{partition}:{shard}`. Empty coordinates keep
    /// their position, so distinct routes never share a key as long as no
    /// coordinate contains `:` (plans reject that).
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.environment, self.uri, self.partition, self.shard
        )
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Whether an announcement is the original publication or a replayed copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Origin {
    #[default]
    Original,
    Copy,
}

/// Envelope header travelling with every announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(flatten)]
    pub route: Route,
    pub operation: String,
    /// Producer-assigned id. Storage keys are derived from it, so it never
    /// changes between producer and consumer.
    pub message_id: String,
    #[serde(default)]
    pub channel_type: String,
    #[serde(default)]
    pub origin: Origin,
    /// Number of earlier deliveries; `None` on first delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default)]
    pub produced_at_ms: u64,
}

impl Metadata {
    /// Fresh metadata for an outgoing call: new message id, `Origin::Original`.
    pub fn new(route: Route, operation: impl Into<String>) -> Self {
        Self {
            route,
            operation: operation.into(),
            message_id: uuid::Uuid::new_v4().to_string(),
            channel_type: String::new(),
            origin: Origin::Original,
            retries: None,
            produced_at_ms: now_ms(),
        }
    }

    pub fn key(&self) -> String {
        self.route.key()
    }

    #[must_use]
    pub fn with_channel_type(mut self, channel_type: impl Into<String>) -> Self {
        self.channel_type = channel_type.into();
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
