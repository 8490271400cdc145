use std::{error::Error as StdError, time::Duration};

/// Crate-wide result type for channel runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the channel runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A storage strategy could not save or load a bucket, legacy key included.
    #[error("storage unavailable ({strategy}): {key}: {source}")]
    StorageUnavailable {
        strategy: String,
        key: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// No handler registered for the operation while unhandled entries must fault.
    #[error("no handler registered for operation `{operation}`")]
    HandlerNotFound { operation: String },

    /// Broker connection or transport failure.
    #[error("broker unavailable: {context}: {source}")]
    BrokerUnavailable {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The stream or its consumer group is gone; provisioning it again recovers.
    #[error("NOGROUP no consumer group `{group}` on stream {key}")]
    GroupMissing { key: String, group: String },

    /// A second resolution was attempted on an already resolved ack.
    #[error("ack already resolved for entry {entry_id}")]
    AckRaceLost { entry_id: String },

    /// The handler did not resolve before the armed ack timeout.
    #[error("handler for entry {entry_id} exceeded {timeout:?}")]
    TimeoutExceeded { entry_id: String, timeout: Duration },

    /// A plan could not be built from the given routing or options.
    #[error("invalid plan: {message}")]
    InvalidPlan { message: String },

    /// A broker entry is not a well formed announcement envelope.
    #[error("invalid envelope: {message}")]
    InvalidEnvelope { message: String },

    /// No segmentation strategy accepted a call argument.
    #[error("argument `{argument}` of `{operation}` was not classified by any segmentation strategy")]
    Unsegmented { operation: String, argument: String },

    /// A user handler reported a failure.
    #[error("handler failed: {message}")]
    Handler {
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn storage_unavailable(
        strategy: impl Into<String>,
        key: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::StorageUnavailable {
            strategy: strategy.into(),
            key: key.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn handler_not_found(operation: impl Into<String>) -> Self {
        Self::HandlerNotFound {
            operation: operation.into(),
        }
    }

    #[must_use]
    pub fn broker_unavailable(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::BrokerUnavailable {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn group_missing(key: impl Into<String>, group: impl Into<String>) -> Self {
        Self::GroupMissing {
            key: key.into(),
            group: group.into(),
        }
    }

    #[must_use]
    pub fn invalid_plan(message: impl std::fmt::Display) -> Self {
        Self::InvalidPlan {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_envelope(message: impl std::fmt::Display) -> Self {
        Self::InvalidEnvelope {
            message: message.to_string(),
        }
    }

    /// Handler failure carrying only a message.
    #[must_use]
    pub fn handler(message: impl std::fmt::Display) -> Self {
        Self::Handler {
            message: message.to_string(),
            source: None,
        }
    }

    /// Handler failure wrapping the underlying error.
    #[must_use]
    pub fn handler_source(source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Handler {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether the receive loop should back off and retry instead of giving up.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BrokerUnavailable { .. } | Self::GroupMissing { .. })
    }

    /// Whether the consumer group has to be provisioned again.
    #[must_use]
    pub fn is_group_missing(&self) -> bool {
        matches!(self, Self::GroupMissing { .. })
    }
}

/// Plain message error used as a `source` when a backend has nothing richer.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct Reason(pub String);

impl Reason {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
