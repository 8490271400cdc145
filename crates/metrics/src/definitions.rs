//! Metric name and label definitions.
//!
//! Every metric the runtime records is named here, grouped by the part of the
//! pipeline that records it.

/// Producer send pipeline
pub mod producer {
    /// Announcements published to a broker
    pub const MESSAGES_SENT_TOTAL: &str = "backbone_producer_messages_sent_total";
    /// Sends that failed before or at the broker
    pub const SEND_ERRORS_TOTAL: &str = "backbone_producer_send_errors_total";
    /// Time from call to broker acceptance in seconds
    pub const SEND_DURATION_SECONDS: &str = "backbone_producer_send_duration_seconds";
    /// Segments produced per announcement
    pub const SEGMENTS_PER_MESSAGE: &str = "backbone_producer_segments_per_message";
}

/// Consumer receive loop and dispatch
pub mod consumer {
    /// Entries fetched from the broker (new and claimed)
    pub const MESSAGES_RECEIVED_TOTAL: &str = "backbone_consumer_messages_received_total";
    /// Handler invocations that returned Ok
    pub const HANDLED_TOTAL: &str = "backbone_consumer_handled_total";
    /// Handler invocations that returned an error
    pub const HANDLER_ERRORS_TOTAL: &str = "backbone_consumer_handler_errors_total";
    /// Handler execution time in seconds
    pub const HANDLER_DURATION_SECONDS: &str = "backbone_consumer_handler_duration_seconds";
    /// Entries whose operation had no handler
    pub const UNHANDLED_TOTAL: &str = "backbone_consumer_unhandled_total";
    /// Entries skipped because of their origin
    pub const FILTERED_TOTAL: &str = "backbone_consumer_filtered_total";
    /// Fetches that returned nothing
    pub const EMPTY_FETCHES_TOTAL: &str = "backbone_consumer_empty_fetches_total";
    /// Handlers currently running
    pub const IN_FLIGHT: &str = "backbone_consumer_in_flight";
    /// Entries per non-empty batch
    pub const BATCH_SIZE: &str = "backbone_consumer_batch_size";
}

/// Claim checks
pub mod claim {
    /// Claim checks performed
    pub const CHECKS_TOTAL: &str = "backbone_claim_checks_total";
    /// Entries taken over from idle consumers
    pub const CLAIMED_TOTAL: &str = "backbone_claim_claimed_total";
}

/// Acknowledgment outcomes
pub mod ack {
    /// Entries committed for their group
    pub const ACKED_TOTAL: &str = "backbone_ack_acked_total";
    /// Entries left pending by a negative ack
    pub const CANCELLED_TOTAL: &str = "backbone_ack_cancelled_total";
    /// Contexts resolved by their timer
    pub const TIMEOUTS_TOTAL: &str = "backbone_ack_timeouts_total";
    /// Resolution attempts on an already resolved context
    pub const RACE_LOST_TOTAL: &str = "backbone_ack_race_lost_total";
}

/// Storage strategy chain
pub mod storage {
    /// Buckets moved out of an envelope into storage
    pub const SAVES_TOTAL: &str = "backbone_storage_saves_total";
    /// Strategy loads performed
    pub const LOADS_TOTAL: &str = "backbone_storage_loads_total";
    /// Strategy save/load failures
    pub const ERRORS_TOTAL: &str = "backbone_storage_errors_total";
    /// Lookups retried under the legacy key format
    pub const LEGACY_FALLBACK_TOTAL: &str = "backbone_storage_legacy_fallback_total";
}

/// Broker calls
pub mod broker {
    /// Broker calls that failed
    pub const ERRORS_TOTAL: &str = "backbone_broker_errors_total";
    /// Current empty/error backoff delay in seconds
    pub const BACKOFF_SECONDS: &str = "backbone_broker_backoff_seconds";
}

/// Common label keys used across metrics
pub mod labels {
    pub const OPERATION: &str = "operation";
    pub const STRATEGY: &str = "strategy";
    pub const OP: &str = "op";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Handler and send duration buckets (in seconds)
    /// Covers 1ms to 60s
    pub static HANDLER_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ]
    });

    /// Batch and segment count buckets
    /// Covers 1 to 10000
    pub static BATCH_SIZE: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 10000.0,
        ]
    });
}
