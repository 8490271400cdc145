//! Metrics for the backbone channel runtime.
//!
//! Metric names live in [`definitions`] so every crate records under the same
//! names. Recording goes through the `metrics` facade; nothing is exported
//! unless [`init_metrics`] installs a recorder (Prometheus behind the
//! `prometheus` feature).
//!
//! ```rust,ignore
//! use backbone_metrics::{counter, consumer};
//!
//! counter!(consumer::MESSAGES_RECEIVED_TOTAL, "operation" => "OrderPlaced").increment(1);
//! ```

pub mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
