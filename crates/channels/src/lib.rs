//! Channel runtime of backbone.
//!
//! [`producer::ProducerPipeline`] turns calls into announcements and
//! publishes them through a [`ChannelProvider`](backbone_core::ChannelProvider).
//! [`StreamChannel`] is the provider over a [`StreamLog`](backbone_core::StreamLog):
//! it appends entries and runs the consumer receive loop (fetch, claim check,
//! backoff, dispatch, ack).

pub mod consumer;
pub mod producer;
mod stream_channel;

pub use {
    consumer::{ConsumerInterceptor, HandlerRegistry, Subscription},
    producer::{Call, ProducerPipeline},
    stream_channel::StreamChannel,
};
