//! Channel provider and handler contracts.

use std::{future::Future, sync::Arc};

use {async_trait::async_trait, tokio_util::sync::CancellationToken};

use crate::{Announcement, ConsumerContext, ConsumerPlan, ProducerPlan, Result, envelope::Envelope};

/// Broker client seen by producers and consumers.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Transport name recorded in announcement metadata.
    fn channel_type(&self) -> &str;

    /// Publish an envelope, returning the broker-assigned entry id.
    async fn send(&self, plan: &ProducerPlan, envelope: &Envelope) -> Result<String>;

    /// Run the receive loop for `plan` until `cancel` fires.
    async fn subscribe(
        &self,
        plan: &ConsumerPlan,
        bridge: Arc<dyn ConsumerBridge>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// A typed consumer's entry point for one announcement.
///
/// Handlers may be cancelled through `ctx.cancellation()` after partial side
/// effects (racing consumers, ack timeout), so they must tolerate that.
#[async_trait]
pub trait AnnouncementHandler: Send + Sync {
    async fn handle(&self, announcement: Arc<Announcement>, ctx: ConsumerContext) -> Result<()>;
}

/// Maps an operation name to the handlers that process it.
pub trait ConsumerBridge: Send + Sync {
    fn resolve(&self, operation: &str) -> Vec<Arc<dyn AnnouncementHandler>>;
}

/// Adapter turning an async closure into an [`AnnouncementHandler`].
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F, Fut> AnnouncementHandler for HandlerFn<F>
where
    F: Fn(Arc<Announcement>, ConsumerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, announcement: Arc<Announcement>, ctx: ConsumerContext) -> Result<()> {
        (self.0)(announcement, ctx).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn AnnouncementHandler>
where
    F: Fn(Arc<Announcement>, ConsumerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}
