use async_trait::async_trait;

use backbone_core::{Bucket, Metadata, Result};

/// Sees the interceptions bucket of every entry before it is dispatched,
/// e.g. to restore baggage written by a producer interceptor.
///
/// A failing interceptor is logged and does not hold up dispatch.
#[async_trait]
pub trait ConsumerInterceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn on_received(&self, metadata: &Metadata, interceptions: &Bucket) -> Result<()>;
}
