//! Consumer side: the receive loop, handler dispatch and the handler registry.

pub(crate) mod dispatch;
mod interceptor;
pub(crate) mod receive_loop;
mod registry;

use std::sync::Arc;

use {
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::error,
};

use backbone_core::{ChannelProvider, ConsumerBridge, ConsumerPlan, Error, Result};

pub use {interceptor::ConsumerInterceptor, registry::HandlerRegistry};

/// A subscription running on its own task.
pub struct Subscription {
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl Subscription {
    /// Start `provider.subscribe` for `plan` in the background.
    pub fn spawn(
        provider: Arc<dyn ChannelProvider>,
        plan: ConsumerPlan,
        bridge: Arc<dyn ConsumerBridge>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = provider.subscribe(&plan, bridge, token).await;
            if let Err(e) = &result {
                error!(stream = %plan.key(), error = %e, "subscription ended with an error");
            }
            result
        });
        Self { cancel, handle }
    }

    /// Token that stops the subscription when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait for the loop to exit. Entries whose handlers were
    /// abandoned stay pending for claim-based recovery.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.handle
            .await
            .map_err(|e| Error::external("subscription task", e))?
    }
}
