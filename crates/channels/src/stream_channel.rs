//! [`ChannelProvider`] over any [`StreamLog`].

use std::sync::Arc;

use {
    async_trait::async_trait,
    tokio_util::sync::CancellationToken,
    tracing::{Instrument, trace, warn},
};

#[cfg(feature = "metrics")]
use backbone_metrics::{broker as broker_metrics, counter, labels};

use backbone_core::{
    ChannelProvider, ConsumerBridge, ConsumerPlan, Envelope, ProducerPlan, Result,
    StorageStrategyChain, StreamLog,
};

use crate::consumer::{ConsumerInterceptor, dispatch::Dispatcher, receive_loop};

/// Sends envelopes as stream entries and runs receive loops over a log.
///
/// The storage chain given here is the consumer-side one: it must list the
/// same strategies the producers saved with.
#[derive(Clone)]
pub struct StreamChannel {
    log: Arc<dyn StreamLog>,
    storage: StorageStrategyChain,
    interceptors: Vec<Arc<dyn ConsumerInterceptor>>,
}

impl StreamChannel {
    pub fn new(log: Arc<dyn StreamLog>) -> Self {
        Self {
            log,
            storage: StorageStrategyChain::new(),
            interceptors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_storage(mut self, storage: StorageStrategyChain) -> Self {
        self.storage = storage;
        self
    }

    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn ConsumerInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn log(&self) -> &Arc<dyn StreamLog> {
        &self.log
    }
}

#[async_trait]
impl ChannelProvider for StreamChannel {
    fn channel_type(&self) -> &str {
        self.log.channel_type()
    }

    async fn send(&self, plan: &ProducerPlan, envelope: &Envelope) -> Result<String> {
        let fields = envelope.encode()?;
        let key = plan.key();
        match self.log.append(&key, fields).await {
            Ok(id) => {
                trace!(stream = %key, entry_id = %id, "entry appended");
                Ok(id)
            },
            Err(e) => {
                warn!(stream = %key, error = %e, "append failed");
                #[cfg(feature = "metrics")]
                counter!(broker_metrics::ERRORS_TOTAL, labels::OP => "append").increment(1);
                Err(e)
            },
        }
    }

    async fn subscribe(
        &self,
        plan: &ConsumerPlan,
        bridge: Arc<dyn ConsumerBridge>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let dispatcher = Dispatcher {
            log: Arc::clone(&self.log),
            storage: self.storage.clone(),
            bridge,
            interceptors: self.interceptors.clone(),
            key: plan.key(),
            group: plan.group().to_string(),
            consumer: plan.consumer_name().to_string(),
            options: plan.options().clone(),
        };
        receive_loop::run(&dispatcher, &cancel)
            .instrument(plan.span().clone())
            .await
    }
}
