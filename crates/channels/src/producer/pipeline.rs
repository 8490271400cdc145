//! Producer send pipeline: segment, intercept, store, send.

use std::sync::Arc;

use tracing::{Instrument, debug, warn};

#[cfg(feature = "metrics")]
use backbone_metrics::{counter, histogram, labels, producer as producer_metrics};

use backbone_core::{
    Announcement, Bucket, ChannelProvider, Error, Metadata, Origin, ProducerPlan, Result,
    StorageStrategyChain, TelemetryLevel, segment_key,
};

use super::{
    interceptor::ProducerInterceptor,
    segmentation::{BytesSegmentation, Call, JsonSegmentation, SegmentationStrategy},
};

/// Publishes calls to one route.
///
/// Holds no per-call state, so one pipeline can be shared across tasks and
/// concurrent sends only contend inside the provider.
pub struct ProducerPipeline {
    plan: ProducerPlan,
    provider: Arc<dyn ChannelProvider>,
    segmentation: Vec<Arc<dyn SegmentationStrategy>>,
    interceptors: Vec<Arc<dyn ProducerInterceptor>>,
    storage: StorageStrategyChain,
}

impl ProducerPipeline {
    /// Pipeline with bytes and JSON segmentation, no interceptors and no
    /// external storage.
    pub fn new(plan: ProducerPlan, provider: Arc<dyn ChannelProvider>) -> Self {
        Self {
            plan,
            provider,
            segmentation: vec![Arc::new(BytesSegmentation), Arc::new(JsonSegmentation)],
            interceptors: Vec::new(),
            storage: StorageStrategyChain::new(),
        }
    }

    /// Replace the segmentation strategies; they run in the given order.
    #[must_use]
    pub fn with_segmentation(mut self, strategies: Vec<Arc<dyn SegmentationStrategy>>) -> Self {
        self.segmentation = strategies;
        self
    }

    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn ProducerInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    #[must_use]
    pub fn with_storage(mut self, storage: StorageStrategyChain) -> Self {
        self.storage = storage;
        self
    }

    pub fn plan(&self) -> &ProducerPlan {
        &self.plan
    }

    /// Publish `call`, returning the broker entry id.
    ///
    /// Fails without publishing if an argument is not classified, an
    /// interceptor fails or a storage strategy cannot save.
    pub async fn send(&self, call: Call) -> Result<String> {
        let span = self.plan.span().clone();
        async move {
            let metadata = Metadata::new(self.plan.route().clone(), call.operation.clone())
                .with_channel_type(self.provider.channel_type());
            let segments = self.segment(&call)?;
            let interceptions = self.intercept(&metadata, &segments).await?;
            let announcement = Announcement::new(metadata, segments).with_interceptions(interceptions);
            self.publish(&announcement).await
        }
        .instrument(span)
        .await
    }

    /// Republish a received announcement to this pipeline's route as a copy.
    ///
    /// Operation, message id and payload are kept; the storage save phase
    /// runs again for the new route.
    pub async fn forward(&self, announcement: &Announcement) -> Result<String> {
        let span = self.plan.span().clone();
        async move {
            let mut metadata = announcement.metadata.clone();
            metadata.route = self.plan.route().clone();
            metadata.retries = None;
            let metadata = metadata
                .with_origin(Origin::Copy)
                .with_channel_type(self.provider.channel_type());
            debug!(
                operation = %metadata.operation,
                message_id = %metadata.message_id,
                from = %announcement.metadata.route,
                "forwarding announcement"
            );
            let copy = Announcement::new(metadata, announcement.segments.clone())
                .with_interceptions(announcement.interceptions.clone());
            self.publish(&copy).await
        }
        .instrument(span)
        .await
    }

    fn segment(&self, call: &Call) -> Result<Bucket> {
        let mut bucket = Bucket::new();
        for argument in &call.arguments {
            let mut classified = None;
            for strategy in &self.segmentation {
                if let Some(raw) = strategy.classify(&call.operation, argument)? {
                    classified = Some(raw);
                    break;
                }
            }
            let raw = classified.ok_or_else(|| Error::Unsegmented {
                operation: call.operation.clone(),
                argument: argument.name.clone(),
            })?;
            bucket = bucket.try_add(segment_key(&call.operation, &argument.name), raw);
        }
        Ok(bucket)
    }

    async fn intercept(&self, metadata: &Metadata, segments: &Bucket) -> Result<Bucket> {
        let mut interceptions = Bucket::new();
        for interceptor in &self.interceptors {
            let added = interceptor.intercept(metadata, segments).await.map_err(|e| {
                warn!(interceptor = interceptor.name(), error = %e, "producer interceptor failed");
                e
            })?;
            interceptions = interceptions.merge(&added);
        }
        Ok(interceptions)
    }

    async fn publish(&self, announcement: &Announcement) -> Result<String> {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let result = async {
            let envelope = self.storage.save(announcement).await?;
            self.provider.send(&self.plan, &envelope).await
        }
        .await;

        let metadata = &announcement.metadata;
        match &result {
            Ok(entry_id) => {
                if self.plan.options().telemetry >= TelemetryLevel::Verbose {
                    debug!(
                        operation = %metadata.operation,
                        message_id = %metadata.message_id,
                        entry_id = %entry_id,
                        segments = announcement.segments.len(),
                        interceptions = announcement.interceptions.len(),
                        "announcement sent"
                    );
                }
                #[cfg(feature = "metrics")]
                {
                    counter!(producer_metrics::MESSAGES_SENT_TOTAL, labels::OPERATION => metadata.operation.clone())
                        .increment(1);
                    histogram!(producer_metrics::SEND_DURATION_SECONDS)
                        .record(started.elapsed().as_secs_f64());
                    histogram!(producer_metrics::SEGMENTS_PER_MESSAGE)
                        .record(announcement.segments.len() as f64);
                }
            },
            Err(e) => {
                if self.plan.options().telemetry > TelemetryLevel::None {
                    warn!(
                        operation = %metadata.operation,
                        message_id = %metadata.message_id,
                        error = %e,
                        "send failed"
                    );
                }
                #[cfg(feature = "metrics")]
                counter!(producer_metrics::SEND_ERRORS_TOTAL, labels::OPERATION => metadata.operation.clone())
                    .increment(1);
            },
        }
        result
    }
}
