//! Pluggable payload storage and the chain that runs it.
//!
//! Strategies run in registration order. On save, each strategy is offered the
//! keys of a category that match its filter and that no earlier strategy took;
//! a non-empty locator map means it took them, and they leave the inline
//! envelope. On load, the inline bucket comes first and every participating
//! strategy merges what it resolves with first-write-wins.

use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};

use {
    async_trait::async_trait,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use backbone_metrics::{counter, labels, storage as storage_metrics};

use crate::{
    Announcement, Bucket, Error, EventBucketCategories, Metadata, Result, envelope::Envelope,
    error::Reason,
};

/// Side-channel locator entries attached to an envelope by storage strategies.
pub type Locators = BTreeMap<String, String>;

/// Key predicate deciding whether a strategy participates for a bucket key.
pub type KeyFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Primary storage key: `{routingKey}:{category}:{messageId}`.
pub fn storage_key(metadata: &Metadata, category: EventBucketCategories) -> String {
    format!("{}:{}:{}", metadata.key(), category, metadata.message_id)
}

/// Key format written before routing keys were part of storage keys:
/// `{category}~{messageId}`. Only read, never written.
pub fn legacy_storage_key(metadata: &Metadata, category: EventBucketCategories) -> String {
    format!("{category}~{}", metadata.message_id)
}

/// Look a stored value up under the primary key, then once under the legacy key.
///
/// This is a compatibility shim for stores that may still hold data written
/// with the old key scheme, not a retry policy. Missing under both keys (or a
/// failure on both attempts) is reported as `StorageUnavailable`.
pub async fn fetch_with_legacy_fallback<T, F, Fut>(
    strategy: &str,
    metadata: &Metadata,
    category: EventBucketCategories,
    primary: String,
    fetch: F,
) -> Result<T>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let primary_err = match fetch(primary.clone()).await {
        Ok(Some(value)) => return Ok(value),
        Ok(None) => None,
        Err(e) => Some(e),
    };

    let legacy = legacy_storage_key(metadata, category);
    debug!(strategy, primary = %primary, legacy = %legacy, "primary storage key missed, trying legacy key");
    #[cfg(feature = "metrics")]
    counter!(storage_metrics::LEGACY_FALLBACK_TOTAL).increment(1);

    match fetch(legacy).await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(match primary_err {
            Some(e) => wrap_storage_error(strategy, &primary, e),
            None => Error::storage_unavailable(
                strategy,
                primary,
                Reason::new("not found under primary or legacy key"),
            ),
        }),
        Err(e) => Err(wrap_storage_error(strategy, &primary, e)),
    }
}

fn wrap_storage_error(strategy: &str, key: &str, err: Error) -> Error {
    match err {
        Error::StorageUnavailable { .. } => err,
        other => Error::storage_unavailable(strategy, key, other),
    }
}

/// Persistence backend for bucket contents.
#[async_trait]
pub trait StorageStrategy: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Persist `bucket` and return the locators that replace it in the
    /// envelope. An empty map declines: the data stays inline.
    async fn save_bucket(
        &self,
        bucket: &Bucket,
        category: EventBucketCategories,
        metadata: &Metadata,
    ) -> Result<Locators>;

    /// Resolve this strategy's locators back into data, merged into `prev`
    /// without overwriting keys already present.
    async fn load_bucket(
        &self,
        metadata: &Metadata,
        prev: Bucket,
        category: EventBucketCategories,
        locators: &Locators,
    ) -> Result<Bucket>;
}

/// Strategy that never takes anything: every key stays inline.
#[derive(Debug, Default, Clone, Copy)]
pub struct VoidStorage;

#[async_trait]
impl StorageStrategy for VoidStorage {
    fn name(&self) -> &str {
        "void"
    }

    async fn save_bucket(
        &self,
        _bucket: &Bucket,
        _category: EventBucketCategories,
        _metadata: &Metadata,
    ) -> Result<Locators> {
        Ok(Locators::new())
    }

    async fn load_bucket(
        &self,
        _metadata: &Metadata,
        prev: Bucket,
        _category: EventBucketCategories,
        _locators: &Locators,
    ) -> Result<Bucket> {
        Ok(prev)
    }
}

struct Registration {
    strategy: Arc<dyn StorageStrategy>,
    categories: EventBucketCategories,
    filter: Option<KeyFilter>,
}

impl Registration {
    fn accepts(&self, key: &str) -> bool {
        self.filter.as_ref().is_none_or(|f| f(key))
    }
}

/// Ordered list of storage strategies.
#[derive(Default, Clone)]
pub struct StorageStrategyChain {
    registrations: Vec<Arc<Registration>>,
}

impl fmt::Debug for StorageStrategyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.registrations
                    .iter()
                    .map(|r| (r.strategy.name().to_string(), r.categories)),
            )
            .finish()
    }
}

impl StorageStrategyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy responsible for `categories`, for every key.
    #[must_use]
    pub fn with(self, strategy: Arc<dyn StorageStrategy>, categories: EventBucketCategories) -> Self {
        self.push(strategy, categories, None)
    }

    /// Append a strategy responsible for `categories`, for keys matching `filter`.
    #[must_use]
    pub fn with_filter(
        self,
        strategy: Arc<dyn StorageStrategy>,
        categories: EventBucketCategories,
        filter: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.push(strategy, categories, Some(Arc::new(filter)))
    }

    fn push(
        mut self,
        strategy: Arc<dyn StorageStrategy>,
        categories: EventBucketCategories,
        filter: Option<KeyFilter>,
    ) -> Self {
        self.registrations.push(Arc::new(Registration {
            strategy,
            categories,
            filter,
        }));
        self
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Producer side: persist what the strategies take and build the envelope.
    /// Any strategy failure aborts; nothing is published.
    pub async fn save(&self, announcement: &Announcement) -> Result<Envelope> {
        let metadata = &announcement.metadata;
        let mut envelope = Envelope {
            metadata: metadata.clone(),
            segments: Bucket::new(),
            interceptions: Bucket::new(),
            locators: Locators::new(),
        };

        for category in EventBucketCategories::EACH {
            let mut remaining = announcement.bucket(category).clone();
            for reg in &self.registrations {
                if !reg.categories.contains(category) || remaining.is_empty() {
                    continue;
                }
                let candidate = remaining.filter(|k| reg.accepts(k));
                if candidate.is_empty() {
                    continue;
                }
                let name = reg.strategy.name();
                let locators = reg
                    .strategy
                    .save_bucket(&candidate, category, metadata)
                    .await
                    .map_err(|e| {
                        warn!(strategy = name, %category, error = %e, "storage save failed");
                        #[cfg(feature = "metrics")]
                        counter!(
                            storage_metrics::ERRORS_TOTAL,
                            labels::OP => "save",
                            labels::STRATEGY => name.to_string()
                        )
                        .increment(1);
                        wrap_storage_error(name, &storage_key(metadata, category), e)
                    })?;
                if locators.is_empty() {
                    continue;
                }
                debug!(
                    strategy = name,
                    %category,
                    keys = candidate.len(),
                    "bucket keys moved to storage"
                );
                #[cfg(feature = "metrics")]
                counter!(storage_metrics::SAVES_TOTAL).increment(1);
                remaining = remaining.without(candidate.keys());
                for (k, v) in locators {
                    envelope.locators.entry(k).or_insert(v);
                }
            }
            *envelope.bucket_mut(category) = remaining;
        }

        Ok(envelope)
    }

    /// Consumer side: resolve locators and merge with the inline data.
    pub async fn load(&self, envelope: Envelope) -> Result<Announcement> {
        let Envelope {
            metadata,
            segments,
            interceptions,
            locators,
        } = envelope;

        let mut resolved = [segments, interceptions];
        for (slot, category) in resolved.iter_mut().zip(EventBucketCategories::EACH) {
            for reg in &self.registrations {
                if !reg.categories.contains(category) {
                    continue;
                }
                let name = reg.strategy.name();
                let prev = std::mem::take(slot);
                *slot = reg
                    .strategy
                    .load_bucket(&metadata, prev, category, &locators)
                    .await
                    .map_err(|e| {
                        warn!(strategy = name, %category, error = %e, "storage load failed");
                        #[cfg(feature = "metrics")]
                        counter!(
                            storage_metrics::ERRORS_TOTAL,
                            labels::OP => "load",
                            labels::STRATEGY => name.to_string()
                        )
                        .increment(1);
                        wrap_storage_error(name, &storage_key(&metadata, category), e)
                    })?;
                #[cfg(feature = "metrics")]
                counter!(storage_metrics::LOADS_TOTAL).increment(1);
            }
        }

        let [segments, interceptions] = resolved;
        Ok(Announcement::new(metadata, segments).with_interceptions(interceptions))
    }
}
