//! Hash-style storage strategy: one map entry per bucket, keyed by the
//! primary storage key.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    async_trait::async_trait,
    backbone_core::{
        Bucket, Error, EventBucketCategories, Locators, Metadata, Reason, Result,
        StorageStrategy, fetch_with_legacy_fallback, storage_key,
    },
    tracing::trace,
};

/// Stores whole buckets in memory. The envelope only keeps a locator
/// `hash:{category}` pointing at the stored key.
pub struct InMemoryHashStorage {
    name: String,
    data: Mutex<HashMap<String, Bucket>>,
    unavailable: AtomicBool,
}

impl Default for InMemoryHashStorage {
    fn default() -> Self {
        Self::new("hash")
    }
}

impl InMemoryHashStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Store a bucket under an arbitrary key, e.g. one written with the
    /// legacy `{category}~{messageId}` scheme.
    pub fn insert_raw(&self, key: impl Into<String>, bucket: Bucket) {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.insert(key.into(), bucket);
    }

    pub fn get_raw(&self, key: &str) -> Option<Bucket> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.get(key).cloned()
    }

    /// Number of stored buckets.
    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulate an outage: every save and load fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn locator_key(&self, category: EventBucketCategories) -> String {
        format!("{}:{category}", self.name)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::external(
                format!("{} storage", self.name),
                Reason::new("connection refused"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageStrategy for InMemoryHashStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save_bucket(
        &self,
        bucket: &Bucket,
        category: EventBucketCategories,
        metadata: &Metadata,
    ) -> Result<Locators> {
        self.check_available()?;
        let key = storage_key(metadata, category);
        trace!(strategy = %self.name, key = %key, keys = bucket.len(), "bucket stored");
        self.insert_raw(key.clone(), bucket.clone());
        Ok(Locators::from([(self.locator_key(category), key)]))
    }

    async fn load_bucket(
        &self,
        metadata: &Metadata,
        prev: Bucket,
        category: EventBucketCategories,
        locators: &Locators,
    ) -> Result<Bucket> {
        let Some(key) = locators.get(&self.locator_key(category)) else {
            return Ok(prev);
        };
        let stored = fetch_with_legacy_fallback(
            &self.name,
            metadata,
            category,
            key.clone(),
            |k| async move {
                self.check_available()?;
                Ok(self.get_raw(&k))
            },
        )
        .await?;
        Ok(prev.merge(&stored))
    }
}
