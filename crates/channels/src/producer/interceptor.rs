//! Producer interceptors: extra key/value pairs carried next to the payload.

use async_trait::async_trait;

use backbone_core::{Bucket, Metadata, Result};

/// Adds entries to the interceptions bucket of an outgoing announcement.
///
/// Interceptors see the classified segments but cannot change them. When two
/// interceptors produce the same key, the one registered first wins.
#[async_trait]
pub trait ProducerInterceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn intercept(&self, metadata: &Metadata, segments: &Bucket) -> Result<Bucket>;
}

/// Adds a fixed set of pairs to every announcement.
#[derive(Debug, Clone, Default)]
pub struct StaticInterceptor {
    pairs: Bucket,
}

impl StaticInterceptor {
    pub fn new(pairs: Bucket) -> Self {
        Self { pairs }
    }
}

#[async_trait]
impl ProducerInterceptor for StaticInterceptor {
    fn name(&self) -> &str {
        "static"
    }

    async fn intercept(&self, _metadata: &Metadata, _segments: &Bucket) -> Result<Bucket> {
        Ok(self.pairs.clone())
    }
}

/// Stamps the producing host under `produced-by`.
#[derive(Debug, Clone)]
pub struct HostInterceptor {
    host: String,
}

impl HostInterceptor {
    pub const KEY: &'static str = "produced-by";

    pub fn new() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self { host }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Default for HostInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProducerInterceptor for HostInterceptor {
    fn name(&self) -> &str {
        "host"
    }

    async fn intercept(&self, _metadata: &Metadata, _segments: &Bucket) -> Result<Bucket> {
        Ok(Bucket::new().try_add(Self::KEY, self.host.clone()))
    }
}
