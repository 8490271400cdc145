use std::sync::Arc;

use {
    backbone_config::BackboneConfig, backbone_core::StreamLog,
    backbone_inmemory::InMemoryStreamLog, backbone_sqlite::SqliteStreamLog, tracing::warn,
};

/// SQLite when `sqlite.url` is set, otherwise a process-local in-memory log.
pub async fn open(config: &BackboneConfig) -> anyhow::Result<Arc<dyn StreamLog>> {
    match config.sqlite.url.as_deref() {
        Some(url) => Ok(Arc::new(SqliteStreamLog::new(url).await?)),
        None => {
            warn!("no sqlite.url configured, entries live only as long as this process");
            Ok(Arc::new(InMemoryStreamLog::new()))
        },
    }
}
