//! Durable [`StreamLog`](backbone_core::StreamLog) on SQLite.
//!
//! Entries, consumer groups and pending lists live in three tables, so a
//! restarted process picks up its group positions and pending entries where
//! it left off.

mod codec;
mod stream_log;

pub use stream_log::SqliteStreamLog;

/// Run database migrations for the stream log.
///
/// Creates the `backbone_entries`, `backbone_groups` and `backbone_pending`
/// tables. [`SqliteStreamLog::new`] calls this itself; call it before
/// [`SqliteStreamLog::with_pool`] when sharing a pool.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> backbone_core::Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await
        .map_err(|e| backbone_core::Error::external("stream log migrations", e))?;
    Ok(())
}
