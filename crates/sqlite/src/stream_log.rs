use std::{
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    backbone_core::{EntryFields, Error, PendingEntry, Result, StreamEntry, StreamLog},
    sqlx::{
        Row, Sqlite, SqlitePool, Transaction,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    },
    tracing::{debug, trace, warn},
};

use crate::codec;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed [`StreamLog`].
///
/// Entry ids are `{created_at_ms}-{seq}` where `seq` is the row id, so they
/// increase across the whole database. Idle times are measured on the wall
/// clock and survive restarts.
pub struct SqliteStreamLog {
    pool: SqlitePool,
}

impl SqliteStreamLog {
    /// Connect to `url` (e.g. `sqlite://backbone.db`), creating the file if
    /// needed, and run migrations.
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::external(format!("invalid SQLite url `{url}`"), e))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        // Every connection to `:memory:` opens its own database.
        let in_memory = url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(if in_memory { None } else { Some(Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(Duration::from_secs(1800)) })
            .connect_with(options)
            .await
            .map_err(unavailable("failed to connect to SQLite"))?;
        crate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Use an existing pool. Migrations must already have run.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Write transaction that takes the lock up front, so a concurrent member
    /// waits out the busy timeout instead of failing the read-to-write upgrade.
    async fn begin_immediate(&self, op: &'static str) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(unavailable(op))
    }
}

fn unavailable(context: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::broker_unavailable(context, e)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn entry_id(created_at_ms: i64, seq: i64) -> String {
    format!("{created_at_ms}-{seq}")
}

fn parse_seq(id: &str) -> Option<i64> {
    id.rsplit_once('-').and_then(|(_, seq)| seq.parse().ok())
}

/// A row whose fields cannot be decoded is delivered with no fields, so the
/// consumer drops it as malformed instead of the group stalling on it.
fn to_entry(row: &SqliteRow, delivery_count: u32) -> StreamEntry {
    let seq: i64 = row.get("seq");
    let created_at_ms: i64 = row.get("created_at_ms");
    let raw: Vec<u8> = row.get("fields");
    let fields = codec::decode(&raw).unwrap_or_else(|e| {
        warn!(seq, error = %e, "undecodable entry fields");
        EntryFields::new()
    });
    StreamEntry {
        id: entry_id(created_at_ms, seq),
        fields,
        delivery_count,
    }
}

#[async_trait]
impl StreamLog for SqliteStreamLog {
    fn channel_type(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, key: &str, fields: EntryFields) -> Result<String> {
        let now = now_ms();
        let row = sqlx::query(
            "INSERT INTO backbone_entries (stream, created_at_ms, fields) VALUES (?, ?, ?) \
             RETURNING seq",
        )
        .bind(key)
        .bind(now)
        .bind(codec::encode(&fields))
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable("append"))?;
        let id = entry_id(now, row.get("seq"));
        trace!(stream = key, entry_id = %id, "entry appended");
        Ok(id)
    }

    async fn ensure_group(&self, key: &str, group: &str) -> Result<()> {
        let created = sqlx::query(
            "INSERT OR IGNORE INTO backbone_groups (stream, name, last_seq) VALUES (?, ?, 0)",
        )
        .bind(key)
        .bind(group)
        .execute(&self.pool)
        .await
        .map_err(unavailable("ensure_group"))?;
        if created.rows_affected() > 0 {
            debug!(stream = key, group, "consumer group created");
        }
        Ok(())
    }

    async fn read_group(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut tx = self.begin_immediate("read_group").await?;
        let last_seq: Option<i64> =
            sqlx::query_scalar("SELECT last_seq FROM backbone_groups WHERE stream = ? AND name = ?")
                .bind(key)
                .bind(group)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unavailable("read_group"))?;
        let Some(last_seq) = last_seq else {
            return Err(Error::group_missing(key, group));
        };

        let rows = sqlx::query(
            "SELECT seq, created_at_ms, fields FROM backbone_entries \
             WHERE stream = ? AND seq > ? ORDER BY seq LIMIT ?",
        )
        .bind(key)
        .bind(last_seq)
        .bind(count as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(unavailable("read_group"))?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let now = now_ms();
        let mut newest = last_seq;
        for row in &rows {
            let seq: i64 = row.get("seq");
            sqlx::query(
                "INSERT OR REPLACE INTO backbone_pending \
                 (stream, grp, seq, consumer, delivered_at_ms, delivery_count) \
                 VALUES (?, ?, ?, ?, ?, 1)",
            )
            .bind(key)
            .bind(group)
            .bind(seq)
            .bind(consumer)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(unavailable("read_group"))?;
            newest = newest.max(seq);
        }
        sqlx::query("UPDATE backbone_groups SET last_seq = ? WHERE stream = ? AND name = ?")
            .bind(newest)
            .bind(key)
            .bind(group)
            .execute(&mut *tx)
            .await
            .map_err(unavailable("read_group"))?;
        tx.commit().await.map_err(unavailable("read_group"))?;

        Ok(rows.iter().map(|row| to_entry(row, 1)).collect())
    }

    async fn claim(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let now = now_ms();
        let cutoff = now.saturating_sub(min_idle.as_millis() as i64);
        let mut tx = self.begin_immediate("claim").await?;
        let rows = sqlx::query(
            "SELECT p.seq, p.consumer, p.delivery_count, e.created_at_ms, e.fields \
             FROM backbone_pending p JOIN backbone_entries e ON e.seq = p.seq \
             WHERE p.stream = ? AND p.grp = ? AND p.delivered_at_ms <= ? \
             ORDER BY p.seq LIMIT ?",
        )
        .bind(key)
        .bind(group)
        .bind(cutoff)
        .bind(count as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(unavailable("claim"))?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let seq: i64 = row.get("seq");
            let previous: String = row.get("consumer");
            let delivery_count = row.get::<i64, _>("delivery_count") as u32 + 1;
            sqlx::query(
                "UPDATE backbone_pending SET consumer = ?, delivered_at_ms = ?, delivery_count = ? \
                 WHERE stream = ? AND grp = ? AND seq = ?",
            )
            .bind(consumer)
            .bind(now)
            .bind(i64::from(delivery_count))
            .bind(key)
            .bind(group)
            .bind(seq)
            .execute(&mut *tx)
            .await
            .map_err(unavailable("claim"))?;
            debug!(stream = key, group, from = %previous, to = consumer, "pending entry claimed");
            claimed.push(to_entry(row, delivery_count));
        }
        tx.commit().await.map_err(unavailable("claim"))?;
        Ok(claimed)
    }

    async fn ack(&self, key: &str, group: &str, ids: &[String]) -> Result<usize> {
        let mut acked = 0;
        for seq in ids.iter().filter_map(|id| parse_seq(id)) {
            let done = sqlx::query(
                "DELETE FROM backbone_pending WHERE stream = ? AND grp = ? AND seq = ?",
            )
            .bind(key)
            .bind(group)
            .bind(seq)
            .execute(&self.pool)
            .await
            .map_err(unavailable("ack"))?;
            acked += done.rows_affected() as usize;
        }
        Ok(acked)
    }

    async fn pending(&self, key: &str, group: &str) -> Result<Vec<PendingEntry>> {
        let rows = sqlx::query(
            "SELECT p.seq, p.consumer, p.delivered_at_ms, p.delivery_count, e.created_at_ms \
             FROM backbone_pending p JOIN backbone_entries e ON e.seq = p.seq \
             WHERE p.stream = ? AND p.grp = ? ORDER BY p.seq",
        )
        .bind(key)
        .bind(group)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable("pending"))?;

        let now = now_ms();
        Ok(rows
            .iter()
            .map(|row| {
                let delivered_at_ms: i64 = row.get("delivered_at_ms");
                PendingEntry {
                    id: entry_id(row.get("created_at_ms"), row.get("seq")),
                    consumer: row.get("consumer"),
                    idle: Duration::from_millis(now.saturating_sub(delivered_at_ms).max(0) as u64),
                    delivery_count: row.get::<i64, _>("delivery_count") as u32,
                }
            })
            .collect())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, bytes::Bytes};

    fn fields(n: u8) -> EntryFields {
        EntryFields::from([("s:n".to_string(), Bytes::from(vec![n]))])
    }

    async fn seeded(n: u8) -> SqliteStreamLog {
        let log = SqliteStreamLog::new("sqlite::memory:").await.unwrap();
        log.ensure_group("s", "g").await.unwrap();
        for i in 0..n {
            log.append("s", fields(i)).await.unwrap();
        }
        log
    }

    #[tokio::test]
    async fn group_reads_each_entry_once_in_order() {
        let log = seeded(3).await;
        let first = log.read_group("s", "g", "c1", 2).await.unwrap();
        let second = log.read_group("s", "g", "c2", 2).await.unwrap();
        assert!(log.read_group("s", "g", "c1", 2).await.unwrap().is_empty());

        let values: Vec<u8> = first
            .iter()
            .chain(&second)
            .map(|e| e.fields["s:n"][0])
            .collect();
        assert_eq!(values, vec![0, 1, 2]);
        assert!(first.iter().all(|e| e.delivery_count == 1));
        assert_eq!(log.pending("s", "g").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn streams_are_isolated() {
        let log = seeded(2).await;
        log.append("other", fields(9)).await.unwrap();
        log.ensure_group("other", "g").await.unwrap();
        let other = log.read_group("other", "g", "c", 10).await.unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].fields["s:n"][0], 9);
    }

    #[tokio::test]
    async fn late_group_starts_at_the_beginning() {
        let log = seeded(2).await;
        log.ensure_group("s", "late").await.unwrap();
        assert_eq!(log.read_group("s", "late", "c", 10).await.unwrap().len(), 2);
        log.ensure_group("s", "late").await.unwrap();
        assert!(log.read_group("s", "late", "c", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_group_is_transient() {
        let log = seeded(1).await;
        let err = log.read_group("s", "nope", "c", 1).await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.is_group_missing());
        assert!(err.to_string().contains("NOGROUP"));
    }

    #[tokio::test]
    async fn ack_clears_pending_once() {
        let log = seeded(1).await;
        let entries = log.read_group("s", "g", "c", 1).await.unwrap();
        let ids = vec![entries[0].id.clone(), "garbage".to_string()];
        assert_eq!(log.ack("s", "g", &ids).await.unwrap(), 1);
        assert_eq!(log.ack("s", "g", &ids).await.unwrap(), 0);
        assert!(log.pending("s", "g").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_moves_idle_entries_and_counts_deliveries() {
        let log = seeded(2).await;
        log.read_group("s", "g", "dead", 2).await.unwrap();

        // Nothing has been idle for an hour.
        assert!(
            log.claim("s", "g", "alive", Duration::from_secs(3600), 10)
                .await
                .unwrap()
                .is_empty()
        );

        let claimed = log.claim("s", "g", "alive", Duration::ZERO, 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].delivery_count, 2);
        assert_eq!(claimed[0].retries(), Some(1));

        let pending = log.pending("s", "g").await.unwrap();
        let moved = pending.iter().find(|p| p.id == claimed[0].id).unwrap();
        assert_eq!(moved.consumer, "alive");
        assert_eq!(moved.delivery_count, 2);
    }

    #[tokio::test]
    async fn positions_survive_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("log.db").display());

        let log = SqliteStreamLog::new(&url).await.unwrap();
        log.ensure_group("s", "g").await.unwrap();
        log.append("s", fields(0)).await.unwrap();
        log.append("s", fields(1)).await.unwrap();
        let first = log.read_group("s", "g", "c", 1).await.unwrap();
        log.ack("s", "g", &[first[0].id.clone()]).await.unwrap();
        log.pool().close().await;

        let reopened = SqliteStreamLog::new(&url).await.unwrap();
        let rest = reopened.read_group("s", "g", "c", 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].fields["s:n"][0], 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn members_on_separate_connections_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("log.db").display());
        let a = SqliteStreamLog::new(&url).await.unwrap();
        let b = SqliteStreamLog::new(&url).await.unwrap();
        a.ensure_group("s", "g").await.unwrap();
        for i in 0..40 {
            a.append("s", fields(i)).await.unwrap();
        }

        let drain = |log: SqliteStreamLog, consumer: &'static str| async move {
            let mut seen = Vec::new();
            loop {
                let batch = log.read_group("s", "g", consumer, 3).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                seen.extend(batch.into_iter().map(|e| e.id));
            }
            seen
        };
        let (from_a, from_b) = tokio::join!(
            tokio::spawn(drain(a, "c1")),
            tokio::spawn(drain(b, "c2"))
        );
        let mut all: Vec<String> = from_a.unwrap().into_iter().chain(from_b.unwrap()).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 40);
    }
}
