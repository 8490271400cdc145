//! Consumer-group stream log held in process memory.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    backbone_core::{EntryFields, Error, PendingEntry, Reason, Result, StreamEntry, StreamLog},
    tokio::time::Instant,
    tracing::{debug, trace},
};

struct Delivery {
    consumer: String,
    delivered_at: Instant,
    count: u32,
}

#[derive(Default)]
struct Group {
    /// Index of the first entry never delivered to this group.
    cursor: usize,
    /// Delivered but unacknowledged entries, by entry index.
    pending: BTreeMap<usize, Delivery>,
}

#[derive(Default)]
struct Stream {
    entries: Vec<(String, EntryFields)>,
    index: HashMap<String, usize>,
    groups: HashMap<String, Group>,
}

impl Stream {
    fn entry(&self, idx: usize, count: u32) -> StreamEntry {
        let (id, fields) = &self.entries[idx];
        StreamEntry {
            id: id.clone(),
            fields: fields.clone(),
            delivery_count: count,
        }
    }
}

#[derive(Default)]
struct State {
    streams: HashMap<String, Stream>,
    last_ms: u64,
    seq: u64,
}

impl State {
    /// `{millis}-{seq}`, strictly increasing even if the wall clock is not.
    fn next_id(&mut self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        if now > self.last_ms {
            self.last_ms = now;
            self.seq = 0;
        } else {
            self.seq += 1;
        }
        format!("{}-{}", self.last_ms, self.seq)
    }
}

/// In-memory [`StreamLog`]. No persistence: for tests and local runs.
///
/// Idle times follow the tokio clock, so claim behavior can be driven with a
/// paused runtime.
#[derive(Default)]
pub struct InMemoryStreamLog {
    state: Mutex<State>,
    failures: AtomicUsize,
}

impl InMemoryStreamLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` reads or claims fail as if the broker were down.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Drop a stream with its entries and consumer groups, as when the broker
    /// key is deleted.
    pub fn delete_stream(&self, key: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.streams.remove(key).is_some() {
            debug!(stream = key, "stream deleted");
        }
    }

    /// Number of entries ever appended to `key`.
    pub fn len(&self, key: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.streams.get(key).map_or(0, |s| s.entries.len())
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }

    fn injected_failure(&self, op: &str) -> Result<()> {
        let taken = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if taken.is_ok() {
            return Err(Error::broker_unavailable(op, Reason::new("connection refused")));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamLog for InMemoryStreamLog {
    fn channel_type(&self) -> &str {
        "memory"
    }

    async fn append(&self, key: &str, fields: EntryFields) -> Result<String> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state.next_id();
        let stream = state.streams.entry(key.to_string()).or_default();
        stream.index.insert(id.clone(), stream.entries.len());
        stream.entries.push((id.clone(), fields));
        trace!(stream = key, entry_id = %id, "entry appended");
        Ok(id)
    }

    async fn ensure_group(&self, key: &str, group: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let stream = state.streams.entry(key.to_string()).or_default();
        if !stream.groups.contains_key(group) {
            debug!(stream = key, group, "consumer group created");
            stream.groups.insert(group.to_string(), Group::default());
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
        self.injected_failure("read_group")?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let stream = state
            .streams
            .get_mut(key)
            .ok_or_else(|| Error::group_missing(key, group))?;
        let total = stream.entries.len();
        let grp = stream
            .groups
            .get_mut(group)
            .ok_or_else(|| Error::group_missing(key, group))?;

        let start = grp.cursor;
        let end = total.min(start.saturating_add(count));
        let now = Instant::now();
        for idx in start..end {
            grp.pending.insert(idx, Delivery {
                consumer: consumer.to_string(),
                delivered_at: now,
                count: 1,
            });
        }
        grp.cursor = end;
        Ok((start..end).map(|idx| stream.entry(idx, 1)).collect())
    }

    async fn claim(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        self.injected_failure("claim")?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(stream) = state.streams.get_mut(key) else {
            return Ok(Vec::new());
        };
        let Some(grp) = stream.groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let mut claimed = Vec::new();
        for (&idx, delivery) in grp.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if now.duration_since(delivery.delivered_at) < min_idle {
                continue;
            }
            debug!(
                stream = key,
                group,
                from = %delivery.consumer,
                to = consumer,
                "pending entry claimed"
            );
            delivery.consumer = consumer.to_string();
            delivery.delivered_at = now;
            delivery.count += 1;
            claimed.push((idx, delivery.count));
        }
        Ok(claimed
            .into_iter()
            .map(|(idx, n)| stream.entry(idx, n))
            .collect())
    }

    async fn ack(&self, key: &str, group: &str, ids: &[String]) -> Result<usize> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(stream) = state.streams.get_mut(key) else {
            return Ok(0);
        };
        let Some(grp) = stream.groups.get_mut(group) else {
            return Ok(0);
        };
        let acked = ids
            .iter()
            .filter_map(|id| stream.index.get(id))
            .filter(|idx| grp.pending.remove(idx).is_some())
            .count();
        Ok(acked)
    }

    async fn pending(&self, key: &str, group: &str) -> Result<Vec<PendingEntry>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(stream) = state.streams.get(key) else {
            return Ok(Vec::new());
        };
        let Some(grp) = stream.groups.get(group) else {
            return Ok(Vec::new());
        };
        let now = Instant::now();
        Ok(grp
            .pending
            .iter()
            .map(|(&idx, d)| PendingEntry {
                id: stream.entries[idx].0.clone(),
                consumer: d.consumer.clone(),
                idle: now.duration_since(d.delivered_at),
                delivery_count: d.count,
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

    async fn seeded(n: u8) -> InMemoryStreamLog {
        let log = InMemoryStreamLog::new();
        log.ensure_group("s", "g").await.unwrap();
        for i in 0..n {
            log.append("s", fields(i)).await.unwrap();
        }
        log
    }

    #[tokio::test]
    async fn ids_increase() {
        let log = InMemoryStreamLog::new();
        let a = log.append("s", fields(0)).await.unwrap();
        let b = log.append("s", fields(1)).await.unwrap();
        assert_ne!(a, b);
        let parse = |id: &str| {
            let (ms, seq) = id.split_once('-').unwrap();
            (ms.parse::<u64>().unwrap(), seq.parse::<u64>().unwrap())
        };
        assert!(parse(&a) < parse(&b));
    }

    #[tokio::test]
    async fn group_reads_each_entry_once() {
        let log = seeded(3).await;
        let first = log.read_group("s", "g", "c1", 2).await.unwrap();
        let second = log.read_group("s", "g", "c2", 2).await.unwrap();
        let third = log.read_group("s", "g", "c1", 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert!(third.is_empty());
        assert_eq!(log.pending("s", "g").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn groups_see_entries_written_before_they_existed() {
        let log = seeded(2).await;
        log.ensure_group("s", "late").await.unwrap();
        assert_eq!(log.read_group("s", "late", "c", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn ensure_group_keeps_position() {
        let log = seeded(2).await;
        log.read_group("s", "g", "c", 10).await.unwrap();
        log.ensure_group("s", "g").await.unwrap();
        assert!(log.read_group("s", "g", "c", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleted_stream_reports_missing_group_until_provisioned() {
        let log = seeded(2).await;
        log.delete_stream("s");
        let err = log.read_group("s", "g", "c", 10).await.unwrap_err();
        assert!(err.is_group_missing());
        assert!(err.is_transient());

        log.ensure_group("s", "g").await.unwrap();
        log.append("s", fields(9)).await.unwrap();
        let entries = log.read_group("s", "g", "c", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].fields["s:n"][0], 9);
    }

    #[tokio::test]
    async fn ack_clears_pending_once() {
        let log = seeded(1).await;
        let entries = log.read_group("s", "g", "c", 1).await.unwrap();
        let ids = vec![entries[0].id.clone()];
        assert_eq!(log.ack("s", "g", &ids).await.unwrap(), 1);
        assert_eq!(log.ack("s", "g", &ids).await.unwrap(), 0);
        assert!(log.pending("s", "g").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn claim_moves_idle_entries_and_counts_deliveries() {
        let log = seeded(2).await;
        log.read_group("s", "g", "dead", 2).await.unwrap();

        let early = log
            .claim("s", "g", "alive", Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(early.is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        let claimed = log
            .claim("s", "g", "alive", Duration::from_secs(60), 1)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].delivery_count, 2);
        assert_eq!(claimed[0].retries(), Some(1));

        let pending = log.pending("s", "g").await.unwrap();
        assert_eq!(pending[0].consumer, "alive");
        assert_eq!(pending[0].idle, Duration::ZERO);
        assert_eq!(pending[1].consumer, "dead");
    }

    #[tokio::test]
    async fn reading_unknown_group_fails() {
        let log = seeded(1).await;
        let err = log.read_group("s", "nope", "c", 1).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let log = seeded(1).await;
        log.fail_next(1);
        assert!(log.read_group("s", "g", "c", 1).await.is_err());
        assert_eq!(log.read_group("s", "g", "c", 1).await.unwrap().len(), 1);
    }
}
