//! Per-message acknowledgment state machine.
//!
//! A context starts pending and resolves exactly once, by commit, by explicit
//! cancel, or by an armed timer. Later attempts are no-ops.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    time::Duration,
};

use {
    tokio_util::sync::{CancellationToken, WaitForCancellationFuture},
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use backbone_metrics::{ack as ack_metrics, counter};

use crate::{Error, Metadata, Result, TimeoutBehavior, log::StreamLog};

const PENDING: u8 = 0;
const ACKED: u8 = 1;
const CANCELLED: u8 = 2;

/// Resolution of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Pending,
    Acked,
    Cancelled,
}

/// Result of an `ack`/`cancel` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// This call committed the entry.
    Acked,
    /// This call left the entry pending for reclaim.
    Cancelled,
    /// Someone resolved the context first; nothing happened.
    AlreadyResolved,
}

struct Inner {
    log: Arc<dyn StreamLog>,
    key: String,
    group: String,
    entry_id: String,
    metadata: Metadata,
    timeout_behavior: TimeoutBehavior,
    state: AtomicU8,
    timed_out: AtomicBool,
    /// Handler cancellation: fired on timeout, explicit cancel or a lost race.
    cancel: CancellationToken,
    /// Fired once the context is resolved, whichever way.
    resolved: CancellationToken,
}

/// Ack handle handed to a handler together with its announcement.
#[derive(Clone)]
pub struct ConsumerContext {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConsumerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerContext")
            .field("key", &self.inner.key)
            .field("group", &self.inner.group)
            .field("entry_id", &self.inner.entry_id)
            .field("state", &self.state())
            .finish()
    }
}

impl ConsumerContext {
    pub fn new(
        log: Arc<dyn StreamLog>,
        key: impl Into<String>,
        group: impl Into<String>,
        entry_id: impl Into<String>,
        metadata: Metadata,
        timeout_behavior: TimeoutBehavior,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                log,
                key: key.into(),
                group: group.into(),
                entry_id: entry_id.into(),
                metadata,
                timeout_behavior,
                state: AtomicU8::new(PENDING),
                timed_out: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                resolved: CancellationToken::new(),
            }),
        }
    }

    pub fn entry_id(&self) -> &str {
        &self.inner.entry_id
    }

    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    /// Earlier deliveries of this entry.
    pub fn retries(&self) -> Option<u32> {
        self.inner.metadata.retries
    }

    pub fn state(&self) -> AckState {
        match self.inner.state.load(Ordering::Acquire) {
            ACKED => AckState::Acked,
            CANCELLED => AckState::Cancelled,
            _ => AckState::Pending,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state() != AckState::Pending
    }

    /// Whether the armed timer resolved this context.
    pub fn timed_out(&self) -> bool {
        self.inner.timed_out.load(Ordering::Acquire)
    }

    /// Token a handler should watch; cancelled when its work is no longer wanted.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Completes once the context is resolved.
    pub fn resolved(&self) -> WaitForCancellationFuture<'_> {
        self.inner.resolved.cancelled()
    }

    /// Commit the entry for the group.
    pub async fn ack(&self) -> Result<AckOutcome> {
        if !self.transition(ACKED) {
            return Ok(self.race_lost());
        }
        let result = self
            .inner
            .log
            .ack(&self.inner.key, &self.inner.group, &[self.inner.entry_id.clone()])
            .await;
        self.inner.resolved.cancel();
        match result {
            Ok(_) => {
                debug!(entry_id = %self.inner.entry_id, "entry acked");
                #[cfg(feature = "metrics")]
                counter!(ack_metrics::ACKED_TOTAL).increment(1);
                Ok(AckOutcome::Acked)
            },
            Err(e) => {
                warn!(entry_id = %self.inner.entry_id, error = %e, "ack failed, entry stays pending");
                Err(e)
            },
        }
    }

    /// Negative ack: leave the entry pending so a claim check can redeliver it.
    pub async fn cancel(&self) -> Result<AckOutcome> {
        if !self.transition(CANCELLED) {
            return Ok(self.race_lost());
        }
        self.inner.cancel.cancel();
        self.inner.resolved.cancel();
        debug!(entry_id = %self.inner.entry_id, "entry left pending");
        #[cfg(feature = "metrics")]
        counter!(ack_metrics::CANCELLED_TOTAL).increment(1);
        Ok(AckOutcome::Cancelled)
    }

    /// Arm a timer that resolves the context per its `TimeoutBehavior` if
    /// nothing else has after `timeout`.
    pub fn ack_after(&self, timeout: Duration) {
        let ctx = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => {},
                () = ctx.inner.resolved.cancelled() => return,
            }
            if ctx.is_resolved() {
                return;
            }
            let err = Error::TimeoutExceeded {
                entry_id: ctx.inner.entry_id.clone(),
                timeout,
            };
            warn!(error = %err, behavior = ?ctx.inner.timeout_behavior, "ack timer elapsed");
            #[cfg(feature = "metrics")]
            counter!(ack_metrics::TIMEOUTS_TOTAL).increment(1);
            ctx.inner.timed_out.store(true, Ordering::Release);
            ctx.inner.cancel.cancel();
            let outcome = match ctx.inner.timeout_behavior {
                TimeoutBehavior::Ack => ctx.ack().await,
                TimeoutBehavior::LeavePending => ctx.cancel().await,
            };
            if let Err(e) = outcome {
                warn!(entry_id = %ctx.inner.entry_id, error = %e, "timed out entry could not be resolved");
            }
        });
    }

    fn transition(&self, to: u8) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn race_lost(&self) -> AckOutcome {
        let err = Error::AckRaceLost {
            entry_id: self.inner.entry_id.clone(),
        };
        debug!(error = %err, "ignoring second resolution");
        #[cfg(feature = "metrics")]
        counter!(ack_metrics::RACE_LOST_TOTAL).increment(1);
        AckOutcome::AlreadyResolved
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{Mutex, atomic::AtomicUsize};

    use {
        super::*,
        crate::{
            Route,
            envelope::EntryFields,
            log::{PendingEntry, StreamEntry},
        },
        async_trait::async_trait,
    };

    /// Counts broker-visible acks.
    #[derive(Default)]
    struct CountingLog {
        acks: AtomicUsize,
        acked_ids: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StreamLog for CountingLog {
        fn channel_type(&self) -> &str {
            "counting"
        }

        async fn append(&self, _key: &str, _fields: EntryFields) -> Result<String> {
            Ok("0-0".into())
        }

        async fn ensure_group(&self, _key: &str, _group: &str) -> Result<()> {
            Ok(())
        }

        async fn read_group(
            &self,
            _key: &str,
            _group: &str,
            _consumer: &str,
            _count: usize,
        ) -> Result<Vec<StreamEntry>> {
            Ok(Vec::new())
        }

        async fn claim(
            &self,
            _key: &str,
            _group: &str,
            _consumer: &str,
            _min_idle: Duration,
            _count: usize,
        ) -> Result<Vec<StreamEntry>> {
            Ok(Vec::new())
        }

        async fn ack(&self, _key: &str, _group: &str, ids: &[String]) -> Result<usize> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            self.acked_ids.lock().unwrap().extend(ids.iter().cloned());
            Ok(ids.len())
        }

        async fn pending(&self, _key: &str, _group: &str) -> Result<Vec<PendingEntry>> {
            Ok(Vec::new())
        }
    }

    fn context(log: Arc<CountingLog>, behavior: TimeoutBehavior) -> ConsumerContext {
        ConsumerContext::new(
            log,
            "orders",
            "billing",
            "1-0",
            Metadata::new(Route::new("orders"), "Placed"),
            behavior,
        )
    }

    #[tokio::test]
    async fn double_ack_has_one_effect() {
        let log = Arc::new(CountingLog::default());
        let ctx = context(log.clone(), TimeoutBehavior::Ack);
        assert_eq!(ctx.ack().await.unwrap(), AckOutcome::Acked);
        assert_eq!(ctx.ack().await.unwrap(), AckOutcome::AlreadyResolved);
        assert_eq!(log.acks.load(Ordering::SeqCst), 1);
        assert_eq!(*log.acked_ids.lock().unwrap(), vec!["1-0".to_string()]);
    }

    #[tokio::test]
    async fn ack_then_cancel_is_a_noop() {
        let log = Arc::new(CountingLog::default());
        let ctx = context(log.clone(), TimeoutBehavior::Ack);
        ctx.ack().await.unwrap();
        assert_eq!(ctx.cancel().await.unwrap(), AckOutcome::AlreadyResolved);
        assert_eq!(ctx.state(), AckState::Acked);
        assert!(!ctx.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn cancel_then_ack_never_reaches_broker() {
        let log = Arc::new(CountingLog::default());
        let ctx = context(log.clone(), TimeoutBehavior::Ack);
        assert_eq!(ctx.cancel().await.unwrap(), AckOutcome::Cancelled);
        assert_eq!(ctx.ack().await.unwrap(), AckOutcome::AlreadyResolved);
        assert_eq!(log.acks.load(Ordering::SeqCst), 0);
        assert!(ctx.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn concurrent_acks_resolve_once() {
        let log = Arc::new(CountingLog::default());
        let ctx = context(log.clone(), TimeoutBehavior::Ack);
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move { ctx.ack().await.unwrap() }));
        }
        let mut acked = 0;
        for task in tasks {
            if task.await.unwrap() == AckOutcome::Acked {
                acked += 1;
            }
        }
        assert_eq!(acked, 1);
        assert_eq!(log.acks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_acks_when_nothing_else_does() {
        let log = Arc::new(CountingLog::default());
        let ctx = context(log.clone(), TimeoutBehavior::Ack);
        ctx.ack_after(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!ctx.is_resolved());
        ctx.resolved().await;
        assert_eq!(ctx.state(), AckState::Acked);
        assert!(ctx.timed_out());
        assert!(ctx.cancellation().is_cancelled());
        assert_eq!(log.acks.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.ack().await.unwrap(), AckOutcome::AlreadyResolved);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_can_leave_entry_pending() {
        let log = Arc::new(CountingLog::default());
        let ctx = context(log.clone(), TimeoutBehavior::LeavePending);
        ctx.ack_after(Duration::from_millis(100));
        ctx.resolved().await;
        assert_eq!(ctx.state(), AckState::Cancelled);
        assert_eq!(log.acks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn early_ack_disarms_timer() {
        let log = Arc::new(CountingLog::default());
        let ctx = context(log.clone(), TimeoutBehavior::LeavePending);
        ctx.ack_after(Duration::from_millis(100));
        ctx.ack().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ctx.state(), AckState::Acked);
        assert!(!ctx.timed_out());
        assert_eq!(log.acks.load(Ordering::SeqCst), 1);
    }
}
