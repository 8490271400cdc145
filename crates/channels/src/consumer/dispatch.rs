//! Dispatch of fetched entries: decode, filter, resolve, load, run handlers
//! and commit per the consumer's ack policy.

use std::sync::{Arc, Mutex};

use {
    futures::StreamExt,
    tokio::{task::JoinSet, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::{Instrument, debug, debug_span, error, trace, warn},
};

#[cfg(feature = "metrics")]
use backbone_metrics::{ack as ack_metrics, consumer as consumer_metrics, counter, gauge, histogram, labels};

use backbone_core::{
    AckBehavior, Announcement, AnnouncementHandler, ConsumerBridge, ConsumerContext,
    ConsumerOptions, EmptyBackoff, Envelope, Error, MultiConsumerBehavior,
    PartialConsumerBehavior, Result, SequentialWait, StorageStrategyChain, StreamEntry, StreamLog,
    TelemetryLevel,
};

use super::interceptor::ConsumerInterceptor;

/// What became of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// At least one handler succeeded.
    Handled,
    /// Every handler failed.
    Failed,
    /// The ack timer fired or the handler cancelled before handlers finished.
    Interrupted,
    /// Origin not accepted; acked without dispatch.
    Filtered,
    /// No handler; acked and dropped.
    Skipped,
    /// No handler; left pending for another consumer.
    Deferred,
    /// Stored payload could not be loaded; left pending.
    Unavailable,
    /// Not an announcement envelope; acked and dropped.
    Malformed,
    /// The subscription stopped while handlers ran; left pending.
    Abandoned,
}

enum HandlerOutcome {
    Succeeded,
    Failed(Error),
    Interrupted,
    Abandoned,
}

/// Everything one subscription needs to process its entries.
pub(crate) struct Dispatcher {
    pub(crate) log: Arc<dyn StreamLog>,
    pub(crate) storage: StorageStrategyChain,
    pub(crate) bridge: Arc<dyn ConsumerBridge>,
    pub(crate) interceptors: Vec<Arc<dyn ConsumerInterceptor>>,
    pub(crate) key: String,
    pub(crate) group: String,
    pub(crate) consumer: String,
    pub(crate) options: ConsumerOptions,
}

impl Dispatcher {
    /// Process one batch. In ordered mode entries run one after another and
    /// an unhandled entry under `ThrowIfNotHandled` stops the batch; the
    /// entries after it stay pending. Otherwise entries run concurrently,
    /// bounded by `max_degree_of_parallelism` when set.
    ///
    /// Cancellation stops new entries from starting and abandons the handlers
    /// of started ones; their entries stay pending.
    pub(crate) async fn dispatch_batch(
        &self,
        entries: Vec<StreamEntry>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        #[cfg(feature = "metrics")]
        histogram!(consumer_metrics::BATCH_SIZE).record(entries.len() as f64);

        if self.options.is_ordered() {
            for entry in entries {
                if cancel.is_cancelled() {
                    debug!("subscription cancelled, rest of the batch stays pending");
                    break;
                }
                let entry_id = entry.id.clone();
                if self.dispatch(entry, cancel).await? == Disposition::Deferred {
                    self.await_foreign_ack(&entry_id, cancel).await;
                }
            }
            return Ok(());
        }

        let fault: Mutex<Option<Error>> = Mutex::new(None);
        futures::stream::iter(entries)
            .take_until(cancel.cancelled())
            .for_each_concurrent(self.options.max_degree_of_parallelism, |entry| async {
                if let Err(e) = self.dispatch(entry, cancel).await {
                    let mut fault = fault.lock().unwrap_or_else(|e| e.into_inner());
                    fault.get_or_insert(e);
                }
            })
            .await;
        match fault.into_inner().unwrap_or_else(|e| e.into_inner()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Process one entry. `Err` only for a batch fault (an unhandled entry
    /// under `ThrowIfNotHandled`); every other failure is contained here.
    pub(crate) async fn dispatch(
        &self,
        entry: StreamEntry,
        shutdown: &CancellationToken,
    ) -> Result<Disposition> {
        let span = debug_span!("dispatch", entry_id = %entry.id, delivery = entry.delivery_count);
        async move {
            let disposition = self.dispatch_inner(entry, shutdown).await;
            if let Ok(d) = &disposition {
                trace!(disposition = ?d, "entry processed");
            }
            disposition
        }
        .instrument(span)
        .await
    }

    async fn dispatch_inner(
        &self,
        entry: StreamEntry,
        shutdown: &CancellationToken,
    ) -> Result<Disposition> {
        let retries = entry.retries();
        let mut envelope = match Envelope::decode(&entry.fields) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "dropping entry that is not an announcement");
                self.ack_entry(&entry.id).await;
                return Ok(Disposition::Malformed);
            },
        };
        envelope.metadata.retries = retries;
        let operation = envelope.metadata.operation.clone();

        #[cfg(feature = "metrics")]
        counter!(consumer_metrics::MESSAGES_RECEIVED_TOTAL, labels::OPERATION => operation.clone())
            .increment(1);

        if !self.options.origin_filter.accepts(envelope.metadata.origin) {
            debug!(%operation, origin = ?envelope.metadata.origin, "origin filtered out");
            #[cfg(feature = "metrics")]
            counter!(consumer_metrics::FILTERED_TOTAL).increment(1);
            self.ack_entry(&entry.id).await;
            return Ok(Disposition::Filtered);
        }

        let handlers = self.bridge.resolve(&operation);
        if handlers.is_empty() {
            #[cfg(feature = "metrics")]
            counter!(consumer_metrics::UNHANDLED_TOTAL, labels::OPERATION => operation.clone())
                .increment(1);
            return match self.options.partial_behavior {
                PartialConsumerBehavior::Loose => {
                    debug!(%operation, "no handler, entry acked and skipped");
                    self.ack_entry(&entry.id).await;
                    Ok(Disposition::Skipped)
                },
                PartialConsumerBehavior::Sequential => {
                    debug!(%operation, "no handler, entry left for another consumer");
                    Ok(Disposition::Deferred)
                },
                PartialConsumerBehavior::ThrowIfNotHandled => {
                    let err = Error::handler_not_found(&operation);
                    error!(error = %err, "unhandled entry faults the batch");
                    Err(err)
                },
            };
        }

        let announcement = match self.storage.load(envelope).await {
            Ok(announcement) => Arc::new(announcement),
            Err(e) => {
                warn!(%operation, error = %e, "payload could not be loaded, entry stays pending");
                return Ok(Disposition::Unavailable);
            },
        };

        for interceptor in &self.interceptors {
            if let Err(e) = interceptor
                .on_received(&announcement.metadata, &announcement.interceptions)
                .await
            {
                warn!(interceptor = interceptor.name(), error = %e, "consumer interceptor failed");
            }
        }

        let ctx = ConsumerContext::new(
            Arc::clone(&self.log),
            &self.key,
            &self.group,
            &entry.id,
            announcement.metadata.clone(),
            self.options.timeout_behavior,
        );
        if let Some(timeout) = self.options.ack_timeout {
            ctx.ack_after(timeout);
        }

        if self.options.telemetry >= TelemetryLevel::Verbose {
            debug!(%operation, handlers = handlers.len(), retries = ?retries, "dispatching");
        }

        #[cfg(feature = "metrics")]
        let started = Instant::now();
        #[cfg(feature = "metrics")]
        gauge!(consumer_metrics::IN_FLIGHT).increment(1.0);

        let outcome = self
            .run_handlers(handlers, announcement, &ctx, shutdown)
            .await;

        #[cfg(feature = "metrics")]
        {
            gauge!(consumer_metrics::IN_FLIGHT).decrement(1.0);
            histogram!(consumer_metrics::HANDLER_DURATION_SECONDS, labels::OPERATION => operation.clone())
                .record(started.elapsed().as_secs_f64());
        }

        Ok(self.commit(&ctx, &operation, outcome).await)
    }

    /// Run the resolved handlers as separate tasks.
    ///
    /// `Once` returns on the first success and aborts the rest; `All` waits
    /// for every handler. Either stops waiting as soon as the context's
    /// cancellation or `shutdown` fires, aborting whatever is still running.
    async fn run_handlers(
        &self,
        handlers: Vec<Arc<dyn AnnouncementHandler>>,
        announcement: Arc<Announcement>,
        ctx: &ConsumerContext,
        shutdown: &CancellationToken,
    ) -> HandlerOutcome {
        let mut tasks = JoinSet::new();
        for handler in handlers {
            let announcement = Arc::clone(&announcement);
            let ctx = ctx.clone();
            tasks.spawn(async move { handler.handle(announcement, ctx).await });
        }

        let race = self.options.multi_consumer == MultiConsumerBehavior::Once;
        let interrupted = ctx.cancellation();
        let mut succeeded = false;
        let mut last_error = None;
        loop {
            let joined = tokio::select! {
                biased;
                joined = tasks.join_next() => joined,
                () = interrupted.cancelled() => {
                    tasks.abort_all();
                    return HandlerOutcome::Interrupted;
                },
                () = shutdown.cancelled() => {
                    tasks.abort_all();
                    return HandlerOutcome::Abandoned;
                },
            };
            let Some(joined) = joined else {
                break;
            };
            match joined {
                Ok(Ok(())) => {
                    succeeded = true;
                    if race {
                        tasks.abort_all();
                        break;
                    }
                },
                Ok(Err(e)) => {
                    warn!(error = %e, "handler failed");
                    last_error = Some(e);
                },
                Err(e) => {
                    error!(error = %e, "handler task panicked");
                    last_error = Some(Error::handler(format!("handler task failed: {e}")));
                },
            }
        }

        match (succeeded, last_error) {
            (true, _) => HandlerOutcome::Succeeded,
            (false, Some(e)) => HandlerOutcome::Failed(e),
            (false, None) => HandlerOutcome::Failed(Error::handler("no handler completed")),
        }
    }

    async fn commit(
        &self,
        ctx: &ConsumerContext,
        operation: &str,
        outcome: HandlerOutcome,
    ) -> Disposition {
        let (disposition, succeeded) = match outcome {
            HandlerOutcome::Interrupted => {
                // The timer or an explicit cancel owns the resolution; let it land
                // before the next entry so commits stay in order.
                ctx.resolved().await;
                debug!(
                    %operation,
                    timed_out = ctx.timed_out(),
                    state = ?ctx.state(),
                    "handlers interrupted"
                );
                return Disposition::Interrupted;
            },
            HandlerOutcome::Abandoned => {
                // Leaves the entry pending and disarms the ack timer.
                if let Err(e) = ctx.cancel().await {
                    warn!(%operation, error = %e, "could not release abandoned entry");
                }
                debug!(%operation, "subscription stopped, handlers abandoned");
                return Disposition::Abandoned;
            },
            HandlerOutcome::Succeeded => {
                #[cfg(feature = "metrics")]
                counter!(consumer_metrics::HANDLED_TOTAL, labels::OPERATION => operation.to_string())
                    .increment(1);
                (Disposition::Handled, true)
            },
            HandlerOutcome::Failed(e) => {
                warn!(%operation, error = %e, ack_behavior = ?self.options.ack_behavior, "entry failed");
                #[cfg(feature = "metrics")]
                counter!(consumer_metrics::HANDLER_ERRORS_TOTAL, labels::OPERATION => operation.to_string())
                    .increment(1);
                (Disposition::Failed, false)
            },
        };

        let commit = match self.options.ack_behavior {
            AckBehavior::Manual => return disposition,
            AckBehavior::OnFinally => true,
            AckBehavior::OnSucceed => succeeded,
        };
        if ctx.is_resolved() {
            return disposition;
        }
        let result = if commit {
            ctx.ack().await
        } else {
            ctx.cancel().await
        };
        if let Err(e) = result {
            warn!(%operation, error = %e, "could not resolve entry");
        }
        disposition
    }

    /// Ack an entry that never reaches a handler.
    async fn ack_entry(&self, entry_id: &str) {
        match self
            .log
            .ack(&self.key, &self.group, &[entry_id.to_string()])
            .await
        {
            Ok(_) => {
                #[cfg(feature = "metrics")]
                counter!(ack_metrics::ACKED_TOTAL).increment(1);
            },
            Err(e) => warn!(entry_id, error = %e, "ack failed, entry stays pending"),
        }
    }

    /// Hold the batch until another consumer has acked a deferred entry, as
    /// long as `sequential_wait` allows. Polls the pending list on the
    /// empty-batch delay curve.
    async fn await_foreign_ack(&self, entry_id: &str, cancel: &CancellationToken) {
        let deadline = match self.options.sequential_wait {
            SequentialWait::NoWait => return,
            SequentialWait::Until { timeout } => Some(Instant::now() + timeout),
            SequentialWait::Indefinitely => None,
        };
        let mut backoff = EmptyBackoff::new(self.options.delay_when_empty.clone());
        loop {
            match self.log.pending(&self.key, &self.group).await {
                Ok(pending) if !pending.iter().any(|p| p.id == entry_id) => {
                    debug!(entry_id, "deferred entry acked elsewhere");
                    return;
                },
                Ok(_) => {},
                Err(e) => warn!(entry_id, error = %e, "could not inspect pending entries"),
            }

            let mut delay = backoff.next_delay();
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    warn!(entry_id, "stopped waiting for another consumer, continuing batch");
                    return;
                }
                delay = delay.min(deadline - now);
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {},
            }
        }
    }
}
