//! The subscription loop: fetch new entries, claim stale ones, back off when
//! idle. It only ends when the subscription is cancelled.

use std::time::Duration;

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, trace, warn},
};

#[cfg(feature = "metrics")]
use backbone_metrics::{
    broker as broker_metrics, claim as claim_metrics, consumer as consumer_metrics, counter, gauge,
    labels,
};

use backbone_core::{ClaimTracker, EmptyBackoff, Error, Result, StreamEntry};

use super::dispatch::Dispatcher;

/// Run until `cancel` fires.
///
/// Broker failures while fetching or claiming are retried on the same delay
/// curve as empty fetches. A fetch that finds the group gone provisions it
/// again before the next one. Only a non-transient failure to provision the
/// consumer group ends the loop early.
pub(crate) async fn run(dispatcher: &Dispatcher, cancel: &CancellationToken) -> Result<()> {
    let options = &dispatcher.options;
    let mut backoff = EmptyBackoff::new(options.delay_when_empty.clone());
    let mut claims = ClaimTracker::new(options.claiming);

    if !provision(dispatcher, cancel, &mut backoff).await? {
        return Ok(());
    }
    info!(batch_size = options.batch_size, "receive loop started");

    let mut group_missing = false;
    while !cancel.is_cancelled() {
        if group_missing {
            if !provision(dispatcher, cancel, &mut backoff).await? {
                break;
            }
            group_missing = false;
        }

        let fetched = tokio::select! {
            () = cancel.cancelled() => break,
            fetched = dispatcher.log.read_group(
                &dispatcher.key,
                &dispatcher.group,
                &dispatcher.consumer,
                options.batch_size,
            ) => fetched,
        };

        let entries = match fetched {
            Ok(entries) if !entries.is_empty() => {
                trace!(count = entries.len(), "fetched new entries");
                entries
            },
            Ok(_) => {
                #[cfg(feature = "metrics")]
                counter!(consumer_metrics::EMPTY_FETCHES_TOTAL).increment(1);
                if claims.record_empty() {
                    claim_check(dispatcher, cancel, claims.min_idle()).await
                } else {
                    Vec::new()
                }
            },
            Err(e) => {
                if e.is_group_missing() {
                    warn!(group = %dispatcher.group, "consumer group is gone, provisioning it again");
                    group_missing = true;
                }
                broker_error("read_group", &e);
                Vec::new()
            },
        };

        if entries.is_empty() {
            let delay = backoff.next_delay();
            #[cfg(feature = "metrics")]
            gauge!(broker_metrics::BACKOFF_SECONDS).set(delay.as_secs_f64());
            if !sleep_or_cancel(delay, cancel).await {
                break;
            }
            continue;
        }

        claims.reset();
        backoff.reset();
        if let Err(e) = dispatcher.dispatch_batch(entries, cancel).await {
            error!(error = %e, "batch faulted, remaining entries stay pending");
        }
    }

    info!("receive loop stopped");
    Ok(())
}

/// Create the consumer group if needed, retrying transient failures.
/// `Ok(false)` when cancelled first.
async fn provision(
    dispatcher: &Dispatcher,
    cancel: &CancellationToken,
    backoff: &mut EmptyBackoff,
) -> Result<bool> {
    loop {
        let ensured = tokio::select! {
            () = cancel.cancelled() => return Ok(false),
            ensured = dispatcher.log.ensure_group(&dispatcher.key, &dispatcher.group) => ensured,
        };
        match ensured {
            Ok(()) => {
                backoff.reset();
                return Ok(true);
            },
            Err(e) if e.is_transient() => {
                broker_error("ensure_group", &e);
                if !sleep_or_cancel(backoff.next_delay(), cancel).await {
                    return Ok(false);
                }
            },
            Err(e) => {
                error!(error = %e, "consumer group could not be provisioned");
                return Err(e);
            },
        }
    }
}

/// Take over entries other members left idle for at least `min_idle`.
async fn claim_check(
    dispatcher: &Dispatcher,
    cancel: &CancellationToken,
    min_idle: Duration,
) -> Vec<StreamEntry> {
    #[cfg(feature = "metrics")]
    counter!(claim_metrics::CHECKS_TOTAL).increment(1);

    let claimed = tokio::select! {
        () = cancel.cancelled() => return Vec::new(),
        claimed = dispatcher.log.claim(
            &dispatcher.key,
            &dispatcher.group,
            &dispatcher.consumer,
            min_idle,
            dispatcher.options.batch_size,
        ) => claimed,
    };
    match claimed {
        Ok(entries) => {
            if !entries.is_empty() {
                debug!(count = entries.len(), ?min_idle, "claimed idle entries");
                #[cfg(feature = "metrics")]
                counter!(claim_metrics::CLAIMED_TOTAL).increment(entries.len() as u64);
            }
            entries
        },
        Err(e) => {
            broker_error("claim", &e);
            Vec::new()
        },
    }
}

fn broker_error(op: &str, err: &Error) {
    warn!(op, error = %err, "broker call failed, backing off");
    #[cfg(feature = "metrics")]
    counter!(broker_metrics::ERRORS_TOTAL, labels::OP => op.to_string()).increment(1);
}

/// `false` when cancelled before `delay` elapsed.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
