#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    backbone_channels::{Call, HandlerRegistry, ProducerPipeline, StreamChannel, Subscription},
    backbone_core::{
        AckBehavior, AckState, Announcement, ClaimingTrigger, ConsumerContext, ConsumerOptions,
        ConsumerPlan, EntryFields, EventBucketCategories, Origin, OriginFilter, PendingEntry,
        ProducerPlan, Result, StorageStrategyChain, StreamEntry, StreamLog, TimeoutBehavior,
        handler_fn,
    },
    backbone_inmemory::{InMemoryHashStorage, InMemoryStreamLog},
    tokio::sync::mpsc,
};

/// In-memory log that remembers the size of every non-empty fetch.
#[derive(Default)]
struct SpyLog {
    inner: InMemoryStreamLog,
    batches: Mutex<Vec<usize>>,
}

#[async_trait]
impl StreamLog for SpyLog {
    fn channel_type(&self) -> &str {
        self.inner.channel_type()
    }

    async fn append(&self, key: &str, fields: EntryFields) -> Result<String> {
        self.inner.append(key, fields).await
    }

    async fn ensure_group(&self, key: &str, group: &str) -> Result<()> {
        self.inner.ensure_group(key, group).await
    }

    async fn read_group(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let entries = self.inner.read_group(key, group, consumer, count).await?;
        if !entries.is_empty() {
            self.batches.lock().unwrap().push(entries.len());
        }
        Ok(entries)
    }

    async fn claim(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        self.inner.claim(key, group, consumer, min_idle, count).await
    }

    async fn ack(&self, key: &str, group: &str, ids: &[String]) -> Result<usize> {
        self.inner.ack(key, group, ids).await
    }

    async fn pending(&self, key: &str, group: &str) -> Result<Vec<PendingEntry>> {
        self.inner.pending(key, group).await
    }
}

fn producer_plan(uri: &str) -> ProducerPlan {
    ProducerPlan::builder(uri)
        .environment("test")
        .partition("P")
        .shard("S")
        .build()
        .unwrap()
}

fn consumer_plan(uri: &str, consumer: &str, options: ConsumerOptions) -> ConsumerPlan {
    ConsumerPlan::builder(uri)
        .environment("test")
        .partition("P")
        .shard("S")
        .group("billing")
        .consumer_name(consumer)
        .options(options)
        .build()
        .unwrap()
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("timed out waiting for a handler")
        .expect("handler channel closed")
}

#[tokio::test(start_paused = true)]
async fn batches_of_two_then_one_without_duplicates() {
    let log = Arc::new(SpyLog::default());
    let channel = Arc::new(StreamChannel::new(log.clone()));
    let producer = ProducerPipeline::new(producer_plan("orders"), channel.clone());
    for n in 0..3 {
        producer
            .send(Call::new("Placed").arg("n", &n).unwrap())
            .await
            .unwrap();
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |announcement: Arc<Announcement>, _| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(announcement.argument::<u32>("n")?);
            Ok(())
        }
    });
    let options = ConsumerOptions {
        batch_size: 2,
        ..Default::default()
    };
    let subscription = Subscription::spawn(
        channel,
        consumer_plan("orders", "c1", options),
        Arc::new(HandlerRegistry::new().with("Placed", handler)),
    );

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(recv(&mut rx).await);
    }
    tokio::time::sleep(Duration::from_secs(10)).await;
    subscription.shutdown().await.unwrap();

    assert_eq!(seen, [0, 1, 2]);
    assert!(rx.try_recv().is_err());
    assert_eq!(*log.batches.lock().unwrap(), [2, 1]);
    assert!(
        log.pending("test:orders:P:S", "billing")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test(start_paused = true)]
async fn unacked_entry_is_auto_acked_by_its_timer() {
    let log = Arc::new(InMemoryStreamLog::new());
    let channel = Arc::new(StreamChannel::new(log.clone()));
    let producer = ProducerPipeline::new(producer_plan("orders"), channel.clone());
    producer
        .send(Call::new("Placed").arg("n", &1).unwrap())
        .await
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel::<ConsumerContext>();
    let handler = {
        let calls = calls.clone();
        handler_fn(move |_, ctx: ConsumerContext| {
            let (calls, tx) = (calls.clone(), tx.clone());
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(ctx);
                Ok(())
            }
        })
    };
    let options = ConsumerOptions {
        ack_behavior: AckBehavior::Manual,
        timeout_behavior: TimeoutBehavior::Ack,
        ack_timeout: Some(Duration::from_millis(100)),
        claiming: ClaimingTrigger::new(1, Duration::from_secs(1)),
        ..Default::default()
    };
    let subscription = Subscription::spawn(
        channel,
        consumer_plan("orders", "c1", options),
        Arc::new(HandlerRegistry::new().with("Placed", handler)),
    );

    let ctx = recv(&mut rx).await;
    assert_eq!(ctx.state(), AckState::Pending);
    ctx.resolved().await;
    assert_eq!(ctx.state(), AckState::Acked);
    assert!(ctx.timed_out());
    assert!(
        log.pending("test:orders:P:S", "billing")
            .await
            .unwrap()
            .is_empty()
    );

    // Well past MinIdleTime: claim checks keep running but find nothing.
    tokio::time::sleep(Duration::from_secs(30)).await;
    subscription.shutdown().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_entry_of_dead_member_is_redelivered_once() {
    let log = Arc::new(InMemoryStreamLog::new());
    let channel = Arc::new(StreamChannel::new(log.clone()));
    let producer = ProducerPipeline::new(producer_plan("orders"), channel.clone());
    producer
        .send(Call::new("Placed").arg("n", &7).unwrap())
        .await
        .unwrap();

    // Member X fetches the entry and dies without acking or polling again.
    let key = "test:orders:P:S";
    log.ensure_group(key, "billing").await.unwrap();
    let held = log.read_group(key, "billing", "x", 10).await.unwrap();
    assert_eq!(held.len(), 1);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |announcement: Arc<Announcement>, ctx: ConsumerContext| {
        let tx = tx.clone();
        async move {
            let _ = tx.send((announcement.argument::<u32>("n")?, ctx.retries()));
            Ok(())
        }
    });
    let options = ConsumerOptions {
        claiming: ClaimingTrigger::new(2, Duration::from_secs(60)),
        ..Default::default()
    };
    let subscription = Subscription::spawn(
        channel,
        consumer_plan("orders", "y", options),
        Arc::new(HandlerRegistry::new().with("Placed", handler)),
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(rx.try_recv().is_err(), "claimed before MinIdleTime");
    assert_eq!(log.pending(key, "billing").await.unwrap()[0].consumer, "x");

    assert_eq!(recv(&mut rx).await, (7, Some(1)));
    tokio::time::sleep(Duration::from_secs(300)).await;
    subscription.shutdown().await.unwrap();

    assert!(rx.try_recv().is_err());
    assert!(log.pending(key, "billing").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_over_a_stuck_handler_leaves_the_entry_pending() {
    let log = Arc::new(InMemoryStreamLog::new());
    let channel = Arc::new(StreamChannel::new(log.clone()));
    let producer = ProducerPipeline::new(producer_plan("orders"), channel.clone());
    producer
        .send(Call::new("Placed").arg("n", &1).unwrap())
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |_, _| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(());
            std::future::pending::<()>().await;
            Ok(())
        }
    });
    let subscription = Subscription::spawn(
        channel,
        consumer_plan("orders", "c1", ConsumerOptions::default()),
        Arc::new(HandlerRegistry::new().with("Placed", handler)),
    );
    recv(&mut rx).await;

    tokio::time::timeout(Duration::from_secs(3600), subscription.shutdown())
        .await
        .expect("shutdown hung on a handler that never returns")
        .unwrap();

    let pending = log.pending("test:orders:P:S", "billing").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].consumer, "c1");
}

#[tokio::test(start_paused = true)]
async fn stored_segments_are_resolved_for_handlers() {
    let log = Arc::new(InMemoryStreamLog::new());
    let hash = Arc::new(InMemoryHashStorage::default());
    let storage = StorageStrategyChain::new().with_filter(
        hash.clone(),
        EventBucketCategories::SEGMENTS,
        |key| key.ends_with("~body"),
    );
    let channel = Arc::new(StreamChannel::new(log.clone()).with_storage(storage.clone()));
    let producer =
        ProducerPipeline::new(producer_plan("docs"), channel.clone()).with_storage(storage);
    producer
        .send(
            Call::new("Uploaded")
                .arg("name", "report.pdf")
                .unwrap()
                .bytes("body", vec![0u8; 4096]),
        )
        .await
        .unwrap();
    assert_eq!(hash.len(), 1);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |announcement: Arc<Announcement>, _| {
        let tx = tx.clone();
        async move {
            let name: String = announcement.argument("name")?;
            let size = announcement.raw_argument("body").map(|b| b.len());
            let _ = tx.send((name, size));
            Ok(())
        }
    });
    let subscription = Subscription::spawn(
        channel,
        consumer_plan("docs", "c1", ConsumerOptions::default()),
        Arc::new(HandlerRegistry::new().with("Uploaded", handler)),
    );
    assert_eq!(recv(&mut rx).await, ("report.pdf".to_string(), Some(4096)));
    subscription.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn forwarded_copies_reach_only_consumers_accepting_all_origins() {
    let log = Arc::new(InMemoryStreamLog::new());
    let channel = Arc::new(StreamChannel::new(log.clone()));
    let archive = Arc::new(ProducerPipeline::new(producer_plan("archive"), channel.clone()));
    let producer = ProducerPipeline::new(producer_plan("orders"), channel.clone());
    producer
        .send(Call::new("Placed").arg("n", &3).unwrap())
        .await
        .unwrap();

    // Relay every order into the archive stream.
    let relay = {
        let archive = archive.clone();
        handler_fn(move |announcement: Arc<Announcement>, _| {
            let archive = archive.clone();
            async move {
                archive.forward(&announcement).await?;
                Ok(())
            }
        })
    };
    let relay_sub = Subscription::spawn(
        channel.clone(),
        consumer_plan("orders", "relay", ConsumerOptions::default()),
        Arc::new(HandlerRegistry::new().with("Placed", relay)),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reader = |label: &'static str| {
        let tx = tx.clone();
        handler_fn(move |announcement: Arc<Announcement>, _| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((label, announcement.metadata.origin));
                Ok(())
            }
        })
    };
    let strict = Subscription::spawn(
        channel.clone(),
        ConsumerPlan::builder("archive")
            .environment("test")
            .partition("P")
            .shard("S")
            .group("strict")
            .build()
            .unwrap(),
        Arc::new(HandlerRegistry::new().with("Placed", reader("strict"))),
    );
    let all = Subscription::spawn(
        channel,
        ConsumerPlan::builder("archive")
            .environment("test")
            .partition("P")
            .shard("S")
            .group("all")
            .options(ConsumerOptions {
                origin_filter: OriginFilter::All,
                ..Default::default()
            })
            .build()
            .unwrap(),
        Arc::new(HandlerRegistry::new().with("Placed", reader("all"))),
    );

    assert_eq!(recv(&mut rx).await, ("all", Origin::Copy));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(rx.try_recv().is_err());
    assert!(
        log.pending("test:archive:P:S", "strict")
            .await
            .unwrap()
            .is_empty()
    );

    for sub in [relay_sub, strict, all] {
        sub.shutdown().await.unwrap();
    }
}
