use std::sync::Arc;

use {
    backbone_channels::{HandlerRegistry, StreamChannel, Subscription},
    backbone_config::BackboneConfig,
    backbone_core::{Announcement, StreamLog, handler_fn},
    clap::Args,
    tokio::sync::mpsc,
    tracing::info,
};

#[derive(Args)]
pub struct ConsumeArgs {
    /// Consumer group (defaults to `consumer.group`, then the stream uri).
    #[arg(long)]
    group: Option<String>,
    /// Stop after the first announcement.
    #[arg(long, default_value_t = false)]
    once: bool,
}

pub async fn handle_consume(
    args: ConsumeArgs,
    config: &BackboneConfig,
    log: Arc<dyn StreamLog>,
) -> anyhow::Result<()> {
    let plan = config.consumer_plan(args.group.as_deref())?;
    info!(stream = %plan.key(), group = plan.group(), consumer = plan.consumer_name(), "consuming");

    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let printer = handler_fn(move |announcement: Arc<Announcement>, ctx| {
        let tx = tx.clone();
        async move {
            println!("{}", render(&announcement, ctx.entry_id(), ctx.retries()));
            let _ = tx.send(());
            Ok(())
        }
    });
    let bridge = Arc::new(HandlerRegistry::new().with_fallback(printer));
    let subscription = Subscription::spawn(Arc::new(StreamChannel::new(log)), plan, bridge);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = rx.recv() => {
                if received.is_none() || args.once {
                    break;
                }
            },
        }
        if subscription.is_finished() {
            break;
        }
    }
    subscription.shutdown().await?;
    Ok(())
}

pub async fn handle_pending(
    group: Option<&str>,
    config: &BackboneConfig,
    log: Arc<dyn StreamLog>,
) -> anyhow::Result<()> {
    let plan = config.consumer_plan(group)?;
    let pending = log.pending(&plan.key(), plan.group()).await?;
    if pending.is_empty() {
        println!("No pending entries.");
        return Ok(());
    }
    println!("{:<24} {:<24} {:>10} {:>10}", "ENTRY", "CONSUMER", "IDLE (s)", "DELIVERIES");
    for entry in &pending {
        println!(
            "{:<24} {:<24} {:>10.1} {:>10}",
            entry.id,
            entry.consumer,
            entry.idle.as_secs_f64(),
            entry.delivery_count
        );
    }
    Ok(())
}

/// One JSON line per announcement. Segments that are not JSON are shown as
/// lossy UTF-8 text.
fn render(announcement: &Announcement, entry_id: &str, retries: Option<u32>) -> serde_json::Value {
    let metadata = &announcement.metadata;
    let segments: serde_json::Map<String, serde_json::Value> = announcement
        .segments
        .iter()
        .map(|(key, raw)| {
            let value = serde_json::from_slice(raw)
                .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(raw).into_owned()));
            (key.to_string(), value)
        })
        .collect();
    let interceptions: serde_json::Map<String, serde_json::Value> = announcement
        .interceptions
        .iter()
        .map(|(key, raw)| {
            (
                key.to_string(),
                serde_json::Value::String(String::from_utf8_lossy(raw).into_owned()),
            )
        })
        .collect();
    serde_json::json!({
        "entry_id": entry_id,
        "message_id": metadata.message_id,
        "operation": metadata.operation,
        "origin": metadata.origin,
        "retries": retries,
        "segments": segments,
        "interceptions": interceptions,
    })
}
