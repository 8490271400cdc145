use std::sync::Arc;

use {
    anyhow::Context,
    backbone_channels::{Call, ProducerPipeline, StreamChannel, producer::HostInterceptor},
    backbone_config::BackboneConfig,
    backbone_core::StreamLog,
    clap::Args,
};

#[derive(Args)]
pub struct ProduceArgs {
    /// Operation name, e.g. `OrderPlaced`.
    #[arg(long)]
    operation: String,
    /// JSON argument as `name=<json>`; repeatable.
    #[arg(long = "arg", value_name = "NAME=JSON")]
    args: Vec<String>,
    /// Raw text argument as `name=<text>`, sent as bytes; repeatable.
    #[arg(long = "raw", value_name = "NAME=TEXT")]
    raw: Vec<String>,
}

pub async fn handle_produce(
    args: ProduceArgs,
    config: &BackboneConfig,
    log: Arc<dyn StreamLog>,
) -> anyhow::Result<()> {
    let call = build_call(&args)?;
    let plan = config.producer_plan()?;
    let key = plan.key();
    let producer = ProducerPipeline::new(plan, Arc::new(StreamChannel::new(log)))
        .with_interceptor(Arc::new(HostInterceptor::new()));
    let id = producer.send(call).await?;
    println!("{key} {id}");
    Ok(())
}

fn build_call(args: &ProduceArgs) -> anyhow::Result<Call> {
    let mut call = Call::new(args.operation.clone());
    for arg in &args.args {
        let (name, raw) = split_pair(arg)?;
        let value: serde_json::Value = serde_json::from_str(raw)
            .with_context(|| format!("argument `{name}` is not valid JSON"))?;
        call = call.arg(name, &value)?;
    }
    for arg in &args.raw {
        let (name, text) = split_pair(arg)?;
        call = call.bytes(name, text.as_bytes().to_vec());
    }
    Ok(call)
}

fn split_pair(arg: &str) -> anyhow::Result<(&str, &str)> {
    match arg.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value)),
        _ => anyhow::bail!("expected NAME=VALUE, got `{arg}`"),
    }
}
