mod config_commands;
mod consume_commands;
mod log_backend;
mod produce_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use backbone_config::BackboneConfig;

#[derive(Parser)]
#[command(name = "backbone", about = "Backbone: publish and consume announcement streams")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./backbone.toml and friends).
    #[arg(long, global = true, env = "BACKBONE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one announcement to the configured route.
    Produce(produce_commands::ProduceArgs),
    /// Subscribe to the configured route and print what arrives.
    Consume(consume_commands::ConsumeArgs),
    /// List entries delivered to a group but not acknowledged yet.
    Pending {
        /// Consumer group (defaults to `consumer.group`, then the stream uri).
        #[arg(long)]
        group: Option<String>,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<BackboneConfig> {
    match &cli.config {
        Some(path) => backbone_config::load_config(path),
        None => Ok(backbone_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);
    debug!(version = env!("CARGO_PKG_VERSION"), "backbone starting");

    if let Commands::Config { action } = &cli.command {
        return config_commands::handle_config(action, cli.config.as_deref());
    }

    let config = load_config(&cli)?;
    #[cfg(feature = "metrics")]
    let metrics = backbone_metrics::init_metrics(backbone_metrics::MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: config
            .metrics
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })?;

    let log = log_backend::open(&config).await?;
    let result = match cli.command {
        Commands::Produce(args) => produce_commands::handle_produce(args, &config, log).await,
        Commands::Consume(args) => consume_commands::handle_consume(args, &config, log).await,
        Commands::Pending { group } => {
            consume_commands::handle_pending(group.as_deref(), &config, log).await
        },
        Commands::Config { .. } => Ok(()),
    };

    #[cfg(feature = "metrics")]
    if config.metrics.enabled {
        eprintln!("{}", metrics.render());
    }

    result
}
