#![forbid(unsafe_code)]
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snsdigest::bootstrap::build_aggregator;
use snsdigest::config::{self, load_configuration};
use snsdigest::scheduler::{Scheduler, run_once};
use std::sync::Arc;
use tracing::{Level, event};

#[derive(Debug, Parser)]
#[command(version, about = "Digests buffered notifications into one artifact per schedule tick")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a single invocation and exit.
    Run,
    /// Run an invocation on every schedule tick until interrupted.
    Serve,
}

fn main() -> Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install CryptoProvider: {:?}", e))?;

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,async_nats=warn".into()),
        )
        .init();

    load_configuration().context("Failed to load configuration")?;
    let config = config::get().context("Failed to get configuration")?;

    let _sentry = config.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.clone(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let (broker, aggregator) = build_aggregator(&config)
        .await
        .context("Failed to set up the aggregator")?;

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Run => run_once(&aggregator).await.map(|report| {
            event!(
                Level::INFO,
                invocation_id = %report.invocation_id,
                records = report.records,
                acknowledged = report.acknowledged,
                "invocation completed"
            );
        }),
        Command::Serve => {
            let scheduler = Scheduler::new(Arc::new(aggregator), config.schedule_period());
            let shutdown = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    event!(Level::ERROR, "Error setting up signal handler: {}", err);
                    std::future::pending::<()>().await;
                }
            };
            scheduler.serve(shutdown).await.map(|summary| {
                event!(
                    Level::INFO,
                    started = summary.started,
                    failed = summary.failed,
                    "scheduler stopped gracefully"
                );
            })
        }
    };

    broker.flush().await?;
    result
}
