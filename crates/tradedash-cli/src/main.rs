/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Logged realtime dashboard streams with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tradedash_cli::{MonitorExit, StreamConfig, StreamMonitor};
use tradedash_realtime::RealtimeClient;

#[derive(Parser, Debug)]
#[command(name = "tradedash-stream", version, about = "Trading dashboard realtime stream monitor")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: PathBuf,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    info!(
        config_path = %args.config_path.display(),
        dry_run = args.dry_run,
        "starting tradedash-stream"
    );

    let config = load_config(&args.config_path)?;
    info!(
        url = %config.realtime.url,
        topics = config.topics.len(),
        chart = config.chart.is_some(),
        "configuration loaded"
    );
    if !config.has_subscriptions() {
        warn!("no streams selected; only connection events will be logged");
    }

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let client = RealtimeClient::new(config.realtime.clone()).context("create realtime client")?;
    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let monitor = StreamMonitor::attach(client, &config);
    info!("stream monitor started");

    match monitor.run(shutdown).await {
        MonitorExit::Shutdown => {
            info!("shutdown complete");
            Ok(())
        }
        MonitorExit::ConnectionFailed => {
            bail!(
                "connection to {} failed after {} attempts",
                config.realtime.url,
                config.realtime.reconnect.max_attempts
            )
        }
    }
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<StreamConfig> {
    let path_str = path.to_str().context("config path must be valid utf-8")?;
    StreamConfig::from_file(path_str).context("load config")
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
