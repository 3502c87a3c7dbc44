/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Running candle stream collector with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use bitget_stream_adapter::{
    BitgetWsClient, InboundMessage, SubscriptionRegistry, WsConfig,
};

mod config;
use config::CollectorConfig;

#[derive(Parser, Debug)]
#[command(name = "bitget-stream-collector", version, about = "Bitget candle stream collector")]
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
        "starting bitget-stream-collector"
    );

    let config = load_config(&args.config_path)?;
    let keys = config.subscription_keys();
    info!(
        strategy_count = config.strategies.len(),
        channel_count = keys.len(),
        "configuration loaded"
    );

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let ws_config = WsConfig::new(&config.ws_url).context("invalid websocket url")?;
    let registry = SubscriptionRegistry::with_keys(keys);
    let mut client = BitgetWsClient::new(ws_config, registry);
    let payload_rx = client
        .take_receiver()
        .context("payload receiver already taken")?;
    client.start();

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let consumer = tokio::spawn(consume_payloads(payload_rx));

    tokio::select! {
        _ = client.wait_connected() => info!("stream established"),
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancelled().await;
    info!("shutdown signal received");

    client.close().await;
    consumer.abort();
    let _ = consumer.await;
    info!("collector shutdown complete");

    Ok(())
}

/// Consume decoded inbound payloads, logging candle pushes and acks.
///
/// Runs on its own task so a slow consumer never stalls the stream client.
async fn consume_payloads(mut payload_rx: mpsc::Receiver<serde_json::Value>) {
    while let Some(payload) = payload_rx.recv().await {
        match InboundMessage::from_value(&payload) {
            Some(InboundMessage::Push(push)) => {
                for candle in push.candles() {
                    info!(
                        channel = %push.arg,
                        ts = %candle.ts,
                        close = %candle.close,
                        volume = %candle.base_volume,
                        "candle"
                    );
                }
            }
            Some(InboundMessage::Event(event)) if event.is_error() => {
                warn!(code = ?event.code, msg = ?event.msg, "stream error event");
            }
            Some(InboundMessage::Event(event)) => {
                debug!(event = %event.event, arg = ?event.arg, "stream event");
            }
            None => debug!(%payload, "unclassified frame"),
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

fn load_config(path: &PathBuf) -> Result<CollectorConfig> {
    let path_str = path
        .to_str()
        .context("config path must be valid utf-8")?;
    CollectorConfig::from_file(path_str).context("load config")
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
        use tokio::signal::unix::{signal, SignalKind};

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
