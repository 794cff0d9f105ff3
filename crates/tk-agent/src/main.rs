//! tunnelkey exec agent
//!
//! Runs one interactive exec session against a remote target through the
//! relay, using this process's stdin/stdout/stderr as the local side.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tk_agent::local::{stdio_streams, StdioControl};
use tk_agent::{ExecBridge, RelayLink};
use tk_core::config::{self, AgentConfig};
use tk_core::{ExecError, ExecRequest};

/// How long the relay link gets to flush the final frames
const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "tk-agent")]
#[command(about = "tunnelkey agent - run an interactive command on a remote target")]
#[command(version)]
struct Args {
    /// Relay to connect to (host:port)
    #[arg(short, long)]
    relay: Option<String>,

    /// Exec endpoint with query parameters, e.g.
    /// "/api/v1/namespaces/default/pods/web/exec?command=sh&stdin=true&tty=true"
    #[arg(long, conflicts_with = "command")]
    endpoint: Option<String>,

    /// Forward stdin to the remote command
    #[arg(short = 'i', long)]
    stdin: bool,

    /// Allocate a terminal on the remote side
    #[arg(short, long)]
    tty: bool,

    /// File or FIFO carrying terminal size records ({"Width":w,"Height":h})
    #[arg(long)]
    resize_from: Option<PathBuf>,

    /// Request id shared with the remote side (generated if omitted)
    #[arg(long)]
    request_id: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Command to run
    #[arg(last = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };

    // The stdin reader may still be parked in a blocking read; exiting here
    // avoids waiting on it during runtime shutdown.
    std::process::exit(code);
}

async fn run(args: Args) -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);

    let mut config = if config_path.exists() {
        config::load_config(&config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", config_path, e);
            AgentConfig::default()
        })
    } else {
        AgentConfig::default()
    };

    if let Some(relay) = args.relay.clone() {
        config.relay_address = relay;
    }
    config
        .exec
        .validate()
        .context("Invalid exec configuration")?;

    let request = build_request(&args)?;

    let link = RelayLink::connect(&config).await?;
    let (channels, pump) = link.spawn(&config.exec);

    let control = Arc::new(StdioControl::new());
    let mut streams = stdio_streams(request.stdin, Arc::clone(&control));
    if let Some(path) = &args.resize_from {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open resize source {:?}", path))?;
        streams = streams.with_resize_reader(file);
    }

    let mut bridge = ExecBridge::new(
        request,
        config.exec.clone(),
        channels.outbound,
        channels.inbound,
        streams,
    );
    bridge.start().await?;

    let outcome = tokio::select! {
        outcome = bridge.done() => outcome,
        _ = tokio::signal::ctrl_c() => {
            bridge.kill(Some(ExecError::Killed("interrupted".to_string())));
            bridge.done().await
        }
    };

    // Releasing the bridge closes the outbound channel and lets the link drain
    drop(bridge);
    match tokio::time::timeout(RELAY_DRAIN_TIMEOUT, pump).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::warn!("Relay link ended with error: {:#}", e),
        Ok(Err(e)) => tracing::warn!("Relay link task failed: {}", e),
        Err(_) => tracing::warn!("Timed out waiting for relay link to drain"),
    }

    outcome.map_err(anyhow::Error::from)
}

fn build_request(args: &Args) -> Result<ExecRequest> {
    let request_id = args
        .request_id
        .clone()
        .unwrap_or_else(|| format!("exec-{}", std::process::id()));

    let request = match &args.endpoint {
        Some(endpoint) => ExecRequest::from_endpoint(request_id, endpoint)?,
        None => {
            if args.command.is_empty() {
                anyhow::bail!("No command given. Pass one after `--` or use --endpoint.");
            }
            ExecRequest::new(request_id, args.command.clone())
                .with_stdin(args.stdin)
                .with_tty(args.tty)
        }
    };

    Ok(request)
}
