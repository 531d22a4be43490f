//! Tether CLI: call tools on servers that answer over an event stream.

mod render;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tether_config::{CliOverrides, TetherConfig};
use tether_rpc::Supervisor;
use tether_sse::HttpTransport;
use tether_types::{HttpRequest, HttpSender, RpcResponse};
use tokio_util::sync::CancellationToken;

/// Per-request timeout for `tether probe`.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(
    name = "tether",
    version,
    about = "Call tools on servers that answer over an event stream"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Event stream URL (overrides TETHER_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    /// How long to wait for a response, in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Reconnect attempts after the first failure
    #[arg(long, global = true)]
    retries: Option<u32>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Invoke a method and print its response as JSON
    Call {
        /// Method name, e.g. tools/call
        method: String,

        /// Parameters as a JSON value
        #[arg(long)]
        params: Option<String>,
    },
    /// List the tools the server offers
    Tools,
    /// Report which well-known paths the server answers on
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = TetherConfig::load(CliOverrides {
        url: cli.url,
        list_method: None,
        response_timeout_ms: cli.timeout_ms,
        max_retries: cli.retries,
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let transport = Arc::new(
        HttpTransport::with_connect_timeout(config.engine.connect_timeout())
            .context("Failed to create HTTP client")?,
    );

    match cli.command {
        Command::Call { method, params } => {
            let params = params
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .context("--params is not valid JSON")?;
            let response = call(&config, transport, &method, params).await?;
            println!("{}", serde_json::to_string_pretty(&response.result)?);
            if response.is_error {
                bail!("Server returned an error for '{method}'");
            }
        }
        Command::Tools => {
            let response = call(&config, transport, &config.list_method, None).await?;
            if response.is_error {
                println!("{}", serde_json::to_string_pretty(&response.result)?);
                bail!("Server returned an error for '{}'", config.list_method);
            }
            match render::tool_lines(&response.result) {
                Some(lines) if !lines.is_empty() => {
                    for line in lines {
                        println!("{line}");
                    }
                }
                Some(_) => eprintln!("Server offers no tools"),
                None => println!("{}", serde_json::to_string_pretty(&response.result)?),
            }
        }
        Command::Probe => probe(&config, transport.as_ref()).await,
    }

    Ok(())
}

/// Run one supervised call. Ctrl+C cancels it.
async fn call(
    config: &TetherConfig,
    transport: Arc<HttpTransport>,
    method: &str,
    params: Option<Value>,
) -> Result<RpcResponse> {
    let mut supervisor = Supervisor::new(
        config.url.clone(),
        transport.clone(),
        transport,
        config.engine.clone(),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = supervisor.call(method, params, cancel).await;
    supervisor.close();

    match result {
        Ok(response) => Ok(response),
        Err(e) if e.is_cancelled() => bail!("Cancelled"),
        Err(e) => {
            tracing::debug!("Transitions: {:?}", supervisor.transitions());
            Err(anyhow::anyhow!("{e}"))
        }
    }
}

async fn probe(config: &TetherConfig, sender: &dyn HttpSender) {
    eprintln!("Probing {}", config.url);
    for url in render::probe_targets(&config.url) {
        let request = HttpRequest::get(url.clone(), PROBE_TIMEOUT)
            .with_headers(&config.engine.header_pairs());
        let result = sender.send(request).await;
        println!("{}", render::probe_line(&url, &result));
    }
}
