//! Pulse: analytics relay.
//!
//! Reads newline-delimited JSON events and fans them out to the configured
//! analytics backends through the orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pulse_analytics::{Orchestrator, ProcessEnvironment};
use pulse_core::{AnalyticsConfig, EventOptions, Properties};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "pulse")]
#[command(about = "Analytics orchestrator and event relay")]
#[command(version)]
struct Cli {
    /// TOML configuration file, overridden by PULSE__* variables
    #[arg(long, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Collect events even when analytics is disabled
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Internal analytics API base URL (overrides config)
    #[arg(long, env = "PULSE__BACKENDS__INTERNAL_ENDPOINT")]
    internal_endpoint: Option<String>,

    /// Directory for the session snapshot (overrides config)
    #[arg(long, env = "PULSE__STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track events read from a file or stdin, then flush and exit
    Relay {
        /// NDJSON input; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,

        /// Location reported as the event URL
        #[arg(long, default_value = "app://pulse/")]
        base_url: String,
    },
    /// Print the resolved configuration and backend registry
    Stats,
}

/// One input line.
#[derive(Debug, Deserialize)]
struct RelayEvent {
    name: String,
    #[serde(default)]
    properties: Properties,
    #[serde(default)]
    options: EventOptions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse=info,pulse_analytics=info,pulse_web_sdk=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AnalyticsConfig::load_from(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AnalyticsConfig::default()
    });
    if cli.debug {
        config.debug = true;
    }
    if let Some(endpoint) = cli.internal_endpoint {
        config.backends.internal_endpoint = endpoint;
    }
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = dir;
    }

    info!(
        enabled = config.enabled,
        debug = config.debug,
        batch_size = config.batch_size,
        backends = ?config.backends.enabled_backends(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Stats => {
            let report = json!({ "config": config.summary() });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Relay { input, base_url } => {
            let orchestrator = Orchestrator::builder(config)
                .environment(Arc::new(ProcessEnvironment::new(base_url)))
                .build();
            orchestrator.init().await;

            match input {
                Some(path) => match tokio::fs::File::open(&path).await {
                    Ok(file) => {
                        relay(&orchestrator, BufReader::new(file)).await;
                    }
                    Err(e) => error!(error = %e, path = %path.display(), "Cannot open input"),
                },
                None => {
                    relay(&orchestrator, BufReader::new(tokio::io::stdin())).await;
                }
            }

            let report = orchestrator.shutdown().await;
            let metrics = orchestrator.session_metrics();
            println!(
                "{}",
                serde_json::to_string(&json!({ "finalFlush": report, "session": metrics }))?
            );
        }
    }

    Ok(())
}

/// Track every line until EOF, a read error or Ctrl-C. Input errors end the
/// relay without skipping the final flush.
async fn relay<R>(orchestrator: &Orchestrator, reader: R) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut tracked = 0usize;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, flushing");
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read input, flushing");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RelayEvent>(&line) {
            Ok(event) => {
                orchestrator.track(&event.name, event.properties, event.options);
                tracked += 1;
            }
            Err(e) => warn!(error = %e, "Skipping malformed event line"),
        }
    }
    info!(tracked, "Input drained");
    tracked
}
