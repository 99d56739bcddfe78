//! The `wn` binary.
//!
//! `wn serve` speaks line-delimited JSON-RPC 2.0 on stdin/stdout; everything
//! diagnostic goes to stderr. The hidden `worker` subcommand is the
//! sub-agent entry point spawned by the runner.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use wn_core::rpc::RpcServer;

mod runtime;

#[derive(Parser, Debug)]
#[clap(name = "wn", version, about = "wn LLM agent runtime")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, default_value = "info", help = "Log level for stderr")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the JSON-RPC agent runtime over stdin/stdout.
    Serve {
        #[clap(long, help = "Provider name overriding the configured default")]
        provider: Option<String>,

        #[clap(long, help = "Model name overriding the configured default")]
        model: Option<String>,

        #[clap(long, help = "Persona name overriding the configured default")]
        persona: Option<String>,
    },
    /// Sub-agent worker entry point (spawned internally).
    #[clap(hide = true)]
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .target(env_logger::Target::Stderr)
        .init();

    match cli.command {
        Commands::Serve {
            provider,
            model,
            persona,
        } => serve(provider, model, persona).await,
        Commands::Worker => {
            wn_core::subagent::worker::worker_main().await;
            Ok(())
        }
    }
}

async fn serve(
    provider: Option<String>,
    model: Option<String>,
    persona: Option<String>,
) -> Result<()> {
    // Outbound lines: responses and notifications, nothing else, to stdout.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let startup = match runtime::start(provider, model, persona, out_tx.clone()).await {
        Ok(startup) => startup,
        Err(e) => {
            log::error!("Startup failed: {}", e);
            eprintln!("wn: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("wn serving on stdio");

    // Inbound lines from stdin.
    let (in_tx, mut in_rx) = mpsc::channel::<String>(64);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if in_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let server = Arc::new(RpcServer::new(startup.runtime.clone(), out_tx));

    let shutdown_server = server.clone();
    let shutdown_runtime = startup.runtime.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_runtime.abort();
        shutdown_server.stop();
    });

    server.start(&mut in_rx).await;

    if let Some(mcp) = &startup.mcp {
        mcp.close_all().await;
    }
    // Handler clones keep the outbound channel open; bound the final drain.
    let _ = tokio::time::timeout(std::time::Duration::from_millis(500), writer).await;
    log::info!("wn shut down");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}
