use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;
use thrum_runtime::{Daemon, ThrumPaths};
use thrum_rpc::RpcServer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::info;

use crate::args::{Cli, Commands};
use crate::exit_codes;

pub fn run(cli: Cli) -> Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    let repo_root = match &cli.repo {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().context("cannot determine current directory")?,
    };

    let runtime = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Daemon => runtime.block_on(run_daemon(repo_root)),
        Commands::Status { json } => runtime.block_on(run_status(repo_root, json)),
    }
}

async fn run_daemon(repo_root: PathBuf) -> Result<i32> {
    let daemon = Daemon::open(&repo_root)
        .with_context(|| format!("opening thrum state under {}", repo_root.display()))?;
    daemon.start_background()?;

    let server = RpcServer::bind(daemon.clone()).await?;
    info!("thrum daemon ready");

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    daemon.shutdown();
    Ok(exit_codes::OK)
}

async fn run_status(repo_root: PathBuf, json: bool) -> Result<i32> {
    let paths = ThrumPaths::resolve(&repo_root)?;
    let socket_path = paths.socket_path();

    let stream = match UnixStream::connect(&socket_path).await {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("daemon unavailable at {}: {}", socket_path.display(), err);
            return Ok(exit_codes::DAEMON_UNAVAILABLE);
        }
    };
    let (read, mut write) = stream.into_split();

    write
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"health.get\"}\n")
        .await?;
    let mut lines = BufReader::new(read).lines();
    let line = lines
        .next_line()
        .await?
        .context("daemon closed the connection")?;

    let response: Value = serde_json::from_str(&line).context("invalid health response")?;
    let report = response
        .get("result")
        .context("health.get returned an error")?;

    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        let sync_state = report["sync_state"].as_str().unwrap_or("unknown");
        println!(
            "daemon ok; uptime {}s; sync {}; {} events projected; {} agents",
            report["uptime_secs"], sync_state, report["projection"]["applied_events"],
            report["projection"]["agents"],
        );
    }

    let degraded = report["sync_state"].as_str() == Some("degraded");
    Ok(if degraded {
        exit_codes::SYNC_DEGRADED
    } else {
        exit_codes::OK
    })
}
