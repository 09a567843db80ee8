//! Binary entry point: parses CLI arguments, initializes tracing, loads
//! configuration, and either runs the long-running HTTP server or, in
//! `optimize` subcommand mode, drives the router for a single prompt and
//! exits with a stable status-code contract.
//!
//! ## Usage
//!
//! ```bash
//! # Long-running server
//! relay-server --config relay.toml --host 0.0.0.0 --port 8080
//!
//! # One-shot CLI mode
//! relay-server optimize "summarize this document"
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use relay_core::{ErrorKind, Request};
use relay_server::config::Config;
use relay_server::server::{app_from_state, build_state};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Port number for the HTTP server. Ignored in `optimize` mode.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Host address to bind the server to. Ignored in `optimize` mode.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Logging level, e.g. trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Route a single prompt through the backend router and print the
    /// response, without starting the HTTP server.
    Optimize {
        prompt: String,
        #[arg(long)]
        preferred_backend: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

/// Exit codes: 0 success, 1 user error, 2 `NoHealthyBackend`,
/// 3 `DeadlineExceeded`, 4 `Overloaded`, 5 internal error.
fn exit_code_for(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::NoHealthyBackend => 2,
        ErrorKind::DeadlineExceeded => 3,
        ErrorKind::Overloaded => 4,
        ErrorKind::ValidationError => 1,
        _ => 5,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt().with_env_filter(&args.log_level).init();

    let config = Config::load(&args.config)?;

    match args.command {
        Some(Command::Optimize { prompt, preferred_backend, timeout_ms }) => {
            run_optimize_once(config, prompt, preferred_backend, timeout_ms).await
        }
        None => run_server(config, &args.host, args.port).await,
    }
}

async fn run_optimize_once(
    config: Config,
    prompt: String,
    preferred_backend: Option<String>,
    timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let state = build_state(config).await?;

    if prompt.trim().is_empty() {
        eprintln!("error: prompt must not be empty");
        std::process::exit(1);
    }

    let mut options = relay_core::RequestOptions::default();
    options.preferred_backend = preferred_backend;
    if let Some(ms) = timeout_ms {
        options.deadline = Some(std::time::Instant::now() + Duration::from_millis(ms));
    }
    let request = Request::new(prompt).with_options(options);

    let outcome = state.router.optimize(request).await;
    state.stop_health_monitor();
    state.pool.shutdown(Duration::from_secs(1)).await;

    match outcome {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error [{}]: {}", err.kind(), err);
            std::process::exit(exit_code_for(err.kind()));
        }
    }
}

async fn run_server(config: Config, host: &str, port: u16) -> anyhow::Result<()> {
    let shutdown_grace = config.server.shutdown_grace;
    let state = build_state(config).await?;
    let pool = state.pool.clone();
    let health_state = state.clone();
    let app = app_from_state(state);

    let addr = SocketAddr::new(host.parse()?, port);
    tracing::info!(%addr, "starting relay-server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("draining in-flight pool requests before exit");
    health_state.stop_health_monitor();
    pool.shutdown(shutdown_grace).await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, stopping admission");
}
