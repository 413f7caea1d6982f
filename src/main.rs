mod adapter;
mod config;
mod connection;
mod error;
mod git;
mod handlers;
mod logstore;
mod protocol;
mod runner;
mod sandbox;
mod session;
mod state;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{parse_list, Args, Limits};
use sandbox::Sandbox;
use state::DaemonState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI arguments
    let args = Args::parse();

    // Determine token
    let token = if args.require_auth() {
        match &args.token {
            Some(t) => Some(t.clone()),
            None => {
                error!("Token required. Use --token or set WORKBENCH_DAEMON_TOKEN");
                std::process::exit(1);
            }
        }
    } else {
        warn!("Auth disabled (--insecure-no-auth). Do not use in production!");
        None
    };

    // Resolve and pin the workspace root
    let workspace = args.workspace_root();
    let workspace = workspace.canonicalize().map_err(|e| {
        error!("Workspace root not accessible: {} ({e})", workspace.display());
        e
    })?;
    if !workspace.is_dir() {
        error!("Workspace root is not a directory: {}", workspace.display());
        std::process::exit(1);
    }
    info!("Workspace root: {}", workspace.display());

    let sandbox = Sandbox::new(
        workspace,
        args.allowed_extensions.as_deref().map(parse_list),
        args.allowed_commands.as_deref().map(parse_list),
    );
    let limits = Limits::from_args(&args);

    // Create shared state
    let state = Arc::new(DaemonState::new(token, limits, sandbox));

    // Bind TCP listener
    let listener = TcpListener::bind(&args.listen).await?;
    info!("Listening on {}", args.listen);

    // Accept loop
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    connection::handle_client(stream, state).await;
                });
            }
            Err(e) => {
                error!("Accept error: {e}");
            }
        }
    }
}
