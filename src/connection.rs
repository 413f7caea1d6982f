use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::handlers;
use crate::protocol::{ErrorResponse, Request, AUTH_REQUIRED, INVALID_PARAMS, METHOD_AUTH};
use crate::state::{ClientId, DaemonState};

const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle a single client connection
pub async fn handle_client(stream: TcpStream, state: Arc<DaemonState>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    info!("Client connected: {peer}");

    let (client_id, event_rx) = state.register_client().await;
    debug!("Assigned client_id={client_id} to {peer}");

    if let Err(e) = handle_client_inner(stream, state.clone(), client_id, event_rx).await {
        debug!("Client {peer} error: {e}");
    }

    info!("Client disconnected: {peer}");
    state.unregister_client(client_id).await;
}

async fn handle_client_inner(
    stream: TcpStream,
    state: Arc<DaemonState>,
    client_id: ClientId,
    mut event_rx: mpsc::UnboundedReceiver<String>,
) -> Result<(), String> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // Auth phase. Skipped entirely when no token is configured.
    if state.token.is_some() {
        match timeout(AUTH_TIMEOUT, wait_for_auth(&mut reader, &mut writer, &state)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Auth error: {e}");
                return Err(e);
            }
            Err(_) => {
                warn!("Auth timeout for client {client_id}");
                return Err("Auth timeout".to_string());
            }
        }
    }

    // Main loop: read requests and forward events
    loop {
        tokio::select! {
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            let response = process_request(trimmed, state.clone()).await;
                            if let Err(e) = write_line(&mut writer, &response).await {
                                error!("Failed to write response: {e}");
                                break;
                            }
                        }
                        line.clear();
                    }
                    Err(e) => {
                        debug!("Read error: {e}");
                        break;
                    }
                }
            }

            Some(event) = event_rx.recv() => {
                if let Err(e) = write_line(&mut writer, &event).await {
                    error!("Failed to write event: {e}");
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Wait for a successful auth request. Failed attempts get an error
/// response and the client may retry until the caller's timeout fires.
async fn wait_for_auth(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    state: &DaemonState,
) -> Result<(), String> {
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => return Err("Connection closed".to_string()),
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let request: Request = match serde_json::from_str(trimmed) {
                    Ok(r) => r,
                    Err(e) => {
                        let resp =
                            ErrorResponse::new(0, INVALID_PARAMS, format!("Invalid JSON: {e}"));
                        let json = serde_json::to_string(&resp).unwrap_or_default();
                        let _ = write_line(writer, &json).await;
                        continue;
                    }
                };

                if request.method == METHOD_AUTH {
                    let response = handlers::auth::handle(&request, state).await;
                    let _ = write_line(writer, &response).await;

                    if response.contains("\"ok\":true") {
                        return Ok(());
                    }
                    // Failed attempt; the client may retry.
                } else {
                    let resp = ErrorResponse::new(
                        request.id,
                        AUTH_REQUIRED,
                        "Authentication required. Send auth request first.",
                    );
                    let json = serde_json::to_string(&resp).unwrap_or_default();
                    let _ = write_line(writer, &json).await;
                }
            }
            Err(e) => return Err(format!("Read error: {e}")),
        }
    }
}

/// Process a single request and return the JSON response line
async fn process_request(line: &str, state: Arc<DaemonState>) -> String {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            let resp = ErrorResponse::new(0, INVALID_PARAMS, format!("Invalid JSON: {e}"));
            return serde_json::to_string(&resp).unwrap_or_default();
        }
    };

    handlers::dispatch(&request, state).await
}

async fn write_line(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    payload: &str,
) -> std::io::Result<()> {
    writer.write_all(payload.as_bytes()).await?;
    writer.write_all(b"\n").await
}
