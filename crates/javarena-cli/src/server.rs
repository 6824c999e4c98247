//! Connection layer
//!
//! Every accepted TCP socket is one connection: requests arrive as one JSON
//! object per line and events go back the same way.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use javarena::{ClientRequest, ConnectionId, Engine, EventReceiver};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub async fn serve(engine: Engine, listen: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to listen on {listen}"))?;
    info!(addr = %listener.local_addr().unwrap_or(listen), "listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("failed to accept connection")?;
                tokio::spawn(handle_connection(engine.clone(), stream, peer));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                engine.shutdown().await;
                return Ok(());
            }
        }
    }
}

async fn handle_connection(engine: Engine, stream: TcpStream, peer: SocketAddr) {
    let (read_half, write_half) = stream.into_split();
    let (conn, events) = engine.connect(ConnectionId::random()).await;
    info!(conn = %conn.id(), %peer, "connection accepted");

    let writer = tokio::spawn(forward_events(events, write_half));

    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ClientRequest>(&line) {
                    Ok(request) => conn.handle(request).await,
                    Err(e) => warn!(conn = %conn.id(), error = %e, "invalid request"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(conn = %conn.id(), error = %e, "read failed");
                break;
            }
        }
    }

    conn.disconnect().await;
    if let Err(e) = writer.await {
        warn!(error = %e, "event writer task failed");
    }
}

/// Write events as JSON lines until every sender is gone
async fn forward_events(mut events: EventReceiver, mut socket: OwnedWriteHalf) {
    while let Some(event) = events.recv().await {
        let mut line = match serde_json::to_vec(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to encode event");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = socket.write_all(&line).await {
            debug!(error = %e, "peer stopped reading events");
            break;
        }
    }
}
