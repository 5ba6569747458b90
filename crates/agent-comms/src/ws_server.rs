//! Minimal WebSocket agent endpoint
//!
//! Accepts clients and answers every text envelope through a [`Responder`],
//! acknowledging the request's `messageId`. Backs the CLI `demo-agent`
//! command and the transport tests.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::{CommsError, Envelope, Responder, Result};

/// Serve agent connections on `listener` until the task is aborted
pub async fn serve_agent(listener: TcpListener, responder: Arc<dyn Responder>) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|e| CommsError::transport(e.to_string()))?;
    tracing::info!("Agent endpoint listening on ws://{}", local);

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| CommsError::transport(format!("accept failed: {}", e)))?;
        tracing::debug!("Client connected from {}", peer);
        tokio::spawn(handle_client(stream, Arc::clone(&responder)));
    }
}

/// Bind `addr` and serve in a background task
///
/// Returns the bound address (useful with port 0) and the task handle.
pub async fn spawn_agent_server(
    addr: &str,
    responder: Arc<dyn Responder>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| CommsError::transport(format!("bind {} failed: {}", addr, e)))?;
    let bound = listener
        .local_addr()
        .map_err(|e| CommsError::transport(e.to_string()))?;

    let handle = tokio::spawn(async move {
        if let Err(e) = serve_agent(listener, responder).await {
            tracing::error!("Agent endpoint stopped: {}", e);
        }
    });

    Ok((bound, handle))
}

async fn handle_client(stream: TcpStream, responder: Arc<dyn Responder>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    let (mut sink, mut source) = ws_stream.split();

    while let Some(Ok(frame)) = source.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let request = match Envelope::from_json(&text) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Ignoring malformed envelope: {}", e);
                continue;
            }
        };

        let Some(reply) = responder.respond(&request.body()).await else {
            continue;
        };
        let reply = Envelope::reply_to(&request, reply);
        match reply.to_json() {
            Ok(json) => {
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!("Failed to encode reply: {}", e),
        }
    }
}
