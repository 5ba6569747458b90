//! WebSocket transport for remote agents

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, WebSocketStream};

use crate::transport::{connection_channels, Connection, Connector, EventStream, PumpChannels};
use crate::{AgentAddress, CommsError, Envelope, Result};

/// WebSocket connector
///
/// Envelopes travel as JSON text frames. Frames that do not parse as an
/// envelope are logged and skipped; they never close the connection.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(
        &self,
        address: &AgentAddress,
        connect_timeout: Duration,
    ) -> Result<(Connection, EventStream)> {
        let url = address.ws_url().ok_or_else(|| {
            CommsError::transport(format!("agent '{}' has no network endpoint", address.id))
        })?;

        tracing::debug!("Connecting to {} at {}", address.id, url);
        let (stream, _response) = timeout(connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| CommsError::ConnectTimeout(connect_timeout))?
            .map_err(|e| CommsError::transport(format!("connect to {} failed: {}", url, e)))?;

        let (connection, events, pump) = connection_channels(&address.id);
        tracing::info!("Connected to {} ({})", address.id, connection.id());
        tokio::spawn(ws_pump(stream, pump, address.id.clone()));

        Ok((connection, events))
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

async fn ws_pump<S>(stream: WebSocketStream<S>, mut pump: PumpChannels, agent_id: String)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut sink, mut source) = stream.split();

    let reason = loop {
        tokio::select! {
            _ = &mut pump.shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                break "closed locally".to_string();
            }
            outbound = pump.outbound.recv() => {
                let Some(envelope) = outbound else {
                    let _ = sink.send(Message::Close(None)).await;
                    break "closed locally".to_string();
                };
                match envelope.to_json() {
                    Ok(json) => {
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            break format!("send failed: {}", e);
                        }
                    }
                    Err(e) => tracing::warn!("Dropping unserializable envelope for {}: {}", agent_id, e),
                }
            }
            inbound = source.next() => match inbound {
                Some(Ok(Message::Text(text))) => match Envelope::from_json(&text) {
                    Ok(envelope) => pump.deliver(envelope),
                    Err(e) => tracing::warn!("Skipping malformed frame from {}: {}", agent_id, e),
                },
                Some(Ok(Message::Close(_))) => break "closed by agent".to_string(),
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("read failed: {}", e),
                None => break "stream ended".to_string(),
            },
        }
    };

    tracing::debug!("Connection to {} finished: {}", agent_id, reason);
    pump.finish(reason);
}
