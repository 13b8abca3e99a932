use futures::stream::StreamExt;
use futures::SinkExt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{
    InboundMessage, Outbound, Transport, TransportConnector, TransportEvent, TransportHandle,
    EVENT_CHANNEL_CAPACITY,
};
use crate::error::{SessionError, SessionResult};

/// How long the reader waits for the remote close reply by default
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// WebSocket transport connector
pub struct WebSocketConnector {
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Bound on the close handshake once we have sent our close frame
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }
}

#[async_trait::async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> SessionResult<Transport> {
        info!("Connecting to {}", endpoint);

        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| {
                SessionError::TransportError(format!(
                    "connection to {} timed out after {:?}",
                    endpoint, self.connect_timeout
                ))
            })?
            .map_err(|e| SessionError::TransportError(e.to_string()))?;

        info!("WebSocket connected");

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (handle, mut outbound_rx) = TransportHandle::channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        // Resolves (or is dropped) when the writer stops
        let (closing_tx, mut closing_rx) = oneshot::channel::<()>();

        // Writer task: drains the outbound channel onto the socket
        let writer_handle = handle.clone();
        tokio::spawn(async move {
            while let Some(outbound) = outbound_rx.recv().await {
                let result = match outbound {
                    Outbound::Audio(frame) => ws_tx.send(Message::Binary(frame)).await,
                    Outbound::Control(text) => ws_tx.send(Message::Text(text)).await,
                    Outbound::Close => {
                        debug!("Closing WebSocket");
                        if let Err(e) = ws_tx.close().await {
                            debug!("WebSocket close failed: {}", e);
                        }
                        let _ = closing_tx.send(());
                        break;
                    }
                };

                if let Err(e) = result {
                    warn!("Failed to send on WebSocket: {}", e);
                    writer_handle.mark_closed();
                    break;
                }
            }
            debug!("WebSocket writer stopped");
        });

        // Reader task: turns socket messages into transport events
        let reader_handle = handle.clone();
        let close_timeout = self.close_timeout;
        tokio::spawn(async move {
            let mut closed_sent = false;
            let mut close_deadline = None;

            loop {
                let next = match close_deadline {
                    Some(deadline) => match tokio::time::timeout_at(deadline, ws_rx.next()).await
                    {
                        Ok(next) => next,
                        Err(_) => {
                            warn!("No close reply within {:?}, dropping WebSocket", close_timeout);
                            break;
                        }
                    },
                    None => tokio::select! {
                        next = ws_rx.next() => next,
                        _ = &mut closing_rx => {
                            close_deadline = Some(tokio::time::Instant::now() + close_timeout);
                            continue;
                        }
                    },
                };
                let Some(message) = next else {
                    break;
                };

                let event = match message {
                    Ok(Message::Text(text)) => {
                        TransportEvent::Message(InboundMessage::Text(text.to_string()))
                    }
                    Ok(Message::Binary(data)) => {
                        TransportEvent::Message(InboundMessage::Binary(data.to_vec()))
                    }
                    Ok(Message::Close(frame)) => {
                        debug!("WebSocket closed by remote: {:?}", frame);
                        closed_sent = true;
                        TransportEvent::Closed
                    }
                    Ok(_) => continue, // Ping/pong are answered by tungstenite
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        TransportEvent::Error(e.to_string())
                    }
                };

                let terminal = !matches!(event, TransportEvent::Message(_));
                if events_tx.send(event).await.is_err() || terminal {
                    break;
                }
            }

            reader_handle.mark_closed();
            if !closed_sent {
                let _ = events_tx.send(TransportEvent::Closed).await;
            }
            debug!("WebSocket reader stopped");
        });

        Ok(Transport {
            handle,
            events: events_rx,
        })
    }
}
