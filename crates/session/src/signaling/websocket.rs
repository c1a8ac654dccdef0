//! WebSocket relay client
//!
//! Connects to the relay over WebSocket and bridges it onto channels: a
//! sender task drains an outgoing queue, a receiver task decodes inbound
//! frames onto the channel consumed by the session coordinator.

use super::protocol::RelayMessage;
use super::SignalingRelay;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket implementation of the signaling relay
pub struct WebSocketRelay {
    /// Outgoing frame queue drained by the sender task
    tx: mpsc::UnboundedSender<Message>,
}

impl WebSocketRelay {
    /// Connect to the relay
    ///
    /// Establishes the WebSocket connection and starts the background
    /// sender/receiver tasks. Returns the relay handle together with the
    /// inbound event receiver to hand to the session coordinator.
    ///
    /// # Arguments
    ///
    /// * `url` - Relay URL (ws:// or wss://)
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<RelayMessage>)> {
        info!("Connecting to signaling relay: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Signaling(format!("Failed to connect to relay: {}", e)))?;

        info!("Connected to signaling relay");

        let (write, read) = ws_stream.split();

        let (tx, rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, inbound_tx));

        Ok((Self { tx }, inbound_rx))
    }

    /// Sender task: drains queued frames into the WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send relay frame: {}", e);
                break;
            }
        }

        debug!("Relay sender task terminated");
    }

    /// Receiver task: decodes inbound frames onto the event channel
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        inbound_tx: mpsc::UnboundedSender<RelayMessage>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match RelayMessage::from_json(&text) {
                    Ok(message) => {
                        if inbound_tx.send(message).is_err() {
                            debug!("Inbound event receiver dropped, stopping relay reader");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Ignoring malformed relay frame: {}", e);
                    }
                },
                Ok(Message::Close(_)) => {
                    info!("Relay connection closed");
                    break;
                }
                Err(e) => {
                    error!("Relay connection error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        debug!("Relay receiver task terminated");
    }
}

#[async_trait::async_trait]
impl SignalingRelay for WebSocketRelay {
    async fn send(&self, message: RelayMessage) -> Result<()> {
        let json = message.to_json()?;
        self.tx
            .send(Message::Text(json))
            .map_err(|_| Error::Signaling("Relay channel is closed".to_string()))
    }
}
