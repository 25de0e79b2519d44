use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::debug;

use crate::signal::SignalMessage;

/// Message-oriented duplex channel to the relay.
///
/// Undecodable inbound frames are dropped here; the orchestrator only ever
/// sees well-formed [`SignalMessage`]s.
pub struct SignalingClient {
    tx: mpsc::Sender<SignalMessage>,
    rx: mpsc::Receiver<SignalMessage>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (inbound_tx, inbound_rx) = mpsc::channel(100);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<SignalMessage>(100);

        // Handle outgoing messages
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        debug!("failed to encode outgoing message: {e}");
                        continue;
                    }
                };
                if write.send(json.into()).await.is_err() {
                    break;
                }
            }
        });

        // Handle incoming messages
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(_) => break,
                };
                let Ok(text) = msg.to_text() else { continue };
                match serde_json::from_str::<SignalMessage>(text) {
                    Ok(signal) => {
                        if inbound_tx.send(signal).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("ignoring unrecognized message: {e}"),
                }
            }
        });

        Ok(Self {
            tx: outgoing_tx,
            rx: inbound_rx,
        })
    }

    /// A cloneable outbound handle for the orchestrator and its sessions.
    pub fn sender(&self) -> mpsc::Sender<SignalMessage> {
        self.tx.clone()
    }

    pub async fn send(&self, msg: SignalMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| anyhow!("signaling connection closed"))
    }

    /// `None` once the relay connection is gone.
    pub async fn receive(&mut self) -> Option<SignalMessage> {
        self.rx.recv().await
    }
}
