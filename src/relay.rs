use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::RelayError;

/// Bounded per-client outbound queue; a full queue means the slow client's
/// copy of a broadcast is abandoned, never awaited.
const OUTBOUND_QUEUE: usize = 64;

type Connections = Arc<Mutex<HashMap<u64, mpsc::Sender<Message>>>>;

/// The broadcast hub. It has no notion of groups or peers: every decodable
/// inbound message is rebroadcast verbatim to all other live connections.
pub struct Relay {
    listener: TcpListener,
    connections: Connections,
}

impl Relay {
    pub async fn bind(addr: &str) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| RelayError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            connections: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `stop` fires, then closes all live connections and
    /// releases the listening endpoint.
    pub async fn run(self, mut stop: oneshot::Receiver<()>) {
        let mut next_id: u64 = 0;
        loop {
            tokio::select! {
                _ = &mut stop => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            next_id += 1;
                            tokio::spawn(handle_connection(
                                next_id,
                                stream,
                                addr,
                                self.connections.clone(),
                            ));
                        }
                        Err(e) => warn!("accept failed: {e}"),
                    }
                }
            }
        }
        let mut connections = self.connections.lock().await;
        for (_, tx) in connections.drain() {
            let _ = tx.try_send(Message::Close(None));
        }
        info!("relay stopped");
    }
}

async fn handle_connection(id: u64, stream: TcpStream, addr: SocketAddr, connections: Connections) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%addr, "websocket handshake failed: {e}");
            return;
        }
    };
    let (mut write, mut read) = ws.split();

    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
    connections.lock().await.insert(id, tx);
    info!(%addr, conn = id, "client connected");

    // Writer pump; ends when the connection is dropped from the set.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(frame) = read.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(conn = id, "read error: {e}");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                // The relay is schema-unaware: any valid JSON goes out again.
                let value: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(conn = id, "dropping undecodable message: {e}");
                        continue;
                    }
                };
                broadcast(id, &value, &connections).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    connections.lock().await.remove(&id);
    writer.abort();
    info!(conn = id, "client disconnected");
}

/// Best-effort fan-out to everyone but the sender. A failure or a full
/// queue for one target never affects delivery to the rest.
async fn broadcast(sender: u64, value: &serde_json::Value, connections: &Connections) {
    let text = value.to_string();
    let connections = connections.lock().await;
    for (&conn, tx) in connections.iter() {
        if conn == sender {
            continue;
        }
        if tx.try_send(Message::Text(text.clone())).is_err() {
            warn!(conn, "dropping broadcast to slow client");
        }
    }
}
