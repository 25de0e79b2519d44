use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mesh_intercom::config::JoinConfig;
use mesh_intercom::mesh::{Mesh, MeshEvent};
use mesh_intercom::relay::Relay;
use mesh_intercom::rtc::RtcMediaStack;
use mesh_intercom::signaling::SignalingClient;

const DEFAULT_RELAY_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("relay") => run_relay(args.next()).await,
        Some("join") => run_join(args.next()).await,
        _ => {
            eprintln!("usage: mesh-intercom relay [addr] | join <config.json>");
            std::process::exit(2);
        }
    }
}

async fn run_relay(addr: Option<String>) -> Result<()> {
    let addr = addr.unwrap_or_else(|| DEFAULT_RELAY_ADDR.to_string());
    let relay = Relay::bind(&addr).await?;
    info!("relay listening on {}", relay.local_addr()?);

    let (stop_tx, stop_rx) = oneshot::channel();
    let serving = tokio::spawn(relay.run(stop_rx));

    tokio::signal::ctrl_c().await?;
    let _ = stop_tx.send(());
    let _ = serving.await;
    Ok(())
}

async fn run_join(path: Option<String>) -> Result<()> {
    let path = path.context("missing join config path")?;
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {path}"))?;
    let config = JoinConfig::from_json(&raw).context("parsing join config")?;

    let self_id = format!("rider-{:08x}", rand::random::<u32>());
    let media = Arc::new(RtcMediaStack::new().await?);
    let mut signaling = SignalingClient::connect(&config.signaling)
        .await
        .with_context(|| format!("connecting to {}", config.signaling))?;

    let (event_tx, mut event_rx) = mpsc::channel(32);
    let mesh = Mesh::new(
        self_id.clone(),
        config.mesh_group.clone(),
        config.max_peers,
        media,
        signaling.sender(),
        event_tx,
    );
    mesh.join().await?;
    info!(group = %config.mesh_group, id = %self_id, "joined mesh");

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                MeshEvent::PeerVisible(id) => info!(peer = %id, "rider connected"),
                MeshEvent::PeerGone(id) => info!(peer = %id, "rider gone"),
                MeshEvent::CapacityFull { limit } => {
                    warn!("team full: this mesh supports up to {limit} riders")
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            msg = signaling.receive() => match msg {
                Some(msg) => mesh.handle_signal(msg).await,
                None => {
                    warn!("signaling connection closed");
                    break;
                }
            },
        }
    }

    mesh.shutdown().await;
    Ok(())
}
