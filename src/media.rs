use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::NegotiationError;
use crate::session::LinkState;

/// Events emitted by one media session toward its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A remote audio track arrived; the implementation has attached its sink.
    RemoteMedia,
    /// A local connectivity candidate was gathered and should be relayed.
    LocalCandidate(Value),
    LinkChanged(LinkState),
}

/// One peer's negotiation handle.
///
/// Descriptions and candidates travel as the negotiation library's JSON
/// object form, matching what goes on the wire unmodified.
#[async_trait]
pub trait MediaSession: Send + Sync {
    async fn create_offer(&self) -> Result<Value, NegotiationError>;
    async fn create_answer(&self) -> Result<Value, NegotiationError>;
    async fn set_remote_description(&self, sdp: Value) -> Result<(), NegotiationError>;
    async fn add_candidate(&self, candidate: Value) -> Result<(), NegotiationError>;
    async fn close(&self);
}

/// The injected media capability: local audio source plus session factory.
#[async_trait]
pub trait MediaStack: Send + Sync {
    /// Whether the local audio source is ready; sessions are refused until it is.
    fn is_ready(&self) -> bool;

    /// Gates outgoing audio. No signaling side effect.
    fn set_capture_enabled(&self, enabled: bool);

    /// Opens a fresh negotiation session wired to the given event channel.
    async fn open_session(
        &self,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Arc<dyn MediaSession>, NegotiationError>;

    /// Releases the local audio source.
    async fn release(&self);
}
