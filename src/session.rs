use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::media::MediaSession;

/// Which side opened the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Transport-level connection state reported by the media capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Failed,
    Disconnected,
    Closed,
}

/// Lifecycle of one peer session.
///
/// `Failed`, `Disconnected` and `Closed` are absorbing: once reached, the
/// session is destroyed and the peer id returns to absent. A later rejoin
/// creates a brand-new session, never resurrects the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Creating,
    Negotiating,
    Connected,
    Failed,
    Disconnected,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Failed | SessionState::Disconnected | SessionState::Closed
        )
    }

    /// Applies a link-state report. Terminal states absorb everything.
    pub fn on_link(self, link: LinkState) -> SessionState {
        if self.is_terminal() {
            return self;
        }
        match link {
            LinkState::Connected => SessionState::Connected,
            LinkState::Failed => SessionState::Failed,
            LinkState::Disconnected => SessionState::Disconnected,
            LinkState::Closed => SessionState::Closed,
            LinkState::New | LinkState::Connecting => self,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Creating => write!(f, "creating"),
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// One remote participant, owned exclusively by the orchestrator's map.
pub struct PeerSession {
    pub peer_id: String,
    pub role: Role,
    pub state: SessionState,
    /// Remote audio has arrived.
    pub has_audio: bool,
    /// Already announced to the roster.
    pub visible: bool,
    pub handle: Arc<dyn MediaSession>,
    /// Event pump driving this session's state; aborted on teardown.
    pub pump: JoinHandle<()>,
}
