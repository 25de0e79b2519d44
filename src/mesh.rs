use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::media::{MediaSession, MediaStack, SessionEvent};
use crate::session::{PeerSession, Role, SessionState};
use crate::signal::SignalMessage;

/// Notifications for the surrounding application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// The peer is connected (or its audio arrived) and belongs in the roster.
    PeerVisible(String),
    PeerGone(String),
    /// The group has more members than the local ceiling allows.
    CapacityFull { limit: usize },
}

struct MeshInner {
    self_id: String,
    group: String,
    max_peers: usize,
    media: Arc<dyn MediaStack>,
    outbound: mpsc::Sender<SignalMessage>,
    events: mpsc::Sender<MeshEvent>,
    /// Owned exclusively here; all mutation goes through `handle_signal`
    /// and the per-session event pumps.
    sessions: Mutex<HashMap<String, PeerSession>>,
    muted: AtomicBool,
}

/// Per-client mesh orchestrator.
///
/// Interprets relayed [`SignalMessage`]s as a mesh-call protocol: one
/// [`PeerSession`] per remote member, capacity capped at `max_peers - 1`
/// concurrent sessions, each session an independent unit of concurrency.
#[derive(Clone)]
pub struct Mesh {
    inner: Arc<MeshInner>,
}

impl Mesh {
    pub fn new(
        self_id: String,
        group: String,
        max_peers: usize,
        media: Arc<dyn MediaStack>,
        outbound: mpsc::Sender<SignalMessage>,
        events: mpsc::Sender<MeshEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(MeshInner {
                self_id,
                group,
                max_peers,
                media,
                outbound,
                events,
                sessions: Mutex::new(HashMap::new()),
                muted: AtomicBool::new(false),
            }),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.inner.self_id
    }

    /// Announces membership. Fire-and-forget; the relay does not acknowledge.
    pub async fn join(&self) -> anyhow::Result<()> {
        self.inner
            .outbound
            .send(SignalMessage::Join {
                group: self.inner.group.clone(),
                id: self.inner.self_id.clone(),
            })
            .await
            .map_err(|_| anyhow::anyhow!("signaling connection closed"))
    }

    /// Single entry point for everything the relay delivers.
    pub async fn handle_signal(&self, msg: SignalMessage) {
        match msg {
            // Our own join announcement comes back around; nothing to do.
            SignalMessage::Join { .. } => {}
            SignalMessage::Peers { peers } => self.on_peers(peers).await,
            SignalMessage::NewPeer { id } => self.on_new_peer(id).await,
            SignalMessage::PeerLeft { id } => self.on_peer_left(&id).await,
            SignalMessage::Offer { to, from, sdp } => {
                if to == self.inner.self_id && from != self.inner.self_id {
                    self.on_offer(from, sdp).await;
                }
            }
            SignalMessage::Answer { to, from, sdp } => {
                if to == self.inner.self_id && from != self.inner.self_id {
                    self.on_answer(from, sdp).await;
                }
            }
            SignalMessage::Candidate { to, from, candidate } => {
                if to == self.inner.self_id && from != self.inner.self_id {
                    self.on_candidate(&from, candidate).await;
                }
            }
        }
    }

    async fn on_peers(&self, peers: Vec<String>) {
        let remote: Vec<String> = peers
            .into_iter()
            .filter(|id| *id != self.inner.self_id)
            .collect();

        // Surface the ceiling breach whether or not any sessions get made.
        if remote.len() + 1 > self.inner.max_peers {
            let _ = self
                .inner
                .events
                .send(MeshEvent::CapacityFull {
                    limit: self.inner.max_peers,
                })
                .await;
        }

        let space = self.inner.max_peers.saturating_sub(1);
        for peer_id in remote {
            if self.live_count().await >= space {
                debug!(%peer_id, "ignoring discovered peer (capacity)");
                continue;
            }
            self.create_peer(&peer_id, Role::Initiator).await;
        }
    }

    async fn on_new_peer(&self, id: String) {
        if id == self.inner.self_id {
            return;
        }
        if self.live_count().await < self.inner.max_peers.saturating_sub(1) {
            self.create_peer(&id, Role::Initiator).await;
        } else {
            debug!(peer_id = %id, "ignoring new peer (capacity)");
        }
    }

    async fn on_peer_left(&self, id: &str) {
        if self.remove_session(id).await {
            info!(peer_id = %id, "peer left");
        }
    }

    async fn on_offer(&self, from: String, sdp: Value) {
        // Glare: both sides initiated at once. The lexicographically smaller
        // id yields and answers; the larger one lets its own offer stand.
        let glare = {
            let sessions = self.inner.sessions.lock().await;
            sessions
                .get(&from)
                .map(|s| s.role == Role::Initiator && !s.state.is_terminal())
                .unwrap_or(false)
        };
        if glare {
            if self.inner.self_id < from {
                info!(peer_id = %from, "competing offers, yielding to remote");
                self.remove_session(&from).await;
            } else {
                debug!(peer_id = %from, "competing offers, keeping local offer");
                return;
            }
        }

        let Some(handle) = self.create_peer(&from, Role::Responder).await else {
            return;
        };
        let answer = async {
            handle.set_remote_description(sdp).await?;
            handle.create_answer().await
        }
        .await;
        match answer {
            Ok(answer) => {
                let _ = self
                    .inner
                    .outbound
                    .send(SignalMessage::Answer {
                        to: from.clone(),
                        from: self.inner.self_id.clone(),
                        sdp: answer,
                    })
                    .await;
                self.mark_negotiating(&from).await;
            }
            Err(e) => {
                warn!(peer_id = %from, "offer handling failed: {e}");
                self.remove_session(&from).await;
            }
        }
    }

    async fn on_answer(&self, from: String, sdp: Value) {
        let Some(handle) = self.create_peer(&from, Role::Responder).await else {
            return;
        };
        if let Err(e) = handle.set_remote_description(sdp).await {
            warn!(peer_id = %from, "answer handling failed: {e}");
            self.remove_session(&from).await;
        } else {
            self.mark_negotiating(&from).await;
        }
    }

    /// Promotes a freshly created session once its first negotiation step
    /// lands. Any later state wins over the promotion.
    async fn mark_negotiating(&self, peer_id: &str) {
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(session) = sessions.get_mut(peer_id) {
            if session.state == SessionState::Creating {
                session.state = SessionState::Negotiating;
            }
        }
    }

    async fn on_candidate(&self, from: &str, candidate: Value) {
        // Candidates racing session teardown are expected; drop them.
        let handle = {
            let sessions = self.inner.sessions.lock().await;
            sessions.get(from).map(|s| s.handle.clone())
        };
        let Some(handle) = handle else {
            debug!(peer_id = %from, "candidate for unknown session, dropping");
            return;
        };
        if let Err(e) = handle.add_candidate(candidate).await {
            warn!(peer_id = %from, "failed to apply candidate: {e}");
        }
    }

    /// Creates (or returns) the session for `peer_id`.
    ///
    /// No-op while the local audio source is not ready. Idempotent: an
    /// existing session is returned unchanged and no duplicate offer is sent.
    pub async fn create_peer(&self, peer_id: &str, role: Role) -> Option<Arc<dyn MediaSession>> {
        if !self.inner.media.is_ready() {
            warn!(%peer_id, "local audio not ready, refusing session");
            return None;
        }

        let handle = {
            let mut sessions = self.inner.sessions.lock().await;
            if let Some(existing) = sessions.get(peer_id) {
                return Some(existing.handle.clone());
            }
            let (event_tx, event_rx) = mpsc::channel(32);
            let handle = match self.inner.media.open_session(event_tx).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(%peer_id, "failed to open media session: {e}");
                    return None;
                }
            };
            let pump = tokio::spawn(self.clone().pump_events(peer_id.to_string(), event_rx));
            sessions.insert(
                peer_id.to_string(),
                PeerSession {
                    peer_id: peer_id.to_string(),
                    role,
                    state: SessionState::Creating,
                    has_audio: false,
                    visible: false,
                    handle: handle.clone(),
                    pump,
                },
            );
            handle
        };

        if role == Role::Initiator {
            match handle.create_offer().await {
                Ok(sdp) => {
                    let _ = self
                        .inner
                        .outbound
                        .send(SignalMessage::Offer {
                            to: peer_id.to_string(),
                            from: self.inner.self_id.clone(),
                            sdp,
                        })
                        .await;
                    self.mark_negotiating(peer_id).await;
                }
                Err(e) => {
                    warn!(%peer_id, "offer creation failed: {e}");
                    self.remove_session(peer_id).await;
                    return None;
                }
            }
        }
        Some(handle)
    }

    /// Consumes one session's media events until teardown.
    async fn pump_events(self, peer_id: String, mut events: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::RemoteMedia => {
                    let mut sessions = self.inner.sessions.lock().await;
                    if let Some(session) = sessions.get_mut(&peer_id) {
                        session.has_audio = true;
                        if !session.visible {
                            session.visible = true;
                            drop(sessions);
                            let _ = self
                                .inner
                                .events
                                .send(MeshEvent::PeerVisible(peer_id.clone()))
                                .await;
                        }
                    }
                }
                SessionEvent::LocalCandidate(candidate) => {
                    let _ = self
                        .inner
                        .outbound
                        .send(SignalMessage::Candidate {
                            to: peer_id.clone(),
                            from: self.inner.self_id.clone(),
                            candidate,
                        })
                        .await;
                }
                SessionEvent::LinkChanged(link) => {
                    let mut announce = false;
                    let mut teardown = false;
                    {
                        let mut sessions = self.inner.sessions.lock().await;
                        if let Some(session) = sessions.get_mut(&peer_id) {
                            session.state = session.state.on_link(link);
                            if session.state == SessionState::Connected && !session.visible {
                                session.visible = true;
                                announce = true;
                            }
                            teardown = session.state.is_terminal();
                        }
                    }
                    if announce {
                        let _ = self
                            .inner
                            .events
                            .send(MeshEvent::PeerVisible(peer_id.clone()))
                            .await;
                    }
                    if teardown {
                        info!(%peer_id, ?link, "session reached terminal state");
                        self.remove_session(&peer_id).await;
                        return;
                    }
                }
            }
        }
    }

    /// Unconditional teardown: closes the handle, cancels the pump, removes
    /// the session from the map and from the roster.
    async fn remove_session(&self, peer_id: &str) -> bool {
        let Some(session) = self.inner.sessions.lock().await.remove(peer_id) else {
            return false;
        };
        session.handle.close().await;
        if session.visible {
            let _ = self
                .inner
                .events
                .send(MeshEvent::PeerGone(peer_id.to_string()))
                .await;
        }
        // Last, so a pump tearing itself down still finishes this function.
        session.pump.abort();
        true
    }

    /// Flips the local mute flag and gates outgoing audio. Returns the new
    /// muted state. Peers are not notified.
    pub fn toggle_mute(&self) -> bool {
        // Single atomic flip so concurrent toggles never collapse into one.
        let muted = !self.inner.muted.fetch_xor(true, Ordering::Relaxed);
        self.inner.media.set_capture_enabled(!muted);
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::Relaxed)
    }

    /// Ids with a live session, for the roster and for tests.
    pub async fn live_peers(&self) -> Vec<String> {
        let sessions = self.inner.sessions.lock().await;
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn session_state(&self, peer_id: &str) -> Option<SessionState> {
        let sessions = self.inner.sessions.lock().await;
        sessions.get(peer_id).map(|s| s.state)
    }

    async fn live_count(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    /// Tears everything down, even mid-negotiation: capture off, every
    /// session closed, audio source released.
    pub async fn shutdown(&self) {
        self.inner.media.set_capture_enabled(false);
        let drained: Vec<PeerSession> = {
            let mut sessions = self.inner.sessions.lock().await;
            sessions.drain().map(|(_, s)| s).collect()
        };
        for session in drained {
            session.pump.abort();
            session.handle.close().await;
        }
        self.inner.media.release().await;
        info!("mesh shut down");
    }
}
