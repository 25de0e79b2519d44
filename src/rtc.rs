use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::audio::{AudioCapture, AudioPlayback};
use crate::error::NegotiationError;
use crate::media::{MediaSession, MediaStack, SessionEvent};
use crate::session::LinkState;

/// Single public STUN hint; no further NAT traversal.
const STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// `webrtc`-crate implementation of the media capability: one shared opus
/// capture track, one `RTCPeerConnection` per session.
pub struct RtcMediaStack {
    api: API,
    audio_track: Arc<TrackLocalStaticSample>,
    capture: Mutex<Option<AudioCapture>>,
}

impl RtcMediaStack {
    pub async fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let api = APIBuilder::new().with_media_engine(media_engine).build();

        // Shared local audio track; every peer connection sends it.
        let audio_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "mesh-intercom".to_owned(),
        ));

        let track = audio_track.clone();
        let capture = tokio::task::spawn_blocking(move || AudioCapture::new(track)).await??;

        Ok(Self {
            api,
            audio_track,
            capture: Mutex::new(Some(capture)),
        })
    }

    fn config(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![STUN_SERVER.to_owned()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

#[async_trait]
impl MediaStack for RtcMediaStack {
    fn is_ready(&self) -> bool {
        // Capture is acquired in `new`; only release() takes it away.
        match self.capture.try_lock() {
            Ok(capture) => capture.is_some(),
            Err(_) => true,
        }
    }

    fn set_capture_enabled(&self, enabled: bool) {
        if let Ok(capture) = self.capture.try_lock() {
            if let Some(capture) = capture.as_ref() {
                capture.set_enabled(enabled);
            }
        }
    }

    async fn open_session(
        &self,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Arc<dyn MediaSession>, NegotiationError> {
        let peer_connection = Arc::new(self.api.new_peer_connection(self.config()).await?);

        peer_connection
            .add_track(Arc::clone(&self.audio_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        let playback = Arc::new(Mutex::new(None::<AudioPlayback>));

        // Remote audio: attach a playback sink and report arrival.
        let playback_slot = playback.clone();
        let ev = events.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                let playback_slot = playback_slot.clone();
                let ev = ev.clone();
                Box::pin(async move {
                    if track.kind() != RTPCodecType::Audio {
                        return;
                    }
                    let sink = tokio::task::spawn_blocking(move || AudioPlayback::new(track)).await;
                    match sink {
                        Ok(Ok(sink)) => {
                            *playback_slot.lock().await = Some(sink);
                            let _ = ev.send(SessionEvent::RemoteMedia).await;
                        }
                        Ok(Err(e)) => warn!("failed to start playback: {e}"),
                        Err(e) => warn!("playback setup task failed: {e}"),
                    }
                })
            },
        ));

        let ev = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let ev = ev.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => match serde_json::to_value(&init) {
                        Ok(value) => {
                            let _ = ev.send(SessionEvent::LocalCandidate(value)).await;
                        }
                        Err(e) => debug!("failed to encode candidate: {e}"),
                    },
                    Err(e) => debug!("failed to serialize candidate: {e}"),
                }
            })
        }));

        let ev = events;
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let ev = ev.clone();
                Box::pin(async move {
                    let _ = ev.send(SessionEvent::LinkChanged(link_state(state))).await;
                })
            },
        ));

        Ok(Arc::new(RtcSession {
            peer_connection,
            _playback: playback,
        }))
    }

    async fn release(&self) {
        self.capture.lock().await.take();
    }
}

fn link_state(state: RTCPeerConnectionState) -> LinkState {
    match state {
        RTCPeerConnectionState::New => LinkState::New,
        RTCPeerConnectionState::Connecting => LinkState::Connecting,
        RTCPeerConnectionState::Connected => LinkState::Connected,
        RTCPeerConnectionState::Failed => LinkState::Failed,
        RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
        RTCPeerConnectionState::Closed | RTCPeerConnectionState::Unspecified => LinkState::Closed,
    }
}

struct RtcSession {
    peer_connection: Arc<RTCPeerConnection>,
    /// Keeps the remote audio sink alive for the session's lifetime.
    _playback: Arc<Mutex<Option<AudioPlayback>>>,
}

#[async_trait]
impl MediaSession for RtcSession {
    async fn create_offer(&self) -> Result<Value, NegotiationError> {
        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection.set_local_description(offer.clone()).await?;
        Ok(serde_json::to_value(&offer)?)
    }

    async fn create_answer(&self) -> Result<Value, NegotiationError> {
        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection.set_local_description(answer.clone()).await?;
        Ok(serde_json::to_value(&answer)?)
    }

    async fn set_remote_description(&self, sdp: Value) -> Result<(), NegotiationError> {
        let description: RTCSessionDescription = serde_json::from_value(sdp)?;
        self.peer_connection.set_remote_description(description).await?;
        Ok(())
    }

    async fn add_candidate(&self, candidate: Value) -> Result<(), NegotiationError> {
        let init: RTCIceCandidateInit = serde_json::from_value(candidate)?;
        self.peer_connection.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.peer_connection.close().await {
            debug!("error closing peer connection: {e}");
        }
    }
}
