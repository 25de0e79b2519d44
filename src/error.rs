use thiserror::Error;

/// Fatal relay startup failures. Not retried; surfaced to the caller.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures inside offer/answer/candidate handling.
///
/// These degrade the single affected session and are never propagated to
/// other sessions or to the orchestrator's caller.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("malformed description or candidate: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("media engine: {0}")]
    Media(String),
}

impl From<webrtc::Error> for NegotiationError {
    fn from(err: webrtc::Error) -> Self {
        NegotiationError::Media(err.to_string())
    }
}
