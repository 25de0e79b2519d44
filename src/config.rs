use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_PEERS: usize = 6;

/// Join credentials carried in the QR payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinConfig {
    /// Signaling relay URL, e.g. `ws://192.168.43.1:8080`.
    pub signaling: String,
    pub mesh_group: String,
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
}

fn default_max_peers() -> usize {
    DEFAULT_MAX_PEERS
}

impl JoinConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_payload() {
        let cfg =
            JoinConfig::from_json(r#"{"signaling":"ws://10.0.0.1:8080","meshGroup":"team123","maxPeers":4}"#)
                .unwrap();
        assert_eq!(cfg.signaling, "ws://10.0.0.1:8080");
        assert_eq!(cfg.mesh_group, "team123");
        assert_eq!(cfg.max_peers, 4);
    }

    #[test]
    fn max_peers_defaults_to_six() {
        let cfg = JoinConfig::from_json(r#"{"signaling":"ws://10.0.0.1:8080","meshGroup":"g"}"#)
            .unwrap();
        assert_eq!(cfg.max_peers, DEFAULT_MAX_PEERS);
    }

    #[test]
    fn missing_group_is_an_error() {
        assert!(JoinConfig::from_json(r#"{"signaling":"ws://10.0.0.1:8080"}"#).is_err());
    }
}
