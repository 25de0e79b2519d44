use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control messages exchanged through the relay.
///
/// The relay itself never interprets these; group filtering and the
/// `to == selfId` check happen on the receiving client. `sdp` and
/// `candidate` carry the negotiation library's own JSON object form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    Join {
        group: String,
        id: String,
    },
    Peers {
        peers: Vec<String>,
    },
    NewPeer {
        id: String,
    },
    PeerLeft {
        id: String,
    },
    Offer {
        to: String,
        from: String,
        sdp: Value,
    },
    Answer {
        to: String,
        from: String,
        sdp: Value,
    },
    Candidate {
        to: String,
        from: String,
        candidate: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_wire_format() {
        let msg = SignalMessage::Join {
            group: "team123".into(),
            id: "rider-1".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "join", "group": "team123", "id": "rider-1"}));
    }

    #[test]
    fn kebab_case_tags_decode() {
        let msg: SignalMessage =
            serde_json::from_str(r#"{"type":"new-peer","id":"rider-2"}"#).unwrap();
        assert_eq!(msg, SignalMessage::NewPeer { id: "rider-2".into() });

        let msg: SignalMessage =
            serde_json::from_str(r#"{"type":"peer-left","id":"rider-2"}"#).unwrap();
        assert_eq!(msg, SignalMessage::PeerLeft { id: "rider-2".into() });
    }

    #[test]
    fn offer_carries_description_object() {
        let raw = r#"{"type":"offer","to":"a","from":"b","sdp":{"type":"offer","sdp":"v=0"}}"#;
        match serde_json::from_str::<SignalMessage>(raw).unwrap() {
            SignalMessage::Offer { to, from, sdp } => {
                assert_eq!(to, "a");
                assert_eq!(from, "b");
                assert_eq!(sdp["sdp"], "v=0");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<SignalMessage>(r#"{"type":"ping"}"#).is_err());
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(serde_json::from_str::<SignalMessage>(r#"{"type":"offer","to":"a"}"#).is_err());
    }
}
