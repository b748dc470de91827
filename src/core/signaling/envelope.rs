//! Signaling wire protocol: typed envelopes and the fail-closed parser.
//!
//! Every message to or from the relay is one of these JSON shapes:
//!
//! ```json
//! { "type": "link", "target": "<PIN>" }
//! { "type": "accept-link" }
//! { "type": "link-signal", "data": { "signal-type": "offer", "sdp": "…" } }
//! { "type": "link-signal", "data": { "signal-type": "answer", "sdp": "…" } }
//! { "type": "link-signal", "data": { "signal-type": "ice-candidate", "candidate": { … } } }
//! ```
//!
//! The payloads are tagged unions validated at this boundary: malformed
//! JSON, unknown `type`, and unknown `signal-type` all parse to "no
//! message" and are dropped by the caller. Nothing downstream ever sees
//! an untyped payload.

use serde::{Deserialize, Serialize};
use tracing::debug;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// One signaling-relay message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingEnvelope {
    /// Request to pair with the session identified by `target`.
    Link { target: String },
    /// Relay confirms pairing; the recipient becomes the offering side.
    AcceptLink,
    /// Forwarded SDP offer/answer or ICE candidate.
    LinkSignal { data: SignalPayload },
}

/// The `data` of a `link-signal` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal-type", rename_all = "kebab-case")]
pub enum SignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate { candidate: RTCIceCandidateInit },
}

/// Parse one inbound relay message.
///
/// Fails closed: any input that is not a well-formed, known envelope
/// yields `None`. The raw text is logged at debug level so protocol
/// drift is diagnosable without crashing anything.
pub fn parse_envelope(raw: &str) -> Option<SignalingEnvelope> {
    match serde_json::from_str(raw) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            debug!(event = "envelope_dropped", error = %e, "Dropping unparseable signaling message");
            None
        }
    }
}

/// Serialize an envelope for the wire.
pub fn encode_envelope(envelope: &SignalingEnvelope) -> String {
    // The envelope types contain nothing unserializable; a failure here
    // would be a serde_json bug, so fall back to an empty object rather
    // than panicking inside a send path.
    serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malformed_json_parses_to_none() {
        for raw in ["", "not json", "{\"type\":", "[1,2,3]", "42", "null"] {
            assert!(parse_envelope(raw).is_none(), "accepted: {raw:?}");
        }
    }

    #[test]
    fn unknown_type_is_dropped() {
        assert!(parse_envelope(r#"{"type":"blast","target":"AB12"}"#).is_none());
        assert!(parse_envelope(r#"{"target":"AB12"}"#).is_none());
    }

    #[test]
    fn unknown_signal_type_is_dropped() {
        let raw = r#"{"type":"link-signal","data":{"signal-type":"telepathy","sdp":"x"}}"#;
        assert!(parse_envelope(raw).is_none());
    }

    #[test]
    fn link_with_missing_target_is_dropped() {
        assert!(parse_envelope(r#"{"type":"link"}"#).is_none());
    }

    #[test]
    fn link_wire_shape() {
        let encoded = encode_envelope(&SignalingEnvelope::Link {
            target: "AB12".into(),
        });
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, json!({"type": "link", "target": "AB12"}));
    }

    #[test]
    fn accept_link_round_trip() {
        let parsed = parse_envelope(r#"{"type":"accept-link"}"#).unwrap();
        assert!(matches!(parsed, SignalingEnvelope::AcceptLink));
    }

    #[test]
    fn offer_round_trip_preserves_sdp() {
        let encoded = encode_envelope(&SignalingEnvelope::LinkSignal {
            data: SignalPayload::Offer {
                sdp: "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n".into(),
            },
        });
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "link-signal");
        assert_eq!(value["data"]["signal-type"], "offer");

        match parse_envelope(&encoded).unwrap() {
            SignalingEnvelope::LinkSignal {
                data: SignalPayload::Offer { sdp },
            } => assert!(sdp.starts_with("v=0")),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn answer_round_trip() {
        let raw = r#"{"type":"link-signal","data":{"signal-type":"answer","sdp":"v=0"}}"#;
        match parse_envelope(raw).unwrap() {
            SignalingEnvelope::LinkSignal {
                data: SignalPayload::Answer { sdp },
            } => assert_eq!(sdp, "v=0"),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn ice_candidate_object_passes_through() {
        let raw = r#"{
            "type": "link-signal",
            "data": {
                "signal-type": "ice-candidate",
                "candidate": {
                    "candidate": "candidate:0 1 UDP 2122252543 192.0.2.1 54321 typ host",
                    "sdpMid": "0"
                }
            }
        }"#;
        match parse_envelope(raw).unwrap() {
            SignalingEnvelope::LinkSignal {
                data: SignalPayload::IceCandidate { candidate },
            } => {
                assert!(candidate.candidate.starts_with("candidate:0"));
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
