//! Wire protocol for the realtime channel.
//!
//! Browser clients speak JSON text frames over a WebSocket. Negotiation
//! payloads (`signal`, `candidate`) are opaque [`serde_json::Value`]s owned
//! by the two endpoints; the server relays them verbatim and never looks
//! inside.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a call carries video or audio only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Video,
    Voice,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Video => "video",
            CallKind::Voice => "voice",
        }
    }
}

/// Events received from a client connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A user announcing availability on this connection.
    #[serde(rename_all = "camelCase")]
    UserOnline {
        user_id: String,
        display_name: String,
    },

    /// Explicit logout; distinct from connection loss.
    #[serde(rename_all = "camelCase")]
    UserOffline { user_id: String },

    #[serde(rename_all = "camelCase")]
    InitiateCall {
        to: String,
        from: String,
        from_name: String,
        call_kind: CallKind,
        room_id: String,
    },

    #[serde(rename_all = "camelCase")]
    AcceptCall { call_id: String, user_id: String },

    #[serde(rename_all = "camelCase")]
    RejectCall { call_id: String, user_id: String },

    #[serde(rename_all = "camelCase")]
    EndCall { call_id: String, user_id: String },

    /// WebRTC offer from the initiating endpoint; relayed verbatim.
    #[serde(rename_all = "camelCase")]
    CallOffer {
        to: String,
        from: String,
        signal: Value,
        call_kind: CallKind,
    },

    /// WebRTC answer from the receiving endpoint; relayed verbatim.
    #[serde(rename_all = "camelCase")]
    CallAnswer {
        to: String,
        from: String,
        signal: Value,
    },

    /// Trickled ICE candidate; relayed verbatim.
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        to: String,
        from: String,
        candidate: Value,
    },
}

/// Events sent to a client connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Presence change, broadcast to every live connection.
    #[serde(rename_all = "camelCase")]
    UserStatusChanged { user_id: String, is_online: bool },

    /// Delivered to the callee when a call is initiated toward them.
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        call_id: String,
        caller_id: String,
        caller_name: String,
        call_kind: CallKind,
        room_id: String,
    },

    /// Delivered to the caller once the session exists server-side.
    #[serde(rename_all = "camelCase")]
    CallInitiated { call_id: String },

    /// A control event was refused; `reason` is the business-rule error.
    #[serde(rename_all = "camelCase")]
    CallFailed { reason: String },

    #[serde(rename_all = "camelCase")]
    CallAccepted { call_id: String, callee_id: String },

    #[serde(rename_all = "camelCase")]
    CallRejected { call_id: String, callee_id: String },

    /// `user_id` is the participant who ended (or lost) the call.
    #[serde(rename_all = "camelCase")]
    CallEnded { call_id: String, user_id: String },

    #[serde(rename_all = "camelCase")]
    CallOffer {
        from: String,
        signal: Value,
        call_kind: CallKind,
    },

    #[serde(rename_all = "camelCase")]
    CallAnswer { from: String, signal: Value },

    #[serde(rename_all = "camelCase")]
    IceCandidate { from: String, candidate: Value },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_event_wire_shape() {
        let raw = json!({
            "type": "initiate_call",
            "to": "u2",
            "from": "u1",
            "fromName": "Ada",
            "callKind": "video",
            "roomId": "r1"
        })
        .to_string();

        let event: ClientEvent = serde_json::from_str(&raw).unwrap();
        match event {
            ClientEvent::InitiateCall {
                to,
                from,
                from_name,
                call_kind,
                room_id,
            } => {
                assert_eq!(to, "u2");
                assert_eq!(from, "u1");
                assert_eq!(from_name, "Ada");
                assert_eq!(call_kind, CallKind::Video);
                assert_eq!(room_id, "r1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn negotiation_payload_survives_round_trip() {
        let signal = json!({"sdp": "v=0...", "type": "offer", "nested": {"a": [1, 2]}});
        let event = ClientEvent::CallOffer {
            to: "u2".into(),
            from: "u1".into(),
            signal: signal.clone(),
            call_kind: CallKind::Voice,
        };

        let wire = serde_json::to_string(&event).unwrap();
        let back: ClientEvent = serde_json::from_str(&wire).unwrap();
        match back {
            ClientEvent::CallOffer { signal: s, .. } => assert_eq!(s, signal),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let raw = json!({"type": "reboot_server"}).to_string();
        assert!(serde_json::from_str::<ClientEvent>(&raw).is_err());
    }

    #[test]
    fn server_event_uses_camel_case_fields() {
        let wire = serde_json::to_value(ServerEvent::CallInitiated {
            call_id: "c1".into(),
        })
        .unwrap();
        assert_eq!(wire["type"], "call_initiated");
        assert_eq!(wire["callId"], "c1");
    }
}
