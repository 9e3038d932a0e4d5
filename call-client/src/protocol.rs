//! Signaling wire protocol — matches the signal-server wire types.
//!
//! The two crates carry their own copies of the protocol enums and are
//! kept field-compatible by hand; the JSON shapes below are the contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Video,
    Voice,
}

/// Events this client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    UserOnline {
        user_id: String,
        display_name: String,
    },

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

    #[serde(rename_all = "camelCase")]
    CallOffer {
        to: String,
        from: String,
        signal: Value,
        call_kind: CallKind,
    },

    #[serde(rename_all = "camelCase")]
    CallAnswer {
        to: String,
        from: String,
        signal: Value,
    },

    #[serde(rename_all = "camelCase")]
    IceCandidate {
        to: String,
        from: String,
        candidate: Value,
    },
}

/// Events this client receives from the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    UserStatusChanged { user_id: String, is_online: bool },

    #[serde(rename_all = "camelCase")]
    IncomingCall {
        call_id: String,
        caller_id: String,
        caller_name: String,
        call_kind: CallKind,
        room_id: String,
    },

    #[serde(rename_all = "camelCase")]
    CallInitiated { call_id: String },

    #[serde(rename_all = "camelCase")]
    CallFailed { reason: String },

    #[serde(rename_all = "camelCase")]
    CallAccepted { call_id: String, callee_id: String },

    #[serde(rename_all = "camelCase")]
    CallRejected { call_id: String, callee_id: String },

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
