//! Local call state, independent of (but loosely mirroring) the server's
//! session state machine.

use serde::{Deserialize, Serialize};

use crate::protocol::CallKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Idle,
    /// Outgoing call, waiting for the callee.
    Calling,
    /// Incoming call presented, not yet answered.
    Ringing,
    Connected,
    Ended,
}

/// State of the peer-to-peer transport, reported by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    /// Shut down cleanly by either side.
    Closed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub call_id: String,
    pub caller_id: String,
    pub caller_name: String,
    pub call_kind: CallKind,
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteParticipant {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFlags {
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl Default for MediaFlags {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: false,
        }
    }
}

/// Point-in-time view of the orchestrator for the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub status: CallStatus,
    pub connection: ConnectionState,
    pub call_id: Option<String>,
    pub remote: Option<RemoteParticipant>,
    pub incoming: Option<IncomingCall>,
    pub media: MediaFlags,
    pub error: Option<String>,
}
