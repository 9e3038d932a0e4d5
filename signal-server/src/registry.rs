//! Call session registry: the authoritative server-side state machine for
//! in-progress calls.
//!
//! Sessions are indexed both by call id and by participant, and the
//! participant index is what enforces the core invariant: at most one live
//! session per user at any instant. Terminal transitions archive the
//! session to call history exactly once and drop it from the live maps.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CallError, Result};
use crate::history::{CallHistory, CallRecord};
use crate::presence::PresenceDirectory;
use crate::protocol::CallKind;
use crate::users::UserDirectory;

/// Session state. Transitions only move forward:
///
/// ```text
/// initiated --accept--> connected --end/disconnect--> ended
///     |  \--reject--> rejected
///     \--end/disconnect--> ended
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Initiated,
    Connected,
    Ended,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub caller_name: String,
    pub callee_name: String,
    pub call_kind: CallKind,
    pub room_id: String,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
}

impl CallSession {
    /// The participant on the other side of the call from `user_id`.
    pub fn peer_of(&self, user_id: &str) -> &str {
        if self.caller_id == user_id {
            &self.callee_id
        } else {
            &self.caller_id
        }
    }

    fn involves(&self, user_id: &str) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }

    fn into_record(self) -> CallRecord {
        CallRecord {
            ended_at: self.ended_at.unwrap_or(self.started_at),
            id: self.id,
            caller_id: self.caller_id,
            callee_id: self.callee_id,
            caller_name: self.caller_name,
            callee_name: self.callee_name,
            call_kind: self.call_kind,
            room_id: self.room_id,
            state: self.state,
            started_at: self.started_at,
            connected_at: self.connected_at,
            duration_seconds: self.duration_seconds,
        }
    }
}

pub struct CallRegistry {
    sessions: HashMap<String, CallSession>,
    /// Participant -> live call id. One entry per user, by invariant.
    by_user: HashMap<String, String>,
    history: Arc<dyn CallHistory>,
}

impl CallRegistry {
    pub fn new(history: Arc<dyn CallHistory>) -> Self {
        Self {
            sessions: HashMap::new(),
            by_user: HashMap::new(),
            history,
        }
    }

    /// Create a new session in `Initiated` state.
    ///
    /// Guards, in order: both users must be known, the callee must be
    /// reachable, and neither party may already own a live session.
    pub fn initiate(
        &mut self,
        caller_id: &str,
        callee_id: &str,
        call_kind: CallKind,
        room_id: &str,
        users: &dyn UserDirectory,
        presence: &PresenceDirectory,
    ) -> Result<&CallSession> {
        let caller = users.get(caller_id).ok_or(CallError::UserNotFound)?;
        let callee = users.get(callee_id).ok_or(CallError::UserNotFound)?;

        if !presence.is_reachable(callee_id) {
            return Err(CallError::UserUnreachable);
        }
        if self.by_user.contains_key(caller_id) || self.by_user.contains_key(callee_id) {
            return Err(CallError::Busy);
        }

        let session = CallSession {
            id: Uuid::new_v4().to_string(),
            caller_id: caller.id,
            callee_id: callee.id,
            caller_name: caller.display_name,
            callee_name: callee.display_name,
            call_kind,
            room_id: room_id.to_string(),
            state: CallState::Initiated,
            started_at: Utc::now(),
            connected_at: None,
            ended_at: None,
            duration_seconds: 0,
        };

        info!(call_id = %session.id, caller = %caller_id, callee = %callee_id,
            kind = call_kind.as_str(), "call initiated");

        let id = session.id.clone();
        self.by_user.insert(caller_id.to_string(), id.clone());
        self.by_user.insert(callee_id.to_string(), id.clone());
        self.sessions.insert(id.clone(), session);
        Ok(&self.sessions[&id])
    }

    /// `initiated -> connected`. Only the recorded callee may accept.
    pub fn accept(&mut self, call_id: &str, user_id: &str) -> Result<&CallSession> {
        let session = self.sessions.get_mut(call_id).ok_or(CallError::CallNotFound)?;
        if session.callee_id != user_id {
            return Err(CallError::Unauthorized);
        }
        if session.state != CallState::Initiated {
            return Err(CallError::InvalidTransition);
        }

        session.state = CallState::Connected;
        session.connected_at = Some(Utc::now());
        info!(call_id = %call_id, callee = %user_id, "call accepted");
        Ok(&self.sessions[call_id])
    }

    /// `initiated -> rejected` (terminal). Only the recorded callee may
    /// reject.
    pub fn reject(&mut self, call_id: &str, user_id: &str) -> Result<CallSession> {
        let session = self.sessions.get(call_id).ok_or(CallError::CallNotFound)?;
        if session.callee_id != user_id {
            return Err(CallError::Unauthorized);
        }
        if session.state != CallState::Initiated {
            return Err(CallError::InvalidTransition);
        }

        info!(call_id = %call_id, callee = %user_id, "call rejected");
        Ok(self.finalize(call_id, CallState::Rejected))
    }

    /// `initiated|connected -> ended` (terminal). Either participant may
    /// end.
    pub fn end(&mut self, call_id: &str, user_id: &str) -> Result<CallSession> {
        let session = self.sessions.get(call_id).ok_or(CallError::CallNotFound)?;
        if !session.involves(user_id) {
            return Err(CallError::Unauthorized);
        }
        if !matches!(session.state, CallState::Initiated | CallState::Connected) {
            return Err(CallError::InvalidTransition);
        }

        info!(call_id = %call_id, user = %user_id, "call ended");
        Ok(self.finalize(call_id, CallState::Ended))
    }

    /// Terminal transition applied when a participant's connection is lost
    /// without an explicit event. Returns the finished session so the
    /// router can notify the surviving party. `None` when the user owns no
    /// live session, which also makes a repeated cleanup a no-op.
    pub fn disconnect_cleanup(&mut self, user_id: &str) -> Option<CallSession> {
        let call_id = self.by_user.get(user_id)?.clone();
        info!(call_id = %call_id, user = %user_id, "cleaning up call after presence loss");
        Some(self.finalize(&call_id, CallState::Ended))
    }

    /// Live session owned by `user_id`, if any.
    pub fn active_for(&self, user_id: &str) -> Option<&CallSession> {
        let call_id = self.by_user.get(user_id)?;
        self.sessions.get(call_id)
    }

    pub fn get(&self, call_id: &str) -> Option<&CallSession> {
        self.sessions.get(call_id)
    }

    pub fn live_count(&self) -> usize {
        self.sessions.len()
    }

    /// Apply a terminal state, compute the duration, archive once, and
    /// drop the session plus both participant index entries.
    fn finalize(&mut self, call_id: &str, state: CallState) -> CallSession {
        let mut session = self
            .sessions
            .remove(call_id)
            .expect("finalize called for a live session");
        self.by_user.remove(&session.caller_id);
        self.by_user.remove(&session.callee_id);

        let ended_at = Utc::now();
        session.state = state;
        session.ended_at = Some(ended_at);
        session.duration_seconds = match session.connected_at {
            Some(connected_at) => (ended_at - connected_at).num_seconds(),
            None => 0,
        };

        debug!(call_id = %call_id, state = ?state,
            duration = session.duration_seconds, "archiving finished session");
        self.history.archive(session.clone().into_record());
        session
    }
}
