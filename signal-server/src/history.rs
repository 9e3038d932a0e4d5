//! Call-history collaborator.
//!
//! Finished sessions are archived here on every terminal transition. The
//! real persistence layer is outside the call core; the registry only
//! depends on this narrow trait.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::CallKind;
use crate::registry::CallState;

/// The archived form of a finished call session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub caller_name: String,
    pub callee_name: String,
    pub call_kind: CallKind,
    pub room_id: String,
    /// Terminal state the session reached (`ended` or `rejected`).
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
}

pub trait CallHistory: Send + Sync {
    /// Archive one finished session. Called exactly once per session.
    fn archive(&self, record: CallRecord);

    /// Most-recent-first history for a user, at most `limit` records.
    fn for_user(&self, user_id: &str, limit: usize) -> Vec<CallRecord>;
}

/// In-memory store capped per user at the archiving step.
pub struct InMemoryCallHistory {
    cap: usize,
    records: Mutex<HashMap<String, VecDeque<CallRecord>>>,
}

impl InMemoryCallHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl CallHistory for InMemoryCallHistory {
    fn archive(&self, record: CallRecord) {
        let mut records = self.records.lock().expect("call history lock poisoned");
        for user in [&record.caller_id, &record.callee_id] {
            let entries = records.entry(user.clone()).or_default();
            entries.push_front(record.clone());
            entries.truncate(self.cap);
        }
    }

    fn for_user(&self, user_id: &str, limit: usize) -> Vec<CallRecord> {
        let records = self.records.lock().expect("call history lock poisoned");
        records
            .get(user_id)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> CallRecord {
        let now = Utc::now();
        CallRecord {
            id: id.to_string(),
            caller_id: "u1".into(),
            callee_id: "u2".into(),
            caller_name: "Ada".into(),
            callee_name: "Grace".into(),
            call_kind: CallKind::Voice,
            room_id: "r1".into(),
            state: CallState::Ended,
            started_at: now,
            connected_at: None,
            ended_at: now,
            duration_seconds: 0,
        }
    }

    #[test]
    fn most_recent_first() {
        let history = InMemoryCallHistory::new(100);
        history.archive(record("c1"));
        history.archive(record("c2"));

        let calls = history.for_user("u1", 50);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "c2");
        assert_eq!(calls[1].id, "c1");
    }

    #[test]
    fn archive_caps_per_user() {
        let history = InMemoryCallHistory::new(100);
        for i in 0..120 {
            history.archive(record(&format!("c{}", i)));
        }

        let calls = history.for_user("u2", 500);
        assert_eq!(calls.len(), 100);
        assert_eq!(calls[0].id, "c119");
    }

    #[test]
    fn limit_applies_on_read() {
        let history = InMemoryCallHistory::new(100);
        for i in 0..10 {
            history.archive(record(&format!("c{}", i)));
        }
        assert_eq!(history.for_user("u1", 3).len(), 3);
        assert!(history.for_user("unknown", 3).is_empty());
    }
}
