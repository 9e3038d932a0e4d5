//! Negotiation endpoint seam.
//!
//! One endpoint performs the offer/answer/ICE exchange for one call. The
//! orchestrator constructs it fresh per call, feeds it the peer's signals,
//! and closes it on every terminal transition; endpoint events come back
//! on the channel handed to [`PeerFactory::create`].

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::media::MediaStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// The caller: creates the offer.
    Initiator,
    /// The callee: consumes the offer, creates the answer.
    Receiver,
}

/// Events reported by a live endpoint.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Locally generated negotiation payload (offer or answer, depending
    /// on role). Opaque to everything but the two endpoints.
    Signal(Value),
    /// Locally gathered ICE candidate.
    Candidate(Value),
    /// Media is flowing peer-to-peer.
    Connected,
    Closed,
    Error(String),
}

pub trait PeerFactory: Send + Sync {
    fn create(
        &self,
        role: PeerRole,
        local: &dyn MediaStream,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn NegotiationEndpoint>>;
}

pub trait NegotiationEndpoint: Send {
    /// Apply a negotiation payload received from the remote peer.
    fn apply_signal(&mut self, payload: Value) -> Result<()>;

    /// Tear the connection down. Must be idempotent.
    fn close(&mut self);
}
