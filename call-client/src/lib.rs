//! Client-side call core for the Lagoon chat app.
//!
//! The [`CallOrchestrator`] drives one call at a time: it acquires local
//! media, owns exactly one negotiation endpoint for the lifetime of the
//! call, exchanges signaling events with the Lagoon signal server, and
//! guarantees that every terminal path releases the media devices and the
//! endpoint.
//!
//! Media capture and the WebRTC peer itself are behind the [`media`] and
//! [`peer`] traits; the embedding shell (browser runtime, desktop shell,
//! test harness) supplies the implementations.

pub mod error;
pub mod media;
pub mod orchestrator;
pub mod peer;
pub mod protocol;
pub mod state;

pub use error::{ClientError, Result};
pub use orchestrator::CallOrchestrator;
pub use protocol::{CallKind, ClientEvent, ServerEvent};
pub use state::{CallSnapshot, CallStatus, ConnectionState};
