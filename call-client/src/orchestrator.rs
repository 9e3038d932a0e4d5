//! Per-client call orchestration.
//!
//! Drives one call at a time through the local state machine: media
//! acquisition, endpoint creation (initiator or receiver), signal
//! buffering for payloads that arrive before the endpoint exists, and an
//! idempotent teardown that every terminal path converges on.
//!
//! Concurrency model: the shared state sits behind an async mutex, and the
//! lock is *released* across the media-acquisition await so a hang-up can
//! interleave with a pending permission prompt. Each call setup gets a
//! generation number; stale completions and stale endpoint events check it
//! and unwind without touching the newer call's state.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::media::{MediaConstraints, MediaSource, MediaStream};
use crate::peer::{NegotiationEndpoint, PeerEvent, PeerFactory, PeerRole};
use crate::protocol::{CallKind, ClientEvent, ServerEvent};
use crate::state::{
    CallSnapshot, CallStatus, ConnectionState, IncomingCall, MediaFlags, RemoteParticipant,
};

#[derive(Clone)]
pub struct CallOrchestrator {
    inner: Arc<Mutex<Inner>>,
    media: Arc<dyn MediaSource>,
    peers: Arc<dyn PeerFactory>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    user_id: String,
    display_name: String,
}

struct Inner {
    status: CallStatus,
    connection: ConnectionState,
    call_id: Option<String>,
    remote: Option<RemoteParticipant>,
    call_kind: Option<CallKind>,
    room_id: Option<String>,
    incoming: Option<IncomingCall>,
    media_flags: MediaFlags,
    role: Option<PeerRole>,
    local_stream: Option<Box<dyn MediaStream>>,
    /// At most one live endpoint, owned here for the lifetime of one call.
    endpoint: Option<Box<dyn NegotiationEndpoint>>,
    /// Payloads that arrived before the endpoint existed, drained into it
    /// in arrival order the moment it is constructed.
    pending_signals: VecDeque<Value>,
    /// Guard against concurrent media/endpoint setup for the same client.
    setup_in_progress: bool,
    /// Bumped on every setup and teardown; stale async completions and
    /// stale endpoint events compare against it and unwind.
    generation: u64,
    connected_at: Option<Instant>,
    error: Option<String>,
}

impl Inner {
    fn new() -> Self {
        Self {
            status: CallStatus::Idle,
            connection: ConnectionState::New,
            call_id: None,
            remote: None,
            call_kind: None,
            room_id: None,
            incoming: None,
            media_flags: MediaFlags::default(),
            role: None,
            local_stream: None,
            endpoint: None,
            pending_signals: VecDeque::new(),
            setup_in_progress: false,
            generation: 0,
            connected_at: None,
            error: None,
        }
    }

    fn in_terminal_rest(&self) -> bool {
        matches!(self.status, CallStatus::Idle | CallStatus::Ended)
    }
}

impl CallOrchestrator {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        media: Arc<dyn MediaSource>,
        peers: Arc<dyn PeerFactory>,
        outbound: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
            media,
            peers,
            outbound,
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Place an outgoing call: announce it to the server, acquire local
    /// media and bring up the endpoint as initiator.
    ///
    /// Refused while another call or setup is active — invoking this twice
    /// concurrently must not create a second endpoint.
    pub async fn start_call(
        &self,
        remote_id: &str,
        remote_name: &str,
        call_kind: CallKind,
        room_id: &str,
    ) -> Result<()> {
        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.setup_in_progress {
                return Err(ClientError::InvalidState("call setup already in progress"));
            }
            if !inner.in_terminal_rest() {
                return Err(ClientError::InvalidState("a call is already active"));
            }
            inner.status = CallStatus::Calling;
            inner.connection = ConnectionState::New;
            inner.call_id = None;
            inner.remote = Some(RemoteParticipant {
                id: remote_id.to_string(),
                name: remote_name.to_string(),
            });
            inner.call_kind = Some(call_kind);
            inner.room_id = Some(room_id.to_string());
            inner.media_flags = MediaFlags {
                audio_enabled: true,
                video_enabled: call_kind == CallKind::Video,
            };
            inner.pending_signals.clear();
            inner.connected_at = None;
            inner.error = None;
            inner.setup_in_progress = true;
            inner.generation += 1;
            inner.generation
        };

        info!(to = %remote_id, kind = ?call_kind, "starting call");
        self.send(ClientEvent::InitiateCall {
            to: remote_id.to_string(),
            from: self.user_id.clone(),
            from_name: self.display_name.clone(),
            call_kind,
            room_id: room_id.to_string(),
        });

        self.setup_media_and_peer(PeerRole::Initiator, call_kind, generation)
            .await
    }

    /// Accept the pending incoming call: acquire media, bring up the
    /// endpoint as receiver, replay any buffered signals, then notify the
    /// server.
    pub async fn accept_call(&self) -> Result<()> {
        let (generation, call_id, call_kind) = {
            let mut inner = self.inner.lock().await;
            if inner.setup_in_progress {
                return Err(ClientError::InvalidState("call setup already in progress"));
            }
            let incoming = inner
                .incoming
                .take()
                .ok_or(ClientError::InvalidState("no incoming call"))?;

            inner.status = CallStatus::Connected;
            inner.call_id = Some(incoming.call_id.clone());
            inner.remote = Some(RemoteParticipant {
                id: incoming.caller_id.clone(),
                name: incoming.caller_name.clone(),
            });
            inner.call_kind = Some(incoming.call_kind);
            inner.room_id = Some(incoming.room_id.clone());
            inner.media_flags = MediaFlags {
                audio_enabled: true,
                video_enabled: incoming.call_kind == CallKind::Video,
            };
            inner.connected_at = None;
            inner.error = None;
            inner.setup_in_progress = true;
            inner.generation += 1;
            (inner.generation, incoming.call_id, incoming.call_kind)
        };

        info!(call_id = %call_id, "accepting call");
        self.setup_media_and_peer(PeerRole::Receiver, call_kind, generation)
            .await?;

        self.send(ClientEvent::AcceptCall {
            call_id,
            user_id: self.user_id.clone(),
        });
        Ok(())
    }

    /// Decline the pending incoming call. No media is touched; nothing was
    /// acquired while ringing.
    pub async fn reject_call(&self) -> Result<()> {
        let call_id = {
            let mut inner = self.inner.lock().await;
            let incoming = inner
                .incoming
                .take()
                .ok_or(ClientError::InvalidState("no incoming call"))?;
            inner.status = CallStatus::Idle;
            inner.pending_signals.clear();
            incoming.call_id
        };

        info!(call_id = %call_id, "rejecting call");
        self.send(ClientEvent::RejectCall {
            call_id,
            user_id: self.user_id.clone(),
        });
        Ok(())
    }

    /// Hang up. Safe to call at any time, any number of times: repeated
    /// invocations and remote-end-after-local-end all collapse into one
    /// teardown and at most one `end_call` toward the server.
    pub async fn end_call(&self) {
        self.teardown(true).await;
    }

    /// Feed one event received from the signaling channel.
    pub async fn handle_server_event(&self, event: ServerEvent) {
        match event {
            // Presence is the chat UI's concern, not the call core's.
            ServerEvent::UserStatusChanged { .. } => {}

            ServerEvent::IncomingCall {
                call_id,
                caller_id,
                caller_name,
                call_kind,
                room_id,
            } => {
                self.handle_incoming_call(IncomingCall {
                    call_id,
                    caller_id,
                    caller_name,
                    call_kind,
                    room_id,
                })
                .await
            }

            ServerEvent::CallInitiated { call_id } => self.handle_call_initiated(call_id).await,

            ServerEvent::CallFailed { reason } => {
                warn!(%reason, "call failed");
                {
                    let mut inner = self.inner.lock().await;
                    inner.error = Some(reason);
                }
                self.teardown(false).await;
            }

            ServerEvent::CallAccepted { call_id, .. } => {
                let mut inner = self.inner.lock().await;
                if inner.status == CallStatus::Calling {
                    info!(call_id = %call_id, "call accepted by remote");
                    inner.status = CallStatus::Connected;
                } else {
                    debug!(call_id = %call_id, status = ?inner.status, "ignoring stale call_accepted");
                }
            }

            ServerEvent::CallRejected { call_id, .. } => {
                info!(call_id = %call_id, "call rejected by remote");
                self.teardown(false).await;
            }

            ServerEvent::CallEnded { call_id, .. } => {
                info!(call_id = %call_id, "call ended by remote");
                self.teardown(false).await;
            }

            ServerEvent::CallOffer { signal, .. } => self.handle_remote_signal(signal).await,
            ServerEvent::CallAnswer { signal, .. } => self.handle_remote_signal(signal).await,
            ServerEvent::IceCandidate { candidate, .. } => {
                self.handle_remote_signal(candidate).await
            }
        }
    }

    /// Events reported by the endpoint created for `generation`.
    pub async fn handle_peer_event(&self, generation: u64, event: PeerEvent) {
        match event {
            PeerEvent::Signal(signal) => {
                let outgoing = {
                    let inner = self.inner.lock().await;
                    if inner.generation != generation {
                        debug!("ignoring signal from stale endpoint");
                        return;
                    }
                    let Some(remote) = inner.remote.clone() else {
                        return;
                    };
                    match inner.role {
                        Some(PeerRole::Initiator) => Some(ClientEvent::CallOffer {
                            to: remote.id,
                            from: self.user_id.clone(),
                            signal,
                            call_kind: inner.call_kind.unwrap_or(CallKind::Voice),
                        }),
                        Some(PeerRole::Receiver) => Some(ClientEvent::CallAnswer {
                            to: remote.id,
                            from: self.user_id.clone(),
                            signal,
                        }),
                        None => None,
                    }
                };
                if let Some(event) = outgoing {
                    self.send(event);
                }
            }

            PeerEvent::Candidate(candidate) => {
                let outgoing = {
                    let inner = self.inner.lock().await;
                    if inner.generation != generation {
                        return;
                    }
                    inner.remote.clone().map(|remote| ClientEvent::IceCandidate {
                        to: remote.id,
                        from: self.user_id.clone(),
                        candidate,
                    })
                };
                if let Some(event) = outgoing {
                    self.send(event);
                }
            }

            PeerEvent::Connected => {
                let mut inner = self.inner.lock().await;
                if inner.generation != generation {
                    return;
                }
                info!("peer connection established");
                inner.connection = ConnectionState::Connected;
                // Duration counts from the first successful negotiation.
                if inner.connected_at.is_none() {
                    inner.connected_at = Some(Instant::now());
                }
            }

            PeerEvent::Closed => {
                if self.is_current(generation).await {
                    info!("endpoint closed, ending call");
                    self.teardown(true).await;
                }
            }

            PeerEvent::Error(message) => {
                if self.is_current(generation).await {
                    warn!(error = %message, "endpoint error, ending call");
                    {
                        let mut inner = self.inner.lock().await;
                        inner.error = Some(message);
                        inner.connection = ConnectionState::Failed;
                    }
                    self.teardown(true).await;
                }
            }
        }
    }

    pub async fn toggle_audio(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let enabled = !inner.media_flags.audio_enabled;
        inner.media_flags.audio_enabled = enabled;
        if let Some(stream) = inner.local_stream.as_mut() {
            stream.set_audio_enabled(enabled);
        }
        enabled
    }

    pub async fn toggle_video(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let enabled = !inner.media_flags.video_enabled;
        inner.media_flags.video_enabled = enabled;
        if let Some(stream) = inner.local_stream.as_mut() {
            stream.set_video_enabled(enabled);
        }
        enabled
    }

    /// Whole seconds since the first successful negotiation; 0 while not
    /// connected.
    pub async fn call_duration(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner
            .connected_at
            .map(|at| at.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub async fn snapshot(&self) -> CallSnapshot {
        let inner = self.inner.lock().await;
        CallSnapshot {
            status: inner.status,
            connection: inner.connection,
            call_id: inner.call_id.clone(),
            remote: inner.remote.clone(),
            incoming: inner.incoming.clone(),
            media: inner.media_flags,
            error: inner.error.clone(),
        }
    }

    async fn handle_incoming_call(&self, incoming: IncomingCall) {
        let mut inner = self.inner.lock().await;
        if !inner.in_terminal_rest() || inner.setup_in_progress {
            // The server's busy guard should have refused this; drop it
            // rather than clobber the active call.
            warn!(call_id = %incoming.call_id, status = ?inner.status,
                "incoming call while not idle, dropping");
            return;
        }
        info!(call_id = %incoming.call_id, from = %incoming.caller_id, "incoming call");
        inner.status = CallStatus::Ringing;
        inner.error = None;
        inner.incoming = Some(incoming);
    }

    async fn handle_call_initiated(&self, call_id: String) {
        let stale = {
            let mut inner = self.inner.lock().await;
            if inner.status == CallStatus::Calling {
                inner.call_id = Some(call_id.clone());
                false
            } else {
                true
            }
        };
        // The attempt was already aborted locally (media failure, instant
        // hang-up); converge the server's registry with an explicit end.
        if stale {
            debug!(call_id = %call_id, "call_initiated for aborted attempt, ending");
            self.send(ClientEvent::EndCall {
                call_id,
                user_id: self.user_id.clone(),
            });
        }
    }

    async fn handle_remote_signal(&self, payload: Value) {
        let mut inner = self.inner.lock().await;
        if let Some(endpoint) = inner.endpoint.as_mut() {
            if let Err(e) = endpoint.apply_signal(payload) {
                warn!(error = %e, "endpoint rejected signal");
            }
        } else if inner.setup_in_progress || inner.incoming.is_some() {
            // The peer's payload beat our endpoint into existence; hold it
            // for replay instead of dropping it.
            debug!("buffering signal until endpoint exists");
            inner.pending_signals.push_back(payload);
        } else {
            debug!("no endpoint and no call being set up, dropping signal");
        }
    }

    async fn setup_media_and_peer(
        &self,
        role: PeerRole,
        call_kind: CallKind,
        generation: u64,
    ) -> Result<()> {
        let constraints = MediaConstraints::for_call(call_kind);
        // Lock released during the acquisition await: a hang-up can run
        // while the permission prompt is open.
        let stream = match self.media.acquire(constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "media acquisition failed");
                self.abort_setup(generation, format!("Unable to access camera/microphone: {}", e))
                    .await;
                return Err(e);
            }
        };

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            // The call was ended while acquisition was in flight. The
            // acquisition itself could not be preempted, so stop the
            // freshly delivered tracks here and now.
            drop(inner);
            let mut stream = stream;
            stream.stop();
            debug!("call ended during media acquisition, tracks stopped");
            return Err(ClientError::InvalidState("call ended during setup"));
        }

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let mut endpoint = match self.peers.create(role, stream.as_ref(), peer_tx) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                drop(inner);
                let mut stream = stream;
                stream.stop();
                warn!(error = %e, "failed to create negotiation endpoint");
                self.abort_setup(generation, e.to_string()).await;
                return Err(e);
            }
        };

        // Replay whatever arrived before the endpoint existed, in order.
        while let Some(signal) = inner.pending_signals.pop_front() {
            if let Err(e) = endpoint.apply_signal(signal) {
                warn!(error = %e, "failed to replay buffered signal");
            }
        }

        inner.local_stream = Some(stream);
        inner.endpoint = Some(endpoint);
        inner.role = Some(role);
        inner.connection = ConnectionState::Connecting;
        inner.setup_in_progress = false;
        drop(inner);

        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut peer_rx = peer_rx;
            while let Some(event) = peer_rx.recv().await {
                orchestrator.handle_peer_event(generation, event).await;
            }
        });
        Ok(())
    }

    /// Unwind a failed setup: surface the error locally and converge the
    /// server if a session already exists for the attempt.
    async fn abort_setup(&self, generation: u64, message: String) {
        let call_id = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return;
            }
            inner.setup_in_progress = false;
            inner.status = CallStatus::Ended;
            inner.connection = ConnectionState::New;
            inner.error = Some(message);
            inner.remote = None;
            inner.call_kind = None;
            inner.room_id = None;
            inner.role = None;
            inner.pending_signals.clear();
            inner.generation += 1;
            inner.call_id.take()
        };
        if let Some(call_id) = call_id {
            self.send(ClientEvent::EndCall {
                call_id,
                user_id: self.user_id.clone(),
            });
        }
    }

    /// The one teardown path. Stops media, closes the endpoint, clears all
    /// per-call state, and (unless the end came from the server) emits
    /// `end_call` so both sides and the registry converge.
    async fn teardown(&self, notify_server: bool) {
        let (had_activity, call_id) = {
            let mut inner = self.inner.lock().await;
            let had_activity = !inner.in_terminal_rest()
                || inner.endpoint.is_some()
                || inner.local_stream.is_some()
                || inner.incoming.is_some()
                || inner.call_id.is_some();

            if let Some(mut stream) = inner.local_stream.take() {
                stream.stop();
            }
            if let Some(mut endpoint) = inner.endpoint.take() {
                endpoint.close();
            }
            inner.pending_signals.clear();
            inner.incoming = None;
            inner.remote = None;
            inner.call_kind = None;
            inner.room_id = None;
            inner.role = None;
            inner.connected_at = None;
            // A transport failure stays visible as Failed; every other
            // teardown of a real call reads as a clean close.
            if inner.connection != ConnectionState::Failed {
                inner.connection = if had_activity {
                    ConnectionState::Closed
                } else {
                    ConnectionState::New
                };
            }
            inner.setup_in_progress = false;
            if had_activity {
                inner.status = CallStatus::Ended;
            }
            // Invalidates in-flight acquisitions and stale endpoint tasks.
            inner.generation += 1;
            (had_activity, inner.call_id.take())
        };

        if !had_activity {
            debug!("teardown with no active call, nothing to do");
            return;
        }
        if notify_server {
            if let Some(call_id) = call_id {
                self.send(ClientEvent::EndCall {
                    call_id,
                    user_id: self.user_id.clone(),
                });
            }
        }
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().await.generation == generation
    }

    fn send(&self, event: ClientEvent) {
        if self.outbound.send(event).is_err() {
            warn!("signaling channel closed, event dropped");
        }
    }
}
