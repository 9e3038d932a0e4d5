//! Signaling router: the single event-dispatch task that owns the presence
//! directory and call registry.
//!
//! Connections talk to the router through a cloneable [`RouterHandle`];
//! every inbound message is handled to completion before the next, so the
//! registry and presence maps have exactly one writer and need no locks.
//! The design assumes a single authoritative process; a clustered
//! deployment would need these maps in a shared store with compare-and-swap
//! transitions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::history::CallHistory;
use crate::presence::PresenceDirectory;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::{CallRegistry, CallSession};
use crate::users::{UserDirectory, UserProfile};

pub enum RouterMessage {
    /// A new connection came up; `sender` is its outbound handle.
    Register {
        conn_id: Uuid,
        sender: mpsc::UnboundedSender<ServerEvent>,
    },
    /// A parsed event arrived on a connection.
    Event { conn_id: Uuid, event: ClientEvent },
    /// The underlying connection is gone (close frame, read error).
    ConnectionClosed { conn_id: Uuid },
    /// Query: the live session a user participates in, if any.
    ActiveCall {
        user_id: String,
        reply: oneshot::Sender<Option<CallSession>>,
    },
    Shutdown,
}

/// Handle to interact with the routing task.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::UnboundedSender<RouterMessage>,
}

impl RouterHandle {
    pub fn register(&self, conn_id: Uuid, sender: mpsc::UnboundedSender<ServerEvent>) {
        let _ = self.tx.send(RouterMessage::Register { conn_id, sender });
    }

    pub fn event(&self, conn_id: Uuid, event: ClientEvent) {
        let _ = self.tx.send(RouterMessage::Event { conn_id, event });
    }

    pub fn connection_closed(&self, conn_id: Uuid) {
        let _ = self.tx.send(RouterMessage::ConnectionClosed { conn_id });
    }

    pub async fn active_call(&self, user_id: &str) -> Option<CallSession> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RouterMessage::ActiveCall {
                user_id: user_id.to_string(),
                reply,
            })
            .ok()?;
        rx.await.unwrap_or(None)
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(RouterMessage::Shutdown);
    }
}

struct Connection {
    sender: mpsc::UnboundedSender<ServerEvent>,
    /// Set once the connection announces a user via `user_online`.
    user_id: Option<String>,
}

pub struct SignalingRouter {
    connections: HashMap<Uuid, Connection>,
    presence: PresenceDirectory,
    registry: CallRegistry,
    users: Arc<dyn UserDirectory>,
    rx: mpsc::UnboundedReceiver<RouterMessage>,
}

impl SignalingRouter {
    /// Spawn the routing task and return its handle.
    pub fn spawn(users: Arc<dyn UserDirectory>, history: Arc<dyn CallHistory>) -> RouterHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = SignalingRouter {
            connections: HashMap::new(),
            presence: PresenceDirectory::new(),
            registry: CallRegistry::new(history),
            users,
            rx,
        };
        tokio::spawn(router.run());
        RouterHandle { tx }
    }

    async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            match message {
                RouterMessage::Register { conn_id, sender } => {
                    debug!(%conn_id, "connection registered");
                    self.connections.insert(
                        conn_id,
                        Connection {
                            sender,
                            user_id: None,
                        },
                    );
                }
                RouterMessage::Event { conn_id, event } => self.handle_event(conn_id, event),
                RouterMessage::ConnectionClosed { conn_id } => self.handle_closed(conn_id),
                RouterMessage::ActiveCall { user_id, reply } => {
                    let _ = reply.send(self.registry.active_for(&user_id).cloned());
                }
                RouterMessage::Shutdown => break,
            }
        }
        info!("signaling router stopped");
    }

    fn handle_event(&mut self, conn_id: Uuid, event: ClientEvent) {
        match event {
            ClientEvent::UserOnline {
                user_id,
                display_name,
            } => self.handle_user_online(conn_id, user_id, display_name),
            ClientEvent::UserOffline { user_id } => {
                info!(user = %user_id, "user going offline explicitly");
                self.presence.mark_unreachable(&user_id);
                self.cleanup_user_call(&user_id);
                self.broadcast_status(&user_id, false);
            }

            ClientEvent::InitiateCall {
                to,
                from,
                from_name: _,
                call_kind,
                room_id,
            } => {
                let result = self.registry.initiate(
                    &from,
                    &to,
                    call_kind,
                    &room_id,
                    self.users.as_ref(),
                    &self.presence,
                );
                match result {
                    Ok(session) => {
                        let incoming = ServerEvent::IncomingCall {
                            call_id: session.id.clone(),
                            caller_id: session.caller_id.clone(),
                            caller_name: session.caller_name.clone(),
                            call_kind: session.call_kind,
                            room_id: session.room_id.clone(),
                        };
                        let initiated = ServerEvent::CallInitiated {
                            call_id: session.id.clone(),
                        };
                        self.send_to_user(&to, incoming);
                        self.send_to_conn(conn_id, initiated);
                    }
                    Err(err) => self.send_failure(conn_id, &err.to_string()),
                }
            }

            ClientEvent::AcceptCall { call_id, user_id } => {
                match self.registry.accept(&call_id, &user_id) {
                    Ok(session) => {
                        let caller_id = session.caller_id.clone();
                        let accepted = ServerEvent::CallAccepted {
                            call_id,
                            callee_id: session.callee_id.clone(),
                        };
                        self.send_to_user(&caller_id, accepted);
                    }
                    Err(err) => self.send_failure(conn_id, &err.to_string()),
                }
            }

            ClientEvent::RejectCall { call_id, user_id } => {
                match self.registry.reject(&call_id, &user_id) {
                    Ok(session) => {
                        let rejected = ServerEvent::CallRejected {
                            call_id,
                            callee_id: session.callee_id.clone(),
                        };
                        self.send_to_user(&session.caller_id, rejected);
                    }
                    Err(err) => self.send_failure(conn_id, &err.to_string()),
                }
            }

            ClientEvent::EndCall { call_id, user_id } => {
                match self.registry.end(&call_id, &user_id) {
                    Ok(session) => {
                        let peer = session.peer_of(&user_id).to_string();
                        let ended = ServerEvent::CallEnded { call_id, user_id };
                        self.send_to_user(&peer, ended);
                    }
                    Err(err) => self.send_failure(conn_id, &err.to_string()),
                }
            }

            // Negotiation relay: no registry involvement, payloads are
            // forwarded verbatim. Undeliverable envelopes are dropped with
            // a log and no sender-side error, matching control-plane-only
            // failure reporting.
            ClientEvent::CallOffer {
                to,
                from,
                signal,
                call_kind,
            } => self.relay(
                &to,
                ServerEvent::CallOffer {
                    from,
                    signal,
                    call_kind,
                },
            ),
            ClientEvent::CallAnswer { to, from, signal } => {
                self.relay(&to, ServerEvent::CallAnswer { from, signal })
            }
            ClientEvent::IceCandidate {
                to,
                from,
                candidate,
            } => self.relay(&to, ServerEvent::IceCandidate { from, candidate }),
        }
    }

    fn handle_user_online(&mut self, conn_id: Uuid, user_id: String, display_name: String) {
        let Some(connection) = self.connections.get_mut(&conn_id) else {
            warn!(%conn_id, "user_online from unregistered connection");
            return;
        };
        connection.user_id = Some(user_id.clone());
        let sender = connection.sender.clone();

        self.users.upsert(UserProfile {
            id: user_id.clone(),
            display_name: display_name.clone(),
        });
        self.presence.mark_reachable(&user_id, conn_id, sender);
        info!(user = %user_id, name = %display_name, %conn_id, "user online");
        self.broadcast_status(&user_id, true);
    }

    /// Connection loss: presence cleanup and call teardown are bundled so a
    /// caller is never left thinking a call is live when the other side
    /// vanished.
    fn handle_closed(&mut self, conn_id: Uuid) {
        let Some(connection) = self.connections.remove(&conn_id) else {
            // A second close for the same connection is a no-op.
            return;
        };
        let Some(user_id) = connection.user_id else {
            debug!(%conn_id, "unannounced connection closed");
            return;
        };

        // A newer connection for this user keeps them online; the stale
        // close must not tear anything down.
        if !self.presence.mark_unreachable_if(&user_id, conn_id) {
            debug!(user = %user_id, %conn_id, "stale connection closed, user re-announced");
            return;
        }

        info!(user = %user_id, %conn_id, "connection lost");
        self.cleanup_user_call(&user_id);
        self.broadcast_status(&user_id, false);
    }

    /// Disconnect-cleanup for any live session the user owns, notifying
    /// the surviving party if still reachable.
    fn cleanup_user_call(&mut self, user_id: &str) {
        if let Some(session) = self.registry.disconnect_cleanup(user_id) {
            let peer = session.peer_of(user_id).to_string();
            self.send_to_user(
                &peer,
                ServerEvent::CallEnded {
                    call_id: session.id,
                    user_id: user_id.to_string(),
                },
            );
        }
    }

    fn relay(&self, to: &str, event: ServerEvent) {
        match self.presence.lookup(to) {
            Some(entry) => {
                if !entry.send(event) {
                    warn!(user = %to, "recipient channel closed, dropping signal");
                }
            }
            None => warn!(user = %to, "dropping signal for unreachable user"),
        }
    }

    fn send_to_user(&self, user_id: &str, event: ServerEvent) {
        match self.presence.lookup(user_id) {
            Some(entry) => {
                if !entry.send(event) {
                    warn!(user = %user_id, "recipient channel closed, event dropped");
                }
            }
            None => debug!(user = %user_id, "recipient unreachable, event dropped"),
        }
    }

    fn send_to_conn(&self, conn_id: Uuid, event: ServerEvent) {
        if let Some(connection) = self.connections.get(&conn_id) {
            let _ = connection.sender.send(event);
        }
    }

    fn send_failure(&self, conn_id: Uuid, reason: &str) {
        debug!(%conn_id, reason, "call-control event refused");
        self.send_to_conn(
            conn_id,
            ServerEvent::CallFailed {
                reason: reason.to_string(),
            },
        );
    }

    /// Presence changes go to every live connection, including the one that
    /// triggered them, so the chat UI can reflect online/offline status.
    fn broadcast_status(&self, user_id: &str, is_online: bool) {
        let event = ServerEvent::UserStatusChanged {
            user_id: user_id.to_string(),
            is_online,
        };
        for connection in self.connections.values() {
            let _ = connection.sender.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryCallHistory;
    use crate::protocol::CallKind;
    use crate::users::InMemoryUserDirectory;
    use serde_json::json;

    struct TestClient {
        conn_id: Uuid,
        rx: mpsc::UnboundedReceiver<ServerEvent>,
    }

    impl TestClient {
        /// Pop the next event, skipping presence broadcasts.
        fn next_call_event(&mut self) -> ServerEvent {
            loop {
                match self.rx.try_recv() {
                    Ok(ServerEvent::UserStatusChanged { .. }) => continue,
                    Ok(event) => return event,
                    Err(e) => panic!("no pending event: {:?}", e),
                }
            }
        }

        fn assert_no_call_events(&mut self) {
            while let Ok(event) = self.rx.try_recv() {
                if !matches!(event, ServerEvent::UserStatusChanged { .. }) {
                    panic!("unexpected event: {:?}", event);
                }
            }
        }
    }

    struct TestEnv {
        handle: RouterHandle,
        history: Arc<InMemoryCallHistory>,
    }

    fn create_test_env() -> TestEnv {
        let history = Arc::new(InMemoryCallHistory::new(100));
        let users = Arc::new(InMemoryUserDirectory::new());
        let handle = SignalingRouter::spawn(users, history.clone());
        TestEnv { handle, history }
    }

    impl TestEnv {
        async fn connect(&self, user_id: &str, name: &str) -> TestClient {
            let conn_id = Uuid::new_v4();
            let (tx, rx) = mpsc::unbounded_channel();
            self.handle.register(conn_id, tx);
            self.handle.event(
                conn_id,
                ClientEvent::UserOnline {
                    user_id: user_id.to_string(),
                    display_name: name.to_string(),
                },
            );
            self.flush().await;
            TestClient { conn_id, rx }
        }

        /// The router processes messages in order, so awaiting any query
        /// guarantees everything sent before it has been handled.
        async fn flush(&self) {
            let _ = self.handle.active_call("__none__").await;
        }

        async fn initiate(
            &self,
            caller: &mut TestClient,
            from: &str,
            to: &str,
            kind: CallKind,
        ) -> String {
            self.handle.event(
                caller.conn_id,
                ClientEvent::InitiateCall {
                    to: to.to_string(),
                    from: from.to_string(),
                    from_name: String::new(),
                    call_kind: kind,
                    room_id: "r1".to_string(),
                },
            );
            self.flush().await;
            match caller.next_call_event() {
                ServerEvent::CallInitiated { call_id } => call_id,
                other => panic!("expected call_initiated, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn full_video_call_lifecycle() {
        let env = create_test_env();
        let mut alice = env.connect("u1", "Ada").await;
        let mut bob = env.connect("u2", "Grace").await;

        // A initiates -> B sees incoming_call with the same call id.
        let call_id = env.initiate(&mut alice, "u1", "u2", CallKind::Video).await;
        match bob.next_call_event() {
            ServerEvent::IncomingCall {
                call_id: incoming_id,
                caller_id,
                caller_name,
                call_kind,
                ..
            } => {
                assert_eq!(incoming_id, call_id);
                assert_eq!(caller_id, "u1");
                assert_eq!(caller_name, "Ada");
                assert_eq!(call_kind, CallKind::Video);
            }
            other => panic!("expected incoming_call, got {:?}", other),
        }

        // B accepts -> A gets call_accepted.
        env.handle.event(
            bob.conn_id,
            ClientEvent::AcceptCall {
                call_id: call_id.clone(),
                user_id: "u2".to_string(),
            },
        );
        env.flush().await;
        assert!(matches!(
            alice.next_call_event(),
            ServerEvent::CallAccepted { .. }
        ));

        // Offer/answer/ICE relay both ways, verbatim.
        env.handle.event(
            alice.conn_id,
            ClientEvent::CallOffer {
                to: "u2".into(),
                from: "u1".into(),
                signal: json!({"type": "offer", "sdp": "v=0"}),
                call_kind: CallKind::Video,
            },
        );
        env.handle.event(
            bob.conn_id,
            ClientEvent::CallAnswer {
                to: "u1".into(),
                from: "u2".into(),
                signal: json!({"type": "answer", "sdp": "v=0"}),
            },
        );
        env.handle.event(
            bob.conn_id,
            ClientEvent::IceCandidate {
                to: "u1".into(),
                from: "u2".into(),
                candidate: json!({"candidate": "host 10.0.0.2"}),
            },
        );
        env.flush().await;

        match bob.next_call_event() {
            ServerEvent::CallOffer { from, signal, .. } => {
                assert_eq!(from, "u1");
                assert_eq!(signal, json!({"type": "offer", "sdp": "v=0"}));
            }
            other => panic!("expected call_offer, got {:?}", other),
        }
        assert!(matches!(
            alice.next_call_event(),
            ServerEvent::CallAnswer { .. }
        ));
        assert!(matches!(
            alice.next_call_event(),
            ServerEvent::IceCandidate { .. }
        ));

        // Either side ends -> the other is notified, registry is clean.
        env.handle.event(
            bob.conn_id,
            ClientEvent::EndCall {
                call_id: call_id.clone(),
                user_id: "u2".to_string(),
            },
        );
        env.flush().await;
        match alice.next_call_event() {
            ServerEvent::CallEnded {
                call_id: ended_id,
                user_id,
            } => {
                assert_eq!(ended_id, call_id);
                assert_eq!(user_id, "u2");
            }
            other => panic!("expected call_ended, got {:?}", other),
        }
        assert!(env.handle.active_call("u1").await.is_none());
        assert!(env.handle.active_call("u2").await.is_none());
        assert_eq!(env.history.for_user("u1", 10).len(), 1);
    }

    #[tokio::test]
    async fn busy_callee_leaves_existing_session_untouched() {
        let env = create_test_env();
        let mut alice = env.connect("u1", "Ada").await;
        let mut bob = env.connect("u2", "Grace").await;
        let mut carol = env.connect("u3", "Edsger").await;

        let call_id = env.initiate(&mut bob, "u2", "u3", CallKind::Voice).await;
        carol.next_call_event(); // incoming_call

        // A dials B while B is on a call with C.
        env.handle.event(
            alice.conn_id,
            ClientEvent::InitiateCall {
                to: "u2".into(),
                from: "u1".into(),
                from_name: String::new(),
                call_kind: CallKind::Video,
                room_id: "r1".into(),
            },
        );
        env.flush().await;

        match alice.next_call_event() {
            ServerEvent::CallFailed { reason } => {
                assert_eq!(reason, "User is already in a call")
            }
            other => panic!("expected call_failed, got {:?}", other),
        }
        bob.assert_no_call_events();
        assert_eq!(env.handle.active_call("u2").await.unwrap().id, call_id);
    }

    #[tokio::test]
    async fn initiate_to_offline_user_fails() {
        let env = create_test_env();
        let mut alice = env.connect("u1", "Ada").await;
        let bob = env.connect("u2", "Grace").await;

        env.handle.event(
            bob.conn_id,
            ClientEvent::UserOffline {
                user_id: "u2".into(),
            },
        );
        env.handle.event(
            alice.conn_id,
            ClientEvent::InitiateCall {
                to: "u2".into(),
                from: "u1".into(),
                from_name: String::new(),
                call_kind: CallKind::Voice,
                room_id: "r1".into(),
            },
        );
        env.flush().await;

        match alice.next_call_event() {
            ServerEvent::CallFailed { reason } => assert_eq!(reason, "User is offline"),
            other => panic!("expected call_failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unauthorized_accept_reports_to_sender_only() {
        let env = create_test_env();
        let mut alice = env.connect("u1", "Ada").await;
        let mut bob = env.connect("u2", "Grace").await;
        let mut carol = env.connect("u3", "Edsger").await;

        let call_id = env.initiate(&mut alice, "u1", "u2", CallKind::Voice).await;
        bob.next_call_event(); // incoming_call

        env.handle.event(
            carol.conn_id,
            ClientEvent::AcceptCall {
                call_id,
                user_id: "u3".into(),
            },
        );
        env.flush().await;

        assert!(matches!(
            carol.next_call_event(),
            ServerEvent::CallFailed { .. }
        ));
        alice.assert_no_call_events();
        bob.assert_no_call_events();
    }

    #[tokio::test]
    async fn signal_to_unreachable_user_reaches_no_client() {
        let env = create_test_env();
        let mut alice = env.connect("u1", "Ada").await;

        env.handle.event(
            alice.conn_id,
            ClientEvent::CallOffer {
                to: "ghost".into(),
                from: "u1".into(),
                signal: json!({"type": "offer"}),
                call_kind: CallKind::Video,
            },
        );
        env.flush().await;

        // Dropped without a call_failed: only control messages report
        // delivery failures to the sender.
        alice.assert_no_call_events();
    }

    #[tokio::test]
    async fn disconnect_mid_call_notifies_peer_exactly_once() {
        let env = create_test_env();
        let mut alice = env.connect("u1", "Ada").await;
        let mut bob = env.connect("u2", "Grace").await;

        let call_id = env.initiate(&mut alice, "u1", "u2", CallKind::Video).await;
        bob.next_call_event(); // incoming_call
        env.handle.event(
            bob.conn_id,
            ClientEvent::AcceptCall {
                call_id: call_id.clone(),
                user_id: "u2".into(),
            },
        );
        env.flush().await;
        alice.next_call_event(); // call_accepted

        // Bob's connection dies; double-fire must stay a no-op.
        env.handle.connection_closed(bob.conn_id);
        env.handle.connection_closed(bob.conn_id);
        env.flush().await;

        match alice.next_call_event() {
            ServerEvent::CallEnded {
                call_id: ended_id,
                user_id,
            } => {
                assert_eq!(ended_id, call_id);
                assert_eq!(user_id, "u2");
            }
            other => panic!("expected call_ended, got {:?}", other),
        }
        alice.assert_no_call_events();
        assert!(env.handle.active_call("u1").await.is_none());
        assert_eq!(env.history.for_user("u2", 10).len(), 1);
    }

    #[tokio::test]
    async fn reconnect_survives_stale_connection_close() {
        let env = create_test_env();
        let alice_old = env.connect("u1", "Ada").await;
        let mut alice_new = env.connect("u1", "Ada").await;
        let mut bob = env.connect("u2", "Grace").await;

        // The old tab closes after the re-announce; u1 must stay reachable.
        env.handle.connection_closed(alice_old.conn_id);
        env.flush().await;

        let call_id = env.initiate(&mut bob, "u2", "u1", CallKind::Voice).await;
        match alice_new.next_call_event() {
            ServerEvent::IncomingCall {
                call_id: incoming, ..
            } => assert_eq!(incoming, call_id),
            other => panic!("expected incoming_call, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn reject_notifies_caller_and_frees_both() {
        let env = create_test_env();
        let mut alice = env.connect("u1", "Ada").await;
        let mut bob = env.connect("u2", "Grace").await;

        let call_id = env.initiate(&mut alice, "u1", "u2", CallKind::Video).await;
        bob.next_call_event();

        env.handle.event(
            bob.conn_id,
            ClientEvent::RejectCall {
                call_id: call_id.clone(),
                user_id: "u2".into(),
            },
        );
        env.flush().await;

        assert!(matches!(
            alice.next_call_event(),
            ServerEvent::CallRejected { .. }
        ));
        let archived = env.history.for_user("u1", 10);
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].duration_seconds, 0);

        // Both participants can call again immediately.
        env.initiate(&mut bob, "u2", "u1", CallKind::Voice).await;
        alice.next_call_event();
    }
}
