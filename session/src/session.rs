//! The peer-level session state machine.
//!
//! A `Session` owns every piece of per-peer state: the request registry, the
//! scheduled tasks, the event bus and the transport. It is driven by `tick`,
//! which the embedding application calls once per heartbeat after advancing
//! the shared `Clock`. Each tick:
//!
//! 1. drains transport events and dispatches them (connects, packets,
//!    disconnects), completing requests as replies arrive
//! 2. runs scheduled tasks that are due (poll harvests, re-advertising)
//! 3. sweeps timed-out requests
//! 4. aborts login or join flows whose in-flight request has died
//!
//! The login flow lives in `login.rs`, the lobby and hosting flows in
//! `lobby.rs` and the directory poll in `poll.rs`.

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::events::{EventBus, EventKind, Listener, SessionEvent, SubscriptionId};
use crate::lobby::{HostedSession, JoinAttempt};
use crate::login::{LoginAttempt, LoginStage};
use crate::poll::ServerPoll;
use crate::request::{
    Request, RequestCallback, RequestContext, RequestRegistry, RequestType, ResponseData,
    ResponsePayload,
};
use crate::roster::GameSession;
use crate::scheduler::{Scheduler, SchedulerContext};
use crate::transport::{ConnectionHandle, Directory, Transport, TransportEvent};
use log::{debug, info, trace, warn};
use shared::packets::Message;
use shared::{AuthStatus, ConnectionStatus, NetworkServer, NetworkUser, Packet};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Offline,
    LoggedIn,
    InLobby,
    InGame,
}

pub struct Session {
    pub(crate) config: SessionConfig,
    pub(crate) clock: Clock,
    pub(crate) registry: RequestRegistry<Session>,
    pub(crate) scheduler: Scheduler<Session>,
    pub(crate) events: EventBus,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) directory: Box<dyn Directory>,
    pub(crate) state: SessionState,
    pub(crate) user: NetworkUser,
    pub(crate) current_server: NetworkServer,
    /// Connection to the game server we joined as a client.
    pub(crate) server_connection: Option<ConnectionHandle>,
    /// Outgoing connects waiting for the transport to report back.
    pub(crate) pending_connects: HashMap<ConnectionHandle, Request>,
    pub(crate) login: Option<LoginAttempt>,
    pub(crate) join: Option<JoinAttempt>,
    pub(crate) hosted: Option<HostedSession>,
    pub(crate) poll: ServerPoll,
}

impl RequestContext for Session {
    fn registry(&mut self) -> &mut RequestRegistry<Self> {
        &mut self.registry
    }
}

impl SchedulerContext for Session {
    fn scheduler(&mut self) -> &mut Scheduler<Self> {
        &mut self.scheduler
    }
}

impl Session {
    pub fn new(
        transport: Box<dyn Transport>,
        directory: Box<dyn Directory>,
        clock: Clock,
        config: SessionConfig,
    ) -> Self {
        Self {
            registry: RequestRegistry::new(clock.clone()),
            scheduler: Scheduler::new(),
            events: EventBus::new(),
            config,
            clock,
            transport,
            directory,
            state: SessionState::Offline,
            user: NetworkUser::bad(),
            current_server: NetworkServer::bad(),
            server_connection: None,
            pending_connects: HashMap::new(),
            login: None,
            join: None,
            hosted: None,
            poll: ServerPoll::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user(&self) -> &NetworkUser {
        &self.user
    }

    pub fn current_server(&self) -> &NetworkServer {
        &self.current_server
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn pending_requests(&self) -> &RequestRegistry<Session> {
        &self.registry
    }

    pub fn is_logging_in(&self) -> bool {
        self.login.is_some()
    }

    pub fn login_stage(&self) -> LoginStage {
        self.login
            .as_ref()
            .map_or(LoginStage::Idle, |attempt| attempt.stage)
    }

    pub fn is_joining(&self) -> bool {
        self.join.is_some()
    }

    pub fn is_hosting(&self) -> bool {
        self.hosted.is_some()
    }

    /// The hosted roster, when this peer hosts a game server.
    pub fn roster(&self) -> Option<&GameSession> {
        self.hosted.as_ref().map(|hosted| &hosted.roster)
    }

    pub fn subscribe(&mut self, kind: EventKind, listener: Listener) -> SubscriptionId {
        self.events.subscribe(kind, listener)
    }

    pub fn unsubscribe(&mut self, kind: EventKind, id: SubscriptionId) -> bool {
        self.events.unsubscribe(kind, id)
    }

    /// Runs one heartbeat at the clock's current time.
    pub fn tick(&mut self) {
        for event in self.transport.poll() {
            self.handle_transport_event(event);
        }

        let now = self.clock.now();
        Scheduler::run_due(self, now);

        for request in self.registry.sweep_timeouts() {
            let stale: Vec<ConnectionHandle> = self
                .pending_connects
                .iter()
                .filter(|(_, pending)| **pending == request)
                .map(|(handle, _)| *handle)
                .collect();
            for handle in stale {
                self.pending_connects.remove(&handle);
                self.transport.disconnect(handle);
            }
        }

        self.check_login_progress();
        self.check_join_progress();
    }

    /// Flows always time out; a non-positive `timeout` picks the default.
    pub(crate) fn effective_timeout(&self, timeout: f64) -> f64 {
        if timeout > 0.0 {
            timeout
        } else {
            self.config.request_timeout
        }
    }

    pub(crate) fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("Session state {:?} -> {:?}", from, to);
        self.state = to;
        self.events.publish(SessionEvent::StateChanged { from, to });
    }

    /// Starts an outgoing connection tracked by a `Connect` request.
    pub(crate) fn connect_tracked(
        &mut self,
        address: &str,
        timeout: f64,
        callback: RequestCallback<Session>,
    ) -> (ConnectionHandle, Request) {
        let request =
            self.registry
                .register(RequestType::Connect, self.user.clone(), timeout, callback);
        let handle = self.transport.connect(address);
        debug!("Connecting to {} on {}", address, handle);
        self.pending_connects.insert(handle, request.clone());
        (handle, request)
    }

    /// Closes an outgoing connection and forgets any connect waiting on it.
    pub(crate) fn close_connection(&mut self, handle: ConnectionHandle) {
        self.pending_connects.remove(&handle);
        self.transport.disconnect(handle);
    }

    pub fn send_message(&mut self, handle: ConnectionHandle, message: &Message) -> bool {
        match shared::encode(message) {
            Ok(packet) => self.send_packet(handle, &packet),
            Err(e) => {
                warn!("Failed to encode {:?}: {}", message.message_type(), e);
                false
            }
        }
    }

    pub(crate) fn send_packet(&mut self, handle: ConnectionHandle, packet: &Packet) -> bool {
        trace!("Sending {:?} on {}", packet, handle);
        self.transport.send(handle, packet)
    }

    pub(crate) fn broadcast(&mut self, handles: &[ConnectionHandle], message: &Message) {
        let packet = match shared::encode(message) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Failed to encode {:?}: {}", message.message_type(), e);
                return;
            }
        };
        for handle in handles {
            self.send_packet(*handle, &packet);
        }
    }

    /// Ends the session: leaves or destroys any game server and returns to
    /// `Offline`.
    pub fn log_out(&mut self) -> bool {
        if self.state == SessionState::Offline {
            warn!("Cannot log out: not logged in");
            return false;
        }

        self.abort_join();
        self.cancel_poll();
        if self.is_hosting() {
            self.destroy_game_server();
        } else if let Some(handle) = self.server_connection.take() {
            self.close_connection(handle);
            self.current_server = NetworkServer::bad();
        }

        info!("{} logged out", self.user);
        self.user = NetworkUser::bad();
        self.set_state(SessionState::Offline);
        true
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected {
                handle,
                session_guid,
            } => match self.pending_connects.remove(&handle) {
                Some(request) => {
                    let response = ResponseData::new(
                        request,
                        ResponsePayload::Connected {
                            handle,
                            session_guid,
                        },
                    );
                    if !RequestRegistry::complete(self, response) {
                        debug!("Connect on {} resolved too late; closing", handle);
                        self.transport.disconnect(handle);
                    }
                }
                None => {
                    debug!("Unexpected connection {}; closing", handle);
                    self.transport.disconnect(handle);
                }
            },
            TransportEvent::ConnectFailed { handle } => {
                if let Some(request) = self.pending_connects.remove(&handle) {
                    RequestRegistry::complete(
                        self,
                        ResponseData::new(request, ResponsePayload::ConnectFailed { handle }),
                    );
                }
            }
            TransportEvent::Disconnected { handle } => self.on_disconnected(handle),
            TransportEvent::PeerConnected { handle } => self.on_peer_connected(handle),
            TransportEvent::PeerDisconnected { handle } => self.on_peer_disconnected(handle),
            TransportEvent::Received { handle, packet } => match shared::decode_any(&packet) {
                Ok(message) => self.handle_message(handle, message),
                Err(e) => warn!("Dropping malformed packet from {}: {}", handle, e),
            },
        }
    }

    fn on_disconnected(&mut self, handle: ConnectionHandle) {
        if self.server_connection == Some(handle) {
            self.on_server_lost();
        } else if self.login_connection() == Some(handle) {
            warn!("Authentication server closed the connection");
            self.finish_login(AuthStatus::Error);
        } else if self.join_connection() == Some(handle) {
            warn!("Game server closed the connection during join");
            self.finish_join(ConnectionStatus::Error);
        } else {
            debug!("Connection {} closed", handle);
        }
    }

    fn handle_message(&mut self, handle: ConnectionHandle, message: Message) {
        trace!("Received {:?} on {}", message.message_type(), handle);
        match message {
            Message::AuthenticationStatus(reply) => {
                if self.login_connection() != Some(handle) {
                    debug!("Authentication reply on stale connection {}; dropping", handle);
                    return;
                }
                match self
                    .registry
                    .find_by_id(reply.request, RequestType::Authenticate)
                {
                    Some(request) => {
                        RequestRegistry::complete(
                            self,
                            ResponseData::new(
                                request,
                                ResponsePayload::Authentication(reply.status),
                            ),
                        );
                    }
                    None => debug!(
                        "No authentication request {}; dropping reply",
                        reply.request
                    ),
                }
            }
            Message::ConnectionStatus(reply) => {
                if self.join_connection() != Some(handle) {
                    debug!("Join reply on stale connection {}; dropping", handle);
                    return;
                }
                match self
                    .registry
                    .find_by_id(reply.request, RequestType::JoinSession)
                {
                    Some(request) => {
                        RequestRegistry::complete(
                            self,
                            ResponseData::new(request, ResponsePayload::Join(reply.status)),
                        );
                    }
                    None => debug!("No join request {}; dropping reply", reply.request),
                }
            }
            Message::ConnectionRequest(request) => self.on_connection_request(handle, request),
            Message::ConnectionRoster(roster) => self.on_roster(handle, roster),
            Message::ConnectionKicked(kicked) => self.on_kicked(handle, kicked),
            Message::ObjectCreate(create) => self.on_object_create(handle, create),
            Message::ObjectDestroy(destroy) => self.on_object_destroy(handle, destroy),
            Message::Authenticate(_) => {
                warn!("Peers do not answer Authenticate; dropping from {}", handle)
            }
        }
    }
}
