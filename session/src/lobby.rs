//! Game servers: browsing, joining, hosting and object authority.
//!
//! A logged-in peer either hosts a game server (it owns the `GameSession`
//! roster and relays object messages) or joins one as a client through
//! `join_server`. The host is the only authority: clients ask it to create or
//! destroy objects and only see the result once the host broadcasts it.

use crate::events::SessionEvent;
use crate::request::{Request, RequestStatus, RequestType, ResponseData, ResponsePayload};
use crate::roster::{GameSession, RegisterError};
use crate::scheduler::TaskId;
use crate::session::{Session, SessionState};
use crate::transport::ConnectionHandle;
use log::{debug, error, info, warn};
use shared::packets::{
    ConnectionKicked, ConnectionRequest, ConnectionRoster, ConnectionStatusMsg, Message,
    ObjectCreate, ObjectDestroy,
};
use shared::{ConnectionStatus, NetworkServer, NetworkUser, Quat, ServerType, Vec3};
use std::collections::HashMap;

pub type JoinCallback = Box<dyn FnOnce(&mut Session, ConnectionStatus)>;
pub type ServerListCallback = Box<dyn FnOnce(&mut Session, Vec<NetworkServer>)>;

pub(crate) struct JoinAttempt {
    server: NetworkServer,
    request: Request,
    connection: Option<ConnectionHandle>,
    timeout: f64,
    callback: Option<JoinCallback>,
}

pub(crate) struct HostedSession {
    pub(crate) roster: GameSession,
    advertise_task: TaskId,
    /// Live objects by guid, with their owners.
    objects: HashMap<String, NetworkUser>,
}

fn new_object_guid() -> String {
    format!("{:032x}", rand::random::<u128>())
}

impl Session {
    /// Lists advertised game servers. `callback` receives the list, which
    /// may be empty. Returns the tracking request so callers can watch for a
    /// timeout.
    pub fn find_game_servers(
        &mut self,
        timeout: f64,
        callback: ServerListCallback,
    ) -> Option<Request> {
        if self.state == SessionState::Offline {
            warn!("Cannot list game servers while offline");
            return None;
        }

        let timeout = self.effective_timeout(timeout);
        let request = self.registry.register(
            RequestType::ServerList,
            self.user.clone(),
            timeout,
            Box::new(move |session: &mut Session, response: ResponseData| {
                let servers = match response.payload {
                    ResponsePayload::ServerList(servers) => servers,
                    other => {
                        warn!("Unexpected server list reply {:?}", other);
                        Vec::new()
                    }
                };
                callback(session, servers);
            }),
        );
        let interval = self.config.poll_interval;
        self.start_poll(ServerType::Game, request.clone(), interval);
        Some(request)
    }

    /// Connects to `server` and asks to be registered in its session. A
    /// `timeout` of zero or less uses the configured request timeout.
    pub fn join_server(
        &mut self,
        server: &NetworkServer,
        timeout: f64,
        callback: JoinCallback,
    ) -> bool {
        if self.state != SessionState::LoggedIn {
            error!("Cannot join {}: session is {:?}", server, self.state);
            return false;
        }
        if self.join.is_some() || self.hosted.is_some() {
            error!("Cannot join {}: already joining or hosting", server);
            return false;
        }
        if !server.is_valid() || server.server_type != ServerType::Game {
            error!("Cannot join {}: not a game server", server);
            return false;
        }

        info!("Joining {}", server);
        let timeout = self.effective_timeout(timeout);
        let (handle, request) = self.connect_tracked(
            &server.host_connection,
            timeout,
            Box::new(|session: &mut Session, response: ResponseData| {
                session.on_join_connected(response)
            }),
        );
        self.join = Some(JoinAttempt {
            server: server.clone(),
            request,
            connection: Some(handle),
            timeout,
            callback: Some(callback),
        });
        true
    }

    pub(crate) fn join_connection(&self) -> Option<ConnectionHandle> {
        self.join.as_ref().and_then(|attempt| attempt.connection)
    }

    fn is_join_request(&self, request: &Request) -> bool {
        match &self.join {
            Some(attempt) if attempt.request == *request => true,
            _ => {
                warn!("{:?} is not the in-flight join request; ignoring", request);
                false
            }
        }
    }

    fn on_join_connected(&mut self, response: ResponseData) {
        if !self.is_join_request(&response.request) {
            return;
        }

        let (handle, session_guid) = match response.payload {
            ResponsePayload::Connected {
                handle,
                session_guid,
            } => (handle, session_guid),
            other => {
                warn!("Could not connect to game server: {:?}", other);
                self.finish_join(ConnectionStatus::Error);
                return;
            }
        };

        self.user.session_guid = session_guid;
        let timeout = self.join.as_ref().map_or(0.0, |attempt| attempt.timeout);
        let request = self.registry.register(
            RequestType::JoinSession,
            self.user.clone(),
            timeout,
            Box::new(|session: &mut Session, response: ResponseData| {
                session.on_join_status(response)
            }),
        );
        if let Some(attempt) = self.join.as_mut() {
            attempt.request = request.clone();
            attempt.connection = Some(handle);
        }

        let message = Message::ConnectionRequest(ConnectionRequest {
            request: request.id(),
            user: self.user.clone(),
        });
        if !self.send_message(handle, &message) {
            self.finish_join(ConnectionStatus::Error);
        }
    }

    fn on_join_status(&mut self, response: ResponseData) {
        if !self.is_join_request(&response.request) {
            return;
        }

        let status = match response.payload {
            ResponsePayload::Join(status) => status,
            other => {
                warn!("Unexpected join reply {:?}", other);
                ConnectionStatus::Error
            }
        };

        if status == ConnectionStatus::Good {
            if let Some(attempt) = self.join.as_mut() {
                self.server_connection = attempt.connection.take();
                self.current_server = attempt.server.clone();
            }
            info!("Joined {}", self.current_server);
            self.set_state(SessionState::InLobby);
        } else {
            info!("Join rejected: {}", status.describe());
        }
        self.finish_join(status);
    }

    pub(crate) fn check_join_progress(&mut self) {
        let Some(status) = self.join.as_ref().map(|attempt| attempt.request.status()) else {
            return;
        };
        if matches!(status, RequestStatus::TimedOut | RequestStatus::Invalid) {
            warn!("Join abandoned: request is {:?}", status);
            self.finish_join(ConnectionStatus::Error);
        }
    }

    /// Clears join state, closing the connection unless the join succeeded.
    pub(crate) fn finish_join(&mut self, status: ConnectionStatus) {
        let Some(mut attempt) = self.join.take() else {
            return;
        };
        if attempt.request.is_pending() {
            self.registry.invalidate(&attempt.request);
        }
        if let Some(handle) = attempt.connection.take() {
            self.close_connection(handle);
        }
        if let Some(callback) = attempt.callback.take() {
            callback(self, status);
        }
    }

    pub(crate) fn abort_join(&mut self) {
        if self.join.is_some() {
            self.finish_join(ConnectionStatus::Error);
        }
    }

    /// Hosts a new game server and advertises it until destroyed. A
    /// `max_users` of zero uses the configured default.
    pub fn create_game_server(&mut self, name: &str, max_users: usize) -> bool {
        if self.state != SessionState::LoggedIn {
            error!("Cannot create {}: session is {:?}", name, self.state);
            return false;
        }
        if self.hosted.is_some() || self.join.is_some() {
            error!("Cannot create {}: already joining or hosting", name);
            return false;
        }
        if name.is_empty() {
            error!("Cannot create a game server without a name");
            return false;
        }
        let Some(address) = self.transport.start_hosting() else {
            error!("Transport refused to host {}", name);
            return false;
        };

        let max_users = if max_users == 0 {
            self.config.default_max_users
        } else {
            max_users
        };
        let roster = GameSession::new(self.user.clone(), max_users);
        let mut server = NetworkServer::new(
            name,
            ServerType::Game,
            address,
            self.user.username.as_str(),
        );
        server.current_users = roster.users();
        self.directory.advertise(&server);

        let now = self.clock.now();
        let advertise_task = self.scheduler.run_every(
            now,
            self.config.advertise_interval,
            None,
            Box::new(|session: &mut Session| session.refresh_advertisement()),
        );
        self.hosted = Some(HostedSession {
            roster,
            advertise_task,
            objects: HashMap::new(),
        });
        info!("Hosting {} at {}", server, server.host_connection);
        self.current_server = server;
        self.set_state(SessionState::InLobby);
        true
    }

    fn refresh_advertisement(&mut self) {
        let Some(hosted) = self.hosted.as_ref() else {
            return;
        };
        self.current_server.current_users = hosted.roster.users();
        debug!("Re-advertising {}", self.current_server);
        self.directory.advertise(&self.current_server);
    }

    /// Stops hosting. Connected players lose their connection.
    pub fn destroy_game_server(&mut self) -> bool {
        let Some(hosted) = self.hosted.take() else {
            error!("Cannot destroy game server: not hosting");
            return false;
        };

        self.scheduler.cancel(hosted.advertise_task);
        self.directory.withdraw(&self.current_server);
        self.transport.stop_hosting();
        info!("Destroyed {}", self.current_server);
        self.current_server = NetworkServer::bad();
        if matches!(self.state, SessionState::InLobby | SessionState::InGame) {
            self.set_state(SessionState::LoggedIn);
        }
        true
    }

    pub fn leave_lobby(&mut self) -> bool {
        if !matches!(self.state, SessionState::InLobby | SessionState::InGame) {
            error!("Cannot leave lobby: session is {:?}", self.state);
            return false;
        }
        if self.is_hosting() {
            return self.destroy_game_server();
        }

        if let Some(handle) = self.server_connection.take() {
            self.close_connection(handle);
        }
        info!("Left {}", self.current_server);
        self.current_server = NetworkServer::bad();
        self.set_state(SessionState::LoggedIn);
        true
    }

    /// Moves a hosted lobby into the game.
    pub fn start_game(&mut self) -> bool {
        if !self.is_hosting() || self.state != SessionState::InLobby {
            error!("Cannot start game: not hosting a lobby");
            return false;
        }
        self.set_state(SessionState::InGame);
        true
    }

    pub fn kick_player(&mut self, username: &str, reason: &str) -> bool {
        let Some(hosted) = self.hosted.as_mut() else {
            error!("Cannot kick {}: not hosting", username);
            return false;
        };
        let Some(user) = hosted
            .roster
            .users()
            .into_iter()
            .find(|user| user.username == username)
        else {
            warn!("Cannot kick {}: not in the session", username);
            return false;
        };
        let Some(handle) = hosted.roster.kick_player(username) else {
            warn!("Cannot kick {}", username);
            return false;
        };

        info!("Kicking {}: {}", username, reason);
        self.send_message(
            handle,
            &Message::ConnectionKicked(ConnectionKicked {
                username: username.to_string(),
                reason: reason.to_string(),
            }),
        );
        self.transport.disconnect(handle);
        self.broadcast_roster();
        self.events.publish(SessionEvent::PlayerDisconnected(user));
        true
    }

    /// Creates an object owned by the local user and returns its guid. On a
    /// client the object exists only once the host relays it back.
    pub fn spawn_object(
        &mut self,
        prefab_id: u32,
        position: Vec3,
        rotation: Quat,
    ) -> Option<String> {
        if !matches!(self.state, SessionState::InLobby | SessionState::InGame) {
            warn!("Cannot spawn objects outside a game server");
            return None;
        }

        let create = ObjectCreate {
            guid: new_object_guid(),
            prefab_id,
            position,
            rotation,
            owner: self.user.clone(),
        };
        let guid = create.guid.clone();
        if self.is_hosting() {
            self.accept_object(create);
        } else {
            let handle = self.server_connection?;
            if !self.send_message(handle, &Message::ObjectCreate(create)) {
                return None;
            }
        }
        Some(guid)
    }

    pub fn destroy_object(&mut self, guid: &str) -> bool {
        if let Some(hosted) = self.hosted.as_ref() {
            let Some(owner) = hosted.objects.get(guid).cloned() else {
                warn!("No object {} to destroy", guid);
                return false;
            };
            self.accept_destroy(ObjectDestroy {
                guid: guid.to_string(),
                owner,
            });
            return true;
        }

        let Some(handle) = self.server_connection else {
            warn!("Cannot destroy objects outside a game server");
            return false;
        };
        let destroy = ObjectDestroy {
            guid: guid.to_string(),
            owner: self.user.clone(),
        };
        self.send_message(handle, &Message::ObjectDestroy(destroy))
    }

    /// Owner of a live object on the hosted server.
    pub fn object_owner(&self, guid: &str) -> Option<&NetworkUser> {
        self.hosted.as_ref()?.objects.get(guid)
    }

    fn accept_object(&mut self, create: ObjectCreate) {
        let Some(hosted) = self.hosted.as_mut() else {
            return;
        };
        hosted
            .objects
            .insert(create.guid.clone(), create.owner.clone());
        let handles = hosted.roster.player_handles();
        self.broadcast(&handles, &Message::ObjectCreate(create.clone()));
        self.events.publish(SessionEvent::ObjectCreated(create));
    }

    fn accept_destroy(&mut self, destroy: ObjectDestroy) {
        let Some(hosted) = self.hosted.as_mut() else {
            return;
        };
        hosted.objects.remove(&destroy.guid);
        let handles = hosted.roster.player_handles();
        self.broadcast(&handles, &Message::ObjectDestroy(destroy.clone()));
        self.events.publish(SessionEvent::ObjectDestroyed(destroy));
    }

    fn broadcast_roster(&mut self) {
        let Some(hosted) = self.hosted.as_ref() else {
            return;
        };
        let users = hosted.roster.users();
        let handles = hosted.roster.player_handles();
        self.broadcast(
            &handles,
            &Message::ConnectionRoster(ConnectionRoster {
                users: users.clone(),
            }),
        );
        self.current_server.current_users = users.clone();
        self.events.publish(SessionEvent::RosterChanged(users));
    }

    pub(crate) fn on_peer_connected(&mut self, handle: ConnectionHandle) {
        match self.hosted.as_mut() {
            Some(hosted) => hosted.roster.add_pending(handle),
            None => {
                debug!("Not hosting; closing inbound {}", handle);
                self.transport.disconnect(handle);
            }
        }
    }

    pub(crate) fn on_peer_disconnected(&mut self, handle: ConnectionHandle) {
        let Some(hosted) = self.hosted.as_mut() else {
            return;
        };
        hosted.roster.remove_pending(handle);
        let Some(user) = hosted.roster.user_for_handle(handle).cloned() else {
            return;
        };
        hosted.roster.unregister_by_handle(handle);

        info!("{} disconnected", user);
        self.broadcast_roster();
        self.events.publish(SessionEvent::PlayerDisconnected(user));
    }

    pub(crate) fn on_connection_request(
        &mut self,
        handle: ConnectionHandle,
        request: ConnectionRequest,
    ) {
        let Some(hosted) = self.hosted.as_mut() else {
            warn!("Connection request on {} while not hosting", handle);
            return;
        };

        let status = match hosted.roster.try_register(request.user.clone(), handle) {
            Ok(()) => ConnectionStatus::Good,
            Err(RegisterError::Full) => ConnectionStatus::Full,
            Err(e) => {
                warn!("Rejecting {} on {}: {}", request.user, handle, e);
                ConnectionStatus::Error
            }
        };
        self.send_message(
            handle,
            &Message::ConnectionStatus(ConnectionStatusMsg {
                request: request.request,
                status,
            }),
        );

        if status == ConnectionStatus::Good {
            info!("{} joined", request.user);
            self.broadcast_roster();
            self.events
                .publish(SessionEvent::PlayerConnected(request.user));
        }
    }

    fn is_from_server(&self, handle: ConnectionHandle) -> bool {
        if self.server_connection == Some(handle) {
            return true;
        }
        warn!("Ignoring server message on {}", handle);
        false
    }

    pub(crate) fn on_roster(&mut self, handle: ConnectionHandle, roster: ConnectionRoster) {
        if !self.is_from_server(handle) {
            return;
        }
        self.current_server.current_users = roster.users.clone();
        self.events
            .publish(SessionEvent::RosterChanged(roster.users));
    }

    pub(crate) fn on_kicked(&mut self, handle: ConnectionHandle, kicked: ConnectionKicked) {
        if !self.is_from_server(handle) {
            return;
        }
        info!("Kicked from {}: {}", self.current_server, kicked.reason);
        self.server_connection = None;
        self.close_connection(handle);
        self.current_server = NetworkServer::bad();
        self.set_state(SessionState::LoggedIn);
        self.events.publish(SessionEvent::Kicked {
            reason: kicked.reason,
        });
    }

    pub(crate) fn on_server_lost(&mut self) {
        self.server_connection = None;
        let lost = std::mem::replace(&mut self.current_server, NetworkServer::bad());
        warn!("Lost connection to {}", lost);
        if matches!(self.state, SessionState::InLobby | SessionState::InGame) {
            self.set_state(SessionState::LoggedIn);
        }
        self.events.publish(SessionEvent::ServerLost(lost));
    }

    pub(crate) fn on_object_create(&mut self, handle: ConnectionHandle, create: ObjectCreate) {
        if let Some(hosted) = self.hosted.as_ref() {
            let sender = hosted.roster.user_for_handle(handle);
            if sender != Some(&create.owner) {
                warn!("{} may not create objects for {}", handle, create.owner);
                return;
            }
            if hosted.objects.contains_key(&create.guid) {
                warn!("Object {} already exists", create.guid);
                return;
            }
            self.accept_object(create);
            return;
        }

        if !self.is_from_server(handle) {
            return;
        }
        if self.state == SessionState::InLobby {
            self.set_state(SessionState::InGame);
        }
        self.events.publish(SessionEvent::ObjectCreated(create));
    }

    pub(crate) fn on_object_destroy(&mut self, handle: ConnectionHandle, destroy: ObjectDestroy) {
        if let Some(hosted) = self.hosted.as_ref() {
            let sender = hosted.roster.user_for_handle(handle);
            let owner = hosted.objects.get(&destroy.guid);
            if sender.is_none() || sender != owner || sender != Some(&destroy.owner) {
                warn!("{} may not destroy object {}", handle, destroy.guid);
                return;
            }
            self.accept_destroy(destroy);
            return;
        }

        if !self.is_from_server(handle) {
            return;
        }
        self.events.publish(SessionEvent::ObjectDestroyed(destroy));
    }
}
