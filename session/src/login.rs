//! Login: discover an authentication server, connect, authenticate.
//!
//! Each stage runs as its own tracked request and the next stage is started
//! from the previous stage's completion callback. Whatever happens, the
//! caller's callback runs exactly once and all login state is cleared.

use crate::events::SessionEvent;
use crate::request::{Request, RequestStatus, RequestType, ResponseData, ResponsePayload};
use crate::session::{Session, SessionState};
use crate::transport::ConnectionHandle;
use log::{debug, info, warn};
use shared::packets::{Authenticate, Message};
use shared::{AuthStatus, NetworkUser, ServerType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    Idle,
    DiscoveringServers,
    Connecting,
    Authenticating,
}

pub type LoginCallback = Box<dyn FnOnce(&mut Session, AuthStatus)>;

pub(crate) struct LoginAttempt {
    pub(crate) stage: LoginStage,
    username: String,
    password: String,
    timeout: f64,
    request: Request,
    connection: Option<ConnectionHandle>,
    session_guid: String,
    callback: Option<LoginCallback>,
}

impl Session {
    /// Starts logging in. Returns false without calling `callback` when a
    /// login is already running, the session is not offline, or a field is
    /// empty. Otherwise `callback` later receives the final status. A
    /// `timeout` of zero or less uses the configured request timeout.
    pub fn login(
        &mut self,
        username: &str,
        password: &str,
        timeout: f64,
        callback: LoginCallback,
    ) -> bool {
        if self.login.is_some() {
            warn!("Login already in progress; ignoring login for {}", username);
            return false;
        }
        if self.state != SessionState::Offline {
            warn!("Cannot log in as {}: already logged in as {}", username, self.user);
            return false;
        }
        if username.is_empty() || password.is_empty() {
            warn!("Cannot log in with an empty username or password");
            return false;
        }

        info!("Logging in as {}", username);
        let timeout = self.effective_timeout(timeout);
        let request = self.registry.register(
            RequestType::ServerList,
            NetworkUser::new(username, ""),
            timeout,
            Box::new(|session: &mut Session, response: ResponseData| {
                session.on_login_servers(response)
            }),
        );
        self.login = Some(LoginAttempt {
            stage: LoginStage::DiscoveringServers,
            username: username.to_string(),
            password: shared::encrypt_password(password),
            timeout,
            request: request.clone(),
            connection: None,
            session_guid: String::new(),
            callback: Some(callback),
        });

        let interval = self.config.poll_interval;
        self.start_poll(ServerType::Authentication, request, interval);
        true
    }

    pub(crate) fn login_connection(&self) -> Option<ConnectionHandle> {
        self.login.as_ref().and_then(|attempt| attempt.connection)
    }

    fn is_login_request(&self, request: &Request, stage: LoginStage) -> bool {
        match &self.login {
            Some(attempt) if attempt.stage == stage && attempt.request == *request => true,
            _ => {
                warn!("{:?} is not the in-flight login request; ignoring", request);
                false
            }
        }
    }

    fn on_login_servers(&mut self, response: ResponseData) {
        if !self.is_login_request(&response.request, LoginStage::DiscoveringServers) {
            return;
        }

        let server = match response.payload {
            ResponsePayload::ServerList(servers) => servers.into_iter().next(),
            other => {
                warn!("Unexpected discovery reply {:?}", other);
                None
            }
        };
        let Some(server) = server else {
            warn!("No authentication servers found");
            self.finish_login(AuthStatus::Error);
            return;
        };

        let timeout = self.login.as_ref().map_or(0.0, |attempt| attempt.timeout);
        debug!("Connecting to authentication server {}", server);
        let (handle, request) = self.connect_tracked(
            &server.host_connection,
            timeout,
            Box::new(|session: &mut Session, response: ResponseData| {
                session.on_login_connected(response)
            }),
        );
        if let Some(attempt) = self.login.as_mut() {
            attempt.stage = LoginStage::Connecting;
            attempt.request = request;
            attempt.connection = Some(handle);
        }
    }

    fn on_login_connected(&mut self, response: ResponseData) {
        if !self.is_login_request(&response.request, LoginStage::Connecting) {
            return;
        }

        let (handle, session_guid) = match response.payload {
            ResponsePayload::Connected {
                handle,
                session_guid,
            } => (handle, session_guid),
            ResponsePayload::ConnectFailed { handle } => {
                warn!("Could not connect to the authentication server on {}", handle);
                self.finish_login(AuthStatus::Error);
                return;
            }
            other => {
                warn!("Unexpected connect reply {:?}", other);
                self.finish_login(AuthStatus::Error);
                return;
            }
        };

        let Some((username, password, timeout)) = self.login.as_ref().map(|attempt| {
            (
                attempt.username.clone(),
                attempt.password.clone(),
                attempt.timeout,
            )
        }) else {
            return;
        };

        let request = self.registry.register(
            RequestType::Authenticate,
            NetworkUser::new(username.as_str(), session_guid.as_str()),
            timeout,
            Box::new(|session: &mut Session, response: ResponseData| {
                session.on_login_authenticated(response)
            }),
        );
        if let Some(attempt) = self.login.as_mut() {
            attempt.stage = LoginStage::Authenticating;
            attempt.request = request.clone();
            attempt.connection = Some(handle);
            attempt.session_guid = session_guid;
        }

        let message = Message::Authenticate(Authenticate {
            request: request.id(),
            username,
            password,
        });
        if !self.send_message(handle, &message) {
            warn!("Failed to send credentials on {}", handle);
            self.finish_login(AuthStatus::Error);
        }
    }

    fn on_login_authenticated(&mut self, response: ResponseData) {
        if !self.is_login_request(&response.request, LoginStage::Authenticating) {
            return;
        }

        let status = match response.payload {
            ResponsePayload::Authentication(status) => status,
            other => {
                warn!("Unexpected authentication reply {:?}", other);
                AuthStatus::Error
            }
        };

        if status == AuthStatus::Good {
            if let Some(attempt) = self.login.as_ref() {
                self.user =
                    NetworkUser::new(attempt.username.as_str(), attempt.session_guid.as_str());
            }
            info!("Logged in as {}", self.user);
            self.set_state(SessionState::LoggedIn);
        } else {
            info!("Login rejected: {}", status.describe());
        }
        self.finish_login(status);
    }

    /// Aborts the login when its in-flight request timed out or was dropped.
    pub(crate) fn check_login_progress(&mut self) {
        let Some(status) = self.login.as_ref().map(|attempt| attempt.request.status()) else {
            return;
        };
        match status {
            RequestStatus::TimedOut => {
                warn!("Login timed out during {:?}", self.login_stage());
                self.finish_login(AuthStatus::Error);
            }
            RequestStatus::Invalid => {
                warn!("Login request was dropped during {:?}", self.login_stage());
                self.finish_login(AuthStatus::Error);
            }
            RequestStatus::Pending | RequestStatus::Complete => {}
        }
    }

    /// Clears all login state and reports `status` to the caller.
    pub(crate) fn finish_login(&mut self, status: AuthStatus) {
        let Some(mut attempt) = self.login.take() else {
            return;
        };

        if attempt.stage == LoginStage::DiscoveringServers {
            self.cancel_poll();
        }
        if attempt.request.is_pending() {
            self.registry.invalidate(&attempt.request);
        }
        if let Some(handle) = attempt.connection.take() {
            self.close_connection(handle);
        }

        self.events.publish(SessionEvent::LoginResult(status));
        if let Some(callback) = attempt.callback.take() {
            callback(self, status);
        }
    }
}
