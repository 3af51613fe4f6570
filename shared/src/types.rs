use serde::{Deserialize, Serialize};
use std::fmt;

/// Username carried by the "no user" sentinel.
pub const BAD_USERNAME: &str = "";

/// A participant identified by username.
///
/// `session_guid` is issued by the connection layer and changes on every
/// successful connection, so it takes no part in equality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkUser {
    pub username: String,
    pub session_guid: String,
}

impl NetworkUser {
    pub fn new(username: impl Into<String>, session_guid: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            session_guid: session_guid.into(),
        }
    }

    /// The sentinel representing "no user".
    pub fn bad() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.username != BAD_USERNAME
    }

    /// True when this user hosts `server`.
    pub fn is_host(&self, server: &NetworkServer) -> bool {
        self.is_valid() && server.is_valid() && server.host_username == self.username
    }
}

impl PartialEq for NetworkUser {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
    }
}

impl Eq for NetworkUser {}

impl fmt::Display for NetworkUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.username)
        } else {
            write!(f, "<no user>")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerType {
    Authentication,
    Game,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::Authentication => "authentication",
            ServerType::Game => "game",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "authentication" => Some(ServerType::Authentication),
            "game" => Some(ServerType::Game),
            _ => None,
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An advertised server as listed by the directory service.
///
/// `host_connection` is whatever address string the transport needs to reach
/// the host. Equality considers only the name and type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkServer {
    pub server_name: String,
    pub server_type: ServerType,
    pub host_connection: String,
    pub host_username: String,
    pub current_users: Vec<NetworkUser>,
}

impl NetworkServer {
    pub fn new(
        server_name: impl Into<String>,
        server_type: ServerType,
        host_connection: impl Into<String>,
        host_username: impl Into<String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            server_type,
            host_connection: host_connection.into(),
            host_username: host_username.into(),
            current_users: Vec::new(),
        }
    }

    /// The sentinel representing "no server".
    pub fn bad() -> Self {
        Self::new("", ServerType::Game, "", "")
    }

    pub fn is_valid(&self) -> bool {
        !self.server_name.is_empty()
    }
}

impl PartialEq for NetworkServer {
    fn eq(&self, other: &Self) -> bool {
        self.server_name == other.server_name && self.server_type == other.server_type
    }
}

impl Eq for NetworkServer {}

impl fmt::Display for NetworkServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.server_name, self.server_type)
    }
}

/// A stored account. The password is always the caller-encrypted form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDetails {
    pub username: String,
    pub password: String,
}

impl AccountDetails {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Outcome of an account or authentication operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthStatus {
    Good,
    InvalidUsername,
    InvalidPassword,
    AlreadyExists,
    Error,
}

impl AuthStatus {
    pub fn describe(&self) -> &'static str {
        match self {
            AuthStatus::Good => "Success",
            AuthStatus::InvalidUsername => "Unknown or invalid username",
            AuthStatus::InvalidPassword => "Invalid password",
            AuthStatus::AlreadyExists => "Account already exists",
            AuthStatus::Error => "Could not reach the authentication server",
        }
    }
}

/// Outcome of a request to join a hosted game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Good,
    Full,
    Error,
}

impl ConnectionStatus {
    pub fn describe(&self) -> &'static str {
        match self {
            ConnectionStatus::Good => "Joined",
            ConnectionStatus::Full => "Server is full",
            ConnectionStatus::Error => "Connection refused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}
