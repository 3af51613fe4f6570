//! Host-side roster of a game session.
//!
//! Peers arrive as pending connections and become players once they send a
//! valid `ConnectionRequest`. The host itself is a player with no connection.

use crate::transport::ConnectionHandle;
use log::{debug, info, warn};
use shared::NetworkUser;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    Full,
    DuplicateUser,
    UnknownConnection,
    InvalidUser,
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RegisterError::Full => "session is full",
            RegisterError::DuplicateUser => "username already in session",
            RegisterError::UnknownConnection => "connection is not pending",
            RegisterError::InvalidUser => "invalid user",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone)]
struct Player {
    user: NetworkUser,
    connection: Option<ConnectionHandle>,
}

#[derive(Debug, Clone)]
pub struct GameSession {
    host: NetworkUser,
    players: Vec<Player>,
    pending: Vec<ConnectionHandle>,
    max_users: usize,
}

impl GameSession {
    pub fn new(host: NetworkUser, max_users: usize) -> Self {
        Self {
            players: vec![Player {
                user: host.clone(),
                connection: None,
            }],
            host,
            pending: Vec::new(),
            max_users: max_users.max(1),
        }
    }

    pub fn host(&self) -> &NetworkUser {
        &self.host
    }

    pub fn max_users(&self) -> usize {
        self.max_users
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_users
    }

    pub fn users(&self) -> Vec<NetworkUser> {
        self.players.iter().map(|p| p.user.clone()).collect()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.players.iter().any(|p| p.user.username == username)
    }

    /// Connections of every registered remote player.
    pub fn player_handles(&self) -> Vec<ConnectionHandle> {
        self.players.iter().filter_map(|p| p.connection).collect()
    }

    pub fn user_for_handle(&self, handle: ConnectionHandle) -> Option<&NetworkUser> {
        self.players
            .iter()
            .find(|p| p.connection == Some(handle))
            .map(|p| &p.user)
    }

    pub fn handle_for(&self, username: &str) -> Option<ConnectionHandle> {
        self.players
            .iter()
            .find(|p| p.user.username == username)
            .and_then(|p| p.connection)
    }

    pub fn add_pending(&mut self, handle: ConnectionHandle) {
        if !self.pending.contains(&handle) {
            debug!("Connection {} pending registration", handle);
            self.pending.push(handle);
        }
    }

    pub fn remove_pending(&mut self, handle: ConnectionHandle) -> bool {
        let before = self.pending.len();
        self.pending.retain(|pending| *pending != handle);
        self.pending.len() != before
    }

    pub fn is_pending(&self, handle: ConnectionHandle) -> bool {
        self.pending.contains(&handle)
    }

    pub fn try_register(
        &mut self,
        user: NetworkUser,
        handle: ConnectionHandle,
    ) -> Result<(), RegisterError> {
        if !user.is_valid() {
            return Err(RegisterError::InvalidUser);
        }
        if self.is_full() {
            return Err(RegisterError::Full);
        }
        if self.contains(&user.username) {
            return Err(RegisterError::DuplicateUser);
        }
        if !self.remove_pending(handle) {
            return Err(RegisterError::UnknownConnection);
        }

        info!("Registered {} on {}", user, handle);
        self.players.push(Player {
            user,
            connection: Some(handle),
        });
        Ok(())
    }

    pub fn register_player(&mut self, user: NetworkUser, handle: ConnectionHandle) -> bool {
        match self.try_register(user.clone(), handle) {
            Ok(()) => true,
            Err(e) => {
                warn!("Cannot register {} on {}: {}", user, handle, e);
                false
            }
        }
    }

    /// Removes the player on `handle`, returning who it was.
    pub fn unregister_by_handle(&mut self, handle: ConnectionHandle) -> Option<NetworkUser> {
        let index = self
            .players
            .iter()
            .position(|p| p.connection == Some(handle));
        match index {
            Some(index) => Some(self.players.remove(index).user),
            None => {
                debug!("No player registered on {}", handle);
                None
            }
        }
    }

    pub fn unregister_by_username(&mut self, username: &str) -> Option<NetworkUser> {
        if username == self.host.username {
            warn!("Refusing to unregister the host {}", username);
            return None;
        }
        let index = self.players.iter().position(|p| p.user.username == username);
        match index {
            Some(index) => Some(self.players.remove(index).user),
            None => {
                debug!("{} is not in the session", username);
                None
            }
        }
    }

    /// Drops `username` from the roster and from the pending list. Returns
    /// the connection to close.
    pub fn kick_player(&mut self, username: &str) -> Option<ConnectionHandle> {
        let handle = self.handle_for(username)?;
        self.unregister_by_username(username);
        self.remove_pending(handle);
        Some(handle)
    }
}
