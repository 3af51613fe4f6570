//! The authentication service.
//!
//! Answers `Authenticate` packets from the account store and owns the
//! service-level switches the console operates: listening on or off,
//! connection logging, and the deferred save. Account changes only mark a
//! save as requested; `end_tick` performs at most one write per tick.

use crate::accounts::AccountStore;
use crate::config::ServerConfig;
use log::{debug, error, info, warn};
use shared::packets::{AuthenticationStatusMsg, Message, MessageType};
use shared::{encrypt_password, AuthStatus, Packet};
use std::fmt::Display;
use std::path::PathBuf;

pub struct AuthServer {
    accounts: AccountStore,
    accounts_path: PathBuf,
    listening: bool,
    log_connections: bool,
    save_requested: bool,
}

impl AuthServer {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            accounts: AccountStore::new(),
            accounts_path: config.accounts_path.clone(),
            listening: false,
            log_connections: config.log_connections,
            save_requested: false,
        }
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Starts answering requests. Returns false when already listening.
    pub fn start(&mut self) -> bool {
        if self.listening {
            return false;
        }
        self.listening = true;
        info!("Authentication server online");
        true
    }

    /// Stops answering requests, saving first when `save` is set.
    pub fn stop(&mut self, save: bool) -> bool {
        let was_listening = self.listening;
        self.listening = false;
        if was_listening {
            info!("Authentication server offline");
        }
        if save {
            self.save();
        }
        was_listening
    }

    pub fn log_connections(&self) -> bool {
        self.log_connections
    }

    pub fn set_log_connections(&mut self, enabled: bool) {
        self.log_connections = enabled;
    }

    pub fn is_save_requested(&self) -> bool {
        self.save_requested
    }

    pub fn create_account(&mut self, username: &str, password: &str) -> AuthStatus {
        let status = self.accounts.add_account(username, &Self::encrypt(password));
        if status == AuthStatus::Good {
            info!("Created account {}", username);
            self.save_requested = true;
        }
        status
    }

    pub fn delete_account(&mut self, username: &str, password: &str) -> AuthStatus {
        let status = self
            .accounts
            .remove_account(username, &Self::encrypt(password));
        if status == AuthStatus::Good {
            info!("Deleted account {}", username);
            self.save_requested = true;
        }
        status
    }

    /// Checks plain-text credentials against the store.
    pub fn authenticate(&self, username: &str, password: &str) -> AuthStatus {
        self.accounts.authenticate(username, &Self::encrypt(password))
    }

    fn encrypt(password: &str) -> String {
        if password.is_empty() {
            String::new()
        } else {
            encrypt_password(password)
        }
    }

    pub fn save(&mut self) -> bool {
        self.save_requested = false;
        match self.accounts.save(&self.accounts_path) {
            Ok(()) => {
                info!(
                    "Saved {} accounts to {}",
                    self.accounts.len(),
                    self.accounts_path.display()
                );
                true
            }
            Err(e) => {
                error!(
                    "Failed to save accounts to {}: {}",
                    self.accounts_path.display(),
                    e
                );
                false
            }
        }
    }

    pub fn load(&mut self) -> bool {
        self.save_requested = false;
        match self.accounts.load(&self.accounts_path) {
            Ok(()) => {
                info!(
                    "Loaded {} accounts from {}",
                    self.accounts.len(),
                    self.accounts_path.display()
                );
                true
            }
            Err(e) => {
                error!(
                    "Failed to load accounts from {}: {}",
                    self.accounts_path.display(),
                    e
                );
                false
            }
        }
    }

    /// Flushes a requested save. Call once at the end of every tick.
    pub fn end_tick(&mut self) {
        if self.save_requested {
            self.save();
        }
    }

    /// Answers one packet from `peer`. Only `Authenticate` gets a reply.
    pub fn handle_packet(&mut self, peer: impl Display, packet: &Packet) -> Option<Packet> {
        if !self.listening {
            debug!("Offline; dropping packet from {}", peer);
            return None;
        }

        let request = match shared::decode(packet, MessageType::Authenticate) {
            Ok(Message::Authenticate(request)) => request,
            Ok(other) => {
                warn!("Unexpected {:?} from {}", other.message_type(), peer);
                return None;
            }
            Err(e) => {
                warn!("Dropping packet from {}: {}", peer, e);
                return None;
            }
        };

        let status = self
            .accounts
            .authenticate(&request.username, &request.password);
        if self.log_connections {
            info!(
                "{} authenticating as {}: {}",
                peer,
                request.username,
                status.describe()
            );
        }

        let reply = Message::AuthenticationStatus(AuthenticationStatusMsg {
            request: request.request,
            status,
        });
        match shared::encode(&reply) {
            Ok(packet) => Some(packet),
            Err(e) => {
                error!("Failed to encode reply for {}: {}", peer, e);
                None
            }
        }
    }
}
