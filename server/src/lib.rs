//! # Authentication Server Library
//!
//! The authentication service that peers log in against. It keeps a
//! persistent store of username/password records, answers `Authenticate`
//! packets over UDP and is operated from a text command console.
//!
//! ## Module Organization
//!
//! ### Accounts (`accounts`)
//! The account store and its versioned binary file. Passwords arrive
//! already encrypted and are compared as stored.
//!
//! ### Authentication (`auth`)
//! [`AuthServer`] wraps the store with the service switches: listening,
//! connection logging and the deferred save that is flushed once per tick.
//!
//! ### Console (`console`)
//! Parses operator commands (`create`, `delete`, `authenticate`, `save`,
//! `load`, `start`, `stop` and friends) and reports their outcome as text.
//!
//! ### Network (`network`)
//! The UDP receiver and sender tasks plus the `tokio::select!` heartbeat
//! loop that feeds packets and console lines to the [`AuthServer`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{AuthServer, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let mut auth = AuthServer::new(&config);
//!     auth.load();
//!     auth.start();
//!
//!     let mut server = Server::new(&config, auth).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod accounts;
pub mod auth;
pub mod config;
pub mod console;
pub mod network;

pub use accounts::{AccountStore, StoreError};
pub use auth::AuthServer;
pub use config::ServerConfig;
pub use console::{process, process_line, ConsoleFlow, ConsoleResponse};
pub use network::{Server, ServerMessage};
