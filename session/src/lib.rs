//! # Session Library
//!
//! Peer-side session layer: logging in against an authentication server,
//! browsing, hosting and joining game servers, and tracking every in-flight
//! network operation as a request with a timeout and a one-shot callback.
//!
//! ## Architecture Overview
//!
//! Everything runs on one heartbeat. The embedding application advances a
//! shared [`Clock`] and calls [`Session::tick`]; nothing blocks and nothing
//! runs on another thread. Long operations are modelled as requests that
//! resolve on a later tick, when a packet arrives, a connection is reported
//! or a scheduled task fires.
//!
//! ### Requests (`request`)
//! The registry hands out small recyclable ids, tracks requests by type and
//! id, completes them exactly once and sweeps timed-out ones. Timeouts do not
//! fire callbacks; the flows built on top check their own request's status.
//!
//! ### Scheduling (`scheduler`, `clock`)
//! Run-after and run-every tasks, used for directory polls and for
//! re-advertising hosted servers.
//!
//! ### Session (`session`, `login`, `lobby`, `poll`, `roster`)
//! The state machine `Offline -> LoggedIn -> InLobby -> InGame`, the login
//! flow (discover, connect, authenticate), joining and hosting game servers,
//! and the host's authoritative roster and object list.
//!
//! ### Collaborators (`transport`, `memory`, `udp`)
//! The session talks to the network only through the [`Transport`] and
//! [`Directory`] traits. [`MemoryNetwork`] wires peers together in process;
//! [`UdpTransport`] talks to real servers.
//!
//! ### Events (`events`)
//! Observers subscribe per [`EventKind`] and are called synchronously in
//! subscription order.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use session::{Clock, MemoryNetwork, Session, SessionConfig};
//!
//! let network = MemoryNetwork::new();
//! let clock = Clock::new();
//! let mut session = Session::new(
//!     Box::new(network.endpoint()),
//!     Box::new(network.directory()),
//!     clock.clone(),
//!     SessionConfig::default(),
//! );
//!
//! session.login(
//!     "alice",
//!     "secret",
//!     10.0,
//!     Box::new(|_: &mut Session, status: shared::AuthStatus| {
//!         println!("login: {}", status.describe())
//!     }),
//! );
//!
//! loop {
//!     clock.advance(1.0 / 30.0);
//!     session.tick();
//! }
//! ```

pub mod clock;
pub mod config;
pub mod events;
pub mod lobby;
pub mod login;
pub mod memory;
pub mod poll;
pub mod request;
pub mod roster;
pub mod scheduler;
pub mod session;
pub mod transport;
pub mod udp;

pub use clock::Clock;
pub use config::SessionConfig;
pub use events::{EventBus, EventKind, SessionEvent, SubscriptionId};
pub use lobby::{JoinCallback, ServerListCallback};
pub use login::{LoginCallback, LoginStage};
pub use memory::{MemoryDirectory, MemoryNetwork, MemoryTransport};
pub use request::{Request, RequestRegistry, RequestStatus, RequestType, ResponseData};
pub use roster::{GameSession, RegisterError};
pub use scheduler::{Scheduler, TaskId};
pub use session::{Session, SessionState};
pub use transport::{ConnectionHandle, Directory, Transport, TransportEvent};
pub use udp::{StaticDirectory, UdpTransport};
