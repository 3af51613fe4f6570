//! Seams to the connection layer and the directory service.
//!
//! Neither trait blocks. `Transport::connect` returns a handle immediately
//! and the outcome arrives later as a `TransportEvent` from `poll`, which
//! the session drains once per heartbeat.

use shared::{NetworkServer, Packet, ServerType};
use std::fmt;

/// Identifies one live connection as seen by the local transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An outgoing connection was accepted. `session_guid` is the identity the
    /// connection layer assigned to this end of it.
    Connected {
        handle: ConnectionHandle,
        session_guid: String,
    },
    ConnectFailed {
        handle: ConnectionHandle,
    },
    /// An outgoing connection was closed by the remote side.
    Disconnected {
        handle: ConnectionHandle,
    },
    /// A remote peer connected to our hosted endpoint.
    PeerConnected {
        handle: ConnectionHandle,
    },
    PeerDisconnected {
        handle: ConnectionHandle,
    },
    Received {
        handle: ConnectionHandle,
        packet: Packet,
    },
}

pub trait Transport {
    /// Starts connecting to `address`. The result is reported through `poll`.
    fn connect(&mut self, address: &str) -> ConnectionHandle;

    fn disconnect(&mut self, handle: ConnectionHandle);

    /// Queues `packet` on `handle`. Returns false when the handle is unknown.
    fn send(&mut self, handle: ConnectionHandle, packet: &Packet) -> bool;

    /// Starts accepting peers. Returns the address peers should connect to.
    fn start_hosting(&mut self) -> Option<String>;

    fn stop_hosting(&mut self);

    fn poll(&mut self) -> Vec<TransportEvent>;
}

/// The external service that lists advertised servers by type.
pub trait Directory {
    fn advertise(&mut self, server: &NetworkServer);

    fn withdraw(&mut self, server: &NetworkServer);

    /// Asks for the servers of `filter` type. Results accumulate until taken.
    fn request_list(&mut self, filter: ServerType);

    fn take_results(&mut self) -> Vec<NetworkServer>;

    fn clear_results(&mut self);
}
