//! UDP transport and a fixed server list for talking to real servers.
//!
//! UDP has no handshake, so `connect` succeeds as soon as the address parses
//! and the connection layer's guid is generated locally. While hosting, the
//! first datagram from an unknown address is reported as a new peer.
//!
//! Sessions poll their transport from a synchronous heartbeat, so this uses a
//! non-blocking std socket rather than a tokio one and needs no runtime.

use crate::transport::{ConnectionHandle, Directory, Transport, TransportEvent};
use log::{debug, error, warn};
use shared::packets::MAX_PACKET_SIZE;
use shared::{NetworkServer, Packet, ServerType};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};

pub struct UdpTransport {
    socket: UdpSocket,
    peers: HashMap<ConnectionHandle, SocketAddr>,
    inbound: HashSet<ConnectionHandle>,
    events: VecDeque<TransportEvent>,
    next_handle: u64,
    hosting: bool,
    buffer: Vec<u8>,
}

impl UdpTransport {
    pub fn bind(addr: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            peers: HashMap::new(),
            inbound: HashSet::new(),
            events: VecDeque::new(),
            next_handle: 0,
            hosting: false,
            buffer: vec![0u8; MAX_PACKET_SIZE as usize],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn allocate_handle(&mut self) -> ConnectionHandle {
        self.next_handle += 1;
        ConnectionHandle(self.next_handle)
    }

    fn handle_for(&self, addr: SocketAddr) -> Option<ConnectionHandle> {
        self.peers
            .iter()
            .find(|(_, peer)| **peer == addr)
            .map(|(handle, _)| *handle)
    }
}

fn new_session_guid() -> String {
    format!("{:032x}", rand::random::<u128>())
}

impl Transport for UdpTransport {
    fn connect(&mut self, address: &str) -> ConnectionHandle {
        let handle = self.allocate_handle();
        match address.parse::<SocketAddr>() {
            Ok(addr) => {
                self.peers.insert(handle, addr);
                self.events.push_back(TransportEvent::Connected {
                    handle,
                    session_guid: new_session_guid(),
                });
            }
            Err(e) => {
                warn!("Cannot connect to {}: {}", address, e);
                self.events.push_back(TransportEvent::ConnectFailed { handle });
            }
        }
        handle
    }

    fn disconnect(&mut self, handle: ConnectionHandle) {
        self.peers.remove(&handle);
        self.inbound.remove(&handle);
    }

    fn send(&mut self, handle: ConnectionHandle, packet: &Packet) -> bool {
        let Some(addr) = self.peers.get(&handle) else {
            warn!("Send on unknown connection {}", handle);
            return false;
        };
        match self.socket.send_to(packet.as_bytes(), addr) {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to send packet to {}: {}", addr, e);
                false
            }
        }
    }

    fn start_hosting(&mut self) -> Option<String> {
        self.hosting = true;
        self.local_addr().ok().map(|addr| addr.to_string())
    }

    fn stop_hosting(&mut self) {
        self.hosting = false;
        for handle in self.inbound.drain() {
            self.peers.remove(&handle);
        }
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        loop {
            match self.socket.recv_from(&mut self.buffer) {
                Ok((len, addr)) => {
                    let packet = Packet::from_bytes(self.buffer[..len].to_vec());
                    let handle = match self.handle_for(addr) {
                        Some(handle) => handle,
                        None if self.hosting => {
                            let handle = self.allocate_handle();
                            self.peers.insert(handle, addr);
                            self.inbound.insert(handle);
                            self.events
                                .push_back(TransportEvent::PeerConnected { handle });
                            handle
                        }
                        None => {
                            debug!("Dropping datagram from unknown address {}", addr);
                            continue;
                        }
                    };
                    self.events
                        .push_back(TransportEvent::Received { handle, packet });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("Error receiving packet: {}", e);
                    break;
                }
            }
        }
        self.events.drain(..).collect()
    }
}

/// A directory backed by a fixed list, for deployments without a directory
/// service.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    servers: Vec<NetworkServer>,
    results: Vec<NetworkServer>,
}

impl StaticDirectory {
    pub fn new(servers: Vec<NetworkServer>) -> Self {
        Self {
            servers,
            results: Vec::new(),
        }
    }
}

impl Directory for StaticDirectory {
    fn advertise(&mut self, server: &NetworkServer) {
        self.servers.retain(|listed| listed != server);
        self.servers.push(server.clone());
    }

    fn withdraw(&mut self, server: &NetworkServer) {
        self.servers.retain(|listed| listed != server);
    }

    fn request_list(&mut self, filter: ServerType) {
        self.results.extend(
            self.servers
                .iter()
                .filter(|server| server.server_type == filter)
                .cloned(),
        );
    }

    fn take_results(&mut self) -> Vec<NetworkServer> {
        std::mem::take(&mut self.results)
    }

    fn clear_results(&mut self) {
        self.results.clear();
    }
}
