//! In-process network for tests and local play
//!
//! A `MemoryNetwork` is a shared hub. Each peer takes its own
//! `MemoryTransport` endpoint from the hub, and any number of
//! `MemoryDirectory` views share the hub's server listing. Nothing is
//! delivered synchronously: connects, packets and disconnects are queued on
//! the receiving endpoint and surface on its next `poll`, the same way a real
//! connection layer reports them a tick later.
//!
//! Both ends of a link use the same `ConnectionHandle` value.

use crate::transport::{ConnectionHandle, Directory, Transport, TransportEvent};
use log::{debug, warn};
use shared::{NetworkServer, Packet, ServerType};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

const ADDRESS_PREFIX: &str = "mem:";

#[derive(Default)]
struct Endpoint {
    inbox: VecDeque<TransportEvent>,
    hosting: bool,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    client: u64,
    host: u64,
}

#[derive(Default)]
struct Hub {
    next_endpoint: u64,
    next_connection: u64,
    guids_issued: u64,
    endpoints: HashMap<u64, Endpoint>,
    links: HashMap<u64, Link>,
    listings: Vec<NetworkServer>,
}

impl Hub {
    fn push(&mut self, endpoint: u64, event: TransportEvent) {
        if let Some(target) = self.endpoints.get_mut(&endpoint) {
            target.inbox.push_back(event);
        }
    }

    fn next_guid(&mut self) -> String {
        self.guids_issued += 1;
        format!("mem-{:08x}", self.guids_issued)
    }

    /// Removes a link and tells the side that did not close it.
    fn close_link(&mut self, handle: u64, closed_by: Option<u64>) {
        let Some(link) = self.links.remove(&handle) else {
            return;
        };
        let handle = ConnectionHandle(handle);
        if closed_by != Some(link.client) {
            self.push(link.client, TransportEvent::Disconnected { handle });
        }
        if closed_by != Some(link.host) {
            self.push(link.host, TransportEvent::PeerDisconnected { handle });
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self) -> MemoryTransport {
        let mut hub = self.hub.borrow_mut();
        hub.next_endpoint += 1;
        let id = hub.next_endpoint;
        hub.endpoints.insert(id, Endpoint::default());
        MemoryTransport {
            hub: Rc::clone(&self.hub),
            id,
        }
    }

    pub fn directory(&self) -> MemoryDirectory {
        MemoryDirectory {
            hub: Rc::clone(&self.hub),
            results: Vec::new(),
        }
    }

    /// Drops a live link as if the connection failed underneath both peers.
    pub fn sever(&self, handle: ConnectionHandle) {
        self.hub.borrow_mut().close_link(handle.0, None);
    }

    pub fn link_count(&self) -> usize {
        self.hub.borrow().links.len()
    }

    pub fn listings(&self) -> Vec<NetworkServer> {
        self.hub.borrow().listings.clone()
    }
}

pub struct MemoryTransport {
    hub: Rc<RefCell<Hub>>,
    id: u64,
}

impl MemoryTransport {
    /// The address other endpoints use to reach this one while it hosts.
    pub fn address(&self) -> String {
        format!("{}{}", ADDRESS_PREFIX, self.id)
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, address: &str) -> ConnectionHandle {
        let mut hub = self.hub.borrow_mut();
        hub.next_connection += 1;
        let handle = ConnectionHandle(hub.next_connection);

        let target = address
            .strip_prefix(ADDRESS_PREFIX)
            .and_then(|id| id.parse::<u64>().ok())
            .filter(|id| hub.endpoints.get(id).is_some_and(|e| e.hosting));

        match target {
            Some(host) => {
                hub.links.insert(
                    handle.0,
                    Link {
                        client: self.id,
                        host,
                    },
                );
                let session_guid = hub.next_guid();
                hub.push(
                    self.id,
                    TransportEvent::Connected {
                        handle,
                        session_guid,
                    },
                );
                hub.push(host, TransportEvent::PeerConnected { handle });
            }
            None => {
                debug!("Nothing is hosting at {}", address);
                hub.push(self.id, TransportEvent::ConnectFailed { handle });
            }
        }
        handle
    }

    fn disconnect(&mut self, handle: ConnectionHandle) {
        self.hub.borrow_mut().close_link(handle.0, Some(self.id));
    }

    fn send(&mut self, handle: ConnectionHandle, packet: &Packet) -> bool {
        let mut hub = self.hub.borrow_mut();
        let Some(link) = hub.links.get(&handle.0).copied() else {
            warn!("Send on unknown connection {}", handle);
            return false;
        };

        let target = if link.client == self.id {
            link.host
        } else if link.host == self.id {
            link.client
        } else {
            warn!("Connection {} does not belong to this endpoint", handle);
            return false;
        };

        hub.push(
            target,
            TransportEvent::Received {
                handle,
                packet: packet.clone(),
            },
        );
        true
    }

    fn start_hosting(&mut self) -> Option<String> {
        let mut hub = self.hub.borrow_mut();
        let endpoint = hub.endpoints.get_mut(&self.id)?;
        endpoint.hosting = true;
        Some(self.address())
    }

    fn stop_hosting(&mut self) {
        let mut hub = self.hub.borrow_mut();
        if let Some(endpoint) = hub.endpoints.get_mut(&self.id) {
            endpoint.hosting = false;
        }
        let hosted: Vec<u64> = hub
            .links
            .iter()
            .filter(|(_, link)| link.host == self.id)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in hosted {
            hub.close_link(handle, Some(self.id));
        }
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut hub = self.hub.borrow_mut();
        hub.endpoints
            .get_mut(&self.id)
            .map(|endpoint| endpoint.inbox.drain(..).collect())
            .unwrap_or_default()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let Ok(mut hub) = self.hub.try_borrow_mut() else {
            return;
        };
        let owned: Vec<u64> = hub
            .links
            .iter()
            .filter(|(_, link)| link.client == self.id || link.host == self.id)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in owned {
            hub.close_link(handle, Some(self.id));
        }
        hub.endpoints.remove(&self.id);
    }
}

pub struct MemoryDirectory {
    hub: Rc<RefCell<Hub>>,
    results: Vec<NetworkServer>,
}

impl Directory for MemoryDirectory {
    fn advertise(&mut self, server: &NetworkServer) {
        let mut hub = self.hub.borrow_mut();
        match hub.listings.iter_mut().find(|listed| **listed == *server) {
            Some(listed) => *listed = server.clone(),
            None => hub.listings.push(server.clone()),
        }
    }

    fn withdraw(&mut self, server: &NetworkServer) {
        self.hub
            .borrow_mut()
            .listings
            .retain(|listed| listed != server);
    }

    fn request_list(&mut self, filter: ServerType) {
        let hub = self.hub.borrow();
        self.results.extend(
            hub.listings
                .iter()
                .filter(|listed| listed.server_type == filter)
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

#[cfg(test)]
mod tests {
    use super::*;
    use shared::packets::{ConnectionKicked, Message};

    fn kicked_packet() -> Packet {
        shared::encode(&Message::ConnectionKicked(ConnectionKicked {
            username: "bob".to_string(),
            reason: "test".to_string(),
        }))
        .unwrap()
    }

    #[test]
    fn test_connect_to_host() {
        let network = MemoryNetwork::new();
        let mut host = network.endpoint();
        let mut client = network.endpoint();

        let address = host.start_hosting().unwrap();
        let handle = client.connect(&address);

        match client.poll().as_slice() {
            [TransportEvent::Connected {
                handle: h,
                session_guid,
            }] => {
                assert_eq!(*h, handle);
                assert!(!session_guid.is_empty());
            }
            other => panic!("Unexpected client events {:?}", other),
        }
        assert!(matches!(
            host.poll().as_slice(),
            [TransportEvent::PeerConnected { handle: h }] if *h == handle
        ));
    }

    #[test]
    fn test_connect_to_non_host_fails() {
        let network = MemoryNetwork::new();
        let idle = network.endpoint();
        let mut client = network.endpoint();

        let handle = client.connect(&idle.address());
        assert!(matches!(
            client.poll().as_slice(),
            [TransportEvent::ConnectFailed { handle: h }] if *h == handle
        ));

        let handle = client.connect("not-an-address");
        assert!(matches!(
            client.poll().as_slice(),
            [TransportEvent::ConnectFailed { handle: h }] if *h == handle
        ));
    }

    #[test]
    fn test_packets_delivered_on_next_poll() {
        let network = MemoryNetwork::new();
        let mut host = network.endpoint();
        let mut client = network.endpoint();
        let handle = client.connect(&host.start_hosting().unwrap());
        client.poll();
        host.poll();

        assert!(client.send(handle, &kicked_packet()));
        assert!(client.poll().is_empty());

        match host.poll().as_slice() {
            [TransportEvent::Received { handle: h, packet }] => {
                assert_eq!(*h, handle);
                assert_eq!(*packet, kicked_packet());
            }
            other => panic!("Unexpected host events {:?}", other),
        }

        assert!(host.send(handle, &kicked_packet()));
        assert_eq!(client.poll().len(), 1);
    }

    #[test]
    fn test_disconnect_notifies_other_side() {
        let network = MemoryNetwork::new();
        let mut host = network.endpoint();
        let mut client = network.endpoint();
        let handle = client.connect(&host.start_hosting().unwrap());
        client.poll();
        host.poll();

        client.disconnect(handle);
        assert!(client.poll().is_empty());
        assert!(matches!(
            host.poll().as_slice(),
            [TransportEvent::PeerDisconnected { handle: h }] if *h == handle
        ));
        assert!(!client.send(handle, &kicked_packet()));
        assert_eq!(network.link_count(), 0);
    }

    #[test]
    fn test_stop_hosting_drops_clients() {
        let network = MemoryNetwork::new();
        let mut host = network.endpoint();
        let mut client = network.endpoint();
        let handle = client.connect(&host.start_hosting().unwrap());
        client.poll();

        host.stop_hosting();
        assert!(matches!(
            client.poll().as_slice(),
            [TransportEvent::Disconnected { handle: h }] if *h == handle
        ));

        client.connect(&host.address());
        assert!(matches!(
            client.poll().as_slice(),
            [TransportEvent::ConnectFailed { .. }]
        ));
    }

    #[test]
    fn test_sever_notifies_both_sides() {
        let network = MemoryNetwork::new();
        let mut host = network.endpoint();
        let mut client = network.endpoint();
        let handle = client.connect(&host.start_hosting().unwrap());
        client.poll();
        host.poll();

        network.sever(handle);
        assert!(matches!(
            client.poll().as_slice(),
            [TransportEvent::Disconnected { .. }]
        ));
        assert!(matches!(
            host.poll().as_slice(),
            [TransportEvent::PeerDisconnected { .. }]
        ));
    }

    #[test]
    fn test_directory_listing() {
        let network = MemoryNetwork::new();
        let mut advertiser = network.directory();
        let mut browser = network.directory();

        let game = NetworkServer::new("room", ServerType::Game, "mem:1", "alice");
        let auth = NetworkServer::new("auth", ServerType::Authentication, "mem:2", "");
        advertiser.advertise(&game);
        advertiser.advertise(&auth);
        advertiser.advertise(&game);
        assert_eq!(network.listings().len(), 2);

        browser.request_list(ServerType::Game);
        assert_eq!(browser.take_results(), vec![game.clone()]);
        assert!(browser.take_results().is_empty());

        advertiser.withdraw(&game);
        browser.request_list(ServerType::Game);
        assert!(browser.take_results().is_empty());
    }
}
