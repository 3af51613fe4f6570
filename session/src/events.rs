//! Notifications raised by the session for outside observers (UI layers).
//!
//! Listeners subscribe per event kind and are called synchronously, in
//! subscription order, when the session publishes an event of that kind.

use crate::session::SessionState;
use log::trace;
use shared::packets::{ObjectCreate, ObjectDestroy};
use shared::{AuthStatus, NetworkServer, NetworkUser};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LoginResult,
    StateChanged,
    RosterChanged,
    PlayerConnected,
    PlayerDisconnected,
    Kicked,
    ServerLost,
    ObjectCreated,
    ObjectDestroyed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    LoginResult(AuthStatus),
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    RosterChanged(Vec<NetworkUser>),
    PlayerConnected(NetworkUser),
    PlayerDisconnected(NetworkUser),
    Kicked {
        reason: String,
    },
    ServerLost(NetworkServer),
    ObjectCreated(ObjectCreate),
    ObjectDestroyed(ObjectDestroy),
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::LoginResult(_) => EventKind::LoginResult,
            SessionEvent::StateChanged { .. } => EventKind::StateChanged,
            SessionEvent::RosterChanged(_) => EventKind::RosterChanged,
            SessionEvent::PlayerConnected(_) => EventKind::PlayerConnected,
            SessionEvent::PlayerDisconnected(_) => EventKind::PlayerDisconnected,
            SessionEvent::Kicked { .. } => EventKind::Kicked,
            SessionEvent::ServerLost(_) => EventKind::ServerLost,
            SessionEvent::ObjectCreated(_) => EventKind::ObjectCreated,
            SessionEvent::ObjectDestroyed(_) => EventKind::ObjectDestroyed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Listener = Box<dyn FnMut(&SessionEvent)>;

#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<EventKind, Vec<(SubscriptionId, Listener)>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: EventKind, listener: Listener) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.listeners.entry(kind).or_default().push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, kind: EventKind, id: SubscriptionId) -> bool {
        let Some(listeners) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    pub fn publish(&mut self, event: SessionEvent) {
        trace!("Publishing {:?}", event);
        if let Some(listeners) = self.listeners.get_mut(&event.kind()) {
            for (_, listener) in listeners.iter_mut() {
                listener(&event);
            }
        }
    }
}
