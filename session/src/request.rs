//! Pending request registry
//!
//! Every asynchronous operation the session starts (listing servers,
//! connecting, authenticating, joining) is tracked here as a `Request` until
//! a reply resolves it or it times out.
//!
//! Lifecycle of a request:
//! - `Pending` while waiting for its reply
//! - `Complete` while its callback runs, then `Invalid` once removed
//! - `TimedOut` when its timeout elapses first; the sweep removes it without
//!   running the callback, so callers learn of the timeout through `status`
//!
//! Callbacks receive the owning context mutably. The registry lives inside
//! that context, so `RequestRegistry::complete` takes the callback out, runs
//! it with the registry borrow released, and only then removes the request.

use crate::clock::Clock;
use crate::transport::ConnectionHandle;
use log::{debug, error, trace};
use shared::{AuthStatus, ConnectionStatus, NetworkServer, NetworkUser, Uid, UidPool};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    ServerList,
    Connect,
    Authenticate,
    JoinSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Complete,
    TimedOut,
    Invalid,
}

struct RequestState {
    id: Uid,
    request_type: RequestType,
    user: NetworkUser,
    registered_at: f64,
    timeout: f64,
    status: Cell<RequestStatus>,
    clock: Clock,
}

/// A read-only view of a tracked request.
///
/// Clones share state with the registry's copy, so `status` keeps answering
/// after the registry has dropped the request. Two `Request`s are equal only
/// when they are views of the same registration, even if the id was later
/// recycled.
#[derive(Clone)]
pub struct Request {
    state: Rc<RequestState>,
}

impl Request {
    pub fn id(&self) -> Uid {
        self.state.id
    }

    pub fn request_type(&self) -> RequestType {
        self.state.request_type
    }

    pub fn user(&self) -> &NetworkUser {
        &self.state.user
    }

    pub fn registered_at(&self) -> f64 {
        self.state.registered_at
    }

    /// Timeout in seconds; zero or less never times out.
    pub fn timeout(&self) -> f64 {
        self.state.timeout
    }

    pub fn elapsed(&self) -> f64 {
        self.state.clock.now() - self.state.registered_at
    }

    /// Current status. A pending request whose timeout has elapsed reads as
    /// `TimedOut` even before the sweep removes it.
    pub fn status(&self) -> RequestStatus {
        let stored = self.state.status.get();
        if stored == RequestStatus::Pending
            && self.state.timeout > 0.0
            && self.elapsed() >= self.state.timeout
        {
            return RequestStatus::TimedOut;
        }
        stored
    }

    pub fn is_pending(&self) -> bool {
        self.status() == RequestStatus::Pending
    }

    fn set_status(&self, status: RequestStatus) {
        self.state.status.set(status);
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl Eq for Request {}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.state.id)
            .field("type", &self.state.request_type)
            .field("user", &self.state.user.username)
            .field("status", &self.status())
            .finish()
    }
}

/// Payload delivered with a resolved request.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    ServerList(Vec<NetworkServer>),
    Connected {
        handle: ConnectionHandle,
        session_guid: String,
    },
    ConnectFailed {
        handle: ConnectionHandle,
    },
    Authentication(AuthStatus),
    Join(ConnectionStatus),
}

#[derive(Debug, Clone)]
pub struct ResponseData {
    pub request: Request,
    pub payload: ResponsePayload,
}

impl ResponseData {
    pub fn new(request: Request, payload: ResponsePayload) -> Self {
        Self { request, payload }
    }
}

pub type RequestCallback<C> = Box<dyn FnOnce(&mut C, ResponseData)>;

/// Gives `RequestRegistry::complete` access to the registry stored in a
/// context.
pub trait RequestContext: Sized {
    fn registry(&mut self) -> &mut RequestRegistry<Self>;
}

struct Entry<C> {
    request: Request,
    callback: Option<RequestCallback<C>>,
}

pub struct RequestRegistry<C> {
    clock: Clock,
    uids: UidPool,
    entries: HashMap<Uid, Entry<C>>,
    by_type: HashMap<RequestType, Vec<Uid>>,
}

impl<C> RequestRegistry<C> {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            uids: UidPool::new(),
            entries: HashMap::new(),
            by_type: HashMap::new(),
        }
    }

    /// Creates a pending request stamped with the current time and starts
    /// tracking it.
    pub fn register(
        &mut self,
        request_type: RequestType,
        user: NetworkUser,
        timeout: f64,
        callback: RequestCallback<C>,
    ) -> Request {
        let request = Request {
            state: Rc::new(RequestState {
                id: self.uids.allocate(),
                request_type,
                user,
                registered_at: self.clock.now(),
                timeout,
                status: Cell::new(RequestStatus::Pending),
                clock: self.clock.clone(),
            }),
        };
        self.add(request.clone(), callback);
        request
    }

    fn add(&mut self, request: Request, callback: RequestCallback<C>) -> bool {
        let id = request.id();
        if self.entries.contains_key(&id) {
            error!("Refusing to track {:?}: id {} is already in use", request, id);
            return false;
        }

        trace!("Tracking {:?}", request);
        self.by_type
            .entry(request.request_type())
            .or_default()
            .push(id);
        self.entries.insert(
            id,
            Entry {
                request,
                callback: Some(callback),
            },
        );
        true
    }

    /// Stops tracking `request` and releases its id. Its callback never runs.
    pub fn remove(&mut self, request: &Request) -> bool {
        let id = request.id();
        match self.entries.get(&id) {
            Some(entry) if entry.request == *request => {}
            _ => return false,
        }

        self.entries.remove(&id);
        if let Some(bucket) = self.by_type.get_mut(&request.request_type()) {
            bucket.retain(|other| *other != id);
        }
        self.uids.release(id);
        trace!("Stopped tracking {:?}", request);
        true
    }

    /// Marks `request` invalid and removes it.
    pub fn invalidate(&mut self, request: &Request) -> bool {
        if !self.contains(request) {
            return false;
        }
        request.set_status(RequestStatus::Invalid);
        self.remove(request)
    }

    pub fn contains(&self, request: &Request) -> bool {
        self.entries
            .get(&request.id())
            .is_some_and(|entry| entry.request == *request)
    }

    pub fn find_by_id(&self, id: Uid, request_type: RequestType) -> Option<Request> {
        self.entries
            .get(&id)
            .filter(|entry| entry.request.request_type() == request_type)
            .map(|entry| entry.request.clone())
    }

    pub fn find_all_by_type(&self, request_type: RequestType) -> Vec<Request> {
        self.by_type
            .get(&request_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.entries.get(id))
                    .map(|entry| entry.request.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every request whose timeout has elapsed, without running
    /// callbacks. Returns the removed requests.
    pub fn sweep_timeouts(&mut self) -> Vec<Request> {
        let expired: Vec<Request> = self
            .entries
            .values()
            .filter(|entry| entry.request.status() == RequestStatus::TimedOut)
            .map(|entry| entry.request.clone())
            .collect();

        for request in &expired {
            debug!(
                "{:?} timed out after {:.2}s",
                request.request_type(),
                request.elapsed()
            );
            request.set_status(RequestStatus::TimedOut);
            self.remove(request);
        }
        expired
    }

    /// Marks a pending request complete and hands back its callback.
    fn begin_completion(&mut self, request: &Request) -> Option<RequestCallback<C>> {
        let entry = self.entries.get_mut(&request.id())?;
        if entry.request != *request {
            return None;
        }
        if entry.request.status() != RequestStatus::Pending {
            debug!(
                "Ignoring reply for {:?}: no longer pending",
                entry.request
            );
            return None;
        }

        entry.request.set_status(RequestStatus::Complete);
        entry.callback.take()
    }

    fn finish_completion(&mut self, request: &Request) {
        request.set_status(RequestStatus::Invalid);
        self.remove(request);
    }
}

impl<C: RequestContext> RequestRegistry<C> {
    /// Resolves `response.request`: marks it complete, runs its callback with
    /// the context, then invalidates and removes it. Returns false when the
    /// request is unknown or no longer pending, in which case nothing runs.
    pub fn complete(ctx: &mut C, response: ResponseData) -> bool {
        let request = response.request.clone();
        let Some(callback) = ctx.registry().begin_completion(&request) else {
            debug!(
                "No pending request {} of type {:?}; dropping reply",
                request.id(),
                request.request_type()
            );
            return false;
        };

        callback(ctx, response);
        ctx.registry().finish_completion(&request);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestContext {
        clock: Clock,
        registry: RequestRegistry<TestContext>,
        log: Vec<(Uid, ResponsePayload)>,
    }

    impl TestContext {
        fn new() -> Self {
            let clock = Clock::new();
            Self {
                registry: RequestRegistry::new(clock.clone()),
                clock,
                log: Vec::new(),
            }
        }

        fn register(&mut self, request_type: RequestType, timeout: f64) -> Request {
            self.registry.register(
                request_type,
                NetworkUser::new("alice", ""),
                timeout,
                Box::new(|ctx: &mut TestContext, response: ResponseData| {
                    ctx.log.push((response.request.id(), response.payload));
                }),
            )
        }
    }

    impl RequestContext for TestContext {
        fn registry(&mut self) -> &mut RequestRegistry<Self> {
            &mut self.registry
        }
    }

    fn auth_reply(request: &Request) -> ResponseData {
        ResponseData::new(
            request.clone(),
            ResponsePayload::Authentication(AuthStatus::Good),
        )
    }

    #[test]
    fn test_register_and_find() {
        let mut ctx = TestContext::new();
        let auth = ctx.register(RequestType::Authenticate, 5.0);
        let list = ctx.register(RequestType::ServerList, 5.0);

        assert_eq!(ctx.registry.len(), 2);
        assert_eq!(
            ctx.registry.find_by_id(auth.id(), RequestType::Authenticate),
            Some(auth.clone())
        );
        assert!(ctx
            .registry
            .find_by_id(auth.id(), RequestType::ServerList)
            .is_none());
        assert_eq!(
            ctx.registry.find_all_by_type(RequestType::ServerList),
            vec![list]
        );
        assert!(ctx.registry.find_all_by_type(RequestType::Connect).is_empty());
    }

    #[test]
    fn test_complete_runs_callback_once() {
        let mut ctx = TestContext::new();
        let request = ctx.register(RequestType::Authenticate, 5.0);

        assert!(RequestRegistry::complete(&mut ctx, auth_reply(&request)));
        assert!(!RequestRegistry::complete(&mut ctx, auth_reply(&request)));

        assert_eq!(ctx.log.len(), 1);
        assert_eq!(
            ctx.log[0],
            (request.id(), ResponsePayload::Authentication(AuthStatus::Good))
        );
        assert_eq!(request.status(), RequestStatus::Invalid);
        assert!(ctx.registry.is_empty());
    }

    #[test]
    fn test_request_visible_as_complete_during_callback() {
        struct Observer {
            registry: RequestRegistry<Observer>,
            seen: Option<(bool, RequestStatus)>,
        }

        impl RequestContext for Observer {
            fn registry(&mut self) -> &mut RequestRegistry<Self> {
                &mut self.registry
            }
        }

        let mut ctx = Observer {
            registry: RequestRegistry::new(Clock::new()),
            seen: None,
        };
        let request = ctx.registry.register(
            RequestType::JoinSession,
            NetworkUser::bad(),
            0.0,
            Box::new(|ctx: &mut Observer, response: ResponseData| {
                let present = ctx.registry.contains(&response.request);
                ctx.seen = Some((present, response.request.status()));
            }),
        );

        RequestRegistry::complete(
            &mut ctx,
            ResponseData::new(
                request.clone(),
                ResponsePayload::Join(ConnectionStatus::Good),
            ),
        );

        assert_eq!(ctx.seen, Some((true, RequestStatus::Complete)));
        assert!(!ctx.registry.contains(&request));
    }

    #[test]
    fn test_timeout_then_sweep() {
        let mut ctx = TestContext::new();
        let request = ctx.register(RequestType::Authenticate, 2.0);

        ctx.clock.advance(1.0);
        assert_eq!(request.status(), RequestStatus::Pending);
        assert!(ctx.registry.sweep_timeouts().is_empty());

        ctx.clock.set(1.999);
        assert_eq!(request.status(), RequestStatus::Pending);

        ctx.clock.set(2.0);
        assert_eq!(request.status(), RequestStatus::TimedOut);

        let swept = ctx.registry.sweep_timeouts();
        assert_eq!(swept, vec![request.clone()]);
        assert!(ctx
            .registry
            .find_by_id(request.id(), RequestType::Authenticate)
            .is_none());
        assert_eq!(request.status(), RequestStatus::TimedOut);
        assert!(ctx.log.is_empty());
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let mut ctx = TestContext::new();
        let request = ctx.register(RequestType::ServerList, 0.0);

        ctx.clock.advance(1_000_000.0);
        assert_eq!(request.status(), RequestStatus::Pending);
        assert!(ctx.registry.sweep_timeouts().is_empty());
    }

    #[test]
    fn test_timed_out_request_cannot_complete() {
        let mut ctx = TestContext::new();
        let request = ctx.register(RequestType::Authenticate, 1.0);

        ctx.clock.advance(1.5);
        assert!(!RequestRegistry::complete(&mut ctx, auth_reply(&request)));
        assert!(ctx.log.is_empty());
    }

    #[test]
    fn test_removed_request_ignores_late_reply() {
        let mut ctx = TestContext::new();
        let request = ctx.register(RequestType::Authenticate, 5.0);

        assert!(ctx.registry.remove(&request));
        assert!(!ctx.registry.remove(&request));
        assert!(!RequestRegistry::complete(&mut ctx, auth_reply(&request)));
        assert!(ctx.log.is_empty());
    }

    #[test]
    fn test_recycled_id_does_not_match_old_request() {
        let mut ctx = TestContext::new();
        let old = ctx.register(RequestType::Authenticate, 5.0);
        ctx.registry.invalidate(&old);
        assert_eq!(old.status(), RequestStatus::Invalid);

        let new = ctx.register(RequestType::Authenticate, 5.0);
        assert_eq!(old.id(), new.id());
        assert_ne!(old, new);

        assert!(!RequestRegistry::complete(&mut ctx, auth_reply(&old)));
        assert!(RequestRegistry::complete(&mut ctx, auth_reply(&new)));
        assert_eq!(ctx.log.len(), 1);
    }

    #[test]
    fn test_callback_may_register_followup() {
        struct Chain {
            registry: RequestRegistry<Chain>,
            followup: Option<Request>,
        }

        impl RequestContext for Chain {
            fn registry(&mut self) -> &mut RequestRegistry<Self> {
                &mut self.registry
            }
        }

        let mut ctx = Chain {
            registry: RequestRegistry::new(Clock::new()),
            followup: None,
        };
        let first = ctx.registry.register(
            RequestType::Connect,
            NetworkUser::bad(),
            5.0,
            Box::new(|ctx: &mut Chain, _response: ResponseData| {
                let next = ctx.registry.register(
                    RequestType::Authenticate,
                    NetworkUser::bad(),
                    5.0,
                    Box::new(|_: &mut Chain, _: ResponseData| {}),
                );
                ctx.followup = Some(next);
            }),
        );

        RequestRegistry::complete(
            &mut ctx,
            ResponseData::new(
                first.clone(),
                ResponsePayload::ConnectFailed {
                    handle: ConnectionHandle(1),
                },
            ),
        );

        let followup = ctx.followup.clone().unwrap();
        assert_ne!(followup.id(), first.id());
        assert_eq!(ctx.registry.len(), 1);
        assert!(ctx.registry.contains(&followup));
    }
}
