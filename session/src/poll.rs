//! Directory poll: ask for servers, wait, then harvest.
//!
//! Only one poll runs at a time. Starting a new one cancels the previous
//! harvest and invalidates the request it would have completed.

use crate::request::{Request, RequestRegistry, ResponseData, ResponsePayload};
use crate::scheduler::TaskId;
use crate::session::Session;
use log::debug;
use shared::{NetworkServer, ServerType};

pub(crate) struct ActivePoll {
    filter: ServerType,
    request: Request,
    task: TaskId,
}

#[derive(Default)]
pub(crate) struct ServerPoll {
    active: Option<ActivePoll>,
}

impl Session {
    /// Lists servers of `filter` type and completes `request` with them
    /// `interval` seconds from now.
    pub fn start_poll(&mut self, filter: ServerType, request: Request, interval: f64) {
        self.cancel_poll();

        self.directory.clear_results();
        self.directory.request_list(filter);
        let now = self.clock.now();
        let task = self.scheduler.run_after(
            now,
            interval,
            Box::new(|session: &mut Session| session.harvest_poll()),
        );
        debug!("Polling for {} servers for {:?}", filter, request);
        self.poll.active = Some(ActivePoll {
            filter,
            request,
            task,
        });
    }

    /// Stops the running poll. Its request is invalidated if still tracked.
    pub fn cancel_poll(&mut self) -> bool {
        let Some(active) = self.poll.active.take() else {
            return false;
        };
        self.scheduler.cancel(active.task);
        if self.registry.invalidate(&active.request) {
            debug!("Abandoned poll for {:?}", active.request);
        }
        true
    }

    pub fn is_polling(&self) -> bool {
        self.poll.active.is_some()
    }

    fn harvest_poll(&mut self) {
        let Some(active) = self.poll.active.take() else {
            return;
        };

        let servers: Vec<NetworkServer> = self
            .directory
            .take_results()
            .into_iter()
            .filter(|server| server.server_type == active.filter && server.is_valid())
            .collect();
        debug!("Poll found {} {} server(s)", servers.len(), active.filter);

        let response = ResponseData::new(active.request, ResponsePayload::ServerList(servers));
        if !RequestRegistry::complete(self, response) {
            debug!("Poll finished after its request was dropped");
        }
    }
}
