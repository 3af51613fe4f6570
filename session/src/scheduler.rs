//! Run-after and run-every tasks driven by the heartbeat.
//!
//! Tasks receive the owning context mutably, so the scheduler is stored
//! inside that context and `Scheduler::run_due` takes each due task out
//! before calling it.

use log::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

pub type Task<C> = Box<dyn FnMut(&mut C)>;

struct Scheduled<C> {
    id: TaskId,
    due: f64,
    interval: Option<f64>,
    remaining: Option<u32>,
    task: Task<C>,
}

/// Gives `Scheduler::run_due` access to the scheduler stored in a context.
pub trait SchedulerContext: Sized {
    fn scheduler(&mut self) -> &mut Scheduler<Self>;
}

pub struct Scheduler<C> {
    tasks: Vec<Scheduled<C>>,
    next_id: u64,
    running: Option<TaskId>,
    running_cancelled: bool,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 1,
            running: None,
            running_cancelled: false,
        }
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` once, `delay` seconds after `now`.
    pub fn run_after(&mut self, now: f64, delay: f64, task: Task<C>) -> TaskId {
        self.push(now + delay.max(0.0), None, Some(1), task)
    }

    /// Runs `task` every `interval` seconds starting one interval after
    /// `now`, stopping after `count` runs. `None` repeats until cancelled.
    pub fn run_every(
        &mut self,
        now: f64,
        interval: f64,
        count: Option<u32>,
        task: Task<C>,
    ) -> TaskId {
        let interval = interval.max(0.0);
        self.push(now + interval, Some(interval), count, task)
    }

    fn push(
        &mut self,
        due: f64,
        interval: Option<f64>,
        remaining: Option<u32>,
        task: Task<C>,
    ) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.push(Scheduled {
            id,
            due,
            interval,
            remaining,
            task,
        });
        id
    }

    pub fn cancel(&mut self, id: TaskId) -> bool {
        if self.running == Some(id) {
            self.running_cancelled = true;
            return true;
        }
        let before = self.tasks.len();
        self.tasks.retain(|scheduled| scheduled.id != id);
        self.tasks.len() != before
    }

    pub fn is_scheduled(&self, id: TaskId) -> bool {
        (self.running == Some(id) && !self.running_cancelled)
            || self.tasks.iter().any(|scheduled| scheduled.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Removes the earliest task due at `now`, ties broken by scheduling order.
    fn take_due(&mut self, now: f64) -> Option<Scheduled<C>> {
        let index = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, scheduled)| scheduled.due <= now)
            .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.id.cmp(&b.id)))
            .map(|(index, _)| index)?;
        Some(self.tasks.remove(index))
    }
}

impl<C: SchedulerContext> Scheduler<C> {
    /// Runs every task due at `now`. A repeating task runs at most once per
    /// call; its next run is queued after the pass. Returns the number of
    /// tasks run.
    pub fn run_due(ctx: &mut C, now: f64) -> usize {
        let mut ran = 0;
        let mut requeue = Vec::new();

        while let Some(mut scheduled) = ctx.scheduler().take_due(now) {
            {
                let scheduler = ctx.scheduler();
                scheduler.running = Some(scheduled.id);
                scheduler.running_cancelled = false;
            }

            trace!("Running scheduled task {:?}", scheduled.id);
            (scheduled.task)(ctx);
            ran += 1;

            let cancelled = {
                let scheduler = ctx.scheduler();
                scheduler.running = None;
                std::mem::take(&mut scheduler.running_cancelled)
            };

            if let Some(remaining) = scheduled.remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
            }
            let exhausted = scheduled.remaining == Some(0);

            if let (Some(interval), false, false) = (scheduled.interval, cancelled, exhausted) {
                scheduled.due += interval;
                requeue.push(scheduled);
            }
        }

        ctx.scheduler().tasks.extend(requeue);
        ran
    }
}
