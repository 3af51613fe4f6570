use std::cell::Cell;
use std::rc::Rc;

/// Heartbeat time in seconds, shared by everything that runs on one tick.
///
/// The clock never reads wall time. Whoever drives the heartbeat advances it,
/// and every clone observes the same value.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    now: Rc<Cell<f64>>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        self.now.get()
    }

    pub fn advance(&self, dt: f64) {
        if dt > 0.0 {
            self.now.set(self.now.get() + dt);
        }
    }

    pub fn set(&self, now: f64) {
        self.now.set(now);
    }
}
