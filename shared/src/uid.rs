//! Small recyclable integer handles used to correlate requests with replies.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// A request correlation handle. `Uid::INVALID` (zero) means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub u32);

impl Uid {
    pub const INVALID: Uid = Uid(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issues and recycles `Uid`s.
///
/// Freed ids are handed out again in the order they were released. When no
/// freed id is waiting, the pool issues the next never-used value above its
/// high-water mark. Releasing the most recently issued id lowers the
/// high-water mark instead of queueing the id.
#[derive(Debug, Default)]
pub struct UidPool {
    free: VecDeque<u32>,
    live: HashSet<u32>,
    high_water: u32,
}

impl UidPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> Uid {
        let id = match self.free.pop_front() {
            Some(id) => id,
            None => {
                self.high_water += 1;
                self.high_water
            }
        };
        self.live.insert(id);
        Uid(id)
    }

    /// Returns `uid` to the pool. Releasing an id that is not live is a
    /// logged no-op and returns false.
    pub fn release(&mut self, uid: Uid) -> bool {
        if !self.live.remove(&uid.0) {
            warn!("Ignoring release of {} which is not live", uid);
            return false;
        }

        if uid.0 == self.high_water {
            self.high_water -= 1;
        } else {
            self.free.push_back(uid.0);
        }
        true
    }

    pub fn is_live(&self, uid: Uid) -> bool {
        self.live.contains(&uid.0)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
