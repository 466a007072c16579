//! Per-source cool-down limiter.
//!
//! Each source may make one call per cool-down window. The dispense and
//! custom-mine routes hold separate limiters, so their counters are
//! independent.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

pub struct CooldownLimiter {
    last_call: DashMap<String, Instant>,
    cooldown: Duration,
}

impl CooldownLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_call: DashMap::new(),
            cooldown,
        }
    }

    /// Records a call from `source`, or returns how long it must wait.
    pub fn check(&self, source: &str) -> Result<(), Duration> {
        self.check_at(source, Instant::now())
    }

    fn check_at(&self, source: &str, now: Instant) -> Result<(), Duration> {
        match self.last_call.entry(source.to_string()) {
            Entry::Occupied(mut last) => {
                let since = now.saturating_duration_since(*last.get());
                if since < self.cooldown {
                    return Err(self.cooldown - since);
                }
                last.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }
        Ok(())
    }

    /// Forgets sources whose window has passed.
    pub fn cleanup(&self) -> usize {
        let before = self.last_call.len();
        let cooldown = self.cooldown;
        self.last_call.retain(|_, last| last.elapsed() < cooldown);
        before.saturating_sub(self.last_call.len())
    }

    pub fn len(&self) -> usize {
        self.last_call.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_call.is_empty()
    }
}
