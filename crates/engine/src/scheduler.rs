// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer and scheduling management

use isle_core::TimerId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Timer entry
#[derive(Debug, Clone)]
struct Timer {
    fires_at: Instant,
    period: Option<Duration>,
}

/// Manages timers for the machine loop
#[derive(Debug, Default)]
pub struct Scheduler {
    timers: HashMap<TimerId, Timer>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer; re-arming an id resets its deadline.
    pub fn arm(&mut self, id: TimerId, fires_at: Instant, period: Option<Duration>) {
        self.timers.insert(id, Timer { fires_at, period });
    }

    /// Cancel a timer. Idempotent.
    pub fn cancel(&mut self, id: TimerId) {
        self.timers.remove(&id);
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    /// Get all timers that have fired, earliest deadline first.
    ///
    /// One-shot timers are removed; repeating timers are re-armed one
    /// period past `now` (no catch-up bursts).
    pub fn fired(&mut self, now: Instant) -> Vec<TimerId> {
        let mut due: Vec<(Instant, TimerId)> = self
            .timers
            .iter()
            .filter(|(_, t)| t.fires_at <= now)
            .map(|(&id, t)| (t.fires_at, id))
            .collect();
        due.sort_by_key(|&(at, id)| (at, id.0));

        for &(_, id) in &due {
            let rearm = self.timers.get(&id).and_then(|t| t.period);
            match rearm {
                Some(period) => {
                    if let Some(t) = self.timers.get_mut(&id) {
                        t.fires_at = now + period;
                    }
                }
                None => {
                    self.timers.remove(&id);
                }
            }
        }

        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Get the next timer fire time
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.fires_at).min()
    }

    /// Check if there are any pending timers
    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
