//! Bounded, expiring memory behind duplicate suppression.
//!
//! Both tables forget entries older than the window (measured on event time,
//! not wall-clock time) and hold at most `capacity` entries per partition,
//! evicting the least recently seen first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::Detection;
use crate::events::Event;

/// `true` while `last` is no older than `window` at `now`. Out-of-order
/// events (now < last) count as inside the window.
fn within(window: Duration, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match (now - last).to_std() {
        Ok(age) => age <= window,
        Err(_) => true,
    }
}

struct Seen {
    first: Arc<Detection>,
    last_seen: DateTime<Utc>,
}

/// Per-technique record of recently reported matches.
pub struct DedupMemory {
    window: Duration,
    capacity: usize,
    techs: HashMap<String, HashMap<String, Seen>>,
}

impl DedupMemory {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self { window, capacity: capacity.max(1), techs: HashMap::new() }
    }

    /// Classify `det` against earlier matches of the same technique and key.
    ///
    /// A hit inside the window comes back with `dupe` pointing at the first
    /// report and refreshes the entry; anything else is remembered as novel.
    pub fn observe(&mut self, mut det: Detection, key: &str, now: DateTime<Utc>) -> Detection {
        let window = self.window;
        let seen = self.techs.entry(det.tech.name().to_owned()).or_default();

        if let Some(entry) = seen.get_mut(key) {
            if within(window, entry.last_seen, now) {
                entry.last_seen = now;
                det.dupe = Some(Arc::clone(&entry.first));
                return det;
            }
        }

        seen.retain(|_, s| within(window, s.last_seen, now));
        if seen.len() >= self.capacity {
            if let Some(oldest) = seen.iter().min_by_key(|(_, s)| s.last_seen).map(|(k, _)| k.clone()) {
                seen.remove(&oldest);
            }
        }

        det.dupe = None;
        seen.insert(key.to_owned(), Seen { first: Arc::new(det.clone()), last_seen: now });
        det
    }

    /// Number of keys currently remembered for `tech`.
    pub fn tracked(&self, tech: &str) -> usize {
        self.techs.get(tech).map_or(0, HashMap::len)
    }
}

/// Most recent exec seen per pid, used as evidence for later events of the
/// same process.
pub struct ProcessTable {
    window: Duration,
    capacity: usize,
    execs: HashMap<u32, Arc<Event>>,
}

impl ProcessTable {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self { window, capacity: capacity.max(1), execs: HashMap::new() }
    }

    pub fn record(&mut self, exec: &Arc<Event>) {
        let now = exec.time();
        let window = self.window;
        self.execs.retain(|_, ev| within(window, ev.time(), now));
        if self.execs.len() >= self.capacity && !self.execs.contains_key(&exec.pid()) {
            if let Some(oldest) = self.execs.iter().min_by_key(|(_, ev)| ev.time()).map(|(pid, _)| *pid) {
                self.execs.remove(&oldest);
            }
        }
        self.execs.insert(exec.pid(), Arc::clone(exec));
    }

    /// Exec recorded for `pid`, if still inside the window at `now`.
    pub fn lookup(&self, pid: u32, now: DateTime<Utc>) -> Option<&Arc<Event>> {
        self.execs.get(&pid).filter(|ev| within(self.window, ev.time(), now))
    }

    pub fn len(&self) -> usize {
        self.execs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.execs.is_empty()
    }
}
