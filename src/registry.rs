//! Authoritative runtime state of every declared service.
//!
//! The registry is the single point of truth for status and pid
//! transitions. Everything lives behind one mutex so any two state
//! changes have a global order as observed by [`Registry::snapshot`],
//! and two overlapping reconciler ticks cannot both win the
//! [`Registry::deactivate`] compare-and-clear for the same child.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Inactive,
    Active,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Inactive => write!(f, "inactive"),
            Status::Active => write!(f, "active"),
        }
    }
}

/// Mutable runtime record of one service.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub status: Status,
    /// Child pid while `status == Active`.
    pub pid: Option<u32>,
    /// Wall-clock time of the last successful launch.
    pub started_at: Option<DateTime<Utc>>,
    /// Successful launches so far; drives the started/restarted verb.
    pub launches: u32,
    /// Terminal satisfied state: a `run_once` service that exited
    /// cleanly, or a pure dependency alias the launcher has visited.
    pub done: bool,
}

impl ServiceRecord {
    fn new() -> Self {
        Self {
            status: Status::Inactive,
            pid: None,
            started_at: None,
            launches: 0,
            done: false,
        }
    }

    /// Whether dependents may treat this service as available.
    pub fn satisfies_dependents(&self) -> bool {
        self.status == Status::Active || self.done
    }
}

impl Default for ServiceRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, ServiceRecord>,
    /// pid -> owning service. Entries live from spawn until the SIGCHLD
    /// reaper takes them, independent of the record's pid field (which
    /// the reconciler clears on terminate).
    owners: HashMap<u32, String>,
    /// Services a worker has claimed but not yet spawned. Two workers
    /// can dequeue the same name; only the claim holder may spawn.
    launching: HashSet<String>,
}

#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        let records = names
            .into_iter()
            .map(|name| (name, ServiceRecord::new()))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                records,
                owners: HashMap::new(),
                launching: HashSet::new(),
            }),
        }
    }

    /// Atomically claim the right to spawn a service. Fails when the
    /// service is unknown, already active, terminally done, or claimed
    /// by another worker.
    pub fn claim_launch(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(record) = inner.records.get(name) else {
            return false;
        };
        if record.status == Status::Active || record.done || inner.launching.contains(name) {
            return false;
        }
        inner.launching.insert(name.to_string());
        true
    }

    /// Give up a claim without spawning (missing dependency, spawn error).
    pub fn release_launch(&self, name: &str) {
        self.inner.lock().launching.remove(name);
    }

    pub fn insert(&self, name: &str) {
        self.inner
            .lock()
            .records
            .entry(name.to_string())
            .or_insert_with(ServiceRecord::new);
    }

    pub fn remove(&self, name: &str) -> Option<ServiceRecord> {
        let mut inner = self.inner.lock();
        inner.owners.retain(|_, owner| owner != name);
        inner.records.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<ServiceRecord> {
        self.inner.lock().records.get(name).cloned()
    }

    /// Consistent copy of the whole table for one reconciliation pass.
    pub fn snapshot(&self) -> HashMap<String, ServiceRecord> {
        self.inner.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Record a successful launch: `inactive -> active` with the new pid.
    /// Returns the launch count (1 for the first launch).
    pub fn mark_started(&self, name: &str, pid: u32) -> u32 {
        let mut inner = self.inner.lock();
        inner.launching.remove(name);
        inner.owners.insert(pid, name.to_string());
        let record = inner
            .records
            .entry(name.to_string())
            .or_insert_with(ServiceRecord::new);
        record.status = Status::Active;
        record.pid = Some(pid);
        record.started_at = Some(Utc::now());
        record.launches += 1;
        record.launches
    }

    /// Compare-and-clear: `active -> inactive` only if the record still
    /// holds `expected_pid`. Returns false when another task already won,
    /// which makes terminate idempotent across overlapping ticks.
    pub fn deactivate(&self, name: &str, expected_pid: u32) -> bool {
        let mut inner = self.inner.lock();
        let Some(record) = inner.records.get_mut(name) else {
            return false;
        };
        if record.status != Status::Active || record.pid != Some(expected_pid) {
            return false;
        }
        record.status = Status::Inactive;
        record.pid = None;
        true
    }

    /// Terminal satisfied state; the service will never be relaunched.
    pub fn mark_done(&self, name: &str) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.records.get_mut(name) {
            record.status = Status::Inactive;
            record.pid = None;
            record.done = true;
        }
    }

    /// Clear runtime state after a manifest reload changed the descriptor.
    pub fn reset(&self, name: &str) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.records.get_mut(name) {
            record.status = Status::Inactive;
            record.pid = None;
            record.done = false;
        }
    }

    pub fn is_satisfied(&self, name: &str) -> bool {
        self.inner
            .lock()
            .records
            .get(name)
            .map(ServiceRecord::satisfies_dependents)
            .unwrap_or(false)
    }

    /// Pids currently owned by the supervisor and not yet reaped.
    pub fn owned_pids(&self) -> Vec<u32> {
        self.inner.lock().owners.keys().copied().collect()
    }

    /// Release pid ownership on reap, returning the owning service.
    pub fn take_pid(&self, pid: u32) -> Option<String> {
        self.inner.lock().owners.remove(&pid)
    }

    /// Name and pid of every active service.
    pub fn active(&self) -> Vec<(String, u32)> {
        self.inner
            .lock()
            .records
            .iter()
            .filter_map(|(name, record)| {
                if record.status == Status::Active {
                    record.pid.map(|pid| (name.clone(), pid))
                } else {
                    None
                }
            })
            .collect()
    }
}
