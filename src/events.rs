//! Lifecycle event stream.
//!
//! Every start, termination and restart of a service is reported as a
//! single line of the form `[pid] name <verb> <reason> [timestamp]`.
//! The supervisor emits through the [`EventSink`] trait instead of
//! printing directly so that the stream can be captured in tests or
//! redirected without touching the core.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// What happened to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Started,
    Terminated,
    Restarted,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Started => write!(f, "started"),
            Verb::Terminated => write!(f, "terminated"),
            Verb::Restarted => write!(f, "restarted"),
        }
    }
}

/// One entry in the lifecycle stream.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub pid: u32,
    pub service: String,
    pub verb: Verb,
    /// Free-form but machine-grep-friendly, e.g. "dependency redis6010 failed".
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(pid: u32, service: impl Into<String>, verb: Verb, reason: impl Into<String>) -> Self {
        Self {
            pid,
            service: service.into(),
            verb,
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = self.at.to_rfc3339_opts(SecondsFormat::Millis, true);
        if self.reason.is_empty() {
            write!(f, "[{}] {} {} [{}]", self.pid, self.service, self.verb, stamp)
        } else {
            write!(
                f,
                "[{}] {} {} {} [{}]",
                self.pid, self.service, self.verb, self.reason, stamp
            )
        }
    }
}

/// Abstraction over the lifecycle stream destination.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent);
}

/// Writes one line per event to stderr, next to the tracing output.
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: &LifecycleEvent) {
        eprintln!("{}", event);
    }
}

/// Collects events in memory. Used by tests to assert on lifecycle traces.
#[derive(Default)]
pub struct MemorySink {
    events: parking_lot::Mutex<Vec<LifecycleEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &LifecycleEvent) {
        self.events.lock().push(event.clone());
    }
}
