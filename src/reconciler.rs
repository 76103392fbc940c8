//! Periodic health reconciliation.
//!
//! A ticker fires every `tick_interval` and fans out a fresh
//! reconciliation task. Ticks never coalesce: a slow probe on one pass
//! must not stall detection of a fast failure on the next, so overlapping
//! passes are expected and terminate is guarded by the registry's
//! compare-and-clear.
//!
//! Per active service the checks run cheapest-first and short-circuit:
//! dependency liveness, probe command, TCP port bindings, UDP port
//! bindings. A service whose dependency has failed is never charged with
//! a probe failure of its own.

use crate::config::{Manifest, Settings};
use crate::error::validate_pid;
use crate::events::{EventSink, LifecycleEvent, Verb};
use crate::launcher::Launcher;
use crate::probe::probes_for;
use crate::registry::{Registry, ServiceRecord, Status};
use nix::sys::signal::{killpg, Signal};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// One dependency-liveness violation found in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyFailure {
    /// Active service that must be terminated.
    pub service: String,
    /// Its recorded pid at snapshot time.
    pub pid: u32,
    /// The dependency that was observed inactive.
    pub failed_dep: String,
}

/// Pure planning pass over a registry snapshot: which active services
/// have an unsatisfied dependency, and which dependency to re-launch.
/// Sorted by service name so identical snapshots yield identical plans.
pub fn plan_dependency_failures(
    snapshot: &HashMap<String, ServiceRecord>,
    manifest: &Manifest,
) -> Vec<DependencyFailure> {
    let mut failures = Vec::new();

    for (name, record) in snapshot {
        if record.status != Status::Active {
            continue;
        }
        let Some(pid) = record.pid else { continue };
        let Some(spec) = manifest.get(name) else {
            continue;
        };

        for dep in &spec.deps {
            let satisfied = snapshot
                .get(dep)
                .map(ServiceRecord::satisfies_dependents)
                .unwrap_or(false)
                || manifest.get(dep).map(|s| s.is_alias()).unwrap_or(false);
            if !satisfied {
                failures.push(DependencyFailure {
                    service: name.clone(),
                    pid,
                    failed_dep: dep.clone(),
                });
                break;
            }
        }
    }

    failures.sort_by(|a, b| a.service.cmp(&b.service));
    failures
}

/// Send SIGTERM to a child's process group; on delivery failure fall back
/// to SIGKILL and swallow the error.
pub(crate) fn signal_group(pid: u32, name: &str) {
    let pgid = match validate_pid(pid, name) {
        Ok(pgid) => pgid,
        Err(e) => {
            tracing::error!("refusing to signal '{}': {}", name, e);
            return;
        }
    };
    if killpg(pgid, Signal::SIGTERM).is_err() {
        let _ = killpg(pgid, Signal::SIGKILL);
    }
}

pub struct Reconciler {
    specs: Arc<RwLock<Manifest>>,
    registry: Arc<Registry>,
    launcher: Arc<Launcher>,
    events: Arc<dyn EventSink>,
    settings: Settings,
}

impl Reconciler {
    pub fn new(
        specs: Arc<RwLock<Manifest>>,
        registry: Arc<Registry>,
        launcher: Arc<Launcher>,
        events: Arc<dyn EventSink>,
        settings: Settings,
    ) -> Self {
        Self {
            specs,
            registry,
            launcher,
            events,
            settings,
        }
    }

    /// Run the ticker until cancelled, spawning one reconcile task per
    /// tick. Panics inside a pass are caught and logged so one bad pass
    /// cannot silence monitoring.
    pub fn spawn_ticker(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            use futures::FutureExt;
            use std::panic::AssertUnwindSafe;

            let mut interval = tokio::time::interval(self.settings.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("reconciler ticker shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let reconciler = Arc::clone(&self);
                        tokio::spawn(async move {
                            let outcome = AssertUnwindSafe(reconciler.reconcile())
                                .catch_unwind()
                                .await;
                            if let Err(panic) = outcome {
                                let message = panic
                                    .downcast_ref::<&str>()
                                    .map(|s| s.to_string())
                                    .or_else(|| panic.downcast_ref::<String>().cloned())
                                    .unwrap_or_else(|| "unknown panic".to_string());
                                tracing::error!("reconcile pass panicked: {}", message);
                            }
                        });
                    }
                }
            }
        })
    }

    /// One reconciliation pass over a consistent snapshot. Changes made
    /// by launcher workers during the pass are picked up next tick.
    pub async fn reconcile(&self) {
        let snapshot = self.registry.snapshot();
        let manifest = { self.specs.read().clone() };

        let dep_failures = plan_dependency_failures(&snapshot, &manifest);
        for failure in &dep_failures {
            self.launcher.request(&failure.failed_dep);
            self.terminate(
                &failure.service,
                failure.pid,
                format!("dependency {} failed", failure.failed_dep),
            );
        }

        let skip: std::collections::HashSet<&str> =
            dep_failures.iter().map(|f| f.service.as_str()).collect();

        for (name, record) in &snapshot {
            if record.status != Status::Active || skip.contains(name.as_str()) {
                continue;
            }
            let Some(pid) = record.pid else { continue };
            let Some(spec) = manifest.get(name) else {
                continue;
            };

            for probe in probes_for(spec, self.settings.probe_deadline()) {
                let healthy = probe.passes(pid).await.unwrap_or(false);
                if !healthy {
                    self.terminate(name, pid, probe.failure_reason());
                    break;
                }
            }
        }
    }

    /// Terminate one service's process group. The registry
    /// compare-and-clear runs first so overlapping passes cannot
    /// double-signal; only the winner emits the event. The service is
    /// not re-enqueued here: its child's reap or a dependent's liveness
    /// check drives the restart.
    fn terminate(&self, name: &str, pid: u32, reason: String) {
        if !self.registry.deactivate(name, pid) {
            return;
        }
        signal_group(pid, name);
        self.events
            .emit(&LifecycleEvent::new(pid, name, Verb::Terminated, reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Parser;

    fn manifest(yaml: &str) -> Manifest {
        Parser::new().parse(yaml).unwrap()
    }

    fn active(pid: u32) -> ServiceRecord {
        ServiceRecord {
            status: Status::Active,
            pid: Some(pid),
            started_at: Some(chrono::Utc::now()),
            launches: 1,
            done: false,
        }
    }

    #[test]
    fn healthy_snapshot_plans_nothing() {
        let m = manifest("app1:\n  cmd: x\n  deps: [redis6010]\nredis6010:\n  cmd: r\n");
        let mut snapshot = HashMap::new();
        snapshot.insert("app1".to_string(), active(10));
        snapshot.insert("redis6010".to_string(), active(20));

        assert!(plan_dependency_failures(&snapshot, &m).is_empty());
    }

    #[test]
    fn dead_dependency_terminates_dependent_and_restarts_dep() {
        let m = manifest("app1:\n  cmd: x\n  deps: [redis6010]\nredis6010:\n  cmd: r\n");
        let mut snapshot = HashMap::new();
        snapshot.insert("app1".to_string(), active(10));
        snapshot.insert("redis6010".to_string(), ServiceRecord::default());

        let plan = plan_dependency_failures(&snapshot, &m);
        assert_eq!(
            plan,
            vec![DependencyFailure {
                service: "app1".to_string(),
                pid: 10,
                failed_dep: "redis6010".to_string(),
            }]
        );
    }

    #[test]
    fn done_run_once_dependency_satisfies_dependents() {
        let m = manifest(
            "app1:\n  cmd: x\n  deps: [migrate]\nmigrate:\n  cmd: m\n  run_once: true\n",
        );
        let mut snapshot = HashMap::new();
        snapshot.insert("app1".to_string(), active(10));
        let mut done = ServiceRecord::default();
        done.done = true;
        snapshot.insert("migrate".to_string(), done);

        assert!(plan_dependency_failures(&snapshot, &m).is_empty());
    }

    #[test]
    fn alias_dependency_satisfies_dependents() {
        let m = manifest("app1:\n  cmd: x\n  deps: [group]\ngroup:\n  deps: []\n");
        let mut snapshot = HashMap::new();
        snapshot.insert("app1".to_string(), active(10));
        snapshot.insert("group".to_string(), ServiceRecord::default());

        assert!(plan_dependency_failures(&snapshot, &m).is_empty());
    }

    #[test]
    fn inactive_services_are_not_examined() {
        let m = manifest("app1:\n  cmd: x\n  deps: [redis6010]\nredis6010:\n  cmd: r\n");
        let mut snapshot = HashMap::new();
        snapshot.insert("app1".to_string(), ServiceRecord::default());
        snapshot.insert("redis6010".to_string(), ServiceRecord::default());

        assert!(plan_dependency_failures(&snapshot, &m).is_empty());
    }

    #[test]
    fn plan_is_deterministic_across_runs() {
        let m = manifest(
            "a:\n  cmd: x\n  deps: [dead]\nb:\n  cmd: x\n  deps: [dead]\ndead:\n  cmd: d\n",
        );
        let mut snapshot = HashMap::new();
        snapshot.insert("a".to_string(), active(1));
        snapshot.insert("b".to_string(), active(2));
        snapshot.insert("dead".to_string(), ServiceRecord::default());

        let first = plan_dependency_failures(&snapshot, &m);
        let second = plan_dependency_failures(&snapshot, &m);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].service, "a");
        assert_eq!(first[1].service, "b");
    }
}
