//! Signal-driven lifecycle.
//!
//! Per-signal streams are forwarded into one bounded channel so the
//! handler consumes a single ordered source. SIGINT/SIGTERM drive the
//! graceful shutdown of the whole process-group tree, SIGCHLD reaps dead
//! children and decides restarts, SIGHUP re-parses the procfile and
//! reconciles the running set against it.

use crate::config::{Manifest, Parser, Settings};
use crate::error::{Error, Result};
use crate::events::{EventSink, LifecycleEvent, Verb};
use crate::graph::Graph;
use crate::launcher::Launcher;
use crate::reconciler::signal_group;
use crate::registry::Registry;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalEvent {
    /// SIGINT or SIGTERM: graceful shutdown.
    Shutdown,
    /// SIGCHLD: at least one child changed state.
    Child,
    /// SIGHUP: reload the procfile.
    Reload,
}

pub struct SignalHandler {
    procfile: PathBuf,
    specs: Arc<RwLock<Manifest>>,
    registry: Arc<Registry>,
    launcher: Arc<Launcher>,
    events: Arc<dyn EventSink>,
    settings: Settings,
    cancel: CancellationToken,
}

impl SignalHandler {
    pub fn new(
        procfile: PathBuf,
        specs: Arc<RwLock<Manifest>>,
        registry: Arc<Registry>,
        launcher: Arc<Launcher>,
        events: Arc<dyn EventSink>,
        settings: Settings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            procfile,
            specs,
            registry,
            launcher,
            events,
            settings,
            cancel,
        }
    }

    /// Block on the signal channel until a shutdown completes.
    pub async fn run(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(self.settings.signal_buffer.max(2));

        self.forward(SignalKind::interrupt(), SignalEvent::Shutdown, &tx)?;
        self.forward(SignalKind::terminate(), SignalEvent::Shutdown, &tx)?;
        self.forward(SignalKind::child(), SignalEvent::Child, &tx)?;
        self.forward(SignalKind::hangup(), SignalEvent::Reload, &tx)?;
        drop(tx);

        while let Some(event) = rx.recv().await {
            match event {
                SignalEvent::Shutdown => {
                    self.shutdown().await;
                    return Ok(());
                }
                SignalEvent::Child => self.reap_children(),
                SignalEvent::Reload => self.reload(),
            }
        }

        Err(Error::Signal("signal streams closed unexpectedly".into()))
    }

    /// Bridge one OS signal stream into the shared channel.
    fn forward(
        &self,
        kind: SignalKind,
        event: SignalEvent,
        tx: &mpsc::Sender<SignalEvent>,
    ) -> Result<()> {
        let mut stream =
            signal(kind).map_err(|e| Error::Signal(format!("cannot subscribe: {}", e)))?;
        let tx = tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = stream.recv() => {
                        if received.is_none() || tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Reap any of our terminated children without blocking. Only pids
    /// the registry owns are waited on; probe commands belong to the
    /// tokio runtime and must not be stolen here.
    fn reap_children(&self) {
        for pid in self.registry.owned_pids() {
            match waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(WaitStatus::Exited(_, code)) => self.handle_exit(pid, Some(code)),
                Ok(WaitStatus::Signaled(_, _, _)) => self.handle_exit(pid, None),
                Ok(_) => {}
                // ECHILD: already gone; treat as an abnormal exit.
                Err(_) => self.handle_exit(pid, None),
            }
        }
    }

    /// A child was reaped: mark its service inactive and decide the
    /// restart. Restarts are gated on `run_once == false || exit != 0`;
    /// a clean run_once exit is terminal.
    fn handle_exit(&self, pid: u32, exit_code: Option<i32>) {
        let Some(name) = self.registry.take_pid(pid) else {
            return;
        };

        // False when the reconciler already terminated this child and
        // emitted the event; don't report it twice.
        let died_on_its_own = self.registry.deactivate(&name, pid);

        let spec = { self.specs.read().get(&name).cloned() };
        let Some(spec) = spec else {
            // Removed by a reload while the child was dying.
            return;
        };

        if spec.run_once && exit_code == Some(0) {
            self.registry.mark_done(&name);
            if died_on_its_own {
                self.events.emit(&LifecycleEvent::new(
                    pid,
                    name.as_str(),
                    Verb::Terminated,
                    "exited with status 0",
                ));
            }
            return;
        }

        if died_on_its_own {
            let reason = match exit_code {
                Some(code) => format!("exited with status {}", code),
                None => "killed by signal".to_string(),
            };
            self.events
                .emit(&LifecycleEvent::new(pid, name.as_str(), Verb::Terminated, reason));
        }

        if !self.cancel.is_cancelled() {
            self.launcher.request(&name);
        }
    }

    /// Graceful shutdown: stop ticker and workers, SIGTERM every active
    /// group, reap for up to the grace period, SIGKILL survivors.
    async fn shutdown(&self) {
        tracing::info!("shutdown requested, terminating all services");
        self.cancel.cancel();

        for (name, pid) in self.registry.active() {
            self.registry.deactivate(&name, pid);
            signal_group(pid, &name);
            self.events
                .emit(&LifecycleEvent::new(pid, name.as_str(), Verb::Terminated, "shutdown"));
        }

        let deadline = Instant::now() + self.settings.grace;
        loop {
            self.drain_reapable();
            if self.registry.owned_pids().is_empty() || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for pid in self.registry.owned_pids() {
            tracing::warn!("child group {} survived the grace period, killing", pid);
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
            let _ = waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG));
            self.registry.take_pid(pid);
        }
    }

    fn drain_reapable(&self) {
        for pid in self.registry.owned_pids() {
            match waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(_) | Err(_) => {
                    self.registry.take_pid(pid);
                }
            }
        }
    }

    /// SIGHUP: re-parse the procfile and reconcile the running set.
    /// Removed and changed services are terminated, added ones are
    /// enqueued in topological order, unchanged ones keep running. A
    /// manifest that fails to parse or validate keeps the old one.
    fn reload(&self) {
        tracing::info!("SIGHUP received, reloading {}", self.procfile.display());

        let manifest = match Parser::new().load(&self.procfile) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::error!("reload failed, keeping previous manifest: {}", e);
                return;
            }
        };

        let graph = Graph::build(&manifest);
        let order = match graph.topo_sort() {
            Ok(order) => order,
            Err(e) => {
                tracing::error!("reload failed, keeping previous manifest: {}", e);
                return;
            }
        };

        let old = { self.specs.read().clone() };

        for (name, old_spec) in &old.services {
            let replacement = manifest.get(name);
            let changed = replacement.map(|new_spec| new_spec != old_spec);
            match changed {
                None => {
                    if let Some(record) = self.registry.get(name) {
                        if let Some(pid) = record.pid {
                            if self.registry.deactivate(name, pid) {
                                signal_group(pid, name);
                                self.events.emit(&LifecycleEvent::new(
                                    pid,
                                    name.as_str(),
                                    Verb::Terminated,
                                    "removed from manifest",
                                ));
                            }
                        }
                    }
                    self.registry.remove(name);
                }
                Some(true) => {
                    if let Some(record) = self.registry.get(name) {
                        if let Some(pid) = record.pid {
                            if self.registry.deactivate(name, pid) {
                                signal_group(pid, name);
                                self.events.emit(&LifecycleEvent::new(
                                    pid,
                                    name.as_str(),
                                    Verb::Terminated,
                                    "manifest changed",
                                ));
                            }
                        }
                    }
                    self.registry.reset(name);
                }
                Some(false) => {}
            }
        }

        *self.specs.write() = manifest.clone();

        for name in order {
            let is_new = !old.services.contains_key(&name);
            let changed = old
                .get(&name)
                .zip(manifest.get(&name))
                .map(|(old_spec, new_spec)| old_spec != new_spec)
                .unwrap_or(false);
            if is_new {
                self.registry.insert(&name);
            }
            if is_new || changed {
                self.launcher.request(&name);
            }
        }
    }
}
