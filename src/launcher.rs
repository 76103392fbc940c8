//! Work queue and launcher worker pool.
//!
//! Service names flow through a bounded channel into a fixed pool of
//! workers. A worker only spawns a service once every dependency is
//! available; otherwise it enqueues the missing dependency and puts the
//! service back at the tail of the queue (self-healing enqueue), which
//! holds the declared invariant even if a dependency died between
//! toposort and launch.

use crate::config::Manifest;
use crate::events::{EventSink, LifecycleEvent, Verb};
use crate::registry::Registry;
use parking_lot::RwLock;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared receiving end of the work queue; workers race on dequeues.
pub type WorkReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>;

pub struct Launcher {
    specs: Arc<RwLock<Manifest>>,
    registry: Arc<Registry>,
    queue: mpsc::Sender<String>,
    events: Arc<dyn EventSink>,
    /// Shell that runs every service command.
    shell: &'static str,
}

impl Launcher {
    pub fn new(
        specs: Arc<RwLock<Manifest>>,
        registry: Arc<Registry>,
        queue: mpsc::Sender<String>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            specs,
            registry,
            queue,
            events,
            shell: "sh",
        }
    }

    /// Start `workers` agents that drain the queue until cancelled.
    pub fn spawn_workers(
        self: &Arc<Self>,
        receiver: WorkReceiver,
        workers: usize,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        (0..workers)
            .map(|index| {
                let launcher = Arc::clone(self);
                let receiver = Arc::clone(&receiver);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tracing::debug!("launcher worker {} up", index);
                    launcher.worker_loop(receiver, cancel).await;
                    tracing::debug!("launcher worker {} down", index);
                })
            })
            .collect()
    }

    async fn worker_loop(&self, receiver: WorkReceiver, cancel: CancellationToken) {
        loop {
            let name = {
                let mut rx = receiver.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    received = rx.recv() => match received {
                        Some(name) => name,
                        None => return,
                    },
                }
            };
            self.launch(&name).await;
        }
    }

    /// Blocking enqueue for the initial toposort fill. The queue capacity
    /// is at least the number of services, so this cannot deadlock.
    pub async fn enqueue(&self, name: &str) {
        let _ = self.queue.send(name.to_string()).await;
    }

    /// Non-blocking enqueue for restarts. A full queue drops the request;
    /// the next reconciler tick will observe the gap and try again.
    pub fn request(&self, name: &str) {
        match self.queue.try_send(name.to_string()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("work queue full, dropping launch request for '{}'", name);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Process one dequeued service name.
    pub async fn launch(&self, name: &str) {
        let spec = { self.specs.read().get(name).cloned() };
        let Some(spec) = spec else {
            // Stale queue entry from before a reload removed the service.
            tracing::debug!("ignoring launch request for unknown service '{}'", name);
            return;
        };

        if spec.is_alias() {
            // Structurally satisfied; dependents may proceed.
            if !self.registry.get(name).map(|r| r.done).unwrap_or(false) {
                tracing::debug!("service '{}' has no cmd, marking satisfied", name);
                self.registry.mark_done(name);
            }
            return;
        }

        // Duplicate queue entries are common (self-healing enqueues,
        // reconciler requests); the claim arbitrates racing workers.
        if !self.registry.claim_launch(name) {
            return;
        }

        if let Some(missing) = self.unsatisfied_dep(&spec.deps) {
            tracing::debug!(
                "service '{}' waiting on dependency '{}', re-enqueueing both",
                name,
                missing
            );
            self.registry.release_launch(name);
            self.request(&missing);
            self.request(name);
            return;
        }

        self.spawn_child(name, &spec.cmd);
    }

    /// First dependency that is neither active, done, nor an alias.
    fn unsatisfied_dep(&self, deps: &[String]) -> Option<String> {
        for dep in deps {
            if self.registry.is_satisfied(dep) {
                continue;
            }
            let alias = { self.specs.read().get(dep).map(|s| s.is_alias()) };
            if alias == Some(true) {
                continue;
            }
            return Some(dep.clone());
        }
        None
    }

    fn spawn_child(&self, name: &str, cmd: &str) {
        // std::process, not tokio::process: the runtime must never
        // register these children, the SIGCHLD task owns their reaping.
        let mut command = Command::new(self.shell);
        command
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Fresh process group, pgid = child pid, so one signal
            // reaches the whole subtree.
            .process_group(0);

        match command.spawn() {
            Ok(child) => {
                let pid = child.id();
                drop(child);
                let launches = self.registry.mark_started(name, pid);
                let verb = if launches > 1 {
                    Verb::Restarted
                } else {
                    Verb::Started
                };
                self.events.emit(&LifecycleEvent::new(pid, name, verb, ""));
            }
            Err(e) => {
                // Launch-transient: the record stays inactive and the
                // next tick's dependency checks will retry via dependents.
                self.registry.release_launch(name);
                let err = crate::error::Error::SpawnFailed(name.to_string(), e.to_string());
                tracing::warn!("{}", err);
            }
        }
    }
}
