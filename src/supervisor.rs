//! The supervisor core.
//!
//! `Foreman` wires the four long-lived task kinds together: W launcher
//! workers blocking on the shared work queue, one ticker fanning out
//! reconcile passes, one signal task, and the spawned children in their
//! own process groups. The registry is the only shared mutable state.

use crate::config::{Manifest, Settings};
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::graph::Graph;
use crate::launcher::{Launcher, WorkReceiver};
use crate::probe;
use crate::reconciler::Reconciler;
use crate::registry::Registry;
use crate::signals::SignalHandler;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct Foreman {
    procfile: PathBuf,
    specs: Arc<RwLock<Manifest>>,
    registry: Arc<Registry>,
    launcher: Arc<Launcher>,
    receiver: WorkReceiver,
    events: Arc<dyn EventSink>,
    settings: Settings,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Foreman {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Foreman")
            .field("procfile", &self.procfile)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Foreman {
    /// Build the supervisor from a validated manifest. Fails fast on a
    /// manifest exceeding the service limit and, when port probes are
    /// declared, on a missing port-enumeration facility.
    pub fn new(
        procfile: PathBuf,
        manifest: Manifest,
        settings: Settings,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        if manifest.len() > settings.max_services {
            return Err(Error::TooManyServices {
                declared: manifest.len(),
                limit: settings.max_services,
            });
        }
        if manifest.declares_port_probes() {
            probe::preflight()?;
        }

        let (queue_tx, queue_rx) = mpsc::channel(settings.max_services.max(1));
        let registry = Arc::new(Registry::new(manifest.names().cloned()));
        let specs = Arc::new(RwLock::new(manifest));
        let launcher = Arc::new(Launcher::new(
            Arc::clone(&specs),
            Arc::clone(&registry),
            queue_tx,
            Arc::clone(&events),
        ));

        Ok(Self {
            procfile,
            specs,
            registry,
            launcher,
            receiver: Arc::new(tokio::sync::Mutex::new(queue_rx)),
            events,
            settings,
            cancel: CancellationToken::new(),
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the supervisor in the foreground until a termination signal
    /// completes the graceful shutdown.
    ///
    /// The dependency graph is checked for cycles first; a cycle is a
    /// fatal boot error carrying its witness. The initial queue fill
    /// follows the topological order; everything after that happens in
    /// queue-arrival order.
    pub async fn run(self) -> Result<()> {
        let order = {
            let manifest = self.specs.read();
            Graph::build(&manifest).topo_sort()?
        };

        tracing::info!(
            "supervising {} services with {} workers, tick every {:?}",
            order.len(),
            self.settings.workers,
            self.settings.tick_interval
        );

        let workers = self.launcher.spawn_workers(
            Arc::clone(&self.receiver),
            self.settings.workers,
            self.cancel.child_token(),
        );

        for name in &order {
            self.launcher.enqueue(name).await;
        }

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&self.specs),
            Arc::clone(&self.registry),
            Arc::clone(&self.launcher),
            Arc::clone(&self.events),
            self.settings.clone(),
        ));
        let ticker = reconciler.spawn_ticker(self.cancel.child_token());

        let handler = SignalHandler::new(
            self.procfile.clone(),
            Arc::clone(&self.specs),
            Arc::clone(&self.registry),
            Arc::clone(&self.launcher),
            Arc::clone(&self.events),
            self.settings.clone(),
            self.cancel.clone(),
        );

        let result = handler.run().await;

        self.cancel.cancel();
        let _ = ticker.await;
        for worker in workers {
            let _ = worker.await;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Parser;
    use crate::events::MemorySink;

    fn build(yaml: &str, settings: Settings) -> Result<Foreman> {
        let manifest = Parser::new().parse(yaml).unwrap();
        Foreman::new(
            PathBuf::from("procfile.yaml"),
            manifest,
            settings,
            Arc::new(MemorySink::new()),
        )
    }

    #[tokio::test]
    async fn boot_fails_when_manifest_exceeds_service_limit() {
        let settings = Settings {
            max_services: 1,
            ..Settings::default()
        };
        let err = build("a:\n  cmd: x\nb:\n  cmd: y\n", settings).unwrap_err();
        assert!(matches!(err, Error::TooManyServices { declared: 2, limit: 1 }));
    }

    #[tokio::test]
    async fn registry_is_seeded_from_the_manifest() {
        let foreman = build("a:\n  cmd: x\nb:\n  cmd: y\n", Settings::default()).unwrap();
        let registry = foreman.registry();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("a").is_some());
        assert!(registry.get("b").is_some());
    }
}
