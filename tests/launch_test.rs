//! Worker pool behavior with real children.

use foreman::launcher::Launcher;
use foreman::{EventSink, Manifest, MemorySink, Parser, Registry, Status};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn setup(
    yaml: &str,
) -> (
    Arc<Launcher>,
    Arc<Registry>,
    Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
) {
    let manifest: Manifest = Parser::new().parse(yaml).unwrap();
    let specs = Arc::new(RwLock::new(manifest.clone()));
    let registry = Arc::new(Registry::new(manifest.names().cloned()));
    let (queue_tx, queue_rx) = mpsc::channel(32);
    let launcher = Arc::new(Launcher::new(
        specs,
        Arc::clone(&registry),
        queue_tx,
        Arc::new(MemorySink::new()) as Arc<dyn EventSink>,
    ));
    (launcher, registry, Arc::new(tokio::sync::Mutex::new(queue_rx)))
}

fn kill_group(pid: u32) {
    let _ = nix::sys::signal::killpg(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    );
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_pool_brings_up_a_service_and_its_dependency() {
    let (launcher, registry, queue_rx) =
        setup("redis:\n  cmd: sleep 30\napp:\n  cmd: sleep 30\n  deps: [redis]\n");
    let cancel = CancellationToken::new();
    let workers = launcher.spawn_workers(queue_rx, 2, cancel.clone());

    // Enqueue the dependent first: the worker must requeue it behind its
    // dependency rather than spawn it early.
    launcher.enqueue("app").await;
    launcher.enqueue("redis").await;

    let came_up = wait_until(|| {
        registry.get("redis").map(|r| r.status) == Some(Status::Active)
            && registry.get("app").map(|r| r.status) == Some(Status::Active)
    })
    .await;
    assert!(came_up, "both services should come up");

    // Both children are alive in their own process groups.
    for name in ["redis", "app"] {
        let pid = registry.get(name).unwrap().pid.unwrap();
        assert!(nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok());
    }

    cancel.cancel();
    for worker in workers {
        let _ = worker.await;
    }
    for name in ["redis", "app"] {
        if let Some(pid) = registry.get(name).and_then(|r| r.pid) {
            kill_group(pid);
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn alias_dependency_unblocks_dependents_without_spawning() {
    let (launcher, registry, queue_rx) =
        setup("group:\n  deps: []\napp:\n  cmd: sleep 30\n  deps: [group]\n");
    let cancel = CancellationToken::new();
    let workers = launcher.spawn_workers(queue_rx, 2, cancel.clone());

    launcher.enqueue("group").await;
    launcher.enqueue("app").await;

    let came_up =
        wait_until(|| registry.get("app").map(|r| r.status) == Some(Status::Active)).await;
    assert!(came_up, "app should start behind the alias");

    let group = registry.get("group").unwrap();
    assert!(group.done);
    assert_eq!(group.pid, None);
    assert_eq!(group.status, Status::Inactive);

    cancel.cancel();
    for worker in workers {
        let _ = worker.await;
    }
    if let Some(pid) = registry.get("app").and_then(|r| r.pid) {
        kill_group(pid);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn done_run_once_service_is_never_relaunched() {
    let (launcher, registry, _queue_rx) = setup("once:\n  cmd: sleep 30\n  run_once: true\n");

    launcher.launch("once").await;
    let pid = registry.get("once").unwrap().pid.unwrap();

    // Simulate the SIGCHLD path for a clean exit.
    kill_group(pid);
    registry.deactivate("once", pid);
    registry.take_pid(pid);
    registry.mark_done("once");

    launcher.launch("once").await;
    let record = registry.get("once").unwrap();
    assert_eq!(record.status, Status::Inactive);
    assert_eq!(record.pid, None);
    assert_eq!(record.launches, 1);
}
