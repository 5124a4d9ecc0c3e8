//! End-to-end daemon–client sync tests
//!
//! Each test spins up a real daemon (orchestrator + snapshot service + sync
//! server) on an ephemeral port and talks to it through the adapter, the
//! same way a TUI or CLI would.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use scout_client::ClientSyncAdapter;
use scout_core::config::{DaemonConfig, FolderRegistry};
use scout_core::types::{ClientKind, Fmdm, FolderState};
use scout_daemon::lifecycle::LifecycleDeps;
use scout_daemon::{
    FileStateTracker, FmdmService, FolderOrchestrator, NoopProvider, ResourceManager, SyncServer,
};

struct TestDaemon {
    url: String,
    _config_dir: tempfile::TempDir,
    server_task: tokio::task::JoinHandle<()>,
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

async fn spawn_daemon() -> TestDaemon {
    let config_dir = tempfile::tempdir().unwrap();
    let registry =
        Arc::new(FolderRegistry::open(config_dir.path().join("folders.toml")).unwrap());
    let fmdm = Arc::new(FmdmService::new(vec!["nomic-embed-text".into()]));
    let deps = Arc::new(LifecycleDeps {
        tracker: Arc::new(FileStateTracker::in_memory().unwrap()),
        resources: Arc::new(ResourceManager::new()),
        provider: Arc::new(NoopProvider),
        fmdm: fmdm.clone(),
        excludes: vec![],
        max_files_per_batch: 50,
    });
    let orchestrator = FolderOrchestrator::new(registry, deps, &DaemonConfig::default());
    orchestrator.run();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = SyncServer::new(orchestrator, fmdm);
    let server_task = tokio::spawn(async move {
        let _ = server.serve_with_listener(listener).await;
    });

    TestDaemon {
        url: format!("ws://{}", addr),
        _config_dir: config_dir,
        server_task,
    }
}

/// Poll an adapter until its snapshot satisfies the predicate
async fn wait_for<F>(adapter: &ClientSyncAdapter, what: &str, predicate: F) -> Arc<Fmdm>
where
    F: Fn(&Fmdm) -> bool,
{
    for _ in 0..500 {
        if let Some(snapshot) = adapter.snapshot() {
            if predicate(&snapshot) {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never satisfied: {}", what);
}

#[tokio::test]
async fn test_connect_receives_initial_snapshot() {
    let daemon = spawn_daemon().await;
    let adapter = ClientSyncAdapter::connect(&daemon.url, ClientKind::Tui)
        .await
        .unwrap();

    let snapshot = adapter
        .wait_for_snapshot(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(snapshot.connections.count, 1);
    assert_eq!(snapshot.connections.clients[0].kind, ClientKind::Tui);
    assert!(snapshot
        .available_models
        .contains(&"nomic-embed-text".to_string()));
    assert!(snapshot.folders.is_empty());
}

#[tokio::test]
async fn test_add_folder_converges_on_all_clients() {
    let daemon = spawn_daemon().await;
    let folder = tempfile::tempdir().unwrap();
    for i in 0..20 {
        fs::write(folder.path().join(format!("doc-{i}.md")), format!("body {i}")).unwrap();
    }
    let key = folder.path().display().to_string();

    let alpha = ClientSyncAdapter::connect(&daemon.url, ClientKind::Tui)
        .await
        .unwrap();
    let beta = ClientSyncAdapter::connect(&daemon.url, ClientKind::Cli)
        .await
        .unwrap();

    // Both see each other before any folder exists
    wait_for(&alpha, "two clients connected", |s| s.connections.count == 2).await;
    wait_for(&beta, "two clients connected", |s| s.connections.count == 2).await;

    // The requester gets only an ack; state arrives via broadcast
    let response = alpha.add_folder(&key, None).await.unwrap();
    assert!(response.success);
    assert!(response.error.is_none());

    let settled = |s: &Fmdm| {
        s.folder(&key)
            .map(|f| f.state == FolderState::Active && f.progress_percent == Some(100))
            .unwrap_or(false)
    };
    wait_for(&alpha, "folder active on alpha", settled).await;
    wait_for(&beta, "folder active on beta", settled).await;

    // After settling, every client's last snapshot is byte-identical
    tokio::time::sleep(Duration::from_millis(300)).await;
    let snap_a = serde_json::to_string(&*alpha.snapshot().unwrap()).unwrap();
    let snap_b = serde_json::to_string(&*beta.snapshot().unwrap()).unwrap();
    assert_eq!(snap_a, snap_b);
}

#[tokio::test]
async fn test_remove_folder_broadcasts_to_everyone() {
    let daemon = spawn_daemon().await;
    let folder = tempfile::tempdir().unwrap();
    fs::write(folder.path().join("a.md"), "alpha").unwrap();
    let key = folder.path().display().to_string();

    let alpha = ClientSyncAdapter::connect(&daemon.url, ClientKind::Tui)
        .await
        .unwrap();
    let beta = ClientSyncAdapter::connect(&daemon.url, ClientKind::Cli)
        .await
        .unwrap();

    alpha.add_folder(&key, None).await.unwrap();
    wait_for(&beta, "folder appears on beta", |s| s.folder(&key).is_some()).await;

    // The *other* client removes it
    let response = beta.remove_folder(&key).await.unwrap();
    assert!(response.success);

    wait_for(&alpha, "folder gone on alpha", |s| s.folder(&key).is_none()).await;
    wait_for(&beta, "folder gone on beta", |s| s.folder(&key).is_none()).await;
}

#[tokio::test]
async fn test_watcher_reindexes_new_file() {
    let daemon = spawn_daemon().await;
    let folder = tempfile::tempdir().unwrap();
    fs::write(folder.path().join("a.md"), "alpha").unwrap();
    let key = folder.path().display().to_string();

    let adapter = ClientSyncAdapter::connect(&daemon.url, ClientKind::Tui)
        .await
        .unwrap();

    adapter.add_folder(&key, None).await.unwrap();
    wait_for(&adapter, "folder active", |s| {
        s.folder(&key).map(|f| f.state) == Some(FolderState::Active)
    })
    .await;

    // Dropping a new file into the active folder re-runs the cycle
    fs::write(folder.path().join("new.txt"), "fresh").unwrap();

    let mut saw_busy = false;
    for _ in 0..1000 {
        if let Some(snapshot) = adapter.snapshot() {
            if let Some(view) = snapshot.folder(&key) {
                if view.state.is_busy() {
                    saw_busy = true;
                }
                if saw_busy && view.state == FolderState::Active {
                    return;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("folder never cycled through scanning back to active");
}

#[tokio::test]
async fn test_validate_and_ping() {
    let daemon = spawn_daemon().await;
    let adapter = ClientSyncAdapter::connect(&daemon.url, ClientKind::Cli)
        .await
        .unwrap();

    let response = adapter.validate("/nonexistent/scout-target").await.unwrap();
    assert!(!response.valid);
    assert!(!response.errors.is_empty());

    let folder = tempfile::tempdir().unwrap();
    let response = adapter
        .validate(folder.path().to_str().unwrap())
        .await
        .unwrap();
    assert!(response.valid);

    let rtt = adapter.ping().await.unwrap();
    assert!(rtt < Duration::from_secs(5));
}

#[tokio::test]
async fn test_disconnect_updates_connection_count() {
    let daemon = spawn_daemon().await;

    let alpha = ClientSyncAdapter::connect(&daemon.url, ClientKind::Tui)
        .await
        .unwrap();
    let beta = ClientSyncAdapter::connect(&daemon.url, ClientKind::Cli)
        .await
        .unwrap();

    wait_for(&alpha, "two clients", |s| s.connections.count == 2).await;

    beta.close();
    drop(beta);

    wait_for(&alpha, "one client left", |s| s.connections.count == 1).await;
}
