//! System snapshot service (FMDM)
//!
//! Maintains exactly one current snapshot of everything a client can know:
//! folder states, daemon metadata, connected clients, available models. On
//! every relevant change the snapshot is rebuilt wholesale and swapped in
//! behind an `Arc`, then pushed down a single broadcast channel — readers
//! never see a partially updated snapshot, and subscribers receive snapshots
//! in the order they were generated.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use scout_core::types::{ClientView, ConnectionInfo, DaemonInfo, FolderView, Fmdm};

/// Broadcast buffer; laggy subscribers skip stale snapshots, which is safe
/// because every snapshot is complete.
const BROADCAST_CAPACITY: usize = 64;

/// Single source of truth for the system snapshot
pub struct FmdmService {
    /// Folder views keyed by path (ordered, so snapshots are deterministic)
    folders: RwLock<BTreeMap<String, FolderView>>,
    /// Connected clients in connection order
    clients: RwLock<Vec<ClientView>>,
    /// The one current snapshot
    current: RwLock<Arc<Fmdm>>,
    tx: broadcast::Sender<Arc<Fmdm>>,
    started_at: Instant,
    available_models: Vec<String>,
}

impl FmdmService {
    pub fn new(available_models: Vec<String>) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let started_at = Instant::now();

        let initial = Arc::new(Fmdm {
            version: env!("CARGO_PKG_VERSION").to_string(),
            folders: vec![],
            daemon: DaemonInfo {
                pid: std::process::id(),
                uptime_seconds: 0,
            },
            connections: ConnectionInfo {
                count: 0,
                clients: vec![],
            },
            available_models: available_models.clone(),
        });

        Self {
            folders: RwLock::new(BTreeMap::new()),
            clients: RwLock::new(Vec::new()),
            current: RwLock::new(initial),
            tx,
            started_at,
            available_models,
        }
    }

    /// The current snapshot
    pub fn current(&self) -> Arc<Fmdm> {
        self.current.read().clone()
    }

    /// Subscribe to snapshot updates
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Fmdm>> {
        self.tx.subscribe()
    }

    /// Insert or replace one folder's view, then republish
    pub fn upsert_folder(&self, view: FolderView) {
        self.folders.write().insert(view.path.clone(), view);
        self.rebuild_and_publish();
    }

    /// Drop a folder from the snapshot, then republish
    pub fn remove_folder(&self, path: &str) {
        self.folders.write().remove(path);
        self.rebuild_and_publish();
    }

    /// Record a new client connection, then republish
    pub fn client_connected(&self, client: ClientView) {
        self.clients.write().push(client);
        self.rebuild_and_publish();
    }

    /// Record a client disconnect, then republish
    pub fn client_disconnected(&self, id: &str) {
        self.clients.write().retain(|c| c.id != id);
        self.rebuild_and_publish();
    }

    /// Republish with fresh daemon metadata (uptime heartbeat)
    pub fn heartbeat(&self) {
        self.rebuild_and_publish();
    }

    /// Spawn the periodic uptime heartbeat task
    pub fn spawn_heartbeat(self: Arc<Self>, interval: std::time::Duration) {
        let service = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // first tick is immediate; skip it
            loop {
                tick.tick().await;
                service.heartbeat();
            }
        });
    }

    /// Build a fresh snapshot and swap it in.
    ///
    /// The write lock on `current` is held across build-and-send, which makes
    /// publish order identical to generation order.
    fn rebuild_and_publish(&self) {
        let mut current = self.current.write();

        let folders: Vec<FolderView> = self.folders.read().values().cloned().collect();
        let clients: Vec<ClientView> = self.clients.read().clone();

        let next = Arc::new(Fmdm {
            version: env!("CARGO_PKG_VERSION").to_string(),
            folders,
            daemon: DaemonInfo {
                pid: std::process::id(),
                uptime_seconds: self.started_at.elapsed().as_secs(),
            },
            connections: ConnectionInfo {
                count: clients.len(),
                clients,
            },
            available_models: self.available_models.clone(),
        });

        *current = next.clone();
        // No receivers is fine (nobody connected yet)
        let _ = self.tx.send(next);
        debug!("Snapshot republished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::types::{ClientKind, FolderState};

    fn view(path: &str, state: FolderState) -> FolderView {
        FolderView {
            path: path.into(),
            model: "nomic-embed-text".into(),
            state,
            progress_percent: None,
            error: None,
        }
    }

    #[test]
    fn test_upsert_and_remove_folder() {
        let service = FmdmService::new(vec!["nomic-embed-text".into()]);

        service.upsert_folder(view("/data/docs", FolderState::Pending));
        assert_eq!(service.current().folders.len(), 1);

        service.upsert_folder(view("/data/docs", FolderState::Active));
        let snap = service.current();
        assert_eq!(snap.folders.len(), 1);
        assert_eq!(snap.folders[0].state, FolderState::Active);

        service.remove_folder("/data/docs");
        assert!(service.current().folders.is_empty());
    }

    #[test]
    fn test_folders_are_ordered_by_path() {
        let service = FmdmService::new(vec![]);

        service.upsert_folder(view("/data/zebra", FolderState::Pending));
        service.upsert_folder(view("/data/alpha", FolderState::Pending));

        let snap = service.current();
        assert_eq!(snap.folders[0].path, "/data/alpha");
        assert_eq!(snap.folders[1].path, "/data/zebra");
    }

    #[test]
    fn test_client_tracking() {
        let service = FmdmService::new(vec![]);

        service.client_connected(ClientView {
            id: "c1".into(),
            kind: ClientKind::Cli,
            connected_at: 1,
        });
        service.client_connected(ClientView {
            id: "c2".into(),
            kind: ClientKind::Tui,
            connected_at: 2,
        });

        assert_eq!(service.current().connections.count, 2);

        service.client_disconnected("c1");
        let snap = service.current();
        assert_eq!(snap.connections.count, 1);
        assert_eq!(snap.connections.clients[0].id, "c2");
    }

    #[tokio::test]
    async fn test_subscribers_see_updates_in_order() {
        let service = FmdmService::new(vec![]);
        let mut rx = service.subscribe();

        service.upsert_folder(view("/data/docs", FolderState::Scanning));
        service.upsert_folder(view("/data/docs", FolderState::Active));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.folders[0].state, FolderState::Scanning);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.folders[0].state, FolderState::Active);
    }

    #[test]
    fn test_snapshot_is_swapped_not_mutated() {
        let service = FmdmService::new(vec![]);

        let before = service.current();
        service.upsert_folder(view("/data/docs", FolderState::Pending));
        let after = service.current();

        // The old Arc is untouched; readers holding it see a consistent view
        assert!(before.folders.is_empty());
        assert_eq!(after.folders.len(), 1);
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
