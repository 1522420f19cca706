//! Per-user watchlist store: add/remove/list keyed by `(user, movie id)`,
//! plus a live subscription that pushes the full current snapshot on every
//! change.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub id: u64,
    pub title: String,
    pub poster: Option<String>,
    pub release_date: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// What a caller hands to `add`. `added_at` is always store-assigned.
#[derive(Debug, Clone)]
pub struct SavedMovie {
    pub id: u64,
    pub title: String,
    pub poster: Option<String>,
    pub release_date: Option<String>,
}

/// Handle to a live watchlist channel. Dropping it is the disposer: the
/// store prunes the dead watcher on the next change.
pub struct WatchlistSubscription {
    rx: mpsc::UnboundedReceiver<Vec<WatchlistEntry>>,
}

impl WatchlistSubscription {
    /// Next full snapshot, most-recent-first. `None` once the channel closes.
    pub async fn next(&mut self) -> Option<Vec<WatchlistEntry>> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait WatchlistStore: Send + Sync {
    /// Upsert keyed by movie id: re-adding overwrites rather than duplicates.
    async fn add(&self, uid: &str, movie: SavedMovie) -> Result<()>;
    /// Idempotent: removing an absent entry is not an error.
    async fn remove(&self, uid: &str, movie_id: u64) -> Result<()>;
    async fn contains(&self, uid: &str, movie_id: u64) -> Result<bool>;
    /// One-time snapshot ordered by `added_at` descending.
    async fn list(&self, uid: &str) -> Result<Vec<WatchlistEntry>>;
    /// Live channel: delivers the current snapshot immediately, then again
    /// after every change. Consumers degrade to a one-time `list` when this
    /// fails.
    async fn subscribe(&self, uid: &str) -> Result<WatchlistSubscription>;
}

#[derive(Default)]
struct Shelf {
    entries: HashMap<u64, WatchlistEntry>,
    watchers: Vec<mpsc::UnboundedSender<Vec<WatchlistEntry>>>,
}

impl Shelf {
    fn snapshot(&self) -> Vec<WatchlistEntry> {
        let mut rows: Vec<_> = self.entries.values().cloned().collect();
        rows.sort_by(|a, b| b.added_at.cmp(&a.added_at).then(b.id.cmp(&a.id)));
        rows
    }

    fn notify(&mut self) {
        let rows = self.snapshot();
        self.watchers.retain(|tx| tx.send(rows.clone()).is_ok());
    }
}

/// In-process store. Constructed once at startup and injected; holds no
/// global state.
#[derive(Default)]
pub struct MemoryWatchlistStore {
    shelves: Mutex<HashMap<String, Shelf>>,
}

impl MemoryWatchlistStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatchlistStore for MemoryWatchlistStore {
    async fn add(&self, uid: &str, movie: SavedMovie) -> Result<()> {
        let mut shelves = self.shelves.lock().await;
        let shelf = shelves.entry(uid.to_string()).or_default();
        shelf.entries.insert(
            movie.id,
            WatchlistEntry {
                id: movie.id,
                title: movie.title,
                poster: movie.poster,
                release_date: movie.release_date,
                added_at: Utc::now(),
            },
        );
        shelf.notify();
        Ok(())
    }

    async fn remove(&self, uid: &str, movie_id: u64) -> Result<()> {
        let mut shelves = self.shelves.lock().await;
        if let Some(shelf) = shelves.get_mut(uid) {
            if shelf.entries.remove(&movie_id).is_some() {
                shelf.notify();
            }
        }
        Ok(())
    }

    async fn contains(&self, uid: &str, movie_id: u64) -> Result<bool> {
        let shelves = self.shelves.lock().await;
        Ok(shelves
            .get(uid)
            .is_some_and(|s| s.entries.contains_key(&movie_id)))
    }

    async fn list(&self, uid: &str) -> Result<Vec<WatchlistEntry>> {
        let shelves = self.shelves.lock().await;
        Ok(shelves.get(uid).map(Shelf::snapshot).unwrap_or_default())
    }

    async fn subscribe(&self, uid: &str) -> Result<WatchlistSubscription> {
        let mut shelves = self.shelves.lock().await;
        let shelf = shelves.entry(uid.to_string()).or_default();
        let (tx, rx) = mpsc::unbounded_channel();
        // Initial snapshot lands before the watcher is registered, so the
        // subscriber always sees current state first.
        let _ = tx.send(shelf.snapshot());
        shelf.watchers.push(tx);
        Ok(WatchlistSubscription { rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: u64, title: &str) -> SavedMovie {
        SavedMovie {
            id,
            title: title.to_string(),
            poster: Some(format!("/p{id}.jpg")),
            release_date: Some("2024-01-01".to_string()),
        }
    }

    #[tokio::test]
    async fn add_then_list_most_recent_first() {
        let store = MemoryWatchlistStore::new();
        store.add("u1", movie(1, "First")).await.unwrap();
        store.add("u1", movie(2, "Second")).await.unwrap();

        let rows = store.list("u1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].added_at >= rows[1].added_at);
        assert!(store.contains("u1", 1).await.unwrap());
        assert!(!store.contains("u2", 1).await.unwrap());
    }

    #[tokio::test]
    async fn readd_overwrites_instead_of_duplicating() {
        let store = MemoryWatchlistStore::new();
        store.add("u1", movie(1, "Old Title")).await.unwrap();
        store.add("u1", movie(1, "New Title")).await.unwrap();

        let rows = store.list("u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "New Title");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = MemoryWatchlistStore::new();
        store.add("u1", movie(1, "Only")).await.unwrap();
        store.remove("u1", 1).await.unwrap();
        store.remove("u1", 1).await.unwrap();
        store.remove("nobody", 99).await.unwrap();
        assert!(store.list("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscription_sees_initial_snapshot_and_changes() {
        let store = MemoryWatchlistStore::new();
        store.add("u1", movie(1, "First")).await.unwrap();

        let mut sub = store.subscribe("u1").await.unwrap();
        let initial = sub.next().await.unwrap();
        assert_eq!(initial.len(), 1);

        store.add("u1", movie(2, "Second")).await.unwrap();
        let after_add = sub.next().await.unwrap();
        assert_eq!(after_add.len(), 2);

        store.remove("u1", 1).await.unwrap();
        let after_remove = sub.next().await.unwrap();
        assert_eq!(after_remove.len(), 1);
        assert_eq!(after_remove[0].id, 2);
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let store = MemoryWatchlistStore::new();
        let sub = store.subscribe("u1").await.unwrap();
        drop(sub);
        store.add("u1", movie(1, "First")).await.unwrap();

        let shelves = store.shelves.lock().await;
        assert!(shelves.get("u1").unwrap().watchers.is_empty());
    }
}
