//! # Playlist Ordering
//!
//! Keeps the entries of every playlist at positions `0..n-1` while resources
//! are appended, removed and reordered.
//!
//! Each mutation runs in exactly one [`MembershipTransaction`]. Whatever goes
//! wrong inside it, the transaction is rolled back before the error is
//! returned, so a failed call never leaves a partial renumbering behind.
//!
//! ## Protocols
//!
//! - **Append** reads the current maximum position and inserts at `max + 1`.
//!   Two appends racing on the same playlist can compute the same position;
//!   the loser hits the unique index and the whole attempt is run exactly
//!   once more.
//! - **Remove** deletes the entry, then shifts every survivor down to its
//!   rank. Rows are moved in ascending order, so each target position is
//!   already free and immediate checking is enough.
//! - **Set order** deletes all entries and reinserts them by list index
//!   inside a [`ConstraintMode::Deferred`] transaction.
//! - **Delete resource** removes the resource from every playlist holding
//!   it, compacts each of them and deletes the resource row, all in one
//!   transaction. An append that raced it either commits first and is
//!   compacted away, or finds the resource gone.
//!
//! Within one process, [`PlaylistLocks`] serializes mutations of the same
//! playlist. Other processes sharing the database are still kept consistent
//! by the unique index and the append retry.

use crate::error::{LibraryError, Result};
use crate::models::PlaylistEntry;
use crate::repositories::{
    ConstraintMode, MembershipStore, MembershipTransaction, PlaylistRepository,
    ResourceRepository,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

/// Existence checks the ordering service needs from the rest of the catalog
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn playlist_exists(&self, playlist_id: &str) -> Result<bool>;

    async fn resource_exists(&self, resource_id: &str) -> Result<bool>;
}

/// [`CatalogLookup`] backed by the playlist and resource repositories
pub struct RepositoryCatalog {
    playlists: Arc<dyn PlaylistRepository>,
    resources: Arc<dyn ResourceRepository>,
}

impl RepositoryCatalog {
    pub fn new(
        playlists: Arc<dyn PlaylistRepository>,
        resources: Arc<dyn ResourceRepository>,
    ) -> Self {
        Self {
            playlists,
            resources,
        }
    }
}

#[async_trait]
impl CatalogLookup for RepositoryCatalog {
    async fn playlist_exists(&self, playlist_id: &str) -> Result<bool> {
        self.playlists.exists(playlist_id).await
    }

    async fn resource_exists(&self, resource_id: &str) -> Result<bool> {
        self.resources.exists(resource_id).await
    }
}

/// Purge dead lock entries every N acquisitions...
const LOCK_CLEANUP_INTERVAL: usize = 64;
/// ...once the map holds more than this many playlists.
const LOCK_CLEANUP_THRESHOLD: usize = 128;

/// In-process mutex per playlist.
///
/// Different playlists never contend. Entries are held weakly and disappear
/// once no guard for the playlist is alive.
#[derive(Default)]
pub struct PlaylistLocks {
    locks: std::sync::Mutex<HashMap<String, Weak<Mutex<()>>>>,
    acquisitions: AtomicUsize,
}

/// Holds a playlist's lock until dropped
pub struct PlaylistGuard {
    _guard: OwnedMutexGuard<()>,
}

impl PlaylistLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds the playlist's lock, then take it
    pub async fn acquire(&self, playlist_id: &str) -> PlaylistGuard {
        let mutex = {
            let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);

            let mutex = map
                .get(playlist_id)
                .and_then(Weak::upgrade)
                .unwrap_or_else(|| {
                    let mutex = Arc::new(Mutex::new(()));
                    map.insert(playlist_id.to_string(), Arc::downgrade(&mutex));
                    mutex
                });

            let tick = self.acquisitions.fetch_add(1, Ordering::Relaxed);
            if map.len() > LOCK_CLEANUP_THRESHOLD && tick % LOCK_CLEANUP_INTERVAL == 0 {
                map.retain(|_, weak| weak.strong_count() > 0);
            }

            mutex
        };

        PlaylistGuard {
            _guard: mutex.lock_owned().await,
        }
    }

    /// Number of playlists currently tracked, live or not yet purged
    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Append, remove and reorder resources inside playlists
pub struct OrderingService {
    store: Arc<dyn MembershipStore>,
    catalog: Arc<dyn CatalogLookup>,
    locks: Option<PlaylistLocks>,
}

impl OrderingService {
    /// Create a service that serializes mutations per playlist
    pub fn new(store: Arc<dyn MembershipStore>, catalog: Arc<dyn CatalogLookup>) -> Self {
        Self {
            store,
            catalog,
            locks: Some(PlaylistLocks::new()),
        }
    }

    /// Turn per-playlist serialization on or off.
    ///
    /// Without it, concurrent mutations of one playlist rely on the unique
    /// index alone; a reorder that loses such a race fails with `Conflict`.
    pub fn serialize_mutations(mut self, enabled: bool) -> Self {
        self.locks = enabled.then(PlaylistLocks::new);
        self
    }

    /// Add a resource at the end of a playlist and return its position
    ///
    /// # Errors
    /// - `NotFound` if the playlist or the resource does not exist
    /// - `Conflict` if the resource is already in the playlist, or if the
    ///   position race was lost twice
    #[instrument(skip(self), fields(playlist_id = %playlist_id, resource_id = %resource_id))]
    pub async fn append(&self, playlist_id: &str, resource_id: &str) -> Result<i64> {
        self.ensure_playlist(playlist_id).await?;
        if !self.catalog.resource_exists(resource_id).await? {
            return Err(LibraryError::not_found("Resource", resource_id));
        }

        let _guard = self.lock(playlist_id).await;

        let position = match self.try_append(playlist_id, resource_id).await {
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Append lost a position race, retrying once");
                self.try_append(playlist_id, resource_id)
                    .await
                    .map_err(|e| settle_conflict(e, playlist_id))?
            }
            other => other?,
        };

        info!(position, "Appended resource to playlist");
        Ok(position)
    }

    async fn try_append(&self, playlist_id: &str, resource_id: &str) -> Result<i64> {
        let mut tx = self.store.begin(ConstraintMode::Immediate).await?;

        let result: Result<i64> = async {
            if tx.contains(playlist_id, resource_id).await? {
                return Err(LibraryError::Conflict {
                    entity_type: "PlaylistEntry".to_string(),
                    id: format!("{}/{}", playlist_id, resource_id),
                    message: "resource is already in this playlist".to_string(),
                });
            }

            let next = tx
                .max_position(playlist_id)
                .await?
                .map_or(0, |max| max + 1);

            tx.insert(&PlaylistEntry::new(playlist_id, resource_id, next))
                .await?;
            Ok(next)
        }
        .await;

        finish(tx, result).await
    }

    /// Take a resource out of a playlist and close the gap it leaves
    ///
    /// # Errors
    /// Returns `NotFound` if the playlist does not exist or does not contain
    /// the resource; the playlist is left untouched.
    #[instrument(skip(self), fields(playlist_id = %playlist_id, resource_id = %resource_id))]
    pub async fn remove(&self, playlist_id: &str, resource_id: &str) -> Result<()> {
        self.ensure_playlist(playlist_id).await?;

        let _guard = self.lock(playlist_id).await;
        let mut tx = self.store.begin(ConstraintMode::Immediate).await?;

        let result: Result<(usize, usize)> = async {
            if !tx.delete(playlist_id, resource_id).await? {
                return Err(LibraryError::not_found(
                    "PlaylistEntry",
                    format!("{}/{}", playlist_id, resource_id),
                ));
            }

            compact(&mut tx, playlist_id).await
        }
        .await;

        let (remaining, shifted) = finish(tx, result)
            .await
            .map_err(|e| settle_conflict(e, playlist_id))?;

        info!(remaining, shifted, "Removed resource from playlist");
        Ok(())
    }

    /// Replace the order of a playlist with `resource_ids`
    ///
    /// The list must name every resource of the playlist exactly once.
    /// Entries keep the time they were first added.
    ///
    /// # Errors
    /// - `NotFound` if the playlist does not exist
    /// - `InvalidInput` if the list is empty, repeats a resource, names a
    ///   resource outside the playlist or leaves one out
    /// - `Conflict` if a concurrent change made the new order collide
    #[instrument(skip(self, resource_ids), fields(playlist_id = %playlist_id, count = resource_ids.len()))]
    pub async fn set_order(&self, playlist_id: &str, resource_ids: &[String]) -> Result<()> {
        self.ensure_playlist(playlist_id).await?;

        if resource_ids.is_empty() {
            return Err(LibraryError::invalid_input(
                "resource_ids",
                "the new order must list at least one resource",
            ));
        }

        let mut seen = HashSet::with_capacity(resource_ids.len());
        if let Some(repeated) = resource_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(LibraryError::invalid_input(
                "resource_ids",
                format!("resource {} is listed more than once", repeated),
            ));
        }

        let _guard = self.lock(playlist_id).await;
        let mut tx = self.store.begin(ConstraintMode::Deferred).await?;

        let result: Result<()> = async {
            let current = tx.select_all(playlist_id).await?;
            let added_at: HashMap<&str, i64> = current
                .iter()
                .map(|entry| (entry.resource_id.as_str(), entry.added_at))
                .collect();

            let mut entries = Vec::with_capacity(resource_ids.len());
            for (position, resource_id) in resource_ids.iter().enumerate() {
                let added_at = added_at.get(resource_id.as_str()).copied().ok_or_else(|| {
                    LibraryError::invalid_input(
                        "resource_ids",
                        format!("resource {} is not in this playlist", resource_id),
                    )
                })?;

                entries.push(PlaylistEntry {
                    playlist_id: playlist_id.to_string(),
                    resource_id: resource_id.clone(),
                    position: position as i64,
                    added_at,
                });
            }

            if entries.len() != current.len() {
                return Err(LibraryError::invalid_input(
                    "resource_ids",
                    format!(
                        "the new order lists {} of the playlist's {} resources",
                        entries.len(),
                        current.len()
                    ),
                ));
            }

            let cleared = tx.delete_all(playlist_id).await?;
            debug!(cleared, "Cleared entries before reinsert");

            for entry in &entries {
                tx.insert(entry).await?;
            }

            Ok(())
        }
        .await;

        finish(tx, result)
            .await
            .map_err(|e| settle_conflict(e, playlist_id))?;

        info!("Reordered playlist");
        Ok(())
    }

    /// Delete a resource, first taking it out of every playlist that holds it
    ///
    /// Returns how many playlists were compacted. Losing a race with another
    /// writer is retried once, like [`append`](Self::append).
    ///
    /// # Errors
    /// - `NotFound` if the resource does not exist
    /// - `Conflict` if the race with a concurrent writer was lost twice
    #[instrument(skip(self), fields(resource_id = %resource_id))]
    pub async fn delete_resource(&self, resource_id: &str) -> Result<usize> {
        let playlists = match self.try_delete_resource(resource_id).await {
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Resource delete lost a race, retrying once");
                self.try_delete_resource(resource_id)
                    .await
                    .map_err(|e| settle_resource_conflict(e, resource_id))?
            }
            other => other?,
        };

        info!(playlists, "Deleted resource");
        Ok(playlists)
    }

    async fn try_delete_resource(&self, resource_id: &str) -> Result<usize> {
        let mut tx = self.store.begin(ConstraintMode::Immediate).await?;

        let result: Result<usize> = async {
            let playlist_ids = tx.playlists_with(resource_id).await?;
            for playlist_id in &playlist_ids {
                tx.delete(playlist_id, resource_id).await?;
                let (remaining, shifted) = compact(&mut tx, playlist_id).await?;
                debug!(playlist_id = %playlist_id, remaining, shifted, "Compacted playlist");
            }

            if !tx.delete_resource(resource_id).await? {
                return Err(LibraryError::not_found("Resource", resource_id));
            }
            Ok(playlist_ids.len())
        }
        .await;

        finish(tx, result).await
    }

    /// Entries of a playlist ordered by position
    ///
    /// # Errors
    /// Returns `NotFound` if the playlist does not exist
    #[instrument(skip(self), fields(playlist_id = %playlist_id))]
    pub async fn list_ordered(&self, playlist_id: &str) -> Result<Vec<PlaylistEntry>> {
        self.ensure_playlist(playlist_id).await?;
        self.store.list(playlist_id).await
    }

    /// IDs of every playlist that holds the resource
    pub async fn playlists_containing(&self, resource_id: &str) -> Result<Vec<String>> {
        self.store.playlists_containing(resource_id).await
    }

    async fn ensure_playlist(&self, playlist_id: &str) -> Result<()> {
        if self.catalog.playlist_exists(playlist_id).await? {
            Ok(())
        } else {
            Err(LibraryError::not_found("Playlist", playlist_id))
        }
    }

    async fn lock(&self, playlist_id: &str) -> Option<PlaylistGuard> {
        match &self.locks {
            Some(locks) => Some(locks.acquire(playlist_id).await),
            None => None,
        }
    }
}

/// Commit on success, roll back on failure
async fn finish<T>(tx: Box<dyn MembershipTransaction>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// Shift every entry of the playlist down to its rank.
///
/// Returns `(remaining, shifted)`. Rows move in ascending order, so each
/// target position is already free.
async fn compact(
    tx: &mut Box<dyn MembershipTransaction>,
    playlist_id: &str,
) -> Result<(usize, usize)> {
    let survivors = tx.select_all(playlist_id).await?;
    let mut shifted = 0usize;
    for (rank, entry) in survivors.iter().enumerate() {
        let rank = rank as i64;
        if entry.position != rank {
            tx.update_position(playlist_id, &entry.resource_id, rank)
                .await?;
            shifted += 1;
        }
    }

    Ok((survivors.len(), shifted))
}

fn concurrent_modification(playlist_id: &str) -> LibraryError {
    LibraryError::Conflict {
        entity_type: "Playlist".to_string(),
        id: playlist_id.to_string(),
        message: "playlist was modified concurrently, try again".to_string(),
    }
}

/// A retryable failure that is not going to be retried is a conflict
fn settle_conflict(err: LibraryError, playlist_id: &str) -> LibraryError {
    if err.is_retryable() {
        concurrent_modification(playlist_id)
    } else {
        err
    }
}

fn settle_resource_conflict(err: LibraryError, resource_id: &str) -> LibraryError {
    if err.is_retryable() {
        LibraryError::Conflict {
            entity_type: "Resource".to_string(),
            id: resource_id.to_string(),
            message: "resource was modified concurrently, try again".to_string(),
        }
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{Playlist, Resource};
    use crate::repositories::{
        SqliteMembershipStore, SqlitePlaylistRepository, SqliteResourceRepository,
    };
    use mockall::mock;
    use std::time::Duration;

    mock! {
        pub Catalog {}

        #[async_trait]
        impl CatalogLookup for Catalog {
            async fn playlist_exists(&self, playlist_id: &str) -> Result<bool>;
            async fn resource_exists(&self, resource_id: &str) -> Result<bool>;
        }
    }

    /// Store whose inserts fail with a position conflict a set number of times
    struct FlakyStore {
        inner: SqliteMembershipStore,
        failures_left: Arc<AtomicUsize>,
        insert_attempts: Arc<AtomicUsize>,
    }

    struct FlakyTransaction {
        inner: Box<dyn MembershipTransaction>,
        failures_left: Arc<AtomicUsize>,
        insert_attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MembershipStore for FlakyStore {
        async fn begin(&self, mode: ConstraintMode) -> Result<Box<dyn MembershipTransaction>> {
            Ok(Box::new(FlakyTransaction {
                inner: self.inner.begin(mode).await?,
                failures_left: self.failures_left.clone(),
                insert_attempts: self.insert_attempts.clone(),
            }))
        }

        async fn list(&self, playlist_id: &str) -> Result<Vec<PlaylistEntry>> {
            self.inner.list(playlist_id).await
        }

        async fn playlists_containing(&self, resource_id: &str) -> Result<Vec<String>> {
            self.inner.playlists_containing(resource_id).await
        }
    }

    #[async_trait]
    impl MembershipTransaction for FlakyTransaction {
        fn mode(&self) -> ConstraintMode {
            self.inner.mode()
        }

        async fn insert(&mut self, entry: &PlaylistEntry) -> Result<()> {
            self.insert_attempts.fetch_add(1, Ordering::SeqCst);
            let fail = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(LibraryError::PositionConflict {
                    playlist_id: entry.playlist_id.clone(),
                });
            }
            self.inner.insert(entry).await
        }

        async fn delete(&mut self, playlist_id: &str, resource_id: &str) -> Result<bool> {
            self.inner.delete(playlist_id, resource_id).await
        }

        async fn delete_all(&mut self, playlist_id: &str) -> Result<u64> {
            self.inner.delete_all(playlist_id).await
        }

        async fn update_position(
            &mut self,
            playlist_id: &str,
            resource_id: &str,
            position: i64,
        ) -> Result<()> {
            self.inner
                .update_position(playlist_id, resource_id, position)
                .await
        }

        async fn select_all(&mut self, playlist_id: &str) -> Result<Vec<PlaylistEntry>> {
            self.inner.select_all(playlist_id).await
        }

        async fn max_position(&mut self, playlist_id: &str) -> Result<Option<i64>> {
            self.inner.max_position(playlist_id).await
        }

        async fn contains(&mut self, playlist_id: &str, resource_id: &str) -> Result<bool> {
            self.inner.contains(playlist_id, resource_id).await
        }

        async fn playlists_with(&mut self, resource_id: &str) -> Result<Vec<String>> {
            self.inner.playlists_with(resource_id).await
        }

        async fn delete_resource(&mut self, resource_id: &str) -> Result<bool> {
            self.inner.delete_resource(resource_id).await
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            self.inner.rollback().await
        }
    }

    struct Fixture {
        service: OrderingService,
        playlist_id: String,
        resource_ids: Vec<String>,
    }

    async fn seed(pool: &sqlx::SqlitePool, resource_count: usize) -> (String, Vec<String>) {
        let playlists = SqlitePlaylistRepository::new(pool.clone());
        let resources = SqliteResourceRepository::new(pool.clone());

        let playlist = Playlist::new("Ordering", None, "author-1");
        playlists.insert(&playlist).await.unwrap();

        let mut resource_ids = Vec::new();
        for i in 0..resource_count {
            let resource = Resource::new(&format!("Resource {}", i), "note", "author-1");
            resources.insert(&resource).await.unwrap();
            resource_ids.push(resource.id);
        }

        (playlist.id, resource_ids)
    }

    fn repository_catalog(pool: &sqlx::SqlitePool) -> Arc<dyn CatalogLookup> {
        Arc::new(RepositoryCatalog::new(
            Arc::new(SqlitePlaylistRepository::new(pool.clone())),
            Arc::new(SqliteResourceRepository::new(pool.clone())),
        ))
    }

    async fn setup(resource_count: usize) -> Fixture {
        let pool = create_test_pool().await.unwrap();
        let (playlist_id, resource_ids) = seed(&pool, resource_count).await;
        let service = OrderingService::new(
            Arc::new(SqliteMembershipStore::new(pool.clone())),
            repository_catalog(&pool),
        );

        Fixture {
            service,
            playlist_id,
            resource_ids,
        }
    }

    async fn setup_flaky(failures: usize) -> (Fixture, Arc<AtomicUsize>) {
        let pool = create_test_pool().await.unwrap();
        let (playlist_id, resource_ids) = seed(&pool, 2).await;
        let insert_attempts = Arc::new(AtomicUsize::new(0));
        let store = FlakyStore {
            inner: SqliteMembershipStore::new(pool.clone()),
            failures_left: Arc::new(AtomicUsize::new(failures)),
            insert_attempts: insert_attempts.clone(),
        };

        let fixture = Fixture {
            service: OrderingService::new(Arc::new(store), repository_catalog(&pool)),
            playlist_id,
            resource_ids,
        };
        (fixture, insert_attempts)
    }

    async fn order(f: &Fixture) -> Vec<(String, i64)> {
        f.service
            .list_ordered(&f.playlist_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.resource_id, e.position))
            .collect()
    }

    fn ids(f: &Fixture, indexes: &[usize]) -> Vec<String> {
        indexes.iter().map(|&i| f.resource_ids[i].clone()).collect()
    }

    #[tokio::test]
    async fn test_append_assigns_consecutive_positions() {
        let f = setup(3).await;

        for (expected, resource_id) in f.resource_ids.iter().enumerate() {
            let position = f.service.append(&f.playlist_id, resource_id).await.unwrap();
            assert_eq!(position, expected as i64);
        }
    }

    #[tokio::test]
    async fn test_append_duplicate_is_conflict() {
        let f = setup(1).await;

        f.service
            .append(&f.playlist_id, &f.resource_ids[0])
            .await
            .unwrap();
        let result = f.service.append(&f.playlist_id, &f.resource_ids[0]).await;

        assert!(matches!(result, Err(LibraryError::Conflict { .. })));
        assert_eq!(order(&f).await.len(), 1);
    }

    #[tokio::test]
    async fn test_append_retries_once_after_position_conflict() {
        let (f, attempts) = setup_flaky(1).await;

        let position = f
            .service
            .append(&f.playlist_id, &f.resource_ids[0])
            .await
            .unwrap();

        assert_eq!(position, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_append_gives_up_after_second_conflict() {
        let (f, attempts) = setup_flaky(5).await;

        let result = f.service.append(&f.playlist_id, &f.resource_ids[0]).await;

        assert!(matches!(result, Err(LibraryError::Conflict { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(order(&f).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_playlist_never_touches_store() {
        let pool = create_test_pool().await.unwrap();

        let mut catalog = MockCatalog::new();
        catalog
            .expect_playlist_exists()
            .times(4)
            .returning(|_| Ok(false));
        catalog.expect_resource_exists().never();

        let service =
            OrderingService::new(Arc::new(SqliteMembershipStore::new(pool)), Arc::new(catalog));

        let missing = |r: Result<()>| matches!(r, Err(LibraryError::NotFound { .. }));
        assert!(missing(service.append("p", "r").await.map(|_| ())));
        assert!(missing(service.remove("p", "r").await));
        assert!(missing(service.set_order("p", &["r".to_string()]).await));
        assert!(missing(service.list_ordered("p").await.map(|_| ())));
    }

    #[tokio::test]
    async fn test_append_unknown_resource_is_not_found() {
        let pool = create_test_pool().await.unwrap();

        let mut catalog = MockCatalog::new();
        catalog.expect_playlist_exists().returning(|_| Ok(true));
        catalog
            .expect_resource_exists()
            .times(1)
            .returning(|_| Ok(false));

        let service =
            OrderingService::new(Arc::new(SqliteMembershipStore::new(pool)), Arc::new(catalog));

        let result = service.append("p", "ghost").await;
        assert!(matches!(
            result,
            Err(LibraryError::NotFound { ref entity_type, .. }) if entity_type == "Resource"
        ));
    }

    #[tokio::test]
    async fn test_remove_compacts_survivors() {
        let f = setup(4).await;
        for resource_id in &f.resource_ids {
            f.service.append(&f.playlist_id, resource_id).await.unwrap();
        }

        f.service
            .remove(&f.playlist_id, &f.resource_ids[1])
            .await
            .unwrap();

        assert_eq!(
            order(&f).await,
            vec![
                (f.resource_ids[0].clone(), 0),
                (f.resource_ids[2].clone(), 1),
                (f.resource_ids[3].clone(), 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_missing_entry_leaves_playlist_unchanged() {
        let f = setup(2).await;
        f.service
            .append(&f.playlist_id, &f.resource_ids[0])
            .await
            .unwrap();
        let before = order(&f).await;

        let result = f.service.remove(&f.playlist_id, &f.resource_ids[1]).await;

        assert!(matches!(result, Err(LibraryError::NotFound { .. })));
        assert_eq!(order(&f).await, before);
    }

    #[tokio::test]
    async fn test_set_order_rewrites_positions_and_keeps_added_at() {
        let f = setup(3).await;
        for resource_id in &f.resource_ids {
            f.service.append(&f.playlist_id, resource_id).await.unwrap();
        }
        let before = f.service.list_ordered(&f.playlist_id).await.unwrap();

        let new_order = ids(&f, &[2, 0, 1]);
        f.service
            .set_order(&f.playlist_id, &new_order)
            .await
            .unwrap();

        let after = f.service.list_ordered(&f.playlist_id).await.unwrap();
        let listed: Vec<String> = after.iter().map(|e| e.resource_id.clone()).collect();
        assert_eq!(listed, new_order);
        assert_eq!(
            after.iter().map(|e| e.position).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        for entry in &after {
            let original = before
                .iter()
                .find(|e| e.resource_id == entry.resource_id)
                .unwrap();
            assert_eq!(entry.added_at, original.added_at);
        }
    }

    #[tokio::test]
    async fn test_set_order_rejects_bad_lists() {
        let f = setup(3).await;
        f.service
            .append(&f.playlist_id, &f.resource_ids[0])
            .await
            .unwrap();
        f.service
            .append(&f.playlist_id, &f.resource_ids[1])
            .await
            .unwrap();
        let before = order(&f).await;

        let bad_lists = [
            vec![],
            ids(&f, &[0, 0]),
            ids(&f, &[1]),
            ids(&f, &[1, 0, 2]),
            vec![f.resource_ids[0].clone(), "unknown".to_string()],
        ];

        for list in &bad_lists {
            let result = f.service.set_order(&f.playlist_id, list).await;
            assert!(
                matches!(result, Err(LibraryError::InvalidInput { .. })),
                "expected InvalidInput for {:?}, got {:?}",
                list,
                result
            );
        }

        assert_eq!(order(&f).await, before);
    }

    #[tokio::test]
    async fn test_delete_resource_compacts_every_playlist() {
        let pool = create_test_pool().await.unwrap();
        let (first, resource_ids) = seed(&pool, 3).await;
        let (second, _) = seed(&pool, 0).await;
        let service = OrderingService::new(
            Arc::new(SqliteMembershipStore::new(pool.clone())),
            repository_catalog(&pool),
        );
        let shared = &resource_ids[1];

        for resource_id in &resource_ids {
            service.append(&first, resource_id).await.unwrap();
        }
        service.append(&second, shared).await.unwrap();
        service.append(&second, &resource_ids[0]).await.unwrap();

        assert_eq!(service.delete_resource(shared).await.unwrap(), 2);

        let positions = |entries: Vec<PlaylistEntry>| -> Vec<(String, i64)> {
            entries
                .into_iter()
                .map(|e| (e.resource_id, e.position))
                .collect()
        };
        assert_eq!(
            positions(service.list_ordered(&first).await.unwrap()),
            vec![(resource_ids[0].clone(), 0), (resource_ids[2].clone(), 1)]
        );
        assert_eq!(
            positions(service.list_ordered(&second).await.unwrap()),
            vec![(resource_ids[0].clone(), 0)]
        );

        let again = service.delete_resource(shared).await;
        assert!(matches!(
            again,
            Err(LibraryError::NotFound { ref entity_type, .. }) if entity_type == "Resource"
        ));
        let readded = service.append(&first, shared).await;
        assert!(matches!(readded, Err(LibraryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_unlisted_resource() {
        let f = setup(2).await;
        f.service
            .append(&f.playlist_id, &f.resource_ids[0])
            .await
            .unwrap();

        assert_eq!(f.service.delete_resource(&f.resource_ids[1]).await.unwrap(), 0);
        assert_eq!(order(&f).await, vec![(f.resource_ids[0].clone(), 0)]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_distinct_positions() {
        let f = setup(2).await;

        let (a, b) = tokio::join!(
            f.service.append(&f.playlist_id, &f.resource_ids[0]),
            f.service.append(&f.playlist_id, &f.resource_ids[1]),
        );

        let mut positions = vec![a.unwrap(), b.unwrap()];
        positions.sort();
        assert_eq!(positions, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_playlist_locks_serialize_same_playlist_only() {
        let locks = PlaylistLocks::new();

        let held = locks.acquire("a").await;
        let blocked = tokio::time::timeout(Duration::from_millis(20), locks.acquire("a")).await;
        assert!(blocked.is_err(), "second guard for the same playlist must wait");

        let other = tokio::time::timeout(Duration::from_millis(20), locks.acquire("b")).await;
        assert!(other.is_ok(), "other playlists must not contend");

        drop(held);
        let reacquired = tokio::time::timeout(Duration::from_millis(20), locks.acquire("a")).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_playlist_locks_drop_dead_entries() {
        let locks = PlaylistLocks::new();

        for i in 0..=LOCK_CLEANUP_THRESHOLD + LOCK_CLEANUP_INTERVAL {
            let _guard = locks.acquire(&format!("playlist-{}", i)).await;
        }

        assert!(locks.tracked() < LOCK_CLEANUP_THRESHOLD);
    }
}
