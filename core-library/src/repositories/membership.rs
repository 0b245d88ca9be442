//! Ordering store for playlist entries
//!
//! Persists which resources a playlist holds and at which position. The
//! `(playlist_id, position)` pair is guarded by a unique index, so no two
//! entries of a playlist can ever share a position once a transaction
//! commits.
//!
//! ## Constraint modes
//!
//! SQLite checks unique indexes per row and cannot defer them to commit.
//! [`ConstraintMode::Deferred`] emulates deferral with a staging arena:
//! positions written inside a deferred transaction are stored as
//! `-(position + 1)`, a range that cannot collide with committed positions.
//! Reads inside the transaction translate staged values back, and
//! [`MembershipTransaction::commit`] moves the arena into place with one
//! statement per touched playlist right before the real commit. A collision
//! found at that point aborts the whole transaction, which is exactly what a
//! commit-time unique check would do.

use crate::error::{LibraryError, Result};
use crate::models::PlaylistEntry;
use async_trait::async_trait;
use sqlx::error::DatabaseError;
use sqlx::{query, query_as, query_scalar, Sqlite, SqlitePool, Transaction};
use std::collections::BTreeSet;
use tracing::debug;

/// Entry columns with staged positions mapped back to their final value.
/// `ORDER BY position` on this projection sorts by the translated alias.
const ENTRY_COLUMNS: &str = "playlist_id, resource_id, \
     CASE WHEN position < 0 THEN -position - 1 ELSE position END AS position, \
     added_at";

/// SQLite primary result codes for lock contention
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// When the `(playlist_id, position)` uniqueness check runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintMode {
    /// Checked by every statement
    Immediate,
    /// Checked once, against the final state, when the transaction commits
    Deferred,
}

/// Transactional access to playlist entries
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Open a transaction with the given constraint mode
    async fn begin(&self, mode: ConstraintMode) -> Result<Box<dyn MembershipTransaction>>;

    /// Committed entries of a playlist, ordered by position
    async fn list(&self, playlist_id: &str) -> Result<Vec<PlaylistEntry>>;

    /// IDs of every playlist that holds the resource
    async fn playlists_containing(&self, resource_id: &str) -> Result<Vec<String>>;
}

/// One open transaction against the ordering store.
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it
/// back.
#[async_trait]
pub trait MembershipTransaction: Send {
    fn mode(&self) -> ConstraintMode;

    /// Insert a new entry
    ///
    /// # Errors
    /// - `PositionConflict` if the position is taken (immediate mode)
    /// - `Conflict` if the resource is already in the playlist
    async fn insert(&mut self, entry: &PlaylistEntry) -> Result<()>;

    /// Delete one entry; returns whether it existed
    async fn delete(&mut self, playlist_id: &str, resource_id: &str) -> Result<bool>;

    /// Delete every entry of a playlist; returns how many were removed
    async fn delete_all(&mut self, playlist_id: &str) -> Result<u64>;

    /// Move an existing entry to a new position
    async fn update_position(
        &mut self,
        playlist_id: &str,
        resource_id: &str,
        position: i64,
    ) -> Result<()>;

    /// Entries of a playlist as seen by this transaction, ordered by position
    async fn select_all(&mut self, playlist_id: &str) -> Result<Vec<PlaylistEntry>>;

    /// Highest position in the playlist, `None` when it is empty
    async fn max_position(&mut self, playlist_id: &str) -> Result<Option<i64>>;

    /// Whether the resource is already in the playlist
    async fn contains(&mut self, playlist_id: &str, resource_id: &str) -> Result<bool>;

    /// IDs of every playlist holding the resource, as seen by this transaction
    async fn playlists_with(&mut self, resource_id: &str) -> Result<Vec<String>>;

    /// Delete the resource row itself; returns whether it existed.
    ///
    /// Entries still pointing at it cascade away without compaction, so
    /// remove those through [`delete`](Self::delete) first.
    async fn delete_resource(&mut self, resource_id: &str) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// SQLite implementation of MembershipStore
pub struct SqliteMembershipStore {
    pool: SqlitePool,
}

impl SqliteMembershipStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipStore for SqliteMembershipStore {
    async fn begin(&self, mode: ConstraintMode) -> Result<Box<dyn MembershipTransaction>> {
        let tx = self.pool.begin().await.map_err(classify_write_error)?;
        debug!(?mode, "Began membership transaction");

        Ok(Box::new(SqliteMembershipTransaction {
            tx,
            mode,
            staged: BTreeSet::new(),
        }))
    }

    async fn list(&self, playlist_id: &str) -> Result<Vec<PlaylistEntry>> {
        let entries = query_as::<_, PlaylistEntry>(&format!(
            "SELECT {} FROM playlist_resources WHERE playlist_id = ? ORDER BY position ASC",
            ENTRY_COLUMNS
        ))
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn playlists_containing(&self, resource_id: &str) -> Result<Vec<String>> {
        let ids = query_scalar::<_, String>(
            "SELECT playlist_id FROM playlist_resources WHERE resource_id = ? ORDER BY playlist_id",
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}

/// SQLite membership transaction
struct SqliteMembershipTransaction {
    tx: Transaction<'static, Sqlite>,
    mode: ConstraintMode,
    /// Playlists with entries parked in the staging arena
    staged: BTreeSet<String>,
}

impl SqliteMembershipTransaction {
    /// Value actually written for `position` under the current mode
    fn stored_position(&mut self, playlist_id: &str, position: i64) -> i64 {
        match self.mode {
            ConstraintMode::Immediate => position,
            ConstraintMode::Deferred => {
                self.staged.insert(playlist_id.to_string());
                -position - 1
            }
        }
    }

    /// Move staged entries to their final positions
    async fn settle_staged(&mut self) -> Result<()> {
        for playlist_id in &self.staged {
            let result = query(
                "UPDATE playlist_resources SET position = -position - 1 \
                 WHERE playlist_id = ? AND position < 0",
            )
            .bind(playlist_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify_entry_error(e, playlist_id, None))?;

            debug!(
                playlist_id = %playlist_id,
                settled = result.rows_affected(),
                "Settled staged positions"
            );
        }

        Ok(())
    }
}

#[async_trait]
impl MembershipTransaction for SqliteMembershipTransaction {
    fn mode(&self) -> ConstraintMode {
        self.mode
    }

    async fn insert(&mut self, entry: &PlaylistEntry) -> Result<()> {
        entry
            .validate()
            .map_err(|e| LibraryError::invalid_input("position", e))?;

        let stored = self.stored_position(&entry.playlist_id, entry.position);

        query(
            r#"
            INSERT INTO playlist_resources (playlist_id, resource_id, position, added_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&entry.playlist_id)
        .bind(&entry.resource_id)
        .bind(stored)
        .bind(entry.added_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| classify_entry_error(e, &entry.playlist_id, Some(&entry.resource_id)))?;

        debug!(
            playlist_id = %entry.playlist_id,
            resource_id = %entry.resource_id,
            position = entry.position,
            "Inserted playlist entry"
        );
        Ok(())
    }

    async fn delete(&mut self, playlist_id: &str, resource_id: &str) -> Result<bool> {
        let result =
            query("DELETE FROM playlist_resources WHERE playlist_id = ? AND resource_id = ?")
                .bind(playlist_id)
                .bind(resource_id)
                .execute(&mut *self.tx)
                .await
                .map_err(classify_write_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&mut self, playlist_id: &str) -> Result<u64> {
        let result = query("DELETE FROM playlist_resources WHERE playlist_id = ?")
            .bind(playlist_id)
            .execute(&mut *self.tx)
            .await
            .map_err(classify_write_error)?;

        debug!(
            playlist_id = %playlist_id,
            deleted = result.rows_affected(),
            "Cleared playlist entries"
        );
        Ok(result.rows_affected())
    }

    async fn update_position(
        &mut self,
        playlist_id: &str,
        resource_id: &str,
        position: i64,
    ) -> Result<()> {
        if position < 0 {
            return Err(LibraryError::invalid_input(
                "position",
                format!("Entry position must be non-negative, got {}", position),
            ));
        }

        let stored = self.stored_position(playlist_id, position);

        let result = query(
            "UPDATE playlist_resources SET position = ? WHERE playlist_id = ? AND resource_id = ?",
        )
        .bind(stored)
        .bind(playlist_id)
        .bind(resource_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| classify_entry_error(e, playlist_id, Some(resource_id)))?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::not_found(
                "PlaylistEntry",
                format!("{}/{}", playlist_id, resource_id),
            ));
        }

        Ok(())
    }

    async fn select_all(&mut self, playlist_id: &str) -> Result<Vec<PlaylistEntry>> {
        let entries = query_as::<_, PlaylistEntry>(&format!(
            "SELECT {} FROM playlist_resources WHERE playlist_id = ? ORDER BY position ASC",
            ENTRY_COLUMNS
        ))
        .bind(playlist_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(classify_write_error)?;

        Ok(entries)
    }

    async fn max_position(&mut self, playlist_id: &str) -> Result<Option<i64>> {
        let max: Option<i64> = query_scalar(
            "SELECT MAX(CASE WHEN position < 0 THEN -position - 1 ELSE position END) \
             FROM playlist_resources WHERE playlist_id = ?",
        )
        .bind(playlist_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify_write_error)?;

        Ok(max)
    }

    async fn contains(&mut self, playlist_id: &str, resource_id: &str) -> Result<bool> {
        let exists: bool = query_scalar(
            "SELECT EXISTS(SELECT 1 FROM playlist_resources WHERE playlist_id = ? AND resource_id = ?)",
        )
        .bind(playlist_id)
        .bind(resource_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify_write_error)?;

        Ok(exists)
    }

    async fn playlists_with(&mut self, resource_id: &str) -> Result<Vec<String>> {
        let ids = query_scalar::<_, String>(
            "SELECT playlist_id FROM playlist_resources WHERE resource_id = ? ORDER BY playlist_id",
        )
        .bind(resource_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(classify_write_error)?;

        Ok(ids)
    }

    async fn delete_resource(&mut self, resource_id: &str) -> Result<bool> {
        let result = query("DELETE FROM resources WHERE id = ?")
            .bind(resource_id)
            .execute(&mut *self.tx)
            .await
            .map_err(classify_write_error)?;

        debug!(resource_id = %resource_id, "Deleted resource row");
        Ok(result.rows_affected() > 0)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        // On error `self.tx` is dropped here, which rolls the transaction back.
        self.settle_staged().await?;

        let this = *self;
        this.tx.commit().await.map_err(classify_write_error)?;

        debug!(mode = ?this.mode, "Committed membership transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;

        debug!("Rolled back membership transaction");
        Ok(())
    }
}

/// Translate errors from statements that write playlist entries
fn classify_entry_error(
    err: sqlx::Error,
    playlist_id: &str,
    resource_id: Option<&str>,
) -> LibraryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            // SQLite names the offending columns, e.g.
            // "UNIQUE constraint failed: playlist_resources.playlist_id, playlist_resources.position"
            if db_err.message().contains(".position") {
                return LibraryError::PositionConflict {
                    playlist_id: playlist_id.to_string(),
                };
            }

            return LibraryError::Conflict {
                entity_type: "PlaylistEntry".to_string(),
                id: format!("{}/{}", playlist_id, resource_id.unwrap_or("*")),
                message: "resource is already in this playlist".to_string(),
            };
        }

        if db_err.is_foreign_key_violation() {
            return LibraryError::NotFound {
                entity_type: "Playlist or Resource".to_string(),
                id: format!("{}/{}", playlist_id, resource_id.unwrap_or("*")),
            };
        }
    }

    classify_write_error(err)
}

/// Map lock contention to [`LibraryError::Busy`]; everything else stays a
/// database error
fn classify_write_error(err: sqlx::Error) -> LibraryError {
    if let sqlx::Error::Database(db_err) = &err {
        if is_lock_contention(&**db_err) {
            return LibraryError::Busy(db_err.message().to_string());
        }
    }

    LibraryError::Database(err)
}

fn is_lock_contention(db_err: &dyn DatabaseError) -> bool {
    // Extended result codes carry the primary code in the low byte
    // (SQLITE_BUSY_SNAPSHOT = 517 -> SQLITE_BUSY).
    db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}
