//! Playlist repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{Playlist, PlaylistSummary};
use crate::repositories::{Page, PageRequest};
use async_trait::async_trait;
use sqlx::{query, query_as, query_scalar, SqlitePool};

/// Playlist repository interface for data access operations
#[async_trait]
pub trait PlaylistRepository: Send + Sync {
    /// Find a playlist by its ID
    ///
    /// # Returns
    /// - `Ok(Some(playlist))` if found
    /// - `Ok(None)` if not found
    async fn find_by_id(&self, id: &str) -> Result<Option<Playlist>>;

    /// Check whether a playlist exists
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Insert a new playlist
    ///
    /// # Errors
    /// Returns error if validation fails or the ID is already taken
    async fn insert(&self, playlist: &Playlist) -> Result<()>;

    /// Update title, description and `updated_at` of an existing playlist
    ///
    /// # Errors
    /// Returns `NotFound` if the playlist does not exist
    async fn update(&self, playlist: &Playlist) -> Result<()>;

    /// Delete a playlist by ID; its entries cascade
    ///
    /// # Returns
    /// - `Ok(true)` if playlist was deleted
    /// - `Ok(false)` if playlist was not found
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Query playlists newest first, optionally restricted to one author
    ///
    /// Each summary carries the number of resources in the playlist.
    async fn query(
        &self,
        author_id: Option<&str>,
        page_request: PageRequest,
    ) -> Result<Page<PlaylistSummary>>;

    /// Count playlists, optionally restricted to one author
    async fn count(&self, author_id: Option<&str>) -> Result<i64>;
}

/// SQLite implementation of PlaylistRepository
pub struct SqlitePlaylistRepository {
    pool: SqlitePool,
}

impl SqlitePlaylistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn validated(playlist: &Playlist) -> Result<()> {
    playlist
        .validate()
        .map_err(|e| LibraryError::InvalidInput {
            field: "Playlist".to_string(),
            message: e,
        })
}

#[async_trait]
impl PlaylistRepository for SqlitePlaylistRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Playlist>> {
        let playlist = query_as::<_, Playlist>("SELECT * FROM playlists WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(playlist)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let exists: bool = query_scalar("SELECT EXISTS(SELECT 1 FROM playlists WHERE id = ?)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(exists)
    }

    async fn insert(&self, playlist: &Playlist) -> Result<()> {
        validated(playlist)?;

        query(
            r#"
            INSERT INTO playlists (id, title, description, author_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&playlist.id)
        .bind(&playlist.title)
        .bind(&playlist.description)
        .bind(&playlist.author_id)
        .bind(playlist.created_at)
        .bind(playlist.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, playlist: &Playlist) -> Result<()> {
        validated(playlist)?;

        let result = query(
            r#"
            UPDATE playlists
            SET title = ?, description = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&playlist.title)
        .bind(&playlist.description)
        .bind(playlist.updated_at)
        .bind(&playlist.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::not_found("Playlist", playlist.id.clone()));
        }

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = query("DELETE FROM playlists WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn query(
        &self,
        author_id: Option<&str>,
        page_request: PageRequest,
    ) -> Result<Page<PlaylistSummary>> {
        let total = self.count(author_id).await?;

        // `? IS NULL` lets one statement serve both the filtered and
        // unfiltered listing.
        let playlists = query_as::<_, PlaylistSummary>(
            r#"
            SELECT p.id, p.title, p.description, p.author_id, p.created_at, p.updated_at,
                   (SELECT COUNT(*) FROM playlist_resources pr WHERE pr.playlist_id = p.id)
                       AS resource_count
            FROM playlists p
            WHERE (? IS NULL OR p.author_id = ?)
            ORDER BY p.created_at DESC, p.rowid DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(author_id)
        .bind(author_id)
        .bind(page_request.limit())
        .bind(page_request.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::new(playlists, total as u64, page_request))
    }

    async fn count(&self, author_id: Option<&str>) -> Result<i64> {
        let count: i64 =
            query_scalar("SELECT COUNT(*) FROM playlists WHERE (? IS NULL OR author_id = ?)")
                .bind(author_id)
                .bind(author_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }
}
