//! Core service façade and bootstrap helpers.
//!
//! This crate wires the catalog database, the playlist and resource
//! repositories and the ordering service into one handle for host
//! applications. Inputs are trimmed and validated here; every change to a
//! playlist's contents goes through [`OrderingService`], so positions stay
//! dense no matter which entry point triggered the change.
//!
//! Hosts initialize logging themselves with
//! [`core_runtime::logging::init_logging`] before calling [`CoreService::bootstrap`].

pub mod error;

pub use error::{CoreError, Result};

use std::collections::HashMap;
use std::sync::Arc;

use core_library::db::{create_pool, DatabaseConfig};
use core_library::models::{
    normalize_description, Playlist, PlaylistEntry, PlaylistSummary, Resource,
    MAX_DESCRIPTION_LEN, MAX_TITLE_LEN,
};
use core_library::repositories::{
    Page, PageRequest, PlaylistRepository, ResourceRepository, SqliteMembershipStore,
    SqlitePlaylistRepository, SqliteResourceRepository,
};
use core_library::{OrderingService, RepositoryCatalog};
use core_runtime::config::{CoreConfig, DatabaseLocation, OrderingSettings};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info, instrument};

/// Fields for a new playlist
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPlaylist {
    pub title: String,
    pub description: Option<String>,
    pub author_id: String,
}

/// Partial playlist update; at least one field must be set.
///
/// A blank description clears the current one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Fields for a new resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewResource {
    pub title: String,
    pub description: Option<String>,
    pub kind: String,
    pub author_id: String,
}

/// One resource of a playlist, at its position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub position: i64,
    pub added_at: i64,
    pub resource: Resource,
}

/// Playlist with its resources in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistDetails {
    pub playlist: Playlist,
    pub items: Vec<PlaylistItem>,
}

struct CoreInner {
    pool: SqlitePool,
    playlists: Arc<dyn PlaylistRepository>,
    resources: Arc<dyn ResourceRepository>,
    ordering: OrderingService,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    inner: Arc<CoreInner>,
}

impl CoreService {
    /// Open (or create) the catalog database described by `config` and wire
    /// the services on top of it.
    ///
    /// ```no_run
    /// # async fn example() -> core_service::Result<()> {
    /// use core_runtime::config::CoreConfig;
    /// use core_service::CoreService;
    ///
    /// let config = CoreConfig::builder().database_path("catalog.db").build()?;
    /// let core = CoreService::bootstrap(&config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bootstrap(config: &CoreConfig) -> Result<Self> {
        config.validate()?;

        let settings = &config.database;
        let database = match &settings.location {
            DatabaseLocation::File(path) => DatabaseConfig::new(path),
            DatabaseLocation::InMemory => DatabaseConfig::in_memory(),
        }
        .min_connections(settings.min_connections)
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout())
        .busy_timeout(settings.busy_timeout());

        let pool = create_pool(database).await?;

        info!(
            serialize_mutations = config.ordering.serialize_mutations,
            "Catalog core initialized"
        );
        Ok(Self::from_pool(pool, config.ordering))
    }

    /// Build the service on an already migrated pool.
    pub fn from_pool(pool: SqlitePool, ordering: OrderingSettings) -> Self {
        let playlists: Arc<dyn PlaylistRepository> =
            Arc::new(SqlitePlaylistRepository::new(pool.clone()));
        let resources: Arc<dyn ResourceRepository> =
            Arc::new(SqliteResourceRepository::new(pool.clone()));

        let ordering = OrderingService::new(
            Arc::new(SqliteMembershipStore::new(pool.clone())),
            Arc::new(RepositoryCatalog::new(playlists.clone(), resources.clone())),
        )
        .serialize_mutations(ordering.serialize_mutations);

        Self {
            inner: Arc::new(CoreInner {
                pool,
                playlists,
                resources,
                ordering,
            }),
        }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    // ---------------------------------------------------------------------
    // Playlists
    // ---------------------------------------------------------------------

    #[instrument(skip(self, request), fields(author_id = %request.author_id))]
    pub async fn create_playlist(&self, request: NewPlaylist) -> Result<Playlist> {
        let title = validated_title(&request.title)?;
        let description = validated_description(request.description.as_deref())?;
        if request.author_id.trim().is_empty() {
            return Err(CoreError::validation("author_id", "author is required"));
        }

        let mut playlist = Playlist::new(title, None, request.author_id);
        playlist.description = description;
        self.inner.playlists.insert(&playlist).await?;

        info!(playlist_id = %playlist.id, "Created playlist");
        Ok(playlist)
    }

    /// Playlist with its resources in position order.
    pub async fn get_playlist(&self, playlist_id: &str) -> Result<PlaylistDetails> {
        let playlist = self
            .inner
            .playlists
            .find_by_id(playlist_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Playlist", playlist_id))?;

        let entries = self.inner.ordering.list_ordered(playlist_id).await?;
        let ids: Vec<String> = entries.iter().map(|e| e.resource_id.clone()).collect();
        let mut resources: HashMap<String, Resource> = self
            .inner
            .resources
            .find_many(&ids)
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            match resources.remove(&entry.resource_id) {
                Some(resource) => items.push(PlaylistItem {
                    position: entry.position,
                    added_at: entry.added_at,
                    resource,
                }),
                // Deleted between the two reads; the entry went with it.
                None => debug!(resource_id = %entry.resource_id, "Skipping vanished resource"),
            }
        }

        Ok(PlaylistDetails { playlist, items })
    }

    /// Playlists newest first, optionally only those of one author.
    pub async fn list_playlists(
        &self,
        author_id: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<PlaylistSummary>> {
        Ok(self.inner.playlists.query(author_id, page).await?)
    }

    #[instrument(skip(self, update), fields(playlist_id = %playlist_id))]
    pub async fn update_playlist(
        &self,
        playlist_id: &str,
        update: PlaylistUpdate,
    ) -> Result<Playlist> {
        if update.title.is_none() && update.description.is_none() {
            return Err(CoreError::validation(
                "update",
                "at least one of title or description must be provided",
            ));
        }

        let mut playlist = self
            .inner
            .playlists
            .find_by_id(playlist_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Playlist", playlist_id))?;

        if let Some(title) = update.title.as_deref() {
            playlist.title = validated_title(title)?.to_string();
        }
        if update.description.is_some() {
            playlist.description = validated_description(update.description.as_deref())?;
        }
        playlist.updated_at = chrono::Utc::now().timestamp().max(playlist.updated_at);

        self.inner.playlists.update(&playlist).await?;

        info!("Updated playlist");
        Ok(playlist)
    }

    /// Delete a playlist; its entries go with it.
    #[instrument(skip(self))]
    pub async fn delete_playlist(&self, playlist_id: &str) -> Result<()> {
        if !self.inner.playlists.delete(playlist_id).await? {
            return Err(CoreError::not_found("Playlist", playlist_id));
        }

        info!("Deleted playlist");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Resources
    // ---------------------------------------------------------------------

    #[instrument(skip(self, request), fields(author_id = %request.author_id, kind = %request.kind))]
    pub async fn create_resource(&self, request: NewResource) -> Result<Resource> {
        let title = validated_title(&request.title)?;
        let description = validated_description(request.description.as_deref())?;
        if request.kind.trim().is_empty() {
            return Err(CoreError::validation("kind", "resource kind is required"));
        }

        let mut resource = Resource::new(title, request.kind.trim(), request.author_id);
        resource.description = description;
        self.inner.resources.insert(&resource).await?;

        info!(resource_id = %resource.id, "Created resource");
        Ok(resource)
    }

    pub async fn get_resource(&self, resource_id: &str) -> Result<Resource> {
        self.inner
            .resources
            .find_by_id(resource_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Resource", resource_id))
    }

    /// Delete a resource after taking it out of every playlist, so each of
    /// those playlists is compacted rather than left with a gap.
    ///
    /// Runs as one write transaction; an append racing the delete either
    /// lands before it and is compacted away, or fails with `NotFound`.
    #[instrument(skip(self))]
    pub async fn delete_resource(&self, resource_id: &str) -> Result<()> {
        let playlists = self.inner.ordering.delete_resource(resource_id).await?;

        debug!(playlists, "Resource removed from playlists");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Ordering
    // ---------------------------------------------------------------------

    /// Append a resource to a playlist; returns its zero-based position.
    pub async fn add_resource(&self, playlist_id: &str, resource_id: &str) -> Result<i64> {
        Ok(self.inner.ordering.append(playlist_id, resource_id).await?)
    }

    pub async fn remove_resource(&self, playlist_id: &str, resource_id: &str) -> Result<()> {
        Ok(self.inner.ordering.remove(playlist_id, resource_id).await?)
    }

    /// Replace the order of a playlist. `resource_ids` must list every
    /// resource of the playlist exactly once.
    pub async fn reorder_resources(&self, playlist_id: &str, resource_ids: &[String]) -> Result<()> {
        Ok(self.inner.ordering.set_order(playlist_id, resource_ids).await?)
    }

    /// Raw `(resource, position)` entries of a playlist, in order.
    pub async fn playlist_entries(&self, playlist_id: &str) -> Result<Vec<PlaylistEntry>> {
        Ok(self.inner.ordering.list_ordered(playlist_id).await?)
    }
}

fn validated_title(title: &str) -> Result<&str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(CoreError::validation("title", "title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(CoreError::validation(
            "title",
            format!("title must be at most {} characters", MAX_TITLE_LEN),
        ));
    }
    Ok(title)
}

fn validated_description(description: Option<&str>) -> Result<Option<String>> {
    let description = normalize_description(description);
    if let Some(text) = &description {
        if text.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(CoreError::validation(
                "description",
                format!("description must be at most {} characters", MAX_DESCRIPTION_LEN),
            ));
        }
    }
    Ok(description)
}
