//! Domain models for the catalog
//!
//! This module contains domain models with validation and database mapping.
//! Playlists and resources are owned by their repositories; the ordered
//! membership between them ([`PlaylistEntry`]) is owned by the ordering store.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Maximum playlist/resource title length, in characters
pub const MAX_TITLE_LEN: usize = 255;

/// Maximum description length, in characters
pub const MAX_DESCRIPTION_LEN: usize = 1000;

// =============================================================================
// Domain Models
// =============================================================================

/// Curated, ordered collection of resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Playlist {
    /// Unique identifier
    pub id: String,
    /// Playlist title, trimmed
    pub title: String,
    /// Optional description, trimmed; never blank
    pub description: Option<String>,
    /// User who created the playlist
    pub author_id: String,
    /// Timestamps
    pub created_at: i64,
    pub updated_at: i64,
}

impl Playlist {
    /// Create a new playlist, normalizing title and description
    pub fn new(title: &str, description: Option<&str>, author_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.trim().to_string(),
            description: normalize_description(description),
            author_id: author_id.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate playlist data
    pub fn validate(&self) -> Result<(), String> {
        validate_title("Playlist", &self.title)?;

        if let Some(description) = &self.description {
            validate_description("Playlist", description)?;
        }

        if self.author_id.trim().is_empty() {
            return Err("Playlist author cannot be empty".to_string());
        }

        Ok(())
    }
}

/// Playlist row enriched with the number of resources it holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PlaylistSummary {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub author_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    /// Number of entries in the playlist
    pub resource_count: i64,
}

/// Catalog item a playlist can reference.
///
/// Playlists treat resources as opaque references; `kind` is carried for the
/// surrounding catalog and never inspected by the ordering code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Resource {
    /// Unique identifier
    pub id: String,
    /// Resource title, trimmed
    pub title: String,
    /// Optional description
    pub description: Option<String>,
    /// Content structure (e.g. "note", "upload", "url")
    pub kind: String,
    /// User who created the resource
    pub author_id: String,
    pub created_at: i64,
}

impl Resource {
    /// Create a new resource
    pub fn new(title: &str, kind: impl Into<String>, author_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.trim().to_string(),
            description: None,
            kind: kind.into(),
            author_id: author_id.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Validate resource data
    pub fn validate(&self) -> Result<(), String> {
        validate_title("Resource", &self.title)?;

        if let Some(description) = &self.description {
            validate_description("Resource", description)?;
        }

        if self.kind.trim().is_empty() {
            return Err("Resource kind cannot be empty".to_string());
        }

        Ok(())
    }
}

/// Membership of a resource in a playlist at a given position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PlaylistEntry {
    pub playlist_id: String,
    pub resource_id: String,
    /// Zero-based rank inside the playlist
    pub position: i64,
    /// When the resource was first added to the playlist
    pub added_at: i64,
}

impl PlaylistEntry {
    pub fn new(
        playlist_id: impl Into<String>,
        resource_id: impl Into<String>,
        position: i64,
    ) -> Self {
        Self {
            playlist_id: playlist_id.into(),
            resource_id: resource_id.into(),
            position,
            added_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Validate entry data
    pub fn validate(&self) -> Result<(), String> {
        if self.position < 0 {
            return Err(format!(
                "Entry position must be non-negative, got {}",
                self.position
            ));
        }

        Ok(())
    }
}

/// Trim a description, mapping blank input to `None`
pub fn normalize_description(description: Option<&str>) -> Option<String> {
    description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

fn validate_title(entity: &str, title: &str) -> Result<(), String> {
    if title.trim().is_empty() {
        return Err(format!("{} title cannot be empty", entity));
    }

    if title.chars().count() > MAX_TITLE_LEN {
        return Err(format!(
            "{} title exceeds {} characters",
            entity, MAX_TITLE_LEN
        ));
    }

    Ok(())
}

fn validate_description(entity: &str, description: &str) -> Result<(), String> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(format!(
            "{} description exceeds {} characters",
            entity, MAX_DESCRIPTION_LEN
        ));
    }

    Ok(())
}
