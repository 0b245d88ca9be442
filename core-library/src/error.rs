use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Conflict on {entity_type} {id}: {message}")]
    Conflict {
        entity_type: String,
        id: String,
        message: String,
    },

    /// Two entries of the same playlist would share a position.
    #[error("Position conflict in playlist {playlist_id}")]
    PositionConflict { playlist_id: String },

    /// The database stayed locked by another writer past the busy timeout.
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl LibraryError {
    /// Whether the failed operation may succeed if simply run again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PositionConflict { .. } | Self::Busy(_))
    }

    pub(crate) fn not_found(entity_type: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_string(),
            id: id.into(),
        }
    }

    pub(crate) fn invalid_input(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
