use core_library::LibraryError;
use thiserror::Error;

/// Errors surfaced to hosts of the catalog core.
///
/// Storage failures are reduced to a message; raw database errors never
/// cross this boundary.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(entity_type: &str, id: &str) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<LibraryError> for CoreError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::NotFound { entity_type, id } => Self::NotFound { entity_type, id },
            LibraryError::InvalidInput { field, message } => Self::Validation { field, message },
            LibraryError::Conflict {
                entity_type,
                id,
                message,
            } => Self::Conflict(format!("{} {}: {}", entity_type, id, message)),
            LibraryError::PositionConflict { playlist_id } => Self::Conflict(format!(
                "Playlist {}: positions changed concurrently",
                playlist_id
            )),
            LibraryError::Busy(message) => Self::Conflict(format!("database busy: {}", message)),
            LibraryError::Database(e) => Self::Storage(e.to_string()),
            LibraryError::Migration(message) => Self::Storage(message),
        }
    }
}

impl From<core_runtime::Error> for CoreError {
    fn from(err: core_runtime::Error) -> Self {
        match err {
            core_runtime::Error::Config(message) => Self::Config(message),
            core_runtime::Error::Internal(message) => Self::Storage(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
