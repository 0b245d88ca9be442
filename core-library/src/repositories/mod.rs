//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations.
//!
//! ## Architecture
//!
//! - Traits define the interface for each repository
//! - SQLite implementations use sqlx for async database access
//! - All operations return `Result<T>` for error handling
//! - Listings are paginated via the `Page<T>` wrapper
//!
//! ## Available Repositories
//!
//! - `PlaylistRepository` - Playlists with per-author listing
//! - `ResourceRepository` - The items playlists refer to
//! - `MembershipStore` - Ordered playlist entries, transactional

pub mod membership;
pub mod pagination;
pub mod playlist;
pub mod resource;

pub use membership::{
    ConstraintMode, MembershipStore, MembershipTransaction, SqliteMembershipStore,
};
pub use pagination::{Page, PageRequest, MAX_PAGE_SIZE};
pub use playlist::{PlaylistRepository, SqlitePlaylistRepository};
pub use resource::{ResourceRepository, SqliteResourceRepository};
