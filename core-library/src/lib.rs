//! # Catalog Library
//!
//! Owns the catalog database: playlists, the resources they point at, and
//! the ordered entries linking the two.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite schema, migrations and pool setup
//! - Repositories for playlists and resources
//! - The ordering store, with a per-transaction constraint mode
//! - The ordering service that keeps playlist positions dense

pub mod db;
pub mod error;
pub mod models;
pub mod ordering;
pub mod repositories;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use ordering::{CatalogLookup, OrderingService, PlaylistLocks, RepositoryCatalog};
