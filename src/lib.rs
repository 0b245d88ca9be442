//! Workspace placeholder crate.
//!
//! Re-exports the catalog service façade so host applications can depend on
//! `catalog-workspace` alone. The `service` feature (on by default) maps to the
//! `core-service` crate.

#[cfg(feature = "service")]
pub use core_service::*;
