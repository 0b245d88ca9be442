//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the catalog core:
//! - Logging and tracing infrastructure
//! - Configuration management
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the library and service
//! crates depend on. It establishes the configuration surface and the logging
//! conventions used throughout the system.

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
