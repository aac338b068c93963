//! A3S Image Modification Core - Foundational Types
//!
//! This module provides the error taxonomy and engine configuration
//! shared across the A3S image modification crates.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::ModConfig;
pub use error::{ModError, Result};

/// A3S image modification version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
