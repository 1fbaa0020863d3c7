//! Memoria — media archive consolidator.
//!
//! Ingests raw export archives from chat and photo platforms, reconciles
//! media against per-source metadata, deduplicates by content hash, and
//! writes a normalized archival library with metadata embedded directly
//! into each file.

pub mod banned_paths;
pub mod config;
pub mod error;
pub mod failure_tracker;
pub mod file_type;
pub mod hasher;
pub mod logging;
pub mod matching;
pub mod metadata_embed;
pub mod models;
pub mod overlay;
pub mod processors;
pub mod registry;
pub mod subprocess;
pub mod video_encoder;

pub use config::RunConfig;
pub use error::{AppError, AppResult};
pub use registry::Registry;

/// Builds a registry with every built-in processor registered.
pub fn default_registry() -> Registry {
    let mut registry = Registry::new();
    processors::register_all(&mut registry);
    registry
}
