//! Shared types, error model, and configuration for geonote.
//!
//! This crate is the foundation depended on by all other geonote crates.
//! It provides:
//! - [`GeonoteError`]: the unified error type
//! - Domain types ([`Document`], [`LocationRecord`], [`DocumentCreated`], [`RunId`])
//! - Configuration ([`AppConfig`], [`ResolverConfig`], [`WatchConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ResolverConfig, ResolverSection, VaultEntry, WatchConfig, WatchSection, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from, validate_config,
};
pub use error::{GeonoteError, Result};
pub use types::{Document, DocumentCreated, LocationRecord, RunId};
