// src/models/mod.rs

//! Domain models for the listing watcher.

mod config;
mod listing;
mod snapshot;

// Re-export all public types
pub use config::{
    Config, MonitorConfig, NotifierConfig, RetryConfig, STATE_FILE_ENV, ScraperConfig,
    SelectorConfig, StorageConfig, WEBHOOK_URL_ENV,
};
pub use listing::{Identity, Listing, Price};
pub use snapshot::{Snapshot, SnapshotEntry};
