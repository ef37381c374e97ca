//! Storage abstractions for snapshot persistence.
//!
//! The poll loop is the only writer. A store must never expose a torn
//! file to readers, and loading must never fail: missing or unreadable
//! state is reported and treated as a cold start.
//!
//! ## Layout
//!
//! ```text
//! data/
//! └── previous_listings.json   # Last persisted snapshot
//! ```

pub mod local;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Snapshot;

// Re-export for convenience
pub use local::LocalSnapshotStore;

/// Trait for snapshot storage backends.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the last persisted snapshot, or an empty cold snapshot when
    /// there is none or it cannot be read.
    async fn load(&self) -> Snapshot;

    /// Atomically replace the persisted snapshot.
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}
