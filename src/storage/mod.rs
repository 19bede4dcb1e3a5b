//! Storage abstractions for watermark persistence.
//!
//! The state document is read once at the start of a scan and written once
//! at the end. Nothing else is persisted.
//!
//! ## Layout
//!
//! ```text
//! {state_file}          # Watermarks for every tracked entity
//! {state_file}.tmp      # Transient, renamed over the state file on save
//! ```

pub mod local;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::PersistedState;

// Re-export for convenience
pub use local::LocalStateStore;

/// Trait for watermark storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the previous state.
    ///
    /// A missing, unreadable, or corrupt record yields an empty state; it is
    /// never an error.
    async fn load(&self) -> PersistedState;

    /// Replace the persisted record with `state`.
    async fn save(&self, state: &PersistedState) -> Result<()>;
}
