// src/models/mod.rs

//! Domain models for the notifier.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod item;
mod state;

// Re-export all public types
pub use config::{
    Config, DetectorConfig, DetectorKind, DispatchConfig, FetchConfig, LoggingConfig,
    MergeStrategy, PathsConfig, TelegramConfig, Templates,
};
pub use item::{Item, LiveStatus, TrackedEntity};
pub use state::{PersistedState, Watermark};
