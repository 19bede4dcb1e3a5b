// src/models/item.rs

//! Tracked entities, normalized content items, and live status.

use serde::{Deserialize, Serialize};

/// An account or live room the notifier watches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackedEntity {
    /// Platform identifier (account uid or room id)
    pub id: String,

    /// Optional display name used in messages instead of the raw id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Restrict this entity to a subset of the enabled sources (empty = all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl TrackedEntity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            sources: Vec::new(),
        }
    }

    /// Name shown in rendered messages.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Whether the given source is configured for this entity.
    pub fn uses_source(&self, source_tag: &str) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|s| s == source_tag)
    }
}

/// A piece of content produced by a fetcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    /// Identifier, unique within its source
    pub id: String,

    /// Display title
    pub title: String,

    /// Link to the content, if the source provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    /// Tag of the source that produced the item
    pub source_tag: String,
}

impl Item {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        source_tag: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            link: None,
            source_tag: source_tag.into(),
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

/// Two-state live status plus the "never observed" marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiveStatus {
    #[default]
    Unknown,
    Offline,
    Live,
}

impl LiveStatus {
    /// Parse the status code carried in a live-room item id.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "0" => Some(Self::Offline),
            "1" => Some(Self::Live),
            _ => None,
        }
    }

    /// Status code used in item ids and in the state file.
    pub fn code(self) -> Option<u8> {
        match self {
            Self::Unknown => None,
            Self::Offline => Some(0),
            Self::Live => Some(1),
        }
    }

    /// Read a persisted code; anything other than 0/1 counts as unknown.
    pub fn from_persisted(code: u8) -> Self {
        match code {
            0 => Self::Offline,
            1 => Self::Live,
            _ => Self::Unknown,
        }
    }
}
