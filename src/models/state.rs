// src/models/state.rs

//! Persisted watermark state and its legacy shapes.
//!
//! The state file is the only record shared between runs:
//!
//! ```json
//! {
//!   "seen":   { "<entity>": ["id", "..."] },
//!   "latest": { "<entity>": "id" },
//!   "status": { "<entity>": 0 },
//!   "titles": { "<entity>": "cached room title" }
//! }
//! ```
//!
//! Only the sections used by the configured detector are populated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{DetectorKind, LiveStatus};

const SECTION_KEYS: [&str; 4] = ["seen", "latest", "status", "titles"];

/// Watermark of a single entity, shaped by the detector in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Watermark {
    /// Previously notified ids, oldest first. `None` when never recorded.
    Seen(Option<Vec<String>>),
    /// Most recent notified id.
    Latest(Option<String>),
    /// Last observed live status and the cached room title.
    Status {
        status: LiveStatus,
        title: Option<String>,
    },
}

/// Durable mapping from entity id to watermark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub seen: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub latest: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status: BTreeMap<String, u8>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub titles: BTreeMap<String, String>,
}

impl PersistedState {
    /// Read the watermark of `entity` in the shape `kind` expects.
    pub fn watermark(&self, entity: &str, kind: DetectorKind) -> Watermark {
        match kind {
            DetectorKind::SeenSet => Watermark::Seen(self.seen.get(entity).cloned()),
            DetectorKind::LatestId => Watermark::Latest(self.latest.get(entity).cloned()),
            DetectorKind::LiveStatus => Watermark::Status {
                status: self
                    .status
                    .get(entity)
                    .copied()
                    .map(LiveStatus::from_persisted)
                    .unwrap_or_default(),
                title: self.titles.get(entity).cloned(),
            },
        }
    }

    /// Store a watermark. Absent values never delete existing entries.
    pub fn set_watermark(&mut self, entity: &str, watermark: Watermark) {
        match watermark {
            Watermark::Seen(Some(ids)) => {
                self.seen.insert(entity.to_string(), ids);
            }
            Watermark::Latest(Some(id)) => {
                self.latest.insert(entity.to_string(), id);
            }
            Watermark::Status { status, title } => {
                if let Some(code) = status.code() {
                    self.status.insert(entity.to_string(), code);
                }
                if let Some(title) = title {
                    self.titles.insert(entity.to_string(), title);
                }
            }
            Watermark::Seen(None) | Watermark::Latest(None) => {}
        }
    }

    /// Number of entities with any recorded watermark.
    pub fn entity_count(&self) -> usize {
        let mut ids: Vec<&String> = self
            .seen
            .keys()
            .chain(self.latest.keys())
            .chain(self.status.keys())
            .collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    /// Decode a state document, accepting older shapes.
    ///
    /// Returns the state and whether it had to be converted.
    pub fn from_json(bytes: &[u8], kind: DetectorKind) -> Result<(Self, bool)> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(map) = value else {
            return Err(AppError::validation("state root is not a JSON object"));
        };

        let sectioned = !map.is_empty()
            && map
                .iter()
                .all(|(k, v)| SECTION_KEYS.contains(&k.as_str()) && v.is_object());

        let (mut state, mut upgraded) = if sectioned || map.is_empty() {
            (serde_json::from_value(Value::Object(map))?, false)
        } else {
            (Self::from_flat_map(map)?, true)
        };

        if kind == DetectorKind::LatestId && !state.seen.is_empty() {
            for (entity, ids) in std::mem::take(&mut state.seen) {
                if let Some(last) = ids.last() {
                    state.latest.entry(entity).or_insert_with(|| last.clone());
                }
            }
            upgraded = true;
        }

        Ok((state, upgraded))
    }

    /// Legacy `{ entity: [ids] | "id" | 0|1 }` documents.
    fn from_flat_map(map: serde_json::Map<String, Value>) -> Result<Self> {
        let mut state = Self::default();
        for (entity, value) in map {
            match value {
                Value::Array(ids) => {
                    let ids = ids
                        .into_iter()
                        .filter_map(|v| match v {
                            Value::String(s) => Some(s),
                            Value::Number(n) => Some(n.to_string()),
                            _ => None,
                        })
                        .collect();
                    state.seen.insert(entity, ids);
                }
                Value::String(id) => {
                    state.latest.insert(entity, id);
                }
                Value::Number(n) => {
                    let code = n
                        .as_u64()
                        .and_then(|c| u8::try_from(c).ok())
                        .ok_or_else(|| {
                            AppError::validation(format!("invalid status for {entity}: {n}"))
                        })?;
                    state.status.insert(entity, code);
                }
                other => {
                    return Err(AppError::validation(format!(
                        "unrecognized state entry for {entity}: {other}"
                    )));
                }
            }
        }
        Ok(state)
    }
}
