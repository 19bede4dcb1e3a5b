// src/services/live.rs

//! Live room fetcher.
//!
//! Produces a single item per room whose id is the status code (`"1"` when
//! the room is live, `"0"` otherwise) so the edge-triggered detector can
//! consume it through the common fetcher contract.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::{Item, LiveStatus, TrackedEntity};
use crate::services::{Fetcher, SOURCE_LIVE};
use crate::utils::http::fetch_text;
use crate::utils::url::endpoint;

const ROOM_BASE: &str = "https://live.bilibili.com/";

#[derive(Debug, Deserialize)]
struct RoomResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<RoomInfo>,
}

#[derive(Debug, Deserialize)]
struct RoomInfo {
    #[serde(default)]
    room_id: Option<u64>,
    /// 0 offline, 1 live, 2 rotation (replays)
    live_status: u8,
    #[serde(default)]
    title: String,
}

/// Fetcher for a live room's status.
pub struct LiveRoomFetcher {
    client: Client,
    url_template: String,
    priority: u8,
}

impl LiveRoomFetcher {
    pub fn new(client: Client, url_template: &str, priority: u8) -> Self {
        Self {
            client,
            url_template: url_template.to_string(),
            priority,
        }
    }
}

#[async_trait]
impl Fetcher for LiveRoomFetcher {
    fn source_tag(&self) -> &str {
        SOURCE_LIVE
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn fetch(&self, entity: &TrackedEntity) -> Result<Vec<Item>> {
        let url = endpoint(&self.url_template, &entity.id)?;
        let body = fetch_text(&self.client, url.as_str(), SOURCE_LIVE).await?;
        parse_room(&entity.id, &body).map(|item| vec![item])
    }
}

/// Parse a room info response into a status item.
pub fn parse_room(room: &str, body: &str) -> Result<Item> {
    let response: RoomResponse =
        serde_json::from_str(body).map_err(|e| AppError::malformed(SOURCE_LIVE, e))?;

    if response.code != 0 {
        return Err(AppError::malformed(
            SOURCE_LIVE,
            format!("API code {}: {}", response.code, response.message),
        ));
    }
    let info = response
        .data
        .ok_or_else(|| AppError::malformed(SOURCE_LIVE, "missing data"))?;

    let status = if info.live_status == 1 {
        LiveStatus::Live
    } else {
        LiveStatus::Offline
    };
    let code = status.code().unwrap_or_default().to_string();
    let room_id = info
        .room_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| room.to_string());

    Ok(Item::new(code, info.title.trim(), SOURCE_LIVE).with_link(format!("{ROOM_BASE}{room_id}")))
}
