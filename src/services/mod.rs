//! Service layer: adapters for the outside world.
//!
//! This module contains the concrete collaborators of a scan:
//! - Dynamic feed fetcher (`DynamicFeedFetcher`)
//! - RSSHub fallback fetcher (`RssHubFetcher`)
//! - Live room fetcher (`LiveRoomFetcher`)
//! - Telegram chat endpoint (`TelegramNotifier`)
//!
//! The scan pipeline only sees the [`Fetcher`] and [`Notifier`] traits, so
//! any adapter can be swapped without touching merge or detection logic.

mod dynamic;
mod live;
mod rsshub;
mod telegram;

pub use dynamic::DynamicFeedFetcher;
pub use live::LiveRoomFetcher;
pub use rsshub::RssHubFetcher;
pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::{FetchConfig, Item, TrackedEntity};

/// Source tag of the JSON dynamic feed.
pub const SOURCE_DYNAMIC: &str = "dynamic";
/// Source tag of the RSSHub fallback feed.
pub const SOURCE_RSSHUB: &str = "rsshub";
/// Source tag of the live room status.
pub const SOURCE_LIVE: &str = "live";

/// Every source name accepted in configuration.
pub const KNOWN_SOURCES: [&str; 3] = [SOURCE_DYNAMIC, SOURCE_RSSHUB, SOURCE_LIVE];

/// A content channel for tracked entities.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Tag attached to every item this fetcher produces.
    fn source_tag(&self) -> &str;

    /// Lower values are consulted first.
    fn priority(&self) -> u8;

    /// Items for `entity`, newest first.
    ///
    /// An empty list is a valid answer; errors mean the source could not be
    /// read at all.
    async fn fetch(&self, entity: &TrackedEntity) -> Result<Vec<Item>>;
}

/// A chat endpoint.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one rendered message.
    ///
    /// Fails with [`AppError::Auth`] when the endpoint rejects the
    /// configuration and [`AppError::Delivery`] for anything else.
    async fn send(&self, text: &str) -> Result<()>;

    /// Longest message the endpoint accepts, in UTF-16 code units.
    fn max_message_len(&self) -> Option<usize> {
        None
    }
}

/// Build the configured fetchers; list position is priority.
pub fn build_fetchers(config: &FetchConfig, client: &Client) -> Result<Vec<Box<dyn Fetcher>>> {
    let mut fetchers: Vec<Box<dyn Fetcher>> = Vec::with_capacity(config.sources.len());

    for (index, source) in config.sources.iter().enumerate() {
        let priority = u8::try_from(index).unwrap_or(u8::MAX);
        let fetcher: Box<dyn Fetcher> = match source.as_str() {
            SOURCE_DYNAMIC => Box::new(DynamicFeedFetcher::new(
                client.clone(),
                &config.dynamic_url,
                priority,
            )),
            SOURCE_RSSHUB => Box::new(RssHubFetcher::new(
                client.clone(),
                &config.rsshub_url,
                config.rss_item_limit,
                priority,
            )?),
            SOURCE_LIVE => Box::new(LiveRoomFetcher::new(
                client.clone(),
                &config.live_url,
                priority,
            )),
            other => {
                return Err(AppError::config(format!("unknown source '{other}'")));
            }
        };
        fetchers.push(fetcher);
    }

    Ok(fetchers)
}
