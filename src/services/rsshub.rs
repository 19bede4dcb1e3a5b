// src/services/rsshub.rs

//! RSSHub fallback fetcher.
//!
//! RSS entries carry no stable id we can rely on, so each item gets a
//! content hash instead. The ids are prefixed with `rss:` to keep them apart
//! from the dynamic feed's numeric ids.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::{Item, TrackedEntity};
use crate::services::{Fetcher, SOURCE_RSSHUB};
use crate::utils::http::fetch_text;
use crate::utils::{decode_xml_entities, truncate_chars};
use crate::utils::url::endpoint;

const DEFAULT_TITLE: &str = "B站动态更新";
const ID_PREFIX: &str = "rss:";

/// Lightweight extractor for RSS `<item>` blocks.
#[derive(Debug, Clone)]
pub struct RssParser {
    item: Regex,
    title: Regex,
    link: Regex,
    cdata: Regex,
}

impl RssParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            item: Regex::new(r"(?s)<item\b[^>]*>(.*?)(?:</item>|$)")?,
            title: Regex::new(r"(?s)<title\b[^>]*>(.*?)</title>")?,
            link: Regex::new(r"(?s)<link\b[^>]*>(.*?)</link>")?,
            cdata: Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>")?,
        })
    }

    /// Parse up to `limit` entries from a feed body.
    pub fn parse(&self, body: &str, limit: usize) -> Vec<Item> {
        self.item
            .captures_iter(body)
            .filter_map(|caps| caps.get(1))
            .take(limit)
            .map(|block| self.parse_block(block.as_str()))
            .collect()
    }

    fn parse_block(&self, block: &str) -> Item {
        let title = self
            .text_of(&self.title, block)
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let link = self.text_of(&self.link, block);

        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update(link.as_deref().unwrap_or_default().as_bytes());
        hasher.update(truncate_chars(block, 200).as_bytes());
        let digest = hasher.finalize();
        let id = format!("{ID_PREFIX}{}", hex::encode(&digest[..16]));

        let item = Item::new(id, title, SOURCE_RSSHUB);
        match link {
            Some(link) => item.with_link(link),
            None => item,
        }
    }

    fn text_of(&self, pattern: &Regex, block: &str) -> Option<String> {
        let raw = pattern.captures(block)?.get(1)?.as_str();
        // CDATA content is literal; everything else carries XML escapes.
        let text = match self.cdata.captures(raw).and_then(|c| c.get(1)) {
            Some(inner) => inner.as_str().trim().to_string(),
            None => decode_xml_entities(raw.trim()),
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Fetcher for the RSSHub feed of an account.
pub struct RssHubFetcher {
    client: Client,
    url_template: String,
    item_limit: usize,
    priority: u8,
    parser: RssParser,
}

impl RssHubFetcher {
    pub fn new(client: Client, url_template: &str, item_limit: usize, priority: u8) -> Result<Self> {
        Ok(Self {
            client,
            url_template: url_template.to_string(),
            item_limit,
            priority,
            parser: RssParser::new()?,
        })
    }
}

#[async_trait]
impl Fetcher for RssHubFetcher {
    fn source_tag(&self) -> &str {
        SOURCE_RSSHUB
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn fetch(&self, entity: &TrackedEntity) -> Result<Vec<Item>> {
        let url = endpoint(&self.url_template, &entity.id)?;
        let body = fetch_text(&self.client, url.as_str(), SOURCE_RSSHUB).await?;
        Ok(self.parser.parse(&body, self.item_limit))
    }
}
