// src/services/dynamic.rs

//! Dynamic feed fetcher.
//!
//! Reads the platform's JSON "space feed" for an account. The feed lists an
//! account's posts, videos, and articles newest first.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{Item, TrackedEntity};
use crate::services::{Fetcher, SOURCE_DYNAMIC};
use crate::utils::http::fetch_text;
use crate::utils::url::endpoint;

const DEFAULT_TITLE: &str = "B站动态更新";
const LINK_BASE: &str = "https://t.bilibili.com/";

/// Fetcher for the JSON dynamic feed.
pub struct DynamicFeedFetcher {
    client: Client,
    url_template: String,
    priority: u8,
}

impl DynamicFeedFetcher {
    pub fn new(client: Client, url_template: &str, priority: u8) -> Self {
        Self {
            client,
            url_template: url_template.to_string(),
            priority,
        }
    }
}

#[async_trait]
impl Fetcher for DynamicFeedFetcher {
    fn source_tag(&self) -> &str {
        SOURCE_DYNAMIC
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn fetch(&self, entity: &TrackedEntity) -> Result<Vec<Item>> {
        let url = endpoint(&self.url_template, &entity.id)?;
        let body = fetch_text(&self.client, url.as_str(), SOURCE_DYNAMIC).await?;
        parse_feed(&body)
    }
}

/// Parse a feed response body into items.
pub fn parse_feed(body: &str) -> Result<Vec<Item>> {
    let root: Value =
        serde_json::from_str(body).map_err(|e| AppError::malformed(SOURCE_DYNAMIC, e))?;

    if let Some(code) = root.get("code").and_then(Value::as_i64) {
        if code != 0 {
            let message = root
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(AppError::malformed(
                SOURCE_DYNAMIC,
                format!("API code {code}: {message}"),
            ));
        }
    }

    let entries = root
        .get("data")
        .and_then(|d| d.get("items"))
        .and_then(Value::as_array);
    let Some(entries) = entries else {
        return Ok(Vec::new());
    };

    Ok(entries.iter().filter_map(parse_entry).collect())
}

fn parse_entry(entry: &Value) -> Option<Item> {
    let id = entry
        .get("id_str")
        .and_then(id_text)
        .or_else(|| entry.get("id").and_then(id_text))?;

    let title = entry
        .pointer("/modules/module_dynamic/desc/text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE);

    let link = format!("{LINK_BASE}{id}");
    Some(Item::new(id, title, SOURCE_DYNAMIC).with_link(link))
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feed() {
        let body = r#"{
            "code": 0,
            "data": {
                "items": [
                    {"id_str": "900", "modules": {"module_dynamic": {"desc": {"text": "New video!"}}}},
                    {"id": 899, "modules": {"module_dynamic": {"desc": null}}},
                    {"id_str": "", "modules": {}},
                    {"id_str": "898"}
                ]
            }
        }"#;

        let items = parse_feed(body).unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["900", "899", "898"]);
        assert_eq!(items[0].title, "New video!");
        assert_eq!(items[0].link.as_deref(), Some("https://t.bilibili.com/900"));
        assert_eq!(items[1].title, DEFAULT_TITLE);
        assert_eq!(items[2].source_tag, SOURCE_DYNAMIC);
    }

    #[test]
    fn test_parse_empty_feed() {
        assert!(parse_feed(r#"{"code": 0, "data": {"items": null}}"#)
            .unwrap()
            .is_empty());
        assert!(parse_feed(r#"{"code": 0, "data": null}"#).unwrap().is_empty());
    }

    #[test]
    fn test_parse_api_error_is_malformed() {
        let err = parse_feed(r#"{"code": -352, "message": "risk control"}"#).unwrap_err();
        assert!(matches!(err, AppError::Malformed { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        assert!(matches!(
            parse_feed("<html>blocked</html>"),
            Err(AppError::Malformed { .. })
        ));
    }
}
