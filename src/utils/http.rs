// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, REFERER};
use reqwest::{Client, StatusCode};

use crate::error::{AppError, Result};
use crate::models::FetchConfig;
use crate::utils::truncate_chars;
use crate::utils::url::host_of;

/// Create the shared HTTP client used by every source adapter.
pub fn create_async_client(config: &FetchConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/xml, */*;q=0.1"),
    );
    if let Ok(referer) = HeaderValue::from_str(&config.referer) {
        headers.insert(REFERER, referer);
    }

    let client = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// GET `url` and return the body text.
///
/// Transport failures, timeouts, 429 and 5xx are retryable fetch errors;
/// other non-success statuses are permanent.
pub async fn fetch_text(client: &Client, url: &str, source_tag: &str) -> Result<String> {
    log::debug!(
        "GET {} ({})",
        host_of(url).unwrap_or_default(),
        source_tag
    );
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::fetch(source_tag, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {status}: {}", truncate_chars(&body, 200));
        return Err(if is_transient(status) {
            AppError::fetch(source_tag, message)
        } else {
            AppError::fetch_permanent(source_tag, message)
        });
    }

    response
        .text()
        .await
        .map_err(|e| AppError::fetch(source_tag, e))
}

/// Whether a status code is worth retrying.
pub fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}
