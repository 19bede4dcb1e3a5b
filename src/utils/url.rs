// src/utils/url.rs

//! URL helpers for source endpoints.

use url::Url;

use crate::error::Result;

/// Build a source endpoint by substituting the entity id into `template`.
///
/// The id is percent-encoded so it cannot break out of its URL component.
///
/// # Examples
/// ```
/// use notifier::utils::url::endpoint;
///
/// let url = endpoint("https://example.com/feed?uid={id}", "42").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/feed?uid=42");
/// ```
pub fn endpoint(template: &str, id: &str) -> Result<Url> {
    let encoded: String = url::form_urlencoded::byte_serialize(id.trim().as_bytes()).collect();
    Ok(Url::parse(&template.replace("{id}", &encoded))?)
}

/// Extract the host from a URL string, for log lines.
pub fn host_of(url_str: &str) -> Option<String> {
    Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_string()))
}
