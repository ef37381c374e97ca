// src/utils/url.rs

//! URL manipulation utilities.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static PATH_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"/(?:product|products|item|items|listing|listings|p)/(\d+)(?:/|$)").ok());

/// Resolve a potentially relative link against a base URL.
///
/// Returns `None` unless the result is an http(s) URL.
///
/// # Examples
/// ```
/// use listing_watcher::utils::url::resolve_url;
/// use url::Url;
///
/// let base = Url::parse("https://shop.test/product/listing/").unwrap();
/// assert_eq!(
///     resolve_url(&base, "/product/42/"),
///     Some("https://shop.test/product/42/".to_string())
/// );
/// ```
pub fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let joined = base.join(href).ok()?;
    match joined.scheme() {
        "http" | "https" => Some(joined.to_string()),
        _ => None,
    }
}

/// Extract a site-assigned listing identifier from a URL.
pub fn extract_listing_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;

    for (key, value) in parsed.query_pairs() {
        if value.is_empty() {
            continue;
        }
        if matches!(
            key.to_lowercase().as_str(),
            "product_id" | "productid" | "pid" | "item_id" | "itemid" | "sku" | "listing_id" | "id"
        ) {
            return Some(value.to_string());
        }
    }

    let regex = PATH_ID.as_ref()?;
    regex
        .captures(parsed.path())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
