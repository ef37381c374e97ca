//! Application configuration structures.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Environment variable overriding `notifier.webhook_url`.
pub const WEBHOOK_URL_ENV: &str = "DISCORD_WEBHOOK_URL";

/// Environment variable overriding `storage.state_file`.
pub const STATE_FILE_ENV: &str = "LISTING_WATCHER_STATE_FILE";

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Poll loop behavior
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Listing page and extraction rules
    #[serde(default)]
    pub scraper: ScraperConfig,

    /// Discord webhook delivery
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Snapshot persistence
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration, falling back to defaults only when the file does
    /// not exist. Unreadable or malformed files are errors.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        match Self::load(&path) {
            Err(AppError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                log::warn!(
                    "Config file {:?} not found. Using defaults.",
                    path.as_ref()
                );
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment overrides for secrets and deployment paths.
    pub fn apply_env(&mut self) {
        if let Ok(url) = env::var(WEBHOOK_URL_ENV) {
            if !url.trim().is_empty() {
                self.notifier.webhook_url = url.trim().to_string();
            }
        }
        if let Ok(path) = env::var(STATE_FILE_ENV) {
            if !path.trim().is_empty() {
                self.storage.state_file = PathBuf::from(path.trim());
            }
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.interval_secs == 0 {
            return Err(AppError::validation("monitor.interval_secs must be > 0"));
        }
        if let Some(percent) = self.monitor.max_drop_percent {
            if percent > 100 {
                return Err(AppError::validation(
                    "monitor.max_drop_percent must be between 0 and 100",
                ));
            }
        }

        url::Url::parse(&self.scraper.url)
            .map_err(|e| AppError::validation(format!("scraper.url is invalid: {e}")))?;
        if let Some(base) = &self.scraper.base_url {
            url::Url::parse(base)
                .map_err(|e| AppError::validation(format!("scraper.base_url is invalid: {e}")))?;
        }
        if self.scraper.user_agent.trim().is_empty() {
            return Err(AppError::validation("scraper.user_agent is empty"));
        }
        if self.scraper.timeout_secs == 0 {
            return Err(AppError::validation("scraper.timeout_secs must be > 0"));
        }
        self.scraper.retry.validate("scraper.retry")?;
        self.scraper.selectors.validate()?;

        let webhook = self.notifier.webhook_url.trim();
        if webhook.is_empty() {
            return Err(AppError::validation(format!(
                "notifier.webhook_url is empty (set it in the config file or {WEBHOOK_URL_ENV})"
            )));
        }
        if !webhook.starts_with("https://") && !webhook.starts_with("http://") {
            return Err(AppError::validation(
                "notifier.webhook_url must be an http(s) URL",
            ));
        }
        if self.notifier.timeout_secs == 0 {
            return Err(AppError::validation("notifier.timeout_secs must be > 0"));
        }
        if self.notifier.max_concurrent == 0 {
            return Err(AppError::validation("notifier.max_concurrent must be > 0"));
        }
        self.notifier.retry.validate("notifier.retry")?;

        if self.storage.state_file.as_os_str().is_empty() {
            return Err(AppError::validation("storage.state_file is empty"));
        }
        Ok(())
    }
}

/// Poll loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds to sleep between cycles
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// A fetch with fewer listings than this is treated as a broken scrape
    #[serde(default = "defaults::min_listings")]
    pub min_listings: usize,

    /// Notify every listing on the very first cycle instead of suppressing it
    #[serde(default)]
    pub backfill_on_cold_start: bool,

    /// Also announce listings that disappeared since the last cycle
    #[serde(default)]
    pub notify_removed: bool,

    /// Abort a cycle whose count drops by more than this percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_drop_percent: Option<u8>,

    /// Previous snapshots smaller than this skip the drop check
    #[serde(default = "defaults::min_baseline")]
    pub min_baseline: usize,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
            min_listings: defaults::min_listings(),
            backfill_on_cold_start: false,
            notify_removed: false,
            max_drop_percent: None,
            min_baseline: defaults::min_baseline(),
        }
    }
}

/// Listing page location and HTTP behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Page listing the products
    #[serde(default = "defaults::scraper_url")]
    pub url: String,

    /// Base for resolving relative links (defaults to `url`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::scraper_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "defaults::scraper_retry")]
    pub retry: RetryConfig,

    #[serde(default)]
    pub selectors: SelectorConfig,
}

impl ScraperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            url: defaults::scraper_url(),
            base_url: Some(defaults::base_url()),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::scraper_timeout(),
            retry: defaults::scraper_retry(),
            selectors: SelectorConfig::default(),
        }
    }
}

/// CSS selectors describing one listing card on the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Selector matching each listing container
    #[serde(default = "defaults::item_selector")]
    pub item: String,

    /// Title element within a listing
    #[serde(default = "defaults::title_selector")]
    pub title: String,

    /// Price element within a listing
    #[serde(default = "defaults::price_selector")]
    pub price: String,

    /// Link element within a listing (its `href` is the listing URL)
    #[serde(default = "defaults::link_selector")]
    pub link: String,

    /// Image element within a listing
    #[serde(default = "defaults::image_selector")]
    pub image: String,

    /// Attribute on the listing container holding the site id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_attr: Option<String>,
}

impl SelectorConfig {
    fn validate(&self) -> Result<()> {
        for (name, selector) in [
            ("item", &self.item),
            ("title", &self.title),
            ("price", &self.price),
            ("link", &self.link),
            ("image", &self.image),
        ] {
            scraper::Selector::parse(selector)
                .map_err(|e| AppError::selector(format!("{name}: {selector}"), format!("{e:?}")))?;
        }
        Ok(())
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            item: defaults::item_selector(),
            title: defaults::title_selector(),
            price: defaults::price_selector(),
            link: defaults::link_selector(),
            image: defaults::image_selector(),
            id_attr: Some("data-product-id".to_string()),
        }
    }
}

/// Discord webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Webhook endpoint; usually supplied through the environment
    #[serde(default)]
    pub webhook_url: String,

    /// Display name override for webhook posts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    /// Timeout for a single delivery attempt
    #[serde(default = "defaults::notifier_timeout")]
    pub timeout_secs: u64,

    /// Deliveries in flight at once
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "defaults::notifier_retry")]
    pub retry: RetryConfig,
}

impl NotifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            username: None,
            avatar_url: None,
            timeout_secs: defaults::notifier_timeout(),
            max_concurrent: defaults::max_concurrent(),
            retry: defaults::notifier_retry(),
        }
    }
}

/// Upper bound on configured retry attempts.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Bounded exponential retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt; doubled afterwards
    pub initial_backoff_ms: u64,

    /// Upper bound on any single delay
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    fn validate(&self, section: &str) -> Result<()> {
        if self.max_attempts == 0 || self.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(AppError::validation(format!(
                "{section}.max_attempts must be between 1 and {MAX_RETRY_ATTEMPTS}"
            )));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(AppError::validation(format!(
                "{section}.max_backoff_ms must be >= initial_backoff_ms"
            )));
        }
        Ok(())
    }
}

/// Snapshot persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding the last snapshot
    #[serde(default = "defaults::state_file")]
    pub state_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: defaults::state_file(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::RetryConfig;

    // Monitor defaults
    pub fn interval() -> u64 {
        43_200
    }
    pub fn min_listings() -> usize {
        20
    }
    pub fn min_baseline() -> usize {
        10
    }

    // Scraper defaults
    pub fn scraper_url() -> String {
        "https://kfamarketplace.com/product/listing/?stock=in".into()
    }
    pub fn base_url() -> String {
        "https://kfamarketplace.com".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; listing-watcher/0.1)".into()
    }
    pub fn scraper_timeout() -> u64 {
        30
    }
    pub fn scraper_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
        }
    }

    // Selector defaults
    pub fn item_selector() -> String {
        "div.product".into()
    }
    pub fn title_selector() -> String {
        ".product-title".into()
    }
    pub fn price_selector() -> String {
        ".price".into()
    }
    pub fn link_selector() -> String {
        "a[href]".into()
    }
    pub fn image_selector() -> String {
        "img".into()
    }

    // Notifier defaults
    pub fn notifier_timeout() -> u64 {
        10
    }
    pub fn max_concurrent() -> usize {
        4
    }
    pub fn notifier_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
        }
    }

    // Storage defaults
    pub fn state_file() -> PathBuf {
        PathBuf::from("data/previous_listings.json")
    }
}
