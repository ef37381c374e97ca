// src/error.rs

//! Unified error handling for the listing watcher.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A scraped record carries neither a URL nor a site id
    #[error("Invalid listing record: {0}")]
    InvalidRecord(String),

    /// Fetching or parsing the listing page failed
    #[error("Scrape error: {0}")]
    Scrape(String),

    /// The listing page answered with a status retrying will not fix
    #[error("Scrape error: {message}")]
    ScrapeRejected { status: u16, message: String },

    /// Fewer listings than the configured floor were scraped
    #[error("Sanity check failed: fetched {fetched} listings, minimum is {minimum}")]
    SanityCheck { fetched: usize, minimum: usize },

    /// Listing count fell too sharply compared to the stored snapshot
    #[error(
        "Listing count dropped from {previous} to {fetched} ({drop_percent:.1}% > {threshold_percent}%)"
    )]
    DropThreshold {
        fetched: usize,
        previous: usize,
        drop_percent: f64,
        threshold_percent: u8,
    },

    /// The notification sink rejected or failed a single send
    #[error("Delivery failed: {message}")]
    Delivery { message: String, retryable: bool },

    /// Delivery of one notification exhausted its retries
    #[error("Notification for {identity} failed after {attempts} attempt(s): {message}")]
    Notification {
        identity: String,
        attempts: u32,
        message: String,
    },

    /// Writing the snapshot failed
    #[error("Persistence error for {path}: {message}")]
    Persistence { path: String, message: String },

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord(message.into())
    }

    /// Create a scrape error.
    pub fn scrape(message: impl fmt::Display) -> Self {
        Self::Scrape(message.to_string())
    }

    /// Create a non-retryable scrape error for an HTTP status.
    pub fn scrape_rejected(status: u16, message: impl fmt::Display) -> Self {
        Self::ScrapeRejected {
            status,
            message: message.to_string(),
        }
    }

    /// Create a delivery error for one send attempt.
    pub fn delivery(message: impl fmt::Display, retryable: bool) -> Self {
        Self::Delivery {
            message: message.to_string(),
            retryable,
        }
    }

    /// Create a notification error for a single listing.
    pub fn notification(
        identity: impl Into<String>,
        attempts: u32,
        message: impl fmt::Display,
    ) -> Self {
        Self::Notification {
            identity: identity.into(),
            attempts,
            message: message.to_string(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(path: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether a retry policy should attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Scrape(_) | Self::Timeout { .. } | Self::Io(_) => true,
            Self::Http(e) => e.status().is_none_or(|s| s.is_server_error() || s.as_u16() == 429),
            Self::Delivery { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
