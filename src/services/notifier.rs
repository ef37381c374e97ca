//! Notification messages and the sink they are delivered to.
//!
//! The dispatch pipeline formats a [`Message`] per listing and hands it to a
//! [`NotificationSink`]. [`DiscordWebhook`] posts messages as Discord embeds.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::{Identity, Listing, NotifierConfig, SnapshotEntry};
use crate::utils::http::create_async_client;

const NEW_LISTING_COLOR: u32 = 0x3498db;
const REMOVED_COLOR: u32 = 0x95a5a6;

/// Why a message is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    NewListing,
    Removed,
}

/// A formatted product update.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub identity: Identity,
    pub title: String,
    pub url: String,
    pub price: Option<String>,
    pub image_url: Option<String>,
}

impl Message {
    /// Message announcing a newly observed listing.
    pub fn new_listing(identity: &Identity, listing: &Listing) -> Self {
        Self {
            kind: MessageKind::NewListing,
            identity: identity.clone(),
            title: listing.title.clone(),
            url: listing.url.clone(),
            price: listing.price.as_ref().map(ToString::to_string),
            image_url: listing.image_url.clone(),
        }
    }

    /// Message announcing that a tracked listing disappeared.
    pub fn removed(entry: &SnapshotEntry) -> Self {
        Self {
            kind: MessageKind::Removed,
            identity: entry.identity.clone(),
            title: entry.title.clone(),
            url: entry.url.clone(),
            price: entry.price.as_ref().map(ToString::to_string),
            image_url: None,
        }
    }

    /// Human-readable rendering: title, price, URL.
    pub fn text(&self) -> String {
        let mut lines = Vec::with_capacity(3);
        let title = match self.kind {
            MessageKind::NewListing => format!("New listing: {}", self.title),
            MessageKind::Removed => format!("Listing removed: {}", self.title),
        };
        lines.push(title);
        if let Some(price) = &self.price {
            lines.push(format!("Price: {price}"));
        }
        if !self.url.is_empty() {
            lines.push(self.url.clone());
        }
        lines.join("\n")
    }
}

/// Destination for product update messages.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one message. A single attempt; retries belong to the caller.
    async fn send(&self, message: &Message) -> Result<()>;

    /// Name of the sink, for logs.
    fn name(&self) -> &str;
}

/// Discord webhook sink.
pub struct DiscordWebhook {
    client: Client,
    webhook_url: String,
    username: Option<String>,
    avatar_url: Option<String>,
}

impl DiscordWebhook {
    pub fn new(config: &NotifierConfig) -> Result<Self> {
        if config.webhook_url.trim().is_empty() {
            return Err(AppError::config("Discord webhook URL is not set"));
        }
        let client = create_async_client("listing-watcher", config.timeout())?;
        Ok(Self {
            client,
            webhook_url: config.webhook_url.trim().to_string(),
            username: config.username.clone(),
            avatar_url: config.avatar_url.clone(),
        })
    }

    fn create_embed(&self, message: &Message) -> serde_json::Value {
        let (title, color) = match message.kind {
            MessageKind::NewListing => (message.title.clone(), NEW_LISTING_COLOR),
            MessageKind::Removed => (format!("Removed: {}", message.title), REMOVED_COLOR),
        };

        let mut embed = json!({
            "title": truncate(&title, 256),
            "color": color,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if !message.url.is_empty() {
            embed["url"] = json!(message.url);
        }
        if let Some(price) = &message.price {
            embed["fields"] = json!([{ "name": "Price", "value": price, "inline": true }]);
        }
        if let Some(image) = &message.image_url {
            embed["image"] = json!({ "url": image });
        }
        embed
    }

    fn create_webhook_payload(&self, message: &Message) -> serde_json::Value {
        let mut payload = json!({
            "embeds": [self.create_embed(message)],
        });
        if let Some(username) = &self.username {
            payload["username"] = json!(username);
        }
        if let Some(avatar_url) = &self.avatar_url {
            payload["avatar_url"] = json!(avatar_url);
        }
        payload
    }
}

#[async_trait]
impl NotificationSink for DiscordWebhook {
    async fn send(&self, message: &Message) -> Result<()> {
        let payload = self.create_webhook_payload(message);
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::delivery(e, true))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let retryable = status.is_server_error() || status.as_u16() == 429;
        Err(AppError::delivery(
            format!("webhook returned {}: {}", status, truncate(body.trim(), 200)),
            retryable,
        ))
    }

    fn name(&self) -> &str {
        "discord"
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
