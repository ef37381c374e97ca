//! External collaborators of the watcher.
//!
//! - Listing sources (`ListingSource`, default `HtmlListingScraper`)
//! - Notification sinks (`NotificationSink`, default `DiscordWebhook`)

mod notifier;
mod scraper;

pub use self::notifier::{DiscordWebhook, Message, MessageKind, NotificationSink};
pub use self::scraper::{HtmlListingScraper, ListingSource};
