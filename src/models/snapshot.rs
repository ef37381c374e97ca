//! Persisted snapshot of currently listed items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::listing::{Identity, Listing, Price};

/// Everything known to be listed as of the last successful cycle.
///
/// `updated_at` is only set on snapshots produced by a diff, so a snapshot
/// without it has never been persisted and marks a cold start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Snapshot {
    /// When the snapshot was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Number of tracked listings
    #[serde(default)]
    pub count: usize,

    /// Tracked listings in first-seen order of the fetch that produced them
    #[serde(default)]
    pub listings: Vec<SnapshotEntry>,
}

impl Snapshot {
    /// An empty, never-persisted snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from resolved entries.
    pub fn new(listings: Vec<SnapshotEntry>, updated_at: DateTime<Utc>) -> Self {
        Self {
            updated_at: Some(updated_at),
            count: listings.len(),
            listings,
        }
    }

    /// True until the first snapshot has been produced and stored.
    pub fn is_cold(&self) -> bool {
        self.updated_at.is_none()
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.listings.iter().map(|entry| &entry.identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.listings.iter().any(|e| e.identity.as_str() == identity)
    }

    pub fn get(&self, identity: &str) -> Option<&SnapshotEntry> {
        self.listings.iter().find(|e| e.identity.as_str() == identity)
    }
}

/// One tracked listing with cached display fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotEntry {
    pub identity: Identity,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,

    /// First cycle in which the listing was observed
    pub first_seen: DateTime<Utc>,

    /// Most recent cycle in which the listing was observed
    pub last_seen: DateTime<Utc>,
}

impl SnapshotEntry {
    /// Entry for a listing observed for the first time.
    pub fn from_listing(identity: Identity, listing: &Listing) -> Self {
        Self {
            identity,
            title: listing.title.clone(),
            url: listing.url.clone(),
            price: listing.price.clone(),
            first_seen: listing.scraped_at,
            last_seen: listing.scraped_at,
        }
    }

    /// Refresh cached fields from a newer sighting, keeping `first_seen`.
    pub fn refreshed(&self, listing: &Listing) -> Self {
        Self {
            identity: self.identity.clone(),
            title: listing.title.clone(),
            url: listing.url.clone(),
            price: listing.price.clone(),
            first_seen: self.first_seen,
            last_seen: listing.scraped_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_cold() {
        let snapshot = Snapshot::empty();
        assert!(snapshot.is_cold());
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_persisted_empty_is_not_cold() {
        let snapshot = Snapshot::new(Vec::new(), Utc::now());
        assert!(!snapshot.is_cold());
        assert_eq!(snapshot.count, 0);
    }

    #[test]
    fn test_refreshed_keeps_first_seen() {
        let first = Listing::new("https://shop.test/p/1", "Old title");
        let entry = SnapshotEntry::from_listing(Identity::new("https://shop.test/p/1"), &first);

        let mut later = Listing::new("https://shop.test/p/1", "New title");
        later.scraped_at = first.scraped_at + chrono::Duration::hours(12);
        let refreshed = entry.refreshed(&later);

        assert_eq!(refreshed.first_seen, first.scraped_at);
        assert_eq!(refreshed.last_seen, later.scraped_at);
        assert_eq!(refreshed.title, "New title");
    }

    #[test]
    fn test_lookup() {
        let listing = Listing::new("https://shop.test/p/1", "Lamp");
        let entry = SnapshotEntry::from_listing(Identity::new("p1"), &listing);
        let snapshot = Snapshot::new(vec![entry], Utc::now());

        assert!(snapshot.contains("p1"));
        assert!(!snapshot.contains("p2"));
        assert_eq!(snapshot.get("p1").map(|e| e.title.as_str()), Some("Lamp"));
    }
}
