//! Diff calculation between the stored snapshot and a fresh fetch.
//!
//! New listings are the identities present in the fetch but absent from the
//! stored snapshot, in the order the fetch returned them. The updated snapshot
//! is always the full fresh set: delisted items drop out of tracking.

use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::models::{Identity, Listing, Snapshot, SnapshotEntry};

use super::identity::resolve;

/// What to do when there is no stored snapshot yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColdStartPolicy {
    /// Record the first fetch silently
    #[default]
    Suppress,
    /// Announce every listing of the first fetch
    Backfill,
}

impl ColdStartPolicy {
    pub fn from_backfill(backfill: bool) -> Self {
        if backfill { Self::Backfill } else { Self::Suppress }
    }
}

/// A listing absent from the previous snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct NewListing {
    pub identity: Identity,
    pub listing: Listing,
}

/// Outcome of one diff.
#[derive(Debug, Clone)]
pub struct DiffResult {
    /// Listings to announce, in fetch order
    pub new_listings: Vec<NewListing>,
    /// Previously tracked entries missing from the fetch
    pub removed: Vec<SnapshotEntry>,
    /// Snapshot to persist once the cycle completes
    pub snapshot: Snapshot,
    /// Records dropped because they had no usable identity
    pub skipped: usize,
    /// Whether the previous snapshot was a cold start
    pub cold_start: bool,
    /// New listings withheld by the cold-start policy
    pub suppressed: usize,
}

impl DiffResult {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.new_listings.is_empty() || !self.removed.is_empty()
    }

    /// Identities of the new listings, in order.
    pub fn new_identities(&self) -> Vec<&Identity> {
        self.new_listings.iter().map(|n| &n.identity).collect()
    }
}

/// Calculator for computing diffs between snapshots.
#[derive(Debug, Clone, Default)]
pub struct DiffCalculator {
    cold_start: ColdStartPolicy,
}

impl DiffCalculator {
    /// Create a diff calculator with the given cold-start behavior.
    pub fn new(cold_start: ColdStartPolicy) -> Self {
        Self { cold_start }
    }

    /// Calculate new listings and the updated snapshot.
    pub fn calculate(&self, previous: &Snapshot, fresh: &[Listing]) -> DiffResult {
        let prev_map: HashMap<&str, &SnapshotEntry> = previous
            .listings
            .iter()
            .map(|e| (e.identity.as_str(), e))
            .collect();

        let mut seen: HashSet<Identity> = HashSet::with_capacity(fresh.len());
        let mut entries = Vec::with_capacity(fresh.len());
        let mut new_listings = Vec::new();
        let mut skipped = 0;

        for listing in fresh {
            let identity = match resolve(listing) {
                Ok(identity) => identity,
                Err(e) => {
                    log::warn!("Skipping listing: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            // First occurrence wins
            if !seen.insert(identity.clone()) {
                log::debug!("Duplicate listing {} in fetch, keeping first", identity);
                continue;
            }

            match prev_map.get(identity.as_str()) {
                Some(entry) => entries.push(entry.refreshed(listing)),
                None => {
                    entries.push(SnapshotEntry::from_listing(identity.clone(), listing));
                    new_listings.push(NewListing {
                        identity,
                        listing: listing.clone(),
                    });
                }
            }
        }

        let removed: Vec<SnapshotEntry> = previous
            .listings
            .iter()
            .filter(|e| !seen.contains(&e.identity))
            .cloned()
            .collect();

        let cold_start = previous.is_cold();
        let mut suppressed = 0;
        if cold_start && self.cold_start == ColdStartPolicy::Suppress {
            suppressed = new_listings.len();
            new_listings.clear();
        }

        DiffResult {
            new_listings,
            removed,
            snapshot: Snapshot::new(entries, Utc::now()),
            skipped,
            cold_start,
            suppressed,
        }
    }
}

/// Convenience function to calculate a diff with cold-start suppression.
pub fn calculate_diff(previous: &Snapshot, fresh: &[Listing]) -> DiffResult {
    DiffCalculator::default().calculate(previous, fresh)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_listing(key: &str) -> Listing {
        Listing::new(format!("https://shop.test/p/{key}"), format!("Item {key}")).with_id(key)
    }

    fn snapshot_of(keys: &[&str]) -> Snapshot {
        let listings: Vec<Listing> = keys.iter().map(|k| make_listing(k)).collect();
        calculate_diff(&Snapshot::empty(), &listings).snapshot
    }

    fn ids(new_listings: &[NewListing]) -> Vec<String> {
        new_listings.iter().map(|n| n.identity.to_string()).collect()
    }

    fn snapshot_ids(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.identities().map(Identity::as_str).collect()
    }

    #[test]
    fn test_new_and_dropped() {
        let prev = snapshot_of(&["A", "B"]);
        let fresh = vec![make_listing("A"), make_listing("C"), make_listing("D")];

        let result = calculate_diff(&prev, &fresh);
        assert_eq!(ids(&result.new_listings), vec!["C", "D"]);
        assert_eq!(snapshot_ids(&result.snapshot), vec!["A", "C", "D"]);
        assert_eq!(result.removed.len(), 1);
        assert_eq!(result.removed[0].identity.as_str(), "B");
    }

    #[test]
    fn test_set_difference_property() {
        let prev = snapshot_of(&["1", "3", "5", "7"]);
        let fresh: Vec<Listing> = ["9", "1", "2", "3", "4", "8"]
            .iter()
            .map(|k| make_listing(k))
            .collect();

        let result = calculate_diff(&prev, &fresh);
        let expected: Vec<String> = fresh
            .iter()
            .map(|l| resolve(l).unwrap().to_string())
            .filter(|id| !prev.contains(id))
            .collect();
        assert_eq!(ids(&result.new_listings), expected);
    }

    #[test]
    fn test_idempotent_without_persisting() {
        let prev = snapshot_of(&["A"]);
        let fresh = vec![make_listing("A"), make_listing("B")];
        let calc = DiffCalculator::new(ColdStartPolicy::Suppress);

        let first = calc.calculate(&prev, &fresh);
        let second = calc.calculate(&prev, &fresh);
        assert_eq!(first.new_listings, second.new_listings);
        assert_eq!(ids(&first.new_listings), vec!["B"]);
    }

    #[test]
    fn test_cold_start_suppressed() {
        let fresh = vec![make_listing("X")];
        let result = DiffCalculator::new(ColdStartPolicy::Suppress).calculate(&Snapshot::empty(), &fresh);

        assert!(result.cold_start);
        assert!(result.new_listings.is_empty());
        assert_eq!(result.suppressed, 1);
        assert_eq!(snapshot_ids(&result.snapshot), vec!["X"]);
        assert!(!result.snapshot.is_cold());
    }

    #[test]
    fn test_cold_start_backfill() {
        let fresh = vec![make_listing("X"), make_listing("Y")];
        let result = DiffCalculator::new(ColdStartPolicy::Backfill).calculate(&Snapshot::empty(), &fresh);

        assert!(result.cold_start);
        assert_eq!(ids(&result.new_listings), vec!["X", "Y"]);
        assert_eq!(result.suppressed, 0);
    }

    #[test]
    fn test_persisted_empty_snapshot_is_not_cold() {
        let prev = snapshot_of(&[]);
        let fresh = vec![make_listing("X")];

        let result = calculate_diff(&prev, &fresh);
        assert!(!result.cold_start);
        assert_eq!(ids(&result.new_listings), vec!["X"]);
    }

    #[test]
    fn test_no_changes() {
        let prev = snapshot_of(&["A", "B"]);
        let fresh = vec![make_listing("A"), make_listing("B")];

        let result = calculate_diff(&prev, &fresh);
        assert!(!result.has_changes());
        assert_eq!(snapshot_ids(&result.snapshot), snapshot_ids(&prev));
    }

    #[test]
    fn test_full_to_empty() {
        let prev = snapshot_of(&["A"]);
        let result = calculate_diff(&prev, &[]);

        assert!(result.new_listings.is_empty());
        assert!(result.snapshot.is_empty());
        assert_eq!(result.removed.len(), 1);
    }

    #[test]
    fn test_duplicates_collapse_first_wins() {
        let prev = snapshot_of(&["A"]);
        let first = make_listing("B");
        let mut dup = make_listing("B");
        dup.title = "Duplicate".to_string();

        let result = calculate_diff(&prev, &[first.clone(), dup, make_listing("A")]);
        assert_eq!(result.new_listings.len(), 1);
        assert_eq!(result.new_listings[0].listing, first);
        assert_eq!(result.snapshot.len(), 2);
        assert_eq!(result.snapshot.get("B").unwrap().title, "Item B");
    }

    #[test]
    fn test_invalid_records_skipped() {
        let prev = snapshot_of(&["A"]);
        let bad = Listing::new("", "No identity");
        let fresh = vec![bad, make_listing("C")];

        let result = calculate_diff(&prev, &fresh);
        assert_eq!(result.skipped, 1);
        assert_eq!(ids(&result.new_listings), vec!["C"]);
    }

    #[test]
    fn test_first_seen_carried_forward() {
        let prev = snapshot_of(&["A"]);
        let original = prev.get("A").unwrap().first_seen;

        let result = calculate_diff(&prev, &[make_listing("A")]);
        assert_eq!(result.snapshot.get("A").unwrap().first_seen, original);
    }
}
