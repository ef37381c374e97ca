//! Identity resolution for listing records.

use crate::error::{AppError, Result};
use crate::models::{Identity, Listing};

/// Resolve the stable key of a listing: the site id when present,
/// otherwise the listing URL.
pub fn resolve(listing: &Listing) -> Result<Identity> {
    if let Some(id) = listing.id.as_deref().map(str::trim) {
        if !id.is_empty() {
            return Ok(Identity::new(id));
        }
    }

    let url = listing.url.trim();
    if url.is_empty() {
        return Err(AppError::invalid_record(format!(
            "listing '{}' has neither an id nor a URL",
            listing.title
        )));
    }
    Ok(Identity::new(url))
}
