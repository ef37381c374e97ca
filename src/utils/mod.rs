//! Utility functions and helpers.

pub mod http;
pub mod log;
pub mod url;

pub use self::url::{extract_listing_id, resolve_url};
