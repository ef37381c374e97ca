//! Change-detection pipeline.
//!
//! - `identity`: stable keys for listing records
//! - `diff`: new listings and the updated snapshot
//! - `sanity`: guards against broken scrapes
//! - `retry`: bounded exponential retry shared by fetch and notify
//! - `dispatch`: per-item notification delivery
//! - `monitor`: the poll loop tying it together

pub mod diff;
pub mod dispatch;
pub mod identity;
pub mod monitor;
pub mod retry;
pub mod sanity;

pub use diff::{ColdStartPolicy, DiffCalculator, DiffResult, NewListing, calculate_diff};
pub use dispatch::{DispatchReport, Dispatcher};
pub use identity::resolve;
pub use monitor::{CycleReport, CycleState, Monitor, MonitorSettings};
pub use retry::RetryPolicy;
pub use sanity::{SanityCheck, SanityConfig, SanityResult};
