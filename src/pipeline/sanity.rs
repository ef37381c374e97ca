//! Sanity checks guarding the snapshot against broken scrapes.
//!
//! A fetch that returns fewer listings than `min_listings`, or (when
//! configured) drops too sharply compared to the stored snapshot, most
//! likely means the page or the extractor broke. Such a cycle is aborted
//! before the snapshot is touched.

use crate::error::{AppError, Result};
use crate::models::{MonitorConfig, Snapshot};

/// Sanity check configuration.
#[derive(Debug, Clone)]
pub struct SanityConfig {
    /// Absolute floor on the number of fetched listings
    pub min_listings: usize,
    /// Maximum allowed drop percentage (0-100); `None` disables the check
    pub max_drop_percent: Option<u8>,
    /// Previous snapshots smaller than this skip the drop check
    pub min_baseline: usize,
}

impl Default for SanityConfig {
    fn default() -> Self {
        Self {
            min_listings: 20,
            max_drop_percent: None,
            min_baseline: 10,
        }
    }
}

impl From<&MonitorConfig> for SanityConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            min_listings: config.min_listings,
            max_drop_percent: config.max_drop_percent,
            min_baseline: config.min_baseline,
        }
    }
}

/// Result of a sanity check.
#[derive(Debug, Clone, PartialEq)]
pub enum SanityResult {
    /// Safe to diff and persist
    Safe { fetched: usize, previous: usize },
    /// No usable baseline yet; only the floor applies
    ColdStart { fetched: usize },
    /// Fewer listings than the floor
    BelowMinimum { fetched: usize, minimum: usize },
    /// Count fell more than the allowed percentage
    Dropped {
        fetched: usize,
        previous: usize,
        drop_percent: f64,
    },
}

/// Checker for fetched listing counts.
#[derive(Debug, Clone, Default)]
pub struct SanityCheck {
    config: SanityConfig,
}

impl SanityCheck {
    pub fn new(config: SanityConfig) -> Self {
        Self { config }
    }

    /// Classify a fetch of `fetched` listings against the previous snapshot.
    pub fn check(&self, fetched: usize, previous: &Snapshot) -> SanityResult {
        if fetched < self.config.min_listings {
            return SanityResult::BelowMinimum {
                fetched,
                minimum: self.config.min_listings,
            };
        }

        let previous_count = previous.len();
        if previous.is_cold() || previous_count < self.config.min_baseline {
            return SanityResult::ColdStart { fetched };
        }

        if let Some(max_drop) = self.config.max_drop_percent {
            if fetched < previous_count {
                let drop = previous_count - fetched;
                let drop_percent = (drop as f64 / previous_count as f64) * 100.0;
                if drop_percent > max_drop as f64 {
                    return SanityResult::Dropped {
                        fetched,
                        previous: previous_count,
                        drop_percent,
                    };
                }
            }
        }

        SanityResult::Safe {
            fetched,
            previous: previous_count,
        }
    }

    /// Validate and return Ok if safe, Err if the cycle must abort.
    pub fn validate(&self, fetched: usize, previous: &Snapshot) -> Result<()> {
        match self.check(fetched, previous) {
            SanityResult::Safe { fetched, previous } => {
                log::debug!("Sanity check: SAFE ({} listings, was {})", fetched, previous);
                Ok(())
            }
            SanityResult::ColdStart { fetched } => {
                log::debug!("Sanity check: COLD START ({} listings)", fetched);
                Ok(())
            }
            SanityResult::BelowMinimum { fetched, minimum } => {
                log::error!(
                    "Sanity check: only {} listings fetched (minimum {}), page or extractor is likely broken",
                    fetched,
                    minimum
                );
                Err(AppError::SanityCheck { fetched, minimum })
            }
            SanityResult::Dropped {
                fetched,
                previous,
                drop_percent,
            } => {
                let threshold_percent = self.config.max_drop_percent.unwrap_or(100);
                log::error!(
                    "Sanity check: {} → {} listings ({:.1}% drop > {}% threshold)",
                    previous,
                    fetched,
                    drop_percent,
                    threshold_percent
                );
                Err(AppError::DropThreshold {
                    fetched,
                    previous,
                    drop_percent,
                    threshold_percent,
                })
            }
        }
    }
}
