//! Core domain model for gitcorp: the types that flow between the row
//! source, the GitHub fetcher, the normalizer and the sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "gitcorp-core";

/// One row of the ordered upstream activity table: a login with recorded
/// push activity, in descending push-count order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRow {
    pub login: String,
}

/// A fetched GitHub profile, reduced to the fields the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub login: String,
    /// Self-reported free-text company field, absent when unset.
    pub company: Option<String>,
    /// ETag with weak prefix and surrounding quotes stripped; changes iff
    /// the profile content changed.
    pub fingerprint: String,
}

/// Mirror cache value: the last company/fingerprint pair known to be in the
/// sink for a login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub company: String,
    pub fingerprint: String,
}

/// Sink discipline for one association: new login vs. changed company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteKind {
    Insert,
    Update,
}

/// The unit buffered for persistence. Created when a profile is fetched and
/// normalized; dropped only after a confirmed sink flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub login: String,
    /// Normalized company name, possibly empty.
    pub company: String,
    pub fingerprint: String,
    pub kind: WriteKind,
}

/// Counters accumulated per quota window and logged at the end of each
/// batch, then absorbed into run totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub processed: u64,
    pub inserts: u64,
    pub updates: u64,
    pub not_found: u64,
    pub cache_hits: u64,
    pub company_unchanged: u64,
    pub fetch_errors: u64,
    pub sink_failures: u64,
}

impl BatchStats {
    pub fn absorb(&mut self, other: BatchStats) {
        self.processed += other.processed;
        self.inserts += other.inserts;
        self.updates += other.updates;
        self.not_found += other.not_found;
        self.cache_hits += other.cache_hits;
        self.company_unchanged += other.company_unchanged;
        self.fetch_errors += other.fetch_errors;
        self.sink_failures += other.sink_failures;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// The row source returned an empty batch.
    Exhausted,
    /// An interrupt was observed at a row boundary.
    Interrupted,
}

/// Summary handed back to the CLI after a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Final in-memory checkpoint; the persisted value may lag behind it.
    pub checkpoint: u64,
    pub rows_flushed: u64,
    /// Rows still buffered because every flush attempt failed.
    pub rows_pending: u64,
    /// Whether rows were still buffered or mid-flush at the moment the
    /// interrupt was observed; always false for uninterrupted runs.
    pub pending_at_interrupt: bool,
    pub stats: BatchStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_absorb_adds_every_counter() {
        let mut total = BatchStats {
            processed: 10,
            inserts: 4,
            updates: 3,
            not_found: 1,
            cache_hits: 1,
            company_unchanged: 1,
            fetch_errors: 0,
            sink_failures: 0,
        };
        total.absorb(BatchStats {
            processed: 5,
            inserts: 1,
            updates: 0,
            not_found: 2,
            cache_hits: 0,
            company_unchanged: 1,
            fetch_errors: 1,
            sink_failures: 2,
        });
        assert_eq!(total.processed, 15);
        assert_eq!(total.inserts, 5);
        assert_eq!(total.updates, 3);
        assert_eq!(total.not_found, 3);
        assert_eq!(total.cache_hits, 1);
        assert_eq!(total.company_unchanged, 2);
        assert_eq!(total.fetch_errors, 1);
        assert_eq!(total.sink_failures, 2);
    }
}
