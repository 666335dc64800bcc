//! In-memory migration history
//!
//! A bounded-age log consulted by the planner to suppress flip-flopping and
//! to penalize hosts with recent churn. Entries older than 24 hours are
//! discarded at the end of each cycle. The log does not survive restarts;
//! after a leadership change the new leader starts with an empty log and is
//! temporarily more permissive.

use crate::models::MigrationRecord;
use chrono::{DateTime, Duration, Utc};

/// Retention window for history entries
pub const RETENTION: Duration = Duration::hours(24);

#[derive(Debug, Default)]
pub struct MigrationLog {
    entries: Vec<MigrationRecord>,
}

impl MigrationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: MigrationRecord) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MigrationRecord] {
        &self.entries
    }

    /// True when `vm_id` has a history entry within `window` of `now`.
    pub fn moved_within(&self, vm_id: u32, window: Duration, now: DateTime<Utc>) -> bool {
        let cutoff = now - window;
        self.entries
            .iter()
            .any(|e| e.vm_id == vm_id && e.timestamp > cutoff)
    }

    /// Number of entries touching `host` (as source or target) within
    /// `window` of `now`.
    pub fn touching_host(&self, host: &str, window: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - window;
        self.entries
            .iter()
            .filter(|e| (e.from_host == host || e.to_host == host) && e.timestamp > cutoff)
            .count()
    }

    /// Drop entries older than the retention window.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - RETENTION;
        self.entries.retain(|e| e.timestamp > cutoff);
    }
}
