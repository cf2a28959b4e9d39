//! Database query modules.

pub mod edges;
pub mod nodes;
pub mod stats;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What an upsert batch did, row by row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub reactivated: usize,
    /// Rows whose content matched; only `snapshot_at` was refreshed.
    pub unchanged: usize,
}

impl UpsertOutcome {
    pub fn merge(&mut self, other: &UpsertOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.reactivated += other.reactivated;
        self.unchanged += other.unchanged;
    }

    /// Rows whose version was set or bumped.
    pub fn changed(&self) -> usize {
        self.inserted + self.updated + self.reactivated
    }

    pub fn total(&self) -> usize {
        self.changed() + self.unchanged
    }
}

/// Collapse rows sharing a key, keeping the last occurrence in the position of
/// the first. Upserting a batch with internal duplicates would otherwise bump
/// the version twice and stop being idempotent on replay.
pub(crate) fn dedupe_last_wins<T, F>(rows: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> String,
{
    let mut index: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    let mut out: Vec<T> = Vec::with_capacity(rows.len());
    for row in rows {
        let k = key(&row);
        match index.get(&k) {
            Some(&i) => out[i] = row,
            None => {
                index.insert(k, out.len());
                out.push(row);
            }
        }
    }
    out
}
