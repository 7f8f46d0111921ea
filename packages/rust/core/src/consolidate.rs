//! Last-write-wins consolidation of new records into the historical store.
//!
//! For each identifier exactly one record survives: the most recently
//! produced one (equal timestamps go to the later input). An assessment,
//! contract code or line items held only by the losing version are carried
//! onto the winner, so an assessed record is never replaced by an unassessed
//! copy.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use tenderscope_shared::Opportunity;

/// Outcome counts of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Identifiers not previously stored.
    pub added: usize,
    /// Stored entries whose content changed.
    pub updated: usize,
    /// Incoming records that left the stored entry as it was.
    pub unchanged: usize,
}

/// In-memory view of the store: identifier → latest record.
#[derive(Debug, Clone, Default)]
pub struct HistoricalStore {
    entries: BTreeMap<String, Opportunity>,
}

impl HistoricalStore {
    /// Build from stored rows. Duplicate identifiers are resolved by the merge rule.
    pub fn from_entries(entries: Vec<Opportunity>) -> Self {
        let mut store = Self::default();
        store.merge(entries);
        store
    }

    pub fn get(&self, id: &str) -> Option<&Opportunity> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by identifier.
    pub fn entries(&self) -> impl Iterator<Item = &Opportunity> {
        self.entries.values()
    }

    /// Mutable access to entries that still lack an assessment.
    pub fn unassessed_mut(&mut self) -> impl Iterator<Item = &mut Opportunity> {
        self.entries.values_mut().filter(|op| !op.is_assessed())
    }

    pub fn into_entries(self) -> Vec<Opportunity> {
        self.entries.into_values().collect()
    }

    /// Fold `incoming` into the store, in input order.
    pub fn merge(&mut self, incoming: Vec<Opportunity>) -> MergeStats {
        let mut stats = MergeStats::default();
        for op in incoming {
            match self.entries.remove(&op.id) {
                None => {
                    stats.added += 1;
                    self.entries.insert(op.id.clone(), op);
                }
                Some(existing) => {
                    let merged = resolve(existing.clone(), op);
                    if merged == existing {
                        stats.unchanged += 1;
                    } else {
                        stats.updated += 1;
                    }
                    self.entries.insert(merged.id.clone(), merged);
                }
            }
        }
        debug!(
            added = stats.added,
            updated = stats.updated,
            unchanged = stats.unchanged,
            "merge applied"
        );
        stats
    }
}

/// Pick the surviving version of one identifier.
///
/// `incoming` wins unless `existing` was produced strictly later.
pub fn resolve(existing: Opportunity, incoming: Opportunity) -> Opportunity {
    let (mut winner, loser) = if incoming.produced_at >= existing.produced_at {
        (incoming, existing)
    } else {
        (existing, incoming)
    };

    if winner.assessment.is_none() {
        winner.assessment = loser.assessment;
    }
    if winner.contract_code.is_none() {
        winner.contract_code = loser.contract_code;
    }
    if winner.line_items.is_empty() {
        winner.line_items = loser.line_items;
    }
    winner.application_status = winner.application_status.or(loser.application_status);
    winner.owner = winner.owner.or(loser.owner);
    winner.notes = winner.notes.or(loser.notes);
    winner
}

/// Union of `historical` and `new`, one record per identifier.
pub fn consolidate(historical: Vec<Opportunity>, new: Vec<Opportunity>) -> (Vec<Opportunity>, MergeStats) {
    let mut store = HistoricalStore::from_entries(historical);
    let stats = store.merge(new);
    (store.into_entries(), stats)
}
