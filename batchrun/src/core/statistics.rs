//! Rank assignment and ordering for statistics entries.

use std::collections::BTreeMap;

use crate::core::types::StatisticsEntry;

/// Statistics registered during one run, keyed by entry id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    entries: BTreeMap<String, StatisticsEntry>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entry`, replacing any entry with the same id.
    ///
    /// A zero rank becomes `max(existing ranks, 0) + 1`, computed before the
    /// replacement so a re-registered id moves behind every current entry.
    /// At `u32::MAX` the assigned rank saturates instead of wrapping to zero.
    /// Other entries keep their ranks.
    pub fn register(&mut self, mut entry: StatisticsEntry) -> u32 {
        if entry.rank == 0 {
            entry.rank = self.max_rank().saturating_add(1);
        }
        let rank = entry.rank;
        self.entries.insert(entry.id.clone(), entry);
        rank
    }

    pub fn get(&self, id: &str) -> Option<&StatisticsEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot ordered by ascending rank, ties broken by id.
    ///
    /// The returned iterator is finite and can be cloned to restart it.
    pub fn sorted(&self) -> std::vec::IntoIter<&StatisticsEntry> {
        let mut snapshot: Vec<&StatisticsEntry> = self.entries.values().collect();
        snapshot.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.id.cmp(&b.id)));
        snapshot.into_iter()
    }

    fn max_rank(&self) -> u32 {
        self.entries.values().map(|e| e.rank).max().unwrap_or(0)
    }
}
