//! New-update bookkeeping shared by both cache variants

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default, Clone)]
struct SymbolUpdates {
    count: usize,
    ids: HashSet<String>,
}

/// Counts entries appended since the previous read, per symbol and overall.
///
/// A read marks the counter it used; the next append clears a marked counter
/// before counting, so each read sees only what arrived after the one before.
#[derive(Debug, Default, Clone)]
pub(crate) struct NewUpdates {
    /// Count distinct ids instead of appends
    distinct: bool,
    by_symbol: HashMap<String, SymbolUpdates>,
    clear_by_symbol: HashSet<String>,
    all: Option<usize>,
    clear_all: bool,
}

impl NewUpdates {
    pub(crate) fn new(distinct: bool) -> Self {
        Self {
            distinct,
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, symbol: &str, id: Option<&str>) {
        if self.clear_all {
            self.clear_all = false;
            self.clear_by_symbol.clear();
            self.by_symbol.clear();
            self.all = None;
        }
        if self.clear_by_symbol.remove(symbol) {
            self.by_symbol.remove(symbol);
        }

        let updates = self.by_symbol.entry(symbol.to_string()).or_default();
        let added = match (self.distinct, id) {
            (true, Some(id)) => updates.ids.insert(id.to_string()),
            _ => true,
        };
        if added {
            updates.count += 1;
        }
        self.all = Some(self.all.unwrap_or(0) + usize::from(added));
    }

    /// Limit to apply to the next read.
    ///
    /// With nothing recorded for the filter the requested limit passes through,
    /// otherwise the new-entry count caps it (or replaces it when unset).
    pub(crate) fn effective_limit(
        &mut self,
        symbol: Option<&str>,
        requested: Option<usize>,
    ) -> Option<usize> {
        let new_updates = match symbol {
            None => {
                self.clear_all = true;
                self.all
            }
            Some(symbol) => {
                self.clear_by_symbol.insert(symbol.to_string());
                self.by_symbol.get(symbol).map(|u| u.count)
            }
        };

        match (new_updates, requested) {
            (None, requested) => requested,
            (Some(count), Some(limit)) => Some(count.min(limit)),
            (Some(count), None) => Some(count),
        }
    }
}
