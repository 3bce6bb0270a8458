use serde::Serialize;

use crate::models::{ListingRecord, ListingSet};

/// A listing present in both sets whose content moved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingChange {
    pub before: ListingRecord,
    pub after: ListingRecord,
    pub fields: Vec<&'static str>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffResult {
    pub added: ListingSet,
    pub removed: ListingSet,
    pub changed: Vec<ListingChange>,
    /// No previous snapshot existed, so everything counts as added
    pub baseline: bool,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            added: self.added.len(),
            removed: self.removed.len(),
            changed: self.changed.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

/// Compare `current` against the last known set.
///
/// `added` and `changed` follow `current`'s order, `removed` follows `previous`'s.
pub fn diff(previous: Option<&ListingSet>, current: &ListingSet) -> DiffResult {
    let Some(previous) = previous else {
        return DiffResult {
            added: current.clone(),
            baseline: true,
            ..Default::default()
        };
    };

    let mut result = DiffResult::default();

    for record in current {
        match previous.get(&record.id) {
            None => {
                result.added.insert(record.clone());
            }
            Some(before) => {
                let fields = before.differing_fields(record);
                if !fields.is_empty() {
                    result.changed.push(ListingChange {
                        before: before.clone(),
                        after: record.clone(),
                        fields,
                    });
                }
            }
        }
    }

    for record in previous {
        if !current.contains(&record.id) {
            result.removed.insert(record.clone());
        }
    }

    result
}
