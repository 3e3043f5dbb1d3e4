use std::collections::HashMap;

use crate::record::{Preservation, Record};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergeOutcome {
    pub records: Vec<Record>,
    /// Fresh records that inherited curated fields from the snapshot.
    pub preserved: usize,
    /// Fresh records with no snapshot counterpart.
    pub fresh: usize,
    /// Snapshot records no longer listed upstream, carried over unchanged.
    pub survivors: usize,
}

/// Reconcile freshly fetched records against the prior snapshot.
///
/// Matching records take `title`, `category` and `custom` from the snapshot.
/// Snapshot records that no fresh record consumed are appended in snapshot
/// order. Nothing flows from `new` back into `prior`.
pub fn merge(new: Vec<Record>, prior: Vec<Record>) -> MergeOutcome {
    // First snapshot entry wins when the snapshot itself holds duplicates.
    let mut index: HashMap<String, usize> = HashMap::with_capacity(prior.len());
    for (pos, record) in prior.iter().enumerate() {
        if record.has_identity() {
            index.entry(record.id.clone()).or_insert(pos);
        }
    }

    let mut outcome = MergeOutcome {
        records: Vec::with_capacity(new.len() + prior.len()),
        ..MergeOutcome::default()
    };

    for mut record in new {
        match index.remove(&record.id) {
            Some(pos) => {
                let old = &prior[pos];
                record.title = old.title.clone();
                record.category = old.category.clone();
                record.custom = old.custom.clone();
                record.refresh_search_key();
                record.preservation = Preservation::Preserved;
                outcome.preserved += 1;
            }
            None => {
                record.preservation = Preservation::Fresh;
                outcome.fresh += 1;
            }
        }
        outcome.records.push(record);
    }

    // Consumed keys were removed above; a duplicate snapshot key only
    // survives at its first position.
    for (pos, mut record) in prior.into_iter().enumerate() {
        if index.get(&record.id) != Some(&pos) {
            continue;
        }
        record.preservation = Preservation::Survivor;
        outcome.survivors += 1;
        outcome.records.push(record);
    }

    outcome
}
