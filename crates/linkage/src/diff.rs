use std::collections::BTreeMap;

use crate::model::{ChangeSet, ChangeSummary, ModifiedRecord, Record};

/// How much of the common-id intersection gets attribute-diffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffPolicy {
    /// Diff the first `n` common ids in sorted id order. Deterministic but
    /// incomplete: "not in modified" proves nothing beyond the sample.
    Sampled(usize),
    Exhaustive,
}

impl Default for DiffPolicy {
    fn default() -> Self {
        Self::Sampled(1000)
    }
}

/// Compare two snapshots of the same domain keyed by `record_id`. Pure batch
/// comparison; no state survives between calls.
pub fn compare_snapshots(
    old: &[Record],
    new: &[Record],
    key_attrs: &[String],
    policy: DiffPolicy,
) -> ChangeSet {
    // First occurrence wins on duplicate ids, matching positional lookup in
    // the source data.
    let mut old_by_id: BTreeMap<&str, &Record> = BTreeMap::new();
    for r in old {
        old_by_id.entry(&r.record_id).or_insert(r);
    }
    let mut new_by_id: BTreeMap<&str, &Record> = BTreeMap::new();
    for r in new {
        new_by_id.entry(&r.record_id).or_insert(r);
    }

    let added: Vec<Record> = new_by_id
        .iter()
        .filter(|(id, _)| !old_by_id.contains_key(*id))
        .map(|(_, r)| (*r).clone())
        .collect();
    let removed: Vec<Record> = old_by_id
        .iter()
        .filter(|(id, _)| !new_by_id.contains_key(*id))
        .map(|(_, r)| (*r).clone())
        .collect();

    // BTreeMap iteration gives sorted id order, so the sample is stable
    // across runs.
    let common: Vec<&str> = old_by_id
        .keys()
        .filter(|id| new_by_id.contains_key(*id))
        .copied()
        .collect();

    let cap = match policy {
        DiffPolicy::Sampled(n) => n.min(common.len()),
        DiffPolicy::Exhaustive => common.len(),
    };

    let mut modified = Vec::new();
    for id in &common[..cap] {
        let old_rec = old_by_id[id];
        let new_rec = new_by_id[id];

        let mut changes = Vec::new();
        for attr in key_attrs {
            let old_val = old_rec.field(attr).unwrap_or("");
            let new_val = new_rec.field(attr).unwrap_or("");
            if old_val != new_val {
                changes.push(format!("{attr}: '{old_val}' -> '{new_val}'"));
            }
        }

        if !changes.is_empty() {
            modified.push(ModifiedRecord {
                record: new_rec.clone(),
                change_details: changes.join("; "),
            });
        }
    }

    let summary = ChangeSummary {
        old_total: old.len(),
        new_total: new.len(),
        added: added.len(),
        removed: removed.len(),
        common: common.len(),
        diffed: cap,
        modified: modified.len(),
    };

    ChangeSet {
        summary,
        added,
        removed,
        modified,
    }
}
