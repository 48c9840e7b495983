//! Pure merge of delta pages into the record map.

use std::collections::HashMap;

use crate::delta::DeltaItem;
use crate::error::Error;

/// Latest known state of one remote item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub id: String,
    pub access_locator: Option<String>,
    pub tombstoned: bool,
}

impl ResourceRecord {
    /// Present and downloadable. A record with no locator that is not
    /// tombstoned is transient and never reported as found.
    pub fn is_available(&self) -> bool {
        !self.tombstoned && self.access_locator.is_some()
    }
}

pub type RecordMap = HashMap<String, ResourceRecord>;

/// Result of folding items into a record map.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub records: RecordMap,
    /// Record-level problems; merging carried on past each of them.
    pub errors: Vec<Error>,
    pub skipped: usize,
}

/// Fold `items` into `records` in order; a later entry for an id replaces an earlier one.
///
/// Entries without the file marker are skipped. A tombstone clears the
/// locator. A file entry without an id is recorded as an error and skipped.
pub fn merge_records(records: RecordMap, items: &[DeltaItem]) -> MergeOutcome {
    let mut out = MergeOutcome {
        records,
        ..MergeOutcome::default()
    };

    for item in items {
        if !item.is_file {
            out.skipped += 1;
            continue;
        }

        let Some(id) = item.id.as_deref().filter(|id| !id.is_empty()) else {
            out.errors
                .push(Error::fatal(None, "delta item has a file marker but no id"));
            continue;
        };

        let record = if item.deleted {
            ResourceRecord {
                id: id.to_string(),
                access_locator: None,
                tombstoned: true,
            }
        } else {
            ResourceRecord {
                id: id.to_string(),
                access_locator: item.download_url.clone().filter(|u| !u.is_empty()),
                tombstoned: false,
            }
        };
        out.records.insert(id.to_string(), record);
    }

    out
}
