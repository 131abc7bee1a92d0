use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, error, info};

use crate::db_safety;
use crate::error::Result;
use crate::places::{now_micros, BookmarkRecord, PlacesStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupOptions {
    pub dry_run: bool,
    pub preserve_newest: bool,
    pub preserve_tags: bool,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            preserve_newest: true,
            preserve_tags: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    pub total: usize,
    pub duplicate_sets: usize,
    pub removed: usize,
    pub errors: Vec<String>,
}

impl DedupReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Bookmarks sharing one URL, split into the kept record and the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateSet {
    pub url: String,
    pub survivor: BookmarkRecord,
    pub removed: Vec<BookmarkRecord>,
    pub merged_tags: BTreeSet<String>,
}

impl DuplicateSet {
    /// The union carries tags the survivor does not have yet.
    pub fn gains_tags(&self) -> bool {
        self.merged_tags.len() > self.survivor.tags.len()
            && self.merged_tags.is_superset(&self.survivor.tags)
    }
}

/// Group records by URL and pick a survivor for every group of two or more.
///
/// With `preserve_newest` the record with the largest `date_added` wins,
/// ties going to the earlier record. Otherwise the first record wins.
pub fn find_duplicates(records: &[BookmarkRecord], options: &DedupOptions) -> Vec<DuplicateSet> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&BookmarkRecord>> = HashMap::new();
    for record in records {
        let group = groups.entry(record.url.as_str()).or_insert_with(|| {
            order.push(record.url.as_str());
            Vec::new()
        });
        group.push(record);
    }

    let mut sets = Vec::new();
    for url in order {
        let mut members = match groups.remove(url) {
            Some(members) if members.len() > 1 => members,
            _ => continue,
        };
        if options.preserve_newest {
            members.sort_by(|a, b| b.date_added.cmp(&a.date_added));
        }

        let merged_tags: BTreeSet<String> = members
            .iter()
            .flat_map(|m| m.tags.iter().cloned())
            .collect();
        let survivor = members[0].clone();
        let removed = members[1..].iter().map(|m| (*m).clone()).collect();

        sets.push(DuplicateSet {
            url: url.to_string(),
            survivor,
            removed,
            merged_tags,
        });
    }
    sets
}

/// Remove duplicates inside an already open store.
pub fn deduplicate_in(store: &PlacesStore<'_>, options: &DedupOptions) -> Result<DedupReport> {
    let records = store.read_bookmarks()?;
    let sets = find_duplicates(&records, options);

    let mut report = DedupReport {
        total: records.len(),
        duplicate_sets: sets.len(),
        ..Default::default()
    };

    if options.dry_run {
        for set in &sets {
            debug!("Would keep #{} for {} and drop {}", set.survivor.id, set.url, set.removed.len());
        }
        return Ok(report);
    }

    let mut touched_parents = BTreeSet::new();
    for set in &sets {
        if options.preserve_tags && set.gains_tags() {
            store.replace_tags(set.survivor.place_id, &set.merged_tags)?;
            store.set_last_modified(set.survivor.id, now_micros())?;
        }
        for record in &set.removed {
            store.delete_bookmark(record.id)?;
            touched_parents.insert(record.parent);
            report.removed += 1;
        }
    }
    for parent in touched_parents {
        store.renumber_children(parent)?;
    }

    Ok(report)
}

/// Deduplicate the bookmarks of one places store, all in one transaction.
pub fn deduplicate(db_path: &Path, options: &DedupOptions) -> DedupReport {
    info!("🔍 Deduplicating bookmarks in {:?}", db_path);

    let result = if options.dry_run {
        db_safety::open_read_only(db_path).and_then(|conn| {
            let store = PlacesStore::new(&conn)?;
            deduplicate_in(&store, options)
        })
    } else {
        db_safety::with_write_transaction(db_path, |tx| {
            let store = PlacesStore::new(tx)?;
            deduplicate_in(&store, options)
        })
    };

    match result {
        Ok(report) => {
            info!(
                "✅ {} bookmarks, {} duplicate sets, {} removed",
                report.total, report.duplicate_sets, report.removed
            );
            report
        }
        Err(e) => {
            error!("❌ Bookmark deduplication failed: {}", e);
            DedupReport {
                errors: vec![e.to_string()],
                ..Default::default()
            }
        }
    }
}
