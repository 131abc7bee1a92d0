//! History merging across places stores.
//!
//! A URL's identity is its `url`; a visit's identity is `(url, visit_date)`.
//! Merging the same source twice adds no new visit rows.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use crate::db_safety;
use crate::error::{ErrorKind, Result};
use crate::places::{now_micros, PlaceEntry, PlacesStore, Visit};
use crate::profile::Profile;

const MICROS_PER_DAY: i64 = 86_400 * 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryMergeOptions {
    pub preserve_visits: bool,
    pub preserve_frecency: bool,
    pub avoid_duplicates: bool,
    /// 0 keeps everything.
    pub max_age_days: u32,
}

impl Default for HistoryMergeOptions {
    fn default() -> Self {
        Self {
            preserve_visits: true,
            preserve_frecency: true,
            avoid_duplicates: true,
            max_age_days: 0,
        }
    }
}

impl HistoryMergeOptions {
    pub fn cutoff(&self, now: i64) -> Option<i64> {
        if self.max_age_days == 0 {
            None
        } else {
            Some(now - i64::from(self.max_age_days) * MICROS_PER_DAY)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryMergeReport {
    pub urls_imported: usize,
    pub urls_updated: usize,
    pub visits_imported: usize,
    pub duplicates_skipped: usize,
    pub frecency_recomputed: usize,
    pub sources_merged: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl HistoryMergeReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One URL and its visits, whatever store it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    pub entry: PlaceEntry,
    pub visits: Vec<Visit>,
}

/// Ranking used when frecency is recomputed after a merge.
pub trait FrecencyScorer {
    fn score(&self, visit_count: i64, last_visit_date: Option<i64>, now: i64) -> i64;
}

/// `visit_count * 100 + days_since_last_visit`, or 0 for unvisited places.
/// An approximation of the browser's own ranking, not a reimplementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleFrecency;

impl FrecencyScorer for SimpleFrecency {
    fn score(&self, visit_count: i64, last_visit_date: Option<i64>, now: i64) -> i64 {
        if visit_count <= 0 {
            return 0;
        }
        let days = last_visit_date
            .map(|last| ((now - last) / MICROS_PER_DAY).max(0))
            .unwrap_or(0);
        visit_count.saturating_mul(100).saturating_add(days)
    }
}

/// Read the visited places of a Firefox-family profile.
pub fn read_firefox_history(profile: &Profile, cutoff: Option<i64>) -> Result<Vec<HistoryRecord>> {
    let conn = db_safety::open_read_only(&profile.file("places.sqlite"))?;
    let store = PlacesStore::new(&conn)?;

    let mut records = Vec::new();
    for (place_id, entry) in store.read_history(cutoff)? {
        let visits = store.read_visits(place_id)?;
        records.push(HistoryRecord { entry, visits });
    }
    debug!("Read {} history entries from {}", records.len(), profile.name);
    Ok(records)
}

struct HistoryMerger<'s, 'c> {
    store: &'s PlacesStore<'c>,
    options: HistoryMergeOptions,
    known_urls: HashSet<String>,
}

impl<'s, 'c> HistoryMerger<'s, 'c> {
    fn new(store: &'s PlacesStore<'c>, options: &HistoryMergeOptions) -> Result<Self> {
        let known_urls = store
            .read_history(None)?
            .into_iter()
            .map(|(_, entry)| entry.url)
            .collect();
        Ok(Self {
            store,
            options: *options,
            known_urls,
        })
    }

    fn merge_record(&mut self, record: &HistoryRecord, report: &mut HistoryMergeReport) -> Result<()> {
        let incoming = &record.entry;
        if self.options.avoid_duplicates && self.known_urls.contains(&incoming.url) {
            report.duplicates_skipped += 1;
            return Ok(());
        }

        let place_id = match self.store.find_place(&incoming.url)? {
            Some((id, existing)) => {
                let title = existing
                    .title
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .or(incoming.title.as_deref());
                let frecency = if self.options.preserve_frecency {
                    existing.frecency.max(incoming.frecency)
                } else {
                    existing.frecency
                };
                self.store.update_place_stats(
                    id,
                    title,
                    existing.visit_count + incoming.visit_count,
                    frecency,
                )?;
                report.urls_updated += 1;
                id
            }
            None => {
                let mut entry = incoming.clone();
                if !self.options.preserve_frecency {
                    entry.frecency = 0;
                }
                let id = self.store.insert_place(&entry)?;
                report.urls_imported += 1;
                id
            }
        };
        self.known_urls.insert(incoming.url.clone());

        if self.options.preserve_visits && !record.visits.is_empty() {
            let mut dates = self.store.visit_dates(place_id)?;
            for visit in &record.visits {
                if dates.insert(visit.visit_date) {
                    self.store.insert_visit(place_id, visit)?;
                    report.visits_imported += 1;
                }
            }
            self.store.refresh_last_visit(place_id)?;
        }
        Ok(())
    }
}

/// Recompute frecency for every place in the store.
///
/// With `preserve_frecency`, places that already carry a positive score keep
/// it, so a merge never lowers a score it was asked to preserve.
pub fn recompute_frecency(
    store: &PlacesStore<'_>,
    scorer: &dyn FrecencyScorer,
    preserve_frecency: bool,
    now: i64,
) -> Result<usize> {
    let mut updated = 0;
    for (id, visit_count, last_visit_date, current) in store.frecency_inputs()? {
        if preserve_frecency && current > 0 {
            continue;
        }
        let score = scorer.score(visit_count, last_visit_date, now);
        if score != current {
            store.set_frecency(id, score)?;
            updated += 1;
        }
    }
    Ok(updated)
}

/// Merge already extracted records into an open store, then rescore.
pub fn import_records(
    store: &PlacesStore<'_>,
    records: &[HistoryRecord],
    options: &HistoryMergeOptions,
) -> Result<HistoryMergeReport> {
    let now = now_micros();
    let cutoff = options.cutoff(now);
    let mut report = HistoryMergeReport::default();
    let mut merger = HistoryMerger::new(store, options)?;

    for record in records {
        let recent_enough = match (cutoff, record.entry.last_visit_date) {
            (Some(cutoff), Some(last)) => last >= cutoff,
            (Some(_), None) => false,
            (None, _) => true,
        };
        if recent_enough {
            merger.merge_record(record, &mut report)?;
        }
    }

    report.frecency_recomputed =
        recompute_frecency(store, &SimpleFrecency, options.preserve_frecency, now)?;
    report.sources_merged = 1;
    Ok(report)
}

/// Merge the history of several Firefox-family profiles into an open store.
pub fn merge_into(
    store: &PlacesStore<'_>,
    sources: &[Profile],
    options: &HistoryMergeOptions,
) -> Result<HistoryMergeReport> {
    let now = now_micros();
    let cutoff = options.cutoff(now);
    let mut report = HistoryMergeReport::default();
    let mut merger = HistoryMerger::new(store, options)?;

    for source in sources {
        let records = match read_firefox_history(source, cutoff) {
            Ok(records) => records,
            Err(e) if e.kind() == ErrorKind::SourceMissing => {
                warn!("⚠️  Skipping {}: {}", source.name, e);
                report.warnings.push(format!("{}: {}", source.name, e));
                continue;
            }
            Err(e) => {
                warn!("⚠️  Could not read history of {}: {}", source.name, e);
                report.errors.push(format!("{}: {}", source.name, e));
                continue;
            }
        };

        info!("📥 Merging {} history entries from {}", records.len(), source.name);
        for record in &records {
            merger.merge_record(record, &mut report)?;
        }
        report.sources_merged += 1;
    }

    report.frecency_recomputed =
        recompute_frecency(store, &SimpleFrecency, options.preserve_frecency, now)?;
    Ok(report)
}

/// Merge history from `sources` into `target`'s places store in one transaction.
pub fn merge_history(
    sources: &[Profile],
    target: &Profile,
    options: &HistoryMergeOptions,
) -> HistoryMergeReport {
    info!("🔄 Merging history from {} profiles into {}", sources.len(), target.name);

    let result = db_safety::with_write_transaction(&target.file("places.sqlite"), |tx| {
        let store = PlacesStore::new(tx)?;
        merge_into(&store, sources, options)
    });

    match result {
        Ok(report) => {
            info!(
                "✅ {} URLs imported, {} visits imported, {} duplicates skipped",
                report.urls_imported, report.visits_imported, report.duplicates_skipped
            );
            report
        }
        Err(e) => {
            error!("❌ History merge failed: {}", e);
            HistoryMergeReport {
                errors: vec![e.to_string()],
                ..Default::default()
            }
        }
    }
}
