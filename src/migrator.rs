//! Per-data-type migration between profiles of any two browser families.
//!
//! Same-family Firefox pairs go through the merge engines; foreign sources
//! are extracted into canonical records and integrated into the target's
//! places store; other same-family pairs use the generic file merge.
//! Anything else is reported as not implemented for that data type only.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::backup::BackupManager;
use crate::bookmarks::{
    self, import_bookmarks, BookmarkMergeOptions, BookmarkMergeReport, DedupOptions, DedupReport,
    ImportedBookmark,
};
use crate::chromium;
use crate::config::Settings;
use crate::db_safety;
use crate::error::{Error, ErrorKind, Result};
use crate::file_merge::{self, FileMergeReport};
use crate::flat_files;
use crate::history::{self, HistoryMergeOptions, HistoryMergeReport, HistoryRecord};
use crate::places::{now_micros, PlacesStore};
use crate::profile::{BrowserFamily, DataType, MergeStrategy, Profile};
use crate::session::{self, SessionMergeOptions, SessionMergeReport};

const PLACES_FILE: &str = "places.sqlite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Snapshot the target before touching it.
    pub backup: bool,
    pub merge_strategy: MergeStrategy,
    /// Run bookmark deduplication on the target afterwards.
    pub deduplicate: bool,
    pub bookmarks: BookmarkMergeOptions,
    pub history: HistoryMergeOptions,
    pub sessions: SessionMergeOptions,
    pub dedup: DedupOptions,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for MigrationOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            backup: settings.backup_before_migrate,
            merge_strategy: settings.merge_strategy,
            deduplicate: false,
            bookmarks: settings.bookmarks,
            history: settings.history,
            sessions: settings.sessions,
            dedup: settings.dedup,
        }
    }
}

/// Result of one data type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DataTypeOutcome {
    Bookmarks(BookmarkMergeReport),
    History(HistoryMergeReport),
    Sessions(SessionMergeReport),
    Files(FileMergeReport),
    /// The source has nothing of this type.
    Skipped { reason: String },
    NotImplemented { reason: String },
    Failed { kind: ErrorKind, error: String },
}

impl DataTypeOutcome {
    /// Errors an engine collected without failing outright.
    fn engine_errors(&self) -> &[String] {
        match self {
            DataTypeOutcome::Bookmarks(r) => &r.errors,
            DataTypeOutcome::History(r) => &r.errors,
            DataTypeOutcome::Sessions(r) => &r.errors,
            _ => &[],
        }
    }

    fn engine_warnings(&self) -> &[String] {
        match self {
            DataTypeOutcome::Bookmarks(r) => &r.warnings,
            DataTypeOutcome::History(r) => &r.warnings,
            DataTypeOutcome::Sessions(r) => &r.warnings,
            _ => &[],
        }
    }

    pub fn is_applied(&self) -> bool {
        !matches!(
            self,
            DataTypeOutcome::Skipped { .. }
                | DataTypeOutcome::NotImplemented { .. }
                | DataTypeOutcome::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub success: bool,
    pub source: String,
    pub target: String,
    pub migrated_data: BTreeMap<DataType, DataTypeOutcome>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub backup: Option<PathBuf>,
    pub dedup: Option<DedupReport>,
}

/// Pulls canonical records out of a foreign profile.
pub trait Extractor {
    fn family(&self) -> BrowserFamily;
    fn bookmarks(&self, profile: &Profile) -> Result<Vec<ImportedBookmark>>;
    fn history(&self, profile: &Profile, cutoff: Option<i64>) -> Result<Vec<HistoryRecord>>;
}

/// Writes canonical records into a target profile's native stores.
pub trait Integrator {
    fn family(&self) -> BrowserFamily;
    fn bookmarks(
        &self,
        target: &Profile,
        records: &[ImportedBookmark],
        options: &BookmarkMergeOptions,
    ) -> Result<BookmarkMergeReport>;
    fn history(
        &self,
        target: &Profile,
        records: &[HistoryRecord],
        options: &HistoryMergeOptions,
    ) -> Result<HistoryMergeReport>;
}

pub struct ChromiumExtractor;

impl Extractor for ChromiumExtractor {
    fn family(&self) -> BrowserFamily {
        BrowserFamily::Chromium
    }

    fn bookmarks(&self, profile: &Profile) -> Result<Vec<ImportedBookmark>> {
        chromium::read_bookmarks(profile)
    }

    fn history(&self, profile: &Profile, cutoff: Option<i64>) -> Result<Vec<HistoryRecord>> {
        chromium::read_history(profile, cutoff)
    }
}

/// WebKit, text-mode and exotic browsers all keep plain files.
pub struct FlatFileExtractor {
    family: BrowserFamily,
}

impl FlatFileExtractor {
    pub fn new(family: BrowserFamily) -> Self {
        Self { family }
    }
}

impl Extractor for FlatFileExtractor {
    fn family(&self) -> BrowserFamily {
        self.family
    }

    fn bookmarks(&self, profile: &Profile) -> Result<Vec<ImportedBookmark>> {
        flat_files::read_bookmarks(profile)
    }

    fn history(&self, profile: &Profile, cutoff: Option<i64>) -> Result<Vec<HistoryRecord>> {
        flat_files::read_history(profile, cutoff)
    }
}

/// Integration into a Firefox-family `places.sqlite`, one transaction per call.
pub struct PlacesIntegrator;

impl Integrator for PlacesIntegrator {
    fn family(&self) -> BrowserFamily {
        BrowserFamily::Firefox
    }

    fn bookmarks(
        &self,
        target: &Profile,
        records: &[ImportedBookmark],
        options: &BookmarkMergeOptions,
    ) -> Result<BookmarkMergeReport> {
        db_safety::with_write_transaction(&target.file(PLACES_FILE), |tx| {
            let store = PlacesStore::new(tx)?;
            import_bookmarks(&store, records, options.avoid_duplicates, options.import_tags)
        })
    }

    fn history(
        &self,
        target: &Profile,
        records: &[HistoryRecord],
        options: &HistoryMergeOptions,
    ) -> Result<HistoryMergeReport> {
        db_safety::with_write_transaction(&target.file(PLACES_FILE), |tx| {
            let store = PlacesStore::new(tx)?;
            history::import_records(&store, records, options)
        })
    }
}

/// Extractors and integrators keyed by family. Built once and handed to the migrator.
pub struct HandlerRegistry {
    extractors: HashMap<BrowserFamily, Box<dyn Extractor>>,
    integrators: HashMap<BrowserFamily, Box<dyn Integrator>>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            extractors: HashMap::new(),
            integrators: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register_extractor(Box::new(ChromiumExtractor));
        for family in [BrowserFamily::WebKit, BrowserFamily::Text, BrowserFamily::Exotic] {
            registry.register_extractor(Box::new(FlatFileExtractor::new(family)));
        }
        registry.register_integrator(Box::new(PlacesIntegrator));
        registry
    }

    pub fn register_extractor(&mut self, extractor: Box<dyn Extractor>) {
        self.extractors.insert(extractor.family(), extractor);
    }

    pub fn register_integrator(&mut self, integrator: Box<dyn Integrator>) {
        self.integrators.insert(integrator.family(), integrator);
    }

    pub fn extractor(&self, family: BrowserFamily) -> Option<&dyn Extractor> {
        self.extractors.get(&family).map(|e| e.as_ref())
    }

    pub fn integrator(&self, family: BrowserFamily) -> Option<&dyn Integrator> {
        self.integrators.get(&family).map(|i| i.as_ref())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

pub struct ProfileMigrator {
    registry: HandlerRegistry,
    backup: Option<BackupManager>,
}

impl ProfileMigrator {
    pub fn new(registry: HandlerRegistry, backup: Option<BackupManager>) -> Self {
        Self { registry, backup }
    }

    /// Migrate the selected data types. Never fails as a whole: every
    /// problem is recorded per data type in the report.
    pub fn migrate(
        &self,
        source: &Profile,
        target: &Profile,
        data_types: &[DataType],
        options: &MigrationOptions,
    ) -> MigrationReport {
        let mut report = MigrationReport {
            source: format!("{} ({})", source.name, source.browser_id),
            target: format!("{} ({})", target.name, target.browser_id),
            ..Default::default()
        };
        info!("🚀 Migrating {} -> {}", report.source, report.target);

        for profile in [source, target] {
            if !profile.exists() {
                let e = Error::SourceMissing(profile.path.clone());
                error!("❌ {}", e);
                report.errors.push(e.to_string());
            }
        }
        if !report.errors.is_empty() {
            return report;
        }

        if options.backup {
            match &self.backup {
                Some(manager) => match manager.create_backup(&target.path, &target.browser_id, &target.name) {
                    Ok(path) => report.backup = Some(path),
                    Err(e) => {
                        warn!("⚠️  Backup failed, continuing without it: {}", e);
                        report.warnings.push(format!("backup: {}", e));
                    }
                },
                None => report.warnings.push("backup requested but no backup directory is configured".to_string()),
            }
        }

        let mut seen = Vec::new();
        for data_type in data_types.iter().copied() {
            if seen.contains(&data_type) {
                continue;
            }
            seen.push(data_type);

            info!("📦 {}", data_type);
            let outcome = match self.migrate_type(data_type, source, target, options) {
                Ok(outcome) => outcome,
                Err(e) if e.kind() == ErrorKind::SourceMissing => {
                    warn!("⚠️  Skipping {}: {}", data_type, e);
                    report.warnings.push(format!("{}: {}", data_type, e));
                    DataTypeOutcome::Skipped { reason: e.to_string() }
                }
                Err(e) => {
                    error!("❌ {} failed: {}", data_type, e);
                    report.errors.push(format!("{}: {}", data_type, e));
                    DataTypeOutcome::Failed {
                        kind: e.kind(),
                        error: e.to_string(),
                    }
                }
            };
            report
                .errors
                .extend(outcome.engine_errors().iter().map(|e| format!("{}: {}", data_type, e)));
            report
                .warnings
                .extend(outcome.engine_warnings().iter().map(|w| format!("{}: {}", data_type, w)));
            if let DataTypeOutcome::NotImplemented { reason } = &outcome {
                warn!("⚠️  {}", reason);
            }
            report.migrated_data.insert(data_type, outcome);
        }

        if options.deduplicate && target.family() == Some(BrowserFamily::Firefox) {
            let dedup = bookmarks::deduplicate(&target.file(PLACES_FILE), &options.dedup);
            report
                .errors
                .extend(dedup.errors.iter().map(|e| format!("dedup: {}", e)));
            report.dedup = Some(dedup);
        }

        report.success = report.errors.is_empty();
        if report.success {
            info!("✅ Migration finished");
        } else {
            warn!("⚠️  Migration finished with {} errors", report.errors.len());
        }
        report
    }

    fn migrate_type(
        &self,
        data_type: DataType,
        source: &Profile,
        target: &Profile,
        options: &MigrationOptions,
    ) -> Result<DataTypeOutcome> {
        let (Some(from), Some(to)) = (source.family(), target.family()) else {
            return Ok(not_implemented(data_type, source, target));
        };

        use BrowserFamily::*;
        use DataType::*;
        let outcome = match (data_type, from, to) {
            (Bookmarks, Firefox, Firefox) => {
                let sources = std::slice::from_ref(source);
                DataTypeOutcome::Bookmarks(db_safety::with_write_transaction(
                    &target.file(PLACES_FILE),
                    |tx| bookmarks::merge_into(&PlacesStore::new(tx)?, sources, &options.bookmarks),
                )?)
            }
            (History, Firefox, Firefox) => {
                let sources = std::slice::from_ref(source);
                DataTypeOutcome::History(db_safety::with_write_transaction(
                    &target.file(PLACES_FILE),
                    |tx| history::merge_into(&PlacesStore::new(tx)?, sources, &options.history),
                )?)
            }
            (Sessions, Firefox, Firefox) => DataTypeOutcome::Sessions(session::try_merge_sessions(
                std::slice::from_ref(source),
                target,
                &options.sessions,
            )?),
            (Bookmarks, from, to) if from != to => {
                match (self.registry.extractor(from), self.registry.integrator(to)) {
                    (Some(extractor), Some(integrator)) => {
                        let records = extractor.bookmarks(source)?;
                        info!("📥 Extracted {} bookmarks from {}", records.len(), source.name);
                        DataTypeOutcome::Bookmarks(integrator.bookmarks(target, &records, &options.bookmarks)?)
                    }
                    _ => not_implemented(data_type, source, target),
                }
            }
            (History, from, to) if from != to => {
                match (self.registry.extractor(from), self.registry.integrator(to)) {
                    (Some(extractor), Some(integrator)) => {
                        let cutoff = options.history.cutoff(now_micros());
                        let records = extractor.history(source, cutoff)?;
                        info!("📥 Extracted {} history entries from {}", records.len(), source.name);
                        DataTypeOutcome::History(integrator.history(target, &records, &options.history)?)
                    }
                    _ => not_implemented(data_type, source, target),
                }
            }
            (data_type, from, to) if from == to && !data_type.native_files(from).is_empty() => {
                DataTypeOutcome::Files(file_merge::migrate_files(
                    &source.path,
                    &target.path,
                    data_type,
                    from,
                    options.merge_strategy,
                )?)
            }
            _ => not_implemented(data_type, source, target),
        };
        Ok(outcome)
    }
}

fn not_implemented(data_type: DataType, source: &Profile, target: &Profile) -> DataTypeOutcome {
    let family = |p: &Profile| {
        p.family()
            .map(|f| f.name().to_string())
            .unwrap_or_else(|| p.browser_id.clone())
    };
    DataTypeOutcome::NotImplemented {
        reason: Error::Unsupported {
            data_type: data_type.to_string(),
            from: family(source),
            to: family(target),
        }
        .to_string(),
    }
}
