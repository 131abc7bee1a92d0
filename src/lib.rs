//! Migrate and merge browser profile data into Floorp.
//!
//! The engines work on closed profiles: bookmark deduplication and merge,
//! history merge with frecency rescoring, session merge over the mozLz4
//! container, profile backups, and a migrator that dispatches each data
//! type by the source and target browser families.

pub mod backup;
pub mod bookmarks;
pub mod chromium;
pub mod config;
pub mod db_safety;
pub mod error;
pub mod file_merge;
pub mod flat_files;
pub mod history;
pub mod migrator;
pub mod places;
pub mod profile;
pub mod progress;
pub mod report;
pub mod session;

pub use backup::{ArchiveFormat, BackupManager, VerifyMode};
pub use config::Settings;
pub use error::{Error, ErrorKind, Result};
pub use migrator::{DataTypeOutcome, HandlerRegistry, MigrationOptions, MigrationReport, ProfileMigrator};
pub use profile::{BrowserFamily, DataType, MergeStrategy, Profile};
