//! Bookmark deduplication and merging for places stores.

pub mod dedup;
pub mod import;
pub mod merge;

pub use dedup::{deduplicate, deduplicate_in, find_duplicates, DedupOptions, DedupReport, DuplicateSet};
pub use import::{import_bookmarks, ImportedBookmark, RootKind};
pub use merge::{merge_bookmarks, merge_into, BookmarkMergeOptions, BookmarkMergeReport};
