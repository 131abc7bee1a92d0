use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::Result;
use crate::places::{now_micros, PlacesStore};

use super::BookmarkMergeReport;

/// Which special folder an imported record hangs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootKind {
    Toolbar,
    Menu,
    Unfiled,
    Mobile,
}

/// A bookmark pulled out of a foreign store, positioned by folder path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedBookmark {
    pub title: String,
    pub url: String,
    /// Unix microseconds; `None` means "now".
    pub date_added: Option<i64>,
    pub root: RootKind,
    /// Folder names below the root, outermost first.
    pub folder_path: Vec<String>,
    pub tags: Vec<String>,
}

impl ImportedBookmark {
    pub fn new(title: &str, url: &str, root: RootKind) -> Self {
        Self {
            title: title.to_string(),
            url: url.to_string(),
            date_added: None,
            root,
            folder_path: Vec::new(),
            tags: Vec::new(),
        }
    }
}

/// Recreates folder paths once per import, keyed by `root/a/b`.
struct FolderCache {
    folders: HashMap<String, i64>,
    created: usize,
}

impl FolderCache {
    fn new() -> Self {
        Self {
            folders: HashMap::new(),
            created: 0,
        }
    }

    fn resolve(&mut self, store: &PlacesStore<'_>, root: RootKind, path: &[String]) -> Result<i64> {
        let roots = store.roots();
        let mut parent = match root {
            RootKind::Toolbar => roots.toolbar,
            RootKind::Menu => roots.menu,
            RootKind::Unfiled => roots.unfiled,
            RootKind::Mobile => roots.mobile,
        };

        let mut key = format!("{:?}", root);
        for name in path.iter().filter(|n| !n.trim().is_empty()) {
            key.push('/');
            key.push_str(name);
            parent = match self.folders.get(&key) {
                Some(id) => *id,
                None => {
                    let (id, created) = store.ensure_child_folder(parent, name)?;
                    if created {
                        self.created += 1;
                        debug!("Created folder {}", key);
                    }
                    self.folders.insert(key.clone(), id);
                    id
                }
            };
        }
        Ok(parent)
    }
}

/// Insert foreign bookmarks into an open places store.
///
/// With `avoid_duplicates`, a URL already bookmarked in the target (or
/// imported earlier in this call) is skipped.
pub fn import_bookmarks(
    store: &PlacesStore<'_>,
    records: &[ImportedBookmark],
    avoid_duplicates: bool,
    import_tags: bool,
) -> Result<BookmarkMergeReport> {
    let mut report = BookmarkMergeReport::default();
    let mut seen: HashSet<String> = store.bookmarked_urls()?;
    let mut folders = FolderCache::new();

    for record in records {
        if record.url.trim().is_empty() {
            continue;
        }
        if avoid_duplicates && seen.contains(&record.url) {
            report.skipped_duplicates += 1;
            continue;
        }

        let parent = folders.resolve(store, record.root, &record.folder_path)?;
        let added = record.date_added.unwrap_or_else(now_micros);
        let place_id = store.ensure_place(&record.url, &record.title)?;
        store.insert_bookmark(place_id, parent, &record.title, added, added)?;
        if import_tags && !record.tags.is_empty() {
            store.add_tags(place_id, record.tags.iter().map(String::as_str))?;
        }

        seen.insert(record.url.clone());
        report.imported += 1;
    }

    report.folders_created = folders.created;
    report.sources_merged = 1;
    Ok(report)
}
