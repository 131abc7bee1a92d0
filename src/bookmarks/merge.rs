use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{error, info, warn};

use crate::db_safety;
use crate::error::{ErrorKind, Result};
use crate::places::{BookmarkRecord, FolderRecord, PlacesStore, Roots};
use crate::profile::Profile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarkMergeOptions {
    pub preserve_structure: bool,
    pub avoid_duplicates: bool,
    pub import_tags: bool,
}

impl Default for BookmarkMergeOptions {
    fn default() -> Self {
        Self {
            preserve_structure: true,
            avoid_duplicates: true,
            import_tags: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BookmarkMergeReport {
    pub imported: usize,
    pub skipped_duplicates: usize,
    pub folders_created: usize,
    pub sources_merged: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl BookmarkMergeReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn absorb(&mut self, other: BookmarkMergeReport) {
        self.imported += other.imported;
        self.skipped_duplicates += other.skipped_duplicates;
        self.folders_created += other.folders_created;
        self.sources_merged += other.sources_merged;
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }
}

/// Everything read out of one source store.
struct SourceTree {
    roots: Roots,
    folders: Vec<FolderRecord>,
    bookmarks: Vec<BookmarkRecord>,
}

fn read_source(profile: &Profile) -> Result<SourceTree> {
    let conn = db_safety::open_read_only(&profile.file("places.sqlite"))?;
    let store = PlacesStore::new(&conn)?;
    Ok(SourceTree {
        roots: *store.roots(),
        folders: store.read_folders()?,
        bookmarks: store.read_bookmarks()?,
    })
}

/// Folders ordered so every parent comes before its children.
/// Folders whose chain never reaches a root come last.
fn parents_first(folders: &[FolderRecord], roots: &Roots) -> Vec<FolderRecord> {
    let mut children: HashMap<i64, Vec<&FolderRecord>> = HashMap::new();
    for folder in folders {
        children.entry(folder.parent).or_default().push(folder);
    }

    let mut ordered = Vec::with_capacity(folders.len());
    let mut seen = HashSet::new();
    let mut queue: VecDeque<i64> = roots.all().into_iter().collect();
    while let Some(parent) = queue.pop_front() {
        if let Some(kids) = children.get(&parent) {
            for kid in kids {
                if seen.insert(kid.id) {
                    ordered.push((*kid).clone());
                    queue.push_back(kid.id);
                }
            }
        }
    }
    for folder in folders {
        if seen.insert(folder.id) {
            ordered.push(folder.clone());
        }
    }
    ordered
}

/// Import one source tree into the target, growing `seen_urls` as bookmarks land.
fn import_tree(
    store: &PlacesStore<'_>,
    tree: &SourceTree,
    profile_name: &str,
    options: &BookmarkMergeOptions,
    seen_urls: &mut HashSet<String>,
) -> Result<BookmarkMergeReport> {
    let mut report = BookmarkMergeReport::default();
    let target_roots = *store.roots();

    let default_parent = if options.preserve_structure {
        let (id, created) = store.ensure_child_folder(target_roots.menu, profile_name)?;
        if created {
            report.folders_created += 1;
        }
        id
    } else {
        target_roots.unfiled
    };

    let mut folder_map: HashMap<i64, i64> = tree
        .roots
        .all()
        .into_iter()
        .map(|root| (root, default_parent))
        .collect();

    if options.preserve_structure {
        for folder in parents_first(&tree.folders, &tree.roots) {
            let parent = folder_map
                .get(&folder.parent)
                .copied()
                .unwrap_or(default_parent);
            let (id, created) = store.ensure_child_folder(parent, &folder.title)?;
            if created {
                report.folders_created += 1;
            }
            folder_map.insert(folder.id, id);
        }
    }

    for bookmark in &tree.bookmarks {
        if options.avoid_duplicates && seen_urls.contains(&bookmark.url) {
            report.skipped_duplicates += 1;
            continue;
        }

        let parent = if options.preserve_structure {
            folder_map
                .get(&bookmark.parent)
                .copied()
                .unwrap_or(default_parent)
        } else {
            default_parent
        };

        let place_id = store.ensure_place(&bookmark.url, &bookmark.title)?;
        store.insert_bookmark(
            place_id,
            parent,
            &bookmark.title,
            bookmark.date_added,
            bookmark.last_modified,
        )?;
        if options.import_tags && !bookmark.tags.is_empty() {
            store.add_tags(place_id, bookmark.tags.iter().map(String::as_str))?;
        }

        seen_urls.insert(bookmark.url.clone());
        report.imported += 1;
    }

    report.sources_merged = 1;
    Ok(report)
}

/// Merge bookmarks from several source stores into an open target store.
///
/// A source that is missing is skipped with a warning; one that cannot be
/// read is reported and skipped. Write failures abort the whole merge.
pub fn merge_into(
    store: &PlacesStore<'_>,
    sources: &[Profile],
    options: &BookmarkMergeOptions,
) -> Result<BookmarkMergeReport> {
    let mut report = BookmarkMergeReport::default();
    let mut seen_urls = store.bookmarked_urls()?;

    for source in sources {
        let tree = match read_source(source) {
            Ok(tree) => tree,
            Err(e) if e.kind() == ErrorKind::SourceMissing => {
                warn!("⚠️  Skipping {}: {}", source.name, e);
                report.warnings.push(format!("{}: {}", source.name, e));
                continue;
            }
            Err(e) => {
                warn!("⚠️  Could not read bookmarks of {}: {}", source.name, e);
                report.errors.push(format!("{}: {}", source.name, e));
                continue;
            }
        };

        info!(
            "📥 Importing {} bookmarks and {} folders from {}",
            tree.bookmarks.len(),
            tree.folders.len(),
            source.name
        );
        let imported = import_tree(store, &tree, &source.name, options, &mut seen_urls)?;
        report.absorb(imported);
    }

    Ok(report)
}

/// Merge bookmarks from `sources` into `target`'s places store in one transaction.
pub fn merge_bookmarks(
    sources: &[Profile],
    target: &Profile,
    options: &BookmarkMergeOptions,
) -> BookmarkMergeReport {
    info!("🔄 Merging bookmarks from {} profiles into {}", sources.len(), target.name);

    let result = db_safety::with_write_transaction(&target.file("places.sqlite"), |tx| {
        let store = PlacesStore::new(tx)?;
        merge_into(&store, sources, options)
    });

    match result {
        Ok(report) => {
            info!(
                "✅ Imported {} bookmarks, skipped {} duplicates, created {} folders",
                report.imported, report.skipped_duplicates, report.folders_created
            );
            report
        }
        Err(e) => {
            error!("❌ Bookmark merge failed: {}", e);
            BookmarkMergeReport {
                errors: vec![e.to_string()],
                ..Default::default()
            }
        }
    }
}
