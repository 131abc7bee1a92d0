//! Reading Chromium-family profiles: the `Bookmarks` JSON file and the
//! `History` SQLite store.

use rusqlite::params;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::bookmarks::{ImportedBookmark, RootKind};
use crate::db_safety;
use crate::error::{Error, Result};
use crate::history::HistoryRecord;
use crate::places::{PlaceEntry, Visit};
use crate::profile::Profile;

/// Microseconds between 1601-01-01 and 1970-01-01.
pub const WEBKIT_EPOCH_OFFSET: i64 = 11_644_473_600_000_000;

const ROOTS: [(&str, RootKind); 3] = [
    ("bookmark_bar", RootKind::Toolbar),
    ("other", RootKind::Unfiled),
    ("synced", RootKind::Mobile),
];

/// WebKit timestamp to Unix microseconds. Zero means "unset" in Chromium stores.
pub fn webkit_to_unix(timestamp: i64) -> Option<i64> {
    if timestamp <= 0 {
        return None;
    }
    let unix = timestamp - WEBKIT_EPOCH_OFFSET;
    (unix > 0).then_some(unix)
}

/// Chromium page transition (core type in the low byte) to a Firefox visit type.
pub fn map_transition(transition: i64) -> i64 {
    match transition & 0xFF {
        0 => 1,  // link
        1 => 2,  // typed
        2 => 3,  // auto bookmark
        3 => 4,  // auto subframe -> embed
        4 => 8,  // manual subframe -> framed link
        5 => 2,  // generated
        6 => 1,  // auto toplevel
        7 => 1,  // form submit
        8 => 9,  // reload
        9 => 2,  // keyword
        10 => 2, // keyword generated
        _ => 1,
    }
}

/// `date_added` is a decimal string in the JSON file; tolerate plain numbers too.
fn json_timestamp(node: &Value, key: &str) -> Option<i64> {
    match node.get(key)? {
        Value::String(s) => s.parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
    .and_then(webkit_to_unix)
}

fn walk_node(node: &Value, root: RootKind, path: &mut Vec<String>, out: &mut Vec<ImportedBookmark>) {
    let Some(children) = node.get("children").and_then(Value::as_array) else {
        return;
    };
    for child in children {
        let name = child.get("name").and_then(Value::as_str).unwrap_or("");
        match child.get("type").and_then(Value::as_str) {
            Some("folder") => {
                path.push(name.to_string());
                walk_node(child, root, path, out);
                path.pop();
            }
            Some("url") => {
                let Some(url) = child.get("url").and_then(Value::as_str) else {
                    continue;
                };
                let mut bookmark = ImportedBookmark::new(name, url, root);
                bookmark.date_added = json_timestamp(child, "date_added");
                bookmark.folder_path = path.clone();
                out.push(bookmark);
            }
            _ => {}
        }
    }
}

/// Flatten a parsed `Bookmarks` document into path-positioned records.
pub fn parse_bookmarks(json: &Value, source: &Path) -> Result<Vec<ImportedBookmark>> {
    let roots = json
        .get("roots")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::format_invalid(source, "missing \"roots\" object"))?;

    let mut bookmarks = Vec::new();
    for (key, root) in ROOTS {
        if let Some(node) = roots.get(key) {
            walk_node(node, root, &mut Vec::new(), &mut bookmarks);
        }
    }
    Ok(bookmarks)
}

pub fn read_bookmarks(profile: &Profile) -> Result<Vec<ImportedBookmark>> {
    let path = profile.file("Bookmarks");
    if !path.is_file() {
        return Err(Error::SourceMissing(path));
    }
    let content = fs::read_to_string(&path)?;
    let json: Value =
        serde_json::from_str(&content).map_err(|e| Error::format_invalid(&path, e.to_string()))?;
    let bookmarks = parse_bookmarks(&json, &path)?;
    debug!("Read {} bookmarks from {}", bookmarks.len(), profile.name);
    Ok(bookmarks)
}

/// Read `urls` and `visits` from a Chromium `History` store.
///
/// Frecency is left at 0 so the merge recomputes it.
pub fn read_history(profile: &Profile, cutoff: Option<i64>) -> Result<Vec<HistoryRecord>> {
    let path = profile.file("History");
    let conn = db_safety::open_read_only(&path)?;

    let mut url_stmt = conn.prepare(
        "SELECT id, url, title, visit_count, last_visit_time FROM urls
         WHERE hidden = 0 OR hidden IS NULL
         ORDER BY id",
    )?;
    let rows = url_stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<i64>>(3)?.unwrap_or(0),
            row.get::<_, Option<i64>>(4)?.unwrap_or(0),
        ))
    })?;

    let mut visit_stmt = conn.prepare(
        "SELECT visit_time, transition FROM visits WHERE url = ?1 ORDER BY visit_time",
    )?;

    let mut records = Vec::new();
    for row in rows {
        let (id, url, title, visit_count, last_visit_time) = row?;
        let last_visit_date = webkit_to_unix(last_visit_time);
        if let (Some(cutoff), Some(last)) = (cutoff, last_visit_date) {
            if last < cutoff {
                continue;
            }
        }

        let visits = visit_stmt
            .query_map(params![id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?.unwrap_or(0)))
            })?
            .filter_map(|visit| match visit {
                Ok((time, transition)) => webkit_to_unix(time).map(|visit_date| {
                    Ok(Visit {
                        visit_date,
                        visit_type: map_transition(transition),
                        session: 0,
                    })
                }),
                Err(e) => Some(Err(e)),
            })
            .collect::<rusqlite::Result<Vec<_>>>()?;

        records.push(HistoryRecord {
            entry: PlaceEntry {
                url,
                title: title.filter(|t| !t.is_empty()),
                visit_count,
                last_visit_date,
                frecency: 0,
            },
            visits,
        });
    }

    debug!("Read {} history entries from {}", records.len(), profile.name);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use serde_json::json;
    use tempfile::TempDir;

    const JAN_2024_UNIX: i64 = 1_704_067_200_000_000;

    fn webkit(unix: i64) -> i64 {
        unix + WEBKIT_EPOCH_OFFSET
    }

    #[test]
    fn test_webkit_conversion() {
        assert_eq!(webkit_to_unix(webkit(JAN_2024_UNIX)), Some(JAN_2024_UNIX));
        assert_eq!(webkit_to_unix(0), None);
        assert_eq!(webkit_to_unix(5), None);
    }

    #[test]
    fn test_transition_mapping_uses_core_byte() {
        assert_eq!(map_transition(0), 1);
        assert_eq!(map_transition(1), 2);
        assert_eq!(map_transition(8), 9);
        // qualifier bits above the core byte are ignored
        assert_eq!(map_transition(0x3000_0001), 2);
        assert_eq!(map_transition(200), 1);
    }

    #[test]
    fn test_parse_bookmarks_maps_roots_and_paths() {
        let doc = json!({
            "roots": {
                "bookmark_bar": {
                    "type": "folder",
                    "children": [
                        {"type": "url", "name": "Rust", "url": "https://rust-lang.org",
                         "date_added": webkit(JAN_2024_UNIX).to_string()},
                        {"type": "folder", "name": "Dev", "children": [
                            {"type": "folder", "name": "Docs", "children": [
                                {"type": "url", "name": "Serde", "url": "https://serde.rs"}
                            ]}
                        ]}
                    ]
                },
                "other": {"children": [{"type": "url", "name": "O", "url": "https://o.example"}]},
                "synced": {"children": [{"type": "url", "name": "M", "url": "https://m.example"}]}
            }
        });

        let bookmarks = parse_bookmarks(&doc, Path::new("Bookmarks")).unwrap();
        assert_eq!(bookmarks.len(), 4);
        assert_eq!(bookmarks[0].root, RootKind::Toolbar);
        assert_eq!(bookmarks[0].date_added, Some(JAN_2024_UNIX));
        assert_eq!(bookmarks[1].folder_path, vec!["Dev".to_string(), "Docs".to_string()]);
        assert_eq!(bookmarks[1].date_added, None);
        assert_eq!(bookmarks[2].root, RootKind::Unfiled);
        assert_eq!(bookmarks[3].root, RootKind::Mobile);
    }

    #[test]
    fn test_missing_roots_is_format_invalid() {
        let err = parse_bookmarks(&json!({"version": 1}), Path::new("Bookmarks")).unwrap_err();
        assert!(matches!(err, Error::FormatInvalid { .. }));
    }

    #[test]
    fn test_read_bookmarks_missing_and_malformed() {
        let dir = TempDir::new().unwrap();
        let profile = Profile::new(dir.path(), "chrome", "Default");
        assert!(matches!(read_bookmarks(&profile), Err(Error::SourceMissing(_))));

        fs::write(dir.path().join("Bookmarks"), "{ not json").unwrap();
        assert!(matches!(read_bookmarks(&profile), Err(Error::FormatInvalid { .. })));
    }

    #[test]
    fn test_read_history() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path().join("History")).unwrap();
        conn.execute_batch(
            "CREATE TABLE urls (id INTEGER PRIMARY KEY, url TEXT, title TEXT,
                 visit_count INTEGER, typed_count INTEGER, last_visit_time INTEGER, hidden INTEGER);
             CREATE TABLE visits (id INTEGER PRIMARY KEY, url INTEGER, visit_time INTEGER,
                 from_visit INTEGER, transition INTEGER);",
        )
        .unwrap();
        let last = webkit(JAN_2024_UNIX);
        conn.execute(
            "INSERT INTO urls VALUES (1, 'https://a.example/', 'A', 2, 0, ?1, 0)",
            params![last],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO urls VALUES (2, 'https://old.example/', '', 1, 0, ?1, 0)",
            params![webkit(1_000_000)],
        )
        .unwrap();
        conn.execute("INSERT INTO visits VALUES (1, 1, ?1, 0, 805306368)", params![last - 10])
            .unwrap();
        conn.execute("INSERT INTO visits VALUES (2, 1, ?1, 0, 1)", params![last]).unwrap();
        drop(conn);

        let profile = Profile::new(dir.path(), "chrome", "Default");
        let records = read_history(&profile, None).unwrap();
        assert_eq!(records.len(), 2);
        let a = &records[0];
        assert_eq!(a.entry.url, "https://a.example/");
        assert_eq!(a.entry.last_visit_date, Some(JAN_2024_UNIX));
        assert_eq!(a.entry.frecency, 0);
        assert_eq!(a.visits.len(), 2);
        assert_eq!(a.visits[0].visit_type, 1);
        assert_eq!(a.visits[1].visit_type, 2);
        assert_eq!(records[1].entry.title, None);

        let recent = read_history(&profile, Some(JAN_2024_UNIX - 1)).unwrap();
        assert_eq!(recent.len(), 1);
    }
}
