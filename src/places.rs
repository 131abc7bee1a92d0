//! Access to a Firefox-family `places.sqlite` store.
//!
//! Bookmarks, folders and tag folders live in `moz_bookmarks`; the URLs
//! they point at live in `moz_places`; visits live in `moz_historyvisits`.
//! Tags are folders under the tags root whose children reference the
//! tagged place through the same `fk`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use crate::error::Result;

/// Special folders, resolved by GUID with the conventional ids as fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roots {
    pub root: i64,
    pub menu: i64,
    pub toolbar: i64,
    pub tags: i64,
    pub unfiled: i64,
    pub mobile: i64,
}

impl Roots {
    pub fn load(conn: &Connection) -> Result<Self> {
        let lookup = |guid: &str, fallback: i64| -> Result<i64> {
            let id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM moz_bookmarks WHERE guid = ?1",
                    [guid],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id.unwrap_or(fallback))
        };

        Ok(Self {
            root: lookup("root________", 1)?,
            menu: lookup("menu________", 2)?,
            toolbar: lookup("toolbar_____", 3)?,
            tags: lookup("tags________", 4)?,
            unfiled: lookup("unfiled_____", 5)?,
            mobile: lookup("mobile______", 6)?,
        })
    }

    pub fn all(&self) -> [i64; 6] {
        [self.root, self.menu, self.toolbar, self.tags, self.unfiled, self.mobile]
    }

    pub fn is_special(&self, id: i64) -> bool {
        self.all().contains(&id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookmarkRecord {
    pub id: i64,
    pub place_id: i64,
    pub title: String,
    pub url: String,
    pub date_added: i64,
    pub last_modified: i64,
    pub parent: i64,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRecord {
    pub id: i64,
    pub title: String,
    pub parent: i64,
}

/// A `moz_places` row with the columns history merging cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceEntry {
    pub url: String,
    pub title: Option<String>,
    pub visit_count: i64,
    pub last_visit_date: Option<i64>,
    pub frecency: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Visit {
    pub visit_date: i64,
    pub visit_type: i64,
    pub session: i64,
}

/// Thin wrapper over an open connection (usually a transaction).
pub struct PlacesStore<'c> {
    conn: &'c Connection,
    roots: Roots,
    visits_have_session: bool,
    places_have_foreign_count: bool,
}

impl<'c> PlacesStore<'c> {
    pub fn new(conn: &'c Connection) -> Result<Self> {
        let roots = Roots::load(conn)?;
        let visits_have_session = has_column(conn, "moz_historyvisits", "session")?;
        let places_have_foreign_count = has_column(conn, "moz_places", "foreign_count")?;
        Ok(Self {
            conn,
            roots,
            visits_have_session,
            places_have_foreign_count,
        })
    }

    pub fn roots(&self) -> &Roots {
        &self.roots
    }

    pub fn conn(&self) -> &Connection {
        self.conn
    }

    // ----- bookmarks -----

    /// Every real bookmark in the store, oldest id first. Tag entries are not bookmarks.
    pub fn read_bookmarks(&self) -> Result<Vec<BookmarkRecord>> {
        let tags = self.tags_by_place()?;
        let mut stmt = self.conn.prepare(
            "SELECT b.id, b.fk, COALESCE(b.title, ''), p.url,
                    COALESCE(b.dateAdded, 0), COALESCE(b.lastModified, 0), b.parent
             FROM moz_bookmarks b
             JOIN moz_places p ON p.id = b.fk
             WHERE b.type = 1
               AND b.parent != ?1
               AND b.parent NOT IN (SELECT id FROM moz_bookmarks WHERE parent = ?1)
             ORDER BY b.id",
        )?;

        let rows = stmt.query_map([self.roots.tags], |row| {
            Ok(BookmarkRecord {
                id: row.get(0)?,
                place_id: row.get(1)?,
                title: row.get(2)?,
                url: row.get(3)?,
                date_added: row.get(4)?,
                last_modified: row.get(5)?,
                parent: row.get(6)?,
                tags: BTreeSet::new(),
            })
        })?;

        let mut bookmarks = Vec::new();
        for row in rows {
            let mut record = row?;
            if let Some(place_tags) = tags.get(&record.place_id) {
                record.tags = place_tags.clone();
            }
            bookmarks.push(record);
        }

        debug!("Read {} bookmarks from places store", bookmarks.len());
        Ok(bookmarks)
    }

    /// Non-special folders outside the tags tree.
    pub fn read_folders(&self) -> Result<Vec<FolderRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, COALESCE(title, ''), parent FROM moz_bookmarks
             WHERE type = 2 AND parent != ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([self.roots.tags], |row| {
            Ok(FolderRecord {
                id: row.get(0)?,
                title: row.get(1)?,
                parent: row.get(2)?,
            })
        })?;

        let mut folders = Vec::new();
        for row in rows {
            let folder = row?;
            if !self.roots.is_special(folder.id) {
                folders.push(folder);
            }
        }
        Ok(folders)
    }

    pub fn bookmarked_urls(&self) -> Result<HashSet<String>> {
        Ok(self.read_bookmarks()?.into_iter().map(|b| b.url).collect())
    }

    pub fn tags_by_place(&self) -> Result<HashMap<i64, BTreeSet<String>>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.fk, t.title FROM moz_bookmarks e
             JOIN moz_bookmarks t ON t.id = e.parent
             WHERE t.parent = ?1 AND t.type = 2 AND e.type = 1 AND t.title IS NOT NULL",
        )?;
        let rows = stmt.query_map([self.roots.tags], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut tags: HashMap<i64, BTreeSet<String>> = HashMap::new();
        for row in rows {
            let (place_id, tag) = row?;
            tags.entry(place_id).or_default().insert(tag);
        }
        Ok(tags)
    }

    pub fn find_child_folder(&self, parent: i64, title: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM moz_bookmarks WHERE type = 2 AND parent = ?1 AND title = ?2
                 ORDER BY id LIMIT 1",
                params![parent, title],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn insert_folder(&self, parent: i64, title: &str) -> Result<i64> {
        let now = now_micros();
        let position = self.next_position(parent)?;
        self.conn.execute(
            "INSERT INTO moz_bookmarks (type, fk, parent, position, title, dateAdded, lastModified, guid)
             VALUES (2, NULL, ?1, ?2, ?3, ?4, ?4, ?5)",
            params![parent, position, title, now, new_guid()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Reuse a direct child folder with this title, or create it. Returns `(id, created)`.
    pub fn ensure_child_folder(&self, parent: i64, title: &str) -> Result<(i64, bool)> {
        match self.find_child_folder(parent, title)? {
            Some(id) => Ok((id, false)),
            None => Ok((self.insert_folder(parent, title)?, true)),
        }
    }

    pub fn insert_bookmark(
        &self,
        place_id: i64,
        parent: i64,
        title: &str,
        date_added: i64,
        last_modified: i64,
    ) -> Result<i64> {
        let position = self.next_position(parent)?;
        self.conn.execute(
            "INSERT INTO moz_bookmarks (type, fk, parent, position, title, dateAdded, lastModified, guid)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![place_id, parent, position, title, date_added, last_modified, new_guid()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.bump_foreign_count(place_id, 1)?;
        Ok(id)
    }

    /// Remove one bookmark row. The place it references is left alone.
    pub fn delete_bookmark(&self, id: i64) -> Result<()> {
        let place_id: Option<i64> = self
            .conn
            .query_row("SELECT fk FROM moz_bookmarks WHERE id = ?1", [id], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?
            .flatten();
        self.conn.execute("DELETE FROM moz_bookmarks WHERE id = ?1", [id])?;
        if let Some(place_id) = place_id {
            self.bump_foreign_count(place_id, -1)?;
        }
        Ok(())
    }

    /// Renumber a folder's children 0..n keeping their current order.
    pub fn renumber_children(&self, parent: i64) -> Result<()> {
        let ids: Vec<i64> = {
            let mut stmt = self
                .conn
                .prepare("SELECT id FROM moz_bookmarks WHERE parent = ?1 ORDER BY position, id")?;
            let rows = stmt.query_map([parent], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        for (position, id) in ids.iter().enumerate() {
            self.conn.execute(
                "UPDATE moz_bookmarks SET position = ?1 WHERE id = ?2",
                params![position as i64, id],
            )?;
        }
        Ok(())
    }

    pub fn set_last_modified(&self, id: i64, last_modified: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE moz_bookmarks SET lastModified = ?1 WHERE id = ?2",
            params![last_modified, id],
        )?;
        Ok(())
    }

    fn next_position(&self, parent: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM moz_bookmarks WHERE parent = ?1",
            [parent],
            |row| row.get(0),
        )?)
    }

    fn bump_foreign_count(&self, place_id: i64, delta: i64) -> Result<()> {
        if self.places_have_foreign_count {
            self.conn.execute(
                "UPDATE moz_places SET foreign_count = MAX(foreign_count + ?1, 0) WHERE id = ?2",
                params![delta, place_id],
            )?;
        }
        Ok(())
    }

    // ----- tags -----

    /// Add tags to a place. Returns how many tag links were created.
    pub fn add_tags<'a, I>(&self, place_id: i64, tags: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut added = 0;
        for tag in tags {
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            let (folder, _) = self.ensure_child_folder(self.roots.tags, tag)?;
            let exists: Option<i64> = self
                .conn
                .query_row(
                    "SELECT id FROM moz_bookmarks WHERE type = 1 AND parent = ?1 AND fk = ?2",
                    params![folder, place_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                let now = now_micros();
                self.insert_bookmark(place_id, folder, "", now, now)?;
                added += 1;
            }
        }
        Ok(added)
    }

    /// Make the place's tag set exactly `tags`.
    pub fn replace_tags(&self, place_id: i64, tags: &BTreeSet<String>) -> Result<()> {
        let current = self.tags_by_place()?.remove(&place_id).unwrap_or_default();
        for stale in current.difference(tags) {
            if let Some(folder) = self.find_child_folder(self.roots.tags, stale)? {
                let entries: Vec<i64> = {
                    let mut stmt = self.conn.prepare(
                        "SELECT id FROM moz_bookmarks WHERE type = 1 AND parent = ?1 AND fk = ?2",
                    )?;
                    let rows = stmt.query_map(params![folder, place_id], |row| row.get(0))?;
                    rows.collect::<std::result::Result<_, _>>()?
                };
                for entry in entries {
                    self.delete_bookmark(entry)?;
                }
            }
        }
        self.add_tags(place_id, tags.iter().map(String::as_str))?;
        Ok(())
    }

    // ----- places -----

    pub fn find_place(&self, url: &str) -> Result<Option<(i64, PlaceEntry)>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, url, title, COALESCE(visit_count, 0), last_visit_date, COALESCE(frecency, 0)
                 FROM moz_places WHERE url = ?1",
                [url],
                |row| Ok((row.get(0)?, place_from_row(row, 1)?)),
            )
            .optional()?)
    }

    /// Place id for a URL, creating a bare place row if none exists.
    pub fn ensure_place(&self, url: &str, title: &str) -> Result<i64> {
        if let Some((id, _)) = self.find_place(url)? {
            return Ok(id);
        }
        self.insert_place(&PlaceEntry {
            url: url.to_string(),
            title: Some(title.to_string()).filter(|t| !t.is_empty()),
            visit_count: 0,
            last_visit_date: None,
            frecency: -1,
        })
    }

    pub fn insert_place(&self, entry: &PlaceEntry) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO moz_places (url, title, rev_host, visit_count, hidden, typed, frecency, last_visit_date, guid)
             VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?6, ?7)",
            params![
                entry.url,
                entry.title,
                rev_host(&entry.url),
                entry.visit_count,
                entry.frecency,
                entry.last_visit_date,
                new_guid(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_place_stats(
        &self,
        id: i64,
        title: Option<&str>,
        visit_count: i64,
        frecency: i64,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE moz_places SET title = ?1, visit_count = ?2, frecency = ?3 WHERE id = ?4",
            params![title, visit_count, frecency, id],
        )?;
        Ok(())
    }

    /// Places with at least one visit, optionally limited to those visited since `cutoff`.
    pub fn read_history(&self, cutoff: Option<i64>) -> Result<Vec<(i64, PlaceEntry)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, url, title, COALESCE(visit_count, 0), last_visit_date, COALESCE(frecency, 0)
             FROM moz_places
             WHERE (visit_count > 0 OR last_visit_date IS NOT NULL)
               AND (?1 IS NULL OR last_visit_date >= ?1)
             ORDER BY id",
        )?;
        let rows = stmt.query_map([cutoff], |row| Ok((row.get(0)?, place_from_row(row, 1)?)))?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// `(id, visit_count, last_visit_date, frecency)` for every place.
    pub fn frecency_inputs(&self) -> Result<Vec<(i64, i64, Option<i64>, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, COALESCE(visit_count, 0), last_visit_date, COALESCE(frecency, 0) FROM moz_places",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn set_frecency(&self, id: i64, frecency: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE moz_places SET frecency = ?1 WHERE id = ?2",
            params![frecency, id],
        )?;
        Ok(())
    }

    // ----- visits -----

    pub fn read_visits(&self, place_id: i64) -> Result<Vec<Visit>> {
        let sql = if self.visits_have_session {
            "SELECT visit_date, COALESCE(visit_type, 1), COALESCE(session, 0)
             FROM moz_historyvisits WHERE place_id = ?1 ORDER BY visit_date"
        } else {
            "SELECT visit_date, COALESCE(visit_type, 1), 0
             FROM moz_historyvisits WHERE place_id = ?1 ORDER BY visit_date"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([place_id], |row| {
            Ok(Visit {
                visit_date: row.get(0)?,
                visit_type: row.get(1)?,
                session: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn visit_dates(&self, place_id: i64) -> Result<HashSet<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT visit_date FROM moz_historyvisits WHERE place_id = ?1")?;
        let rows = stmt.query_map([place_id], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn insert_visit(&self, place_id: i64, visit: &Visit) -> Result<()> {
        if self.visits_have_session {
            self.conn.execute(
                "INSERT INTO moz_historyvisits (from_visit, place_id, visit_date, visit_type, session)
                 VALUES (0, ?1, ?2, ?3, ?4)",
                params![place_id, visit.visit_date, visit.visit_type, visit.session],
            )?;
        } else {
            self.conn.execute(
                "INSERT INTO moz_historyvisits (from_visit, place_id, visit_date, visit_type)
                 VALUES (0, ?1, ?2, ?3)",
                params![place_id, visit.visit_date, visit.visit_type],
            )?;
        }
        Ok(())
    }

    /// Pull `last_visit_date` forward to the newest visit row.
    pub fn refresh_last_visit(&self, place_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE moz_places SET last_visit_date = (
                 SELECT MAX(v) FROM (
                     SELECT last_visit_date AS v FROM moz_places WHERE id = ?1
                     UNION ALL
                     SELECT MAX(visit_date) FROM moz_historyvisits WHERE place_id = ?1
                 )
             ) WHERE id = ?1",
            [place_id],
        )?;
        Ok(())
    }

    pub fn visit_row_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM moz_historyvisits", [], |row| row.get(0))?)
    }
}

fn place_from_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<PlaceEntry> {
    Ok(PlaceEntry {
        url: row.get(offset)?,
        title: row.get(offset + 1)?,
        visit_count: row.get(offset + 2)?,
        last_visit_date: row.get(offset + 3)?,
        frecency: row.get(offset + 4)?,
    })
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Reversed host with a trailing dot, e.g. `moc.elpmaxe.www.`.
pub fn rev_host(url: &str) -> String {
    match url::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_lowercase)) {
        Some(host) => {
            let mut reversed: String = host.chars().rev().collect();
            reversed.push('.');
            reversed
        }
        None => String::new(),
    }
}

/// 12 character URL-safe GUID, the shape Firefox uses for places rows.
pub fn new_guid() -> String {
    let id = uuid::Uuid::new_v4();
    URL_SAFE_NO_PAD.encode(&id.as_bytes()[..9])
}

pub fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

const SCHEMA: &str = "
CREATE TABLE moz_places (
    id INTEGER PRIMARY KEY,
    url LONGVARCHAR,
    title LONGVARCHAR,
    rev_host LONGVARCHAR,
    visit_count INTEGER DEFAULT 0,
    hidden INTEGER DEFAULT 0 NOT NULL,
    typed INTEGER DEFAULT 0 NOT NULL,
    frecency INTEGER DEFAULT -1 NOT NULL,
    last_visit_date INTEGER,
    guid TEXT,
    foreign_count INTEGER DEFAULT 0 NOT NULL,
    url_hash INTEGER DEFAULT 0 NOT NULL
);
CREATE UNIQUE INDEX moz_places_url_uniqueindex ON moz_places (url);
CREATE UNIQUE INDEX moz_places_guid_uniqueindex ON moz_places (guid);
CREATE TABLE moz_historyvisits (
    id INTEGER PRIMARY KEY,
    from_visit INTEGER,
    place_id INTEGER,
    visit_date INTEGER,
    visit_type INTEGER,
    session INTEGER
);
CREATE INDEX moz_historyvisits_placedateindex ON moz_historyvisits (place_id, visit_date);
CREATE TABLE moz_bookmarks (
    id INTEGER PRIMARY KEY,
    type INTEGER,
    fk INTEGER DEFAULT NULL,
    parent INTEGER,
    position INTEGER,
    title LONGVARCHAR,
    keyword_id INTEGER,
    folder_type TEXT,
    dateAdded INTEGER,
    lastModified INTEGER,
    guid TEXT
);
CREATE UNIQUE INDEX moz_bookmarks_guid_uniqueindex ON moz_bookmarks (guid);
INSERT INTO moz_bookmarks (id, type, parent, position, title, guid) VALUES
    (1, 2, 0, 0, '', 'root________'),
    (2, 2, 1, 0, 'menu', 'menu________'),
    (3, 2, 1, 1, 'toolbar', 'toolbar_____'),
    (4, 2, 1, 2, 'tags', 'tags________'),
    (5, 2, 1, 3, 'unfiled', 'unfiled_____'),
    (6, 2, 1, 4, 'mobile', 'mobile______');
";

/// Create an empty places store holding only the special folders.
pub fn create_store(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}
