//! Bookmark and history extraction for browsers that keep plain files:
//! Netscape-style HTML bookmark exports, qutebrowser url lists, and
//! line-oriented history files.

use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::bookmarks::{ImportedBookmark, RootKind};
use crate::error::{Error, Result};
use crate::history::HistoryRecord;
use crate::places::{PlaceEntry, Visit};
use crate::profile::Profile;

const HTML_BOOKMARK_FILES: [&str; 4] = [
    "bookmarks.html",
    "lynx_bookmarks.html",
    "bookmark.html",
    ".w3m/bookmark.html",
];
const URL_LIST_FILES: [&str; 2] = ["bookmarks/urls", "bookmarks"];
const QUICKMARK_FILE: &str = "quickmarks";
const HISTORY_FILES: [&str; 3] = ["history", "globhist", "lynx_history"];

/// Link visit type used for every imported line.
const VISIT_LINK: i64 = 1;

fn skipped_scheme(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    lower.is_empty() || lower.starts_with("place:") || lower.starts_with("javascript:")
}

/// Seconds, milliseconds or microseconds since the Unix epoch, to microseconds.
fn normalize_timestamp(raw: i64) -> Option<i64> {
    match raw {
        r if r <= 0 => None,
        r if r < 100_000_000_000 => Some(r * 1_000_000),
        r if r < 100_000_000_000_000 => Some(r * 1_000),
        r => Some(r),
    }
}

fn import_folder(profile: &Profile) -> String {
    format!("From {}", profile.browser_id)
}

/// Folder names from the `<H3>` headings enclosing a link, outermost first.
fn html_folder_path(link: ElementRef<'_>) -> Vec<String> {
    let mut path = Vec::new();
    for ancestor in link.ancestors() {
        let is_list = ElementRef::wrap(ancestor).map_or(false, |el| el.value().name() == "dl");
        if !is_list {
            continue;
        }
        let heading = ancestor
            .prev_siblings()
            .filter_map(ElementRef::wrap)
            .next()
            .filter(|el| el.value().name() == "h3");
        if let Some(heading) = heading {
            let name = heading.text().collect::<String>().trim().to_string();
            if !name.is_empty() {
                path.push(name);
            }
        }
    }
    path.reverse();
    path
}

/// Parse a Netscape bookmark file. Folders come from `<H3>` headings,
/// `ADD_DATE` (seconds) and `TAGS` are honored when present.
pub fn parse_bookmark_html(html: &str, source: &str) -> Result<Vec<ImportedBookmark>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]")
        .map_err(|e| Error::format_invalid(source, format!("selector: {:?}", e)))?;

    let mut bookmarks = Vec::new();
    for link in document.select(&selector) {
        let Some(url) = link.value().attr("href") else {
            continue;
        };
        if skipped_scheme(url) {
            continue;
        }
        let title = link.text().collect::<String>();
        let title = title.trim();
        let mut bookmark = ImportedBookmark::new(if title.is_empty() { url } else { title }, url.trim(), RootKind::Unfiled);
        bookmark.date_added = link
            .value()
            .attr("add_date")
            .and_then(|d| d.trim().parse::<i64>().ok())
            .and_then(normalize_timestamp);
        if let Some(tags) = link.value().attr("tags") {
            bookmark.tags = tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
        bookmark.folder_path = html_folder_path(link);
        bookmarks.push(bookmark);
    }
    Ok(bookmarks)
}

/// `url title...` per line as qutebrowser writes them, or ELinks'
/// tab-separated `name\turl\tdepth` lines.
pub fn parse_url_list(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() >= 2 && fields[1].contains("://") {
                let (name, url) = (fields[0].trim(), fields[1].trim());
                let title = if name.is_empty() { url } else { name };
                return (!skipped_scheme(url)).then(|| (url.to_string(), title.to_string()));
            }
            let (url, title) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let title = title.trim();
            (!skipped_scheme(url)).then(|| {
                (url.to_string(), if title.is_empty() { url.to_string() } else { title.to_string() })
            })
        })
        .collect()
}

/// `name url` per line; the url is the last field.
pub fn parse_quickmarks(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (name, url) = line.rsplit_once(char::is_whitespace)?;
            (!skipped_scheme(url)).then(|| (url.to_string(), name.trim().to_string()))
        })
        .collect()
}

/// One history line: `url|title|timestamp` or `url title... timestamp`.
/// Title and timestamp are optional.
pub fn parse_history_line(line: &str) -> Option<(String, Option<String>, Option<i64>)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (url, title, timestamp) = if line.contains('|') {
        let mut fields = line.splitn(3, '|');
        let url = fields.next().unwrap_or_default().trim();
        let title = fields.next().map(str::trim).unwrap_or_default();
        let timestamp = fields.next().and_then(|t| t.trim().parse::<i64>().ok());
        (url, title.to_string(), timestamp)
    } else {
        let mut parts: Vec<&str> = line.split_whitespace().collect();
        let url = parts.remove(0);
        let timestamp = match parts.last().map(|t| t.parse::<i64>()) {
            Some(Ok(ts)) => {
                parts.pop();
                Some(ts)
            }
            _ => None,
        };
        (url, parts.join(" "), timestamp)
    };

    if skipped_scheme(url) {
        return None;
    }
    let title = (!title.is_empty() && title != url).then_some(title);
    Some((url.to_string(), title, timestamp.and_then(normalize_timestamp)))
}

fn existing_files(profile: &Profile, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| profile.file(name))
        .filter(|path| path.is_file())
        .collect()
}

/// Every bookmark found in the profile's plain files, under an unfiled
/// folder named after the source browser.
pub fn read_bookmarks(profile: &Profile) -> Result<Vec<ImportedBookmark>> {
    let html_files = existing_files(profile, &HTML_BOOKMARK_FILES);
    let list_files = existing_files(profile, &URL_LIST_FILES);
    let quickmarks = existing_files(profile, &[QUICKMARK_FILE]);
    if html_files.is_empty() && list_files.is_empty() && quickmarks.is_empty() {
        return Err(Error::SourceMissing(profile.path.clone()));
    }

    let folder = import_folder(profile);
    let mut bookmarks = Vec::new();

    for path in &html_files {
        let bytes = fs::read(path)?;
        let html = String::from_utf8_lossy(&bytes);
        bookmarks.extend(parse_bookmark_html(&html, &path.to_string_lossy())?);
    }
    for path in &list_files {
        let content = String::from_utf8_lossy(&fs::read(path)?).into_owned();
        bookmarks.extend(
            parse_url_list(&content)
                .into_iter()
                .map(|(url, title)| ImportedBookmark::new(&title, &url, RootKind::Unfiled)),
        );
    }
    for path in &quickmarks {
        let content = String::from_utf8_lossy(&fs::read(path)?).into_owned();
        bookmarks.extend(
            parse_quickmarks(&content)
                .into_iter()
                .map(|(url, title)| ImportedBookmark::new(&title, &url, RootKind::Unfiled)),
        );
    }

    for bookmark in &mut bookmarks {
        bookmark.folder_path.insert(0, folder.clone());
    }
    debug!("Read {} bookmarks from {}", bookmarks.len(), profile.name);
    Ok(bookmarks)
}

/// History lines grouped by URL; every distinct timestamp becomes a visit.
pub fn read_history(profile: &Profile, cutoff: Option<i64>) -> Result<Vec<HistoryRecord>> {
    let files = existing_files(profile, &HISTORY_FILES);
    if files.is_empty() {
        return Err(Error::SourceMissing(profile.file(HISTORY_FILES[0])));
    }

    let mut by_url: BTreeMap<String, HistoryRecord> = BTreeMap::new();
    for path in &files {
        let content = String::from_utf8_lossy(&fs::read(path)?).into_owned();
        for (url, title, timestamp) in content.lines().filter_map(parse_history_line) {
            let record = by_url.entry(url.clone()).or_insert_with(|| HistoryRecord {
                entry: PlaceEntry {
                    url,
                    title: None,
                    visit_count: 0,
                    last_visit_date: None,
                    frecency: 0,
                },
                visits: Vec::new(),
            });
            record.entry.visit_count += 1;
            if record.entry.title.is_none() {
                record.entry.title = title;
            }
            if let Some(ts) = timestamp {
                record.entry.last_visit_date = record.entry.last_visit_date.max(Some(ts));
                if !record.visits.iter().any(|v| v.visit_date == ts) {
                    record.visits.push(Visit {
                        visit_date: ts,
                        visit_type: VISIT_LINK,
                        session: 0,
                    });
                }
            }
        }
    }

    let records: Vec<HistoryRecord> = by_url
        .into_values()
        .filter(|record| match (cutoff, record.entry.last_visit_date) {
            (Some(cutoff), Some(last)) => last >= cutoff,
            _ => true,
        })
        .collect();
    debug!("Read {} history entries from {}", records.len(), profile.name);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NETSCAPE: &str = r#"<!DOCTYPE NETSCAPE-Bookmark-file-1>
<META HTTP-EQUIV="Content-Type" CONTENT="text/html; charset=UTF-8">
<TITLE>Bookmarks</TITLE>
<H1>Bookmarks</H1>
<DL><p>
    <DT><A HREF="https://top.example/" ADD_DATE="1700000000">Top</A>
    <DT><H3>Work</H3>
    <DL><p>
        <DT><A HREF="https://jira.example/" TAGS="work,tickets">Jira</A>
        <DT><H3>Docs</H3>
        <DL><p>
            <DT><A HREF="https://docs.rs/">docs.rs</A>
        </DL><p>
    </DL><p>
    <DT><A HREF="place:sort=8">Recent</A>
</DL><p>
"#;

    #[test]
    fn test_parse_netscape_html() {
        let bookmarks = parse_bookmark_html(NETSCAPE, "bookmarks.html").unwrap();
        assert_eq!(bookmarks.len(), 3);

        assert_eq!(bookmarks[0].title, "Top");
        assert!(bookmarks[0].folder_path.is_empty());
        assert_eq!(bookmarks[0].date_added, Some(1_700_000_000_000_000));

        assert_eq!(bookmarks[1].folder_path, vec!["Work".to_string()]);
        assert_eq!(bookmarks[1].tags, vec!["work".to_string(), "tickets".to_string()]);

        assert_eq!(bookmarks[2].url, "https://docs.rs/");
        assert_eq!(bookmarks[2].folder_path, vec!["Work".to_string(), "Docs".to_string()]);
    }

    #[test]
    fn test_lynx_style_flat_html() {
        let html = r#"<html><body><ul>
            <li><a href="https://lynx.invisible-island.net/">Lynx home</a>
            <li><a href="https://example.org/"></a>
        </ul></body></html>"#;
        let bookmarks = parse_bookmark_html(html, "lynx_bookmarks.html").unwrap();
        assert_eq!(bookmarks.len(), 2);
        assert_eq!(bookmarks[1].title, "https://example.org/");
    }

    #[test]
    fn test_url_lists_and_quickmarks() {
        let urls = parse_url_list("https://a.example/ A site\n# comment\n\nhttps://b.example/\n");
        assert_eq!(
            urls,
            vec![
                ("https://a.example/".to_string(), "A site".to_string()),
                ("https://b.example/".to_string(), "https://b.example/".to_string()),
            ]
        );

        let marks = parse_quickmarks("my news https://news.example/\nbroken\n");
        assert_eq!(marks, vec![("https://news.example/".to_string(), "my news".to_string())]);
    }

    #[test]
    fn test_elinks_tab_separated_bookmarks() {
        let urls = parse_url_list("Rust Lang\thttps://www.rust-lang.org/\t0\t\n");
        assert_eq!(
            urls,
            vec![("https://www.rust-lang.org/".to_string(), "Rust Lang".to_string())]
        );
    }

    #[test]
    fn test_history_line_formats() {
        assert_eq!(
            parse_history_line("https://a.example/|A page|1700000000"),
            Some(("https://a.example/".into(), Some("A page".into()), Some(1_700_000_000_000_000)))
        );
        assert_eq!(
            parse_history_line("https://b.example/ Some title here 1700000000000"),
            Some(("https://b.example/".into(), Some("Some title here".into()), Some(1_700_000_000_000_000)))
        );
        assert_eq!(
            parse_history_line("https://c.example/"),
            Some(("https://c.example/".into(), None, None))
        );
        assert_eq!(parse_history_line("   "), None);
        assert_eq!(parse_history_line("javascript:void(0)"), None);
    }

    #[test]
    fn test_read_bookmarks_from_profile() {
        let dir = TempDir::new().unwrap();
        let profile = Profile::new(dir.path(), "qutebrowser", "default");
        assert!(matches!(read_bookmarks(&profile), Err(Error::SourceMissing(_))));

        fs::create_dir_all(dir.path().join("bookmarks")).unwrap();
        fs::write(dir.path().join("bookmarks/urls"), "https://q.example/ Q\n").unwrap();
        fs::write(dir.path().join("quickmarks"), "gh https://github.com/\n").unwrap();

        let bookmarks = read_bookmarks(&profile).unwrap();
        assert_eq!(bookmarks.len(), 2);
        assert!(bookmarks
            .iter()
            .all(|b| b.folder_path == vec!["From qutebrowser".to_string()] && b.root == RootKind::Unfiled));
    }

    #[test]
    fn test_read_history_groups_by_url() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("history"),
            "https://a.example/|A|1700000000\nhttps://a.example/|A|1700000100\nhttps://a.example/|A|1700000100\nhttps://old.example/|Old|100\n",
        )
        .unwrap();
        let profile = Profile::new(dir.path(), "w3m", "default");

        let records = read_history(&profile, None).unwrap();
        assert_eq!(records.len(), 2);
        let a = &records[0];
        assert_eq!(a.entry.visit_count, 3);
        assert_eq!(a.visits.len(), 2);
        assert_eq!(a.entry.last_visit_date, Some(1_700_000_100_000_000));

        let recent = read_history(&profile, Some(1_600_000_000_000_000)).unwrap();
        assert_eq!(recent.len(), 1);
    }
}
