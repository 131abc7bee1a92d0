//! Session snapshots (`sessionstore.jsonlz4`) and merging them.

pub mod mozlz4;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::profile::Profile;

pub const PRIMARY_FILE: &str = "sessionstore.jsonlz4";
pub const RECOVERY_FILE: &str = "sessionstore-backups/recovery.jsonlz4";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    #[serde(default)]
    pub windows: Vec<Window>,
    #[serde(rename = "selectedWindow", default)]
    pub selected_window: i64,
    #[serde(rename = "_closedWindows", default)]
    pub closed_windows: Vec<Window>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            version: Some(serde_json::json!(["sessionrestore", 1])),
            windows: Vec::new(),
            selected_window: 0,
            closed_windows: Vec::new(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Window {
    #[serde(default)]
    pub tabs: Vec<Tab>,
    #[serde(rename = "_closedTabs", default)]
    pub closed_tabs: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    #[serde(default)]
    pub entries: Vec<Entry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tab {
    /// The page the tab is showing: its last navigation entry.
    pub fn identity_url(&self) -> Option<&str> {
        self.entries.last().and_then(|e| e.url.as_deref())
    }
}

impl Session {
    pub fn from_json(bytes: &[u8], path: &Path) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::format_invalid(path, format!("session JSON: {}", e)))
    }

    pub fn tab_urls(&self) -> HashSet<String> {
        self.windows
            .iter()
            .flat_map(|w| w.tabs.iter())
            .filter_map(|t| t.identity_url().map(str::to_string))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMergeOptions {
    pub allow_duplicates: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionMergeReport {
    pub windows_added: usize,
    pub tabs_added: usize,
    pub tabs_skipped: usize,
    pub closed_windows_added: usize,
    pub sources_merged: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl SessionMergeReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Append the windows of `sources` to `target`, skipping tabs already open.
pub fn merge_into(
    target: &mut Session,
    sources: &[Session],
    options: &SessionMergeOptions,
    report: &mut SessionMergeReport,
) {
    let mut open_urls = target.tab_urls();

    for source in sources {
        for window in &source.windows {
            let mut tabs = Vec::new();
            let mut kept_from = Vec::new();
            for (index, tab) in window.tabs.iter().enumerate() {
                let url = match tab.identity_url() {
                    Some(url) => url,
                    None => continue,
                };
                if !options.allow_duplicates && open_urls.contains(url) {
                    report.tabs_skipped += 1;
                    continue;
                }
                open_urls.insert(url.to_string());
                tabs.push(tab.clone());
                kept_from.push(index);
            }

            if tabs.is_empty() {
                continue;
            }

            let mut extra = window.extra.clone();
            if let Some(selected) = extra.get("selected").and_then(Value::as_u64) {
                let selected = reselect(selected as usize, &kept_from);
                extra.insert("selected".to_string(), Value::from(selected));
            }

            report.tabs_added += tabs.len();
            report.windows_added += 1;
            target.windows.push(Window {
                tabs,
                closed_tabs: Vec::new(),
                extra,
            });
        }

        report.closed_windows_added += source.closed_windows.len();
        target
            .closed_windows
            .extend(source.closed_windows.iter().cloned());
        report.sources_merged += 1;
    }

    if !target.windows.is_empty() {
        target.selected_window = 0;
    }
}

/// 1-based `selected` of a window after filtering, where `kept_from` holds
/// the original 0-based positions of the kept tabs. A dropped selection
/// moves to the nearest kept tab before it, or the first tab.
fn reselect(selected: usize, kept_from: &[usize]) -> usize {
    let original = selected.saturating_sub(1);
    match kept_from.binary_search(&original) {
        Ok(position) => position + 1,
        Err(insert_at) => insert_at.max(1),
    }
}

/// Read a profile's session, falling back to the recovery copy.
pub fn read_session(profile_dir: &Path) -> Result<Session> {
    let mut first_error = None;
    for relative in [PRIMARY_FILE, RECOVERY_FILE] {
        let path = profile_dir.join(relative);
        let parsed = mozlz4::read_file(&path).and_then(|json| Session::from_json(&json, &path));
        match parsed {
            Ok(session) => {
                debug!("Read session from {:?}", path);
                return Ok(session);
            }
            Err(e) => {
                if e.kind() != ErrorKind::SourceMissing {
                    warn!("⚠️  Unreadable session file {:?}: {}", path, e);
                }
                // a corrupt primary is more useful to report than a missing recovery file
                if first_error
                    .as_ref()
                    .map_or(true, |prev: &Error| prev.kind() == ErrorKind::SourceMissing)
                {
                    first_error = Some(e);
                }
            }
        }
    }
    Err(first_error.unwrap_or_else(|| Error::SourceMissing(profile_dir.join(PRIMARY_FILE))))
}

/// Write the session to both the primary and recovery locations.
pub fn write_session(profile_dir: &Path, session: &Session) -> Result<Vec<PathBuf>> {
    let json = serde_json::to_vec(session)?;
    let mut written = Vec::new();
    for relative in [PRIMARY_FILE, RECOVERY_FILE] {
        let path = profile_dir.join(relative);
        mozlz4::write_file(&path, &json)?;
        written.push(path);
    }
    Ok(written)
}

pub(crate) fn try_merge_sessions(
    sources: &[Profile],
    target: &Profile,
    options: &SessionMergeOptions,
) -> Result<SessionMergeReport> {
    let mut report = SessionMergeReport::default();

    let mut loaded = Vec::new();
    for source in sources {
        match read_session(&source.path) {
            Ok(session) => loaded.push(session),
            Err(e) if e.kind() == ErrorKind::SourceMissing => {
                warn!("⚠️  No session in {}: {}", source.name, e);
                report.warnings.push(format!("{}: {}", source.name, e));
            }
            Err(e) => {
                warn!("⚠️  Could not read session of {}: {}", source.name, e);
                report.errors.push(format!("{}: {}", source.name, e));
            }
        }
    }

    let mut merged = match read_session(&target.path) {
        Ok(session) => session,
        Err(e) if e.kind() == ErrorKind::SourceMissing => {
            if loaded.is_empty() {
                info!("Nothing to merge into {}", target.name);
                return Ok(report);
            }
            // no session yet: the first source becomes the target as is
            let first = loaded.remove(0);
            report.windows_added += first.windows.len();
            report.tabs_added += first.windows.iter().map(|w| w.tabs.len()).sum::<usize>();
            report.sources_merged += 1;
            first
        }
        Err(e) => return Err(e),
    };

    merge_into(&mut merged, &loaded, options, &mut report);
    let written = write_session(&target.path, &merged)?;
    debug!("Wrote session to {:?}", written);
    Ok(report)
}

/// Merge the sessions of `sources` into `target`'s session files.
pub fn merge_sessions(
    sources: &[Profile],
    target: &Profile,
    options: &SessionMergeOptions,
) -> SessionMergeReport {
    info!("🔄 Merging sessions from {} profiles into {}", sources.len(), target.name);

    match try_merge_sessions(sources, target, options) {
        Ok(report) => {
            info!(
                "✅ Added {} windows with {} tabs, skipped {} duplicate tabs",
                report.windows_added, report.tabs_added, report.tabs_skipped
            );
            report
        }
        Err(e) => {
            error!("❌ Session merge failed: {}", e);
            SessionMergeReport {
                errors: vec![e.to_string()],
                ..Default::default()
            }
        }
    }
}
