//! Generic merges for data that has no dedicated engine: preference
//! statement files, JSON documents, extension directories and opaque files.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::profile::{BrowserFamily, DataType, MergeStrategy};

const PREF_PATTERN: &str = r#"^\s*(user_pref|pref|sticky_pref|lockPref)\(\s*"((?:[^"\\]|\\.)*)"\s*,\s*(.*)\)\s*;\s*$"#;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileMergeReport {
    pub copied: Vec<String>,
    pub merged: Vec<String>,
    pub skipped: Vec<String>,
    pub keys_added: usize,
    pub keys_replaced: usize,
}

impl FileMergeReport {
    pub fn touched(&self) -> usize {
        self.copied.len() + self.merged.len()
    }
}

/// How a native file is merged, decided by its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    Prefs,
    Json,
    Opaque,
}

impl FileKind {
    pub fn of(name: &str) -> Self {
        let base = name.rsplit('/').next().unwrap_or(name);
        if name.ends_with('/') {
            FileKind::Directory
        } else if base == "prefs.js" || base == "user.js" {
            FileKind::Prefs
        } else if base.ends_with(".json") || base == "Preferences" || base == "Secure Preferences" {
            FileKind::Json
        } else {
            FileKind::Opaque
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefsMergeStats {
    pub added: usize,
    pub replaced: usize,
}

/// Merge `prefs.js` style text. The target's own lines keep their order;
/// keys it lacks are appended. With overwrite, shared keys take the
/// source's statement in place.
pub fn merge_prefs_text(target: &str, source: &str, strategy: MergeStrategy) -> Result<(String, PrefsMergeStats)> {
    let pattern = Regex::new(PREF_PATTERN).map_err(|e| Error::format_invalid("prefs.js", e.to_string()))?;
    let key_of = |line: &str| pattern.captures(line).map(|c| c[2].to_string());

    let mut lines: Vec<String> = target.lines().map(String::from).collect();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, line) in lines.iter().enumerate() {
        if let Some(key) = key_of(line) {
            index.insert(key, i);
        }
    }

    let mut stats = PrefsMergeStats::default();
    for line in source.lines() {
        let Some(key) = key_of(line) else {
            continue;
        };
        match index.get(&key) {
            Some(&i) if strategy == MergeStrategy::Overwrite => {
                if lines[i] != line {
                    lines[i] = line.to_string();
                    stats.replaced += 1;
                }
            }
            Some(_) => {}
            None => {
                index.insert(key, lines.len());
                lines.push(line.to_string());
                stats.added += 1;
            }
        }
    }

    let mut merged = lines.join("\n");
    if !merged.is_empty() {
        merged.push('\n');
    }
    Ok((merged, stats))
}

/// Deep merge `source` into `target`. Objects recurse, arrays gain the
/// source's missing elements, and scalars follow the strategy.
pub fn merge_json_values(target: &mut Value, source: &Value, strategy: MergeStrategy) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(key) {
                    Some(target_value) => merge_json_values(target_value, source_value, strategy),
                    None => {
                        target_map.insert(key.clone(), source_value.clone());
                    }
                }
            }
        }
        (Value::Array(target_items), Value::Array(source_items)) => {
            for item in source_items {
                if !target_items.contains(item) {
                    target_items.push(item.clone());
                }
            }
        }
        (target, source) => {
            if strategy == MergeStrategy::Overwrite {
                *target = source.clone();
            }
        }
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| Error::format_invalid(path, e.to_string()))
}

fn copy_into_place(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, target)?;
    Ok(())
}

/// Copy a file unless the target already has one and the strategy keeps it.
/// Returns whether the file was written.
pub fn copy_file(source: &Path, target: &Path, strategy: MergeStrategy) -> Result<bool> {
    if target.exists() && strategy != MergeStrategy::Overwrite {
        return Ok(false);
    }
    copy_into_place(source, target)?;
    Ok(true)
}

/// Copy a directory tree file by file. Existing files are replaced only with overwrite.
pub fn merge_directory(source: &Path, target: &Path, strategy: MergeStrategy) -> Result<(usize, usize)> {
    let mut copied = 0;
    let mut skipped = 0;
    for entry in WalkDir::new(source).into_iter() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        if copy_file(entry.path(), &target.join(relative), strategy)? {
            copied += 1;
        } else {
            skipped += 1;
        }
    }
    Ok((copied, skipped))
}

/// Merge the native files of one data type from `source_dir` into
/// `target_dir`, both profiles of `family`.
pub fn migrate_files(
    source_dir: &Path,
    target_dir: &Path,
    data_type: DataType,
    family: BrowserFamily,
    strategy: MergeStrategy,
) -> Result<FileMergeReport> {
    let names = data_type.native_files(family);
    let present: Vec<&str> = names
        .iter()
        .copied()
        .filter(|name| source_dir.join(name.trim_end_matches('/')).exists())
        .collect();
    if present.is_empty() {
        let first = names.first().copied().unwrap_or_default();
        return Err(Error::SourceMissing(source_dir.join(first.trim_end_matches('/'))));
    }

    let report = if data_type.is_pass_through() {
        copy_as_unit(source_dir, target_dir, &present, strategy)?
    } else {
        merge_named_files(source_dir, target_dir, &present, strategy)?
    };

    info!(
        "📄 {}: {} copied, {} merged, {} kept",
        data_type,
        report.copied.len(),
        report.merged.len(),
        report.skipped.len()
    );
    Ok(report)
}

/// All files of the set go over together, or the target keeps its own set.
fn copy_as_unit(
    source_dir: &Path,
    target_dir: &Path,
    names: &[&str],
    strategy: MergeStrategy,
) -> Result<FileMergeReport> {
    let mut report = FileMergeReport::default();
    let target_has_any = names.iter().any(|name| target_dir.join(name.trim_end_matches('/')).exists());

    if target_has_any && strategy != MergeStrategy::Overwrite {
        debug!("Target already holds {:?}, keeping it", names);
        report.skipped = names.iter().map(|n| n.trim_end_matches('/').to_string()).collect();
        return Ok(report);
    }

    for name in names {
        let trimmed = name.trim_end_matches('/');
        let source = source_dir.join(trimmed);
        let target = target_dir.join(trimmed);
        if FileKind::of(name) == FileKind::Directory {
            merge_directory(&source, &target, MergeStrategy::Overwrite)?;
        } else {
            copy_into_place(&source, &target)?;
        }
        report.copied.push(trimmed.to_string());
    }
    Ok(report)
}

fn merge_named_files(
    source_dir: &Path,
    target_dir: &Path,
    names: &[&str],
    strategy: MergeStrategy,
) -> Result<FileMergeReport> {
    let mut report = FileMergeReport::default();
    for name in names {
        let trimmed = name.trim_end_matches('/');
        let source = source_dir.join(trimmed);
        let target = target_dir.join(trimmed);

        match FileKind::of(name) {
            FileKind::Directory => {
                let (copied, skipped) = merge_directory(&source, &target, strategy)?;
                debug!("{}: {} files copied, {} kept", trimmed, copied, skipped);
                if copied > 0 {
                    report.merged.push(trimmed.to_string());
                } else {
                    report.skipped.push(trimmed.to_string());
                }
            }
            FileKind::Prefs if target.exists() => {
                let (merged, stats) = merge_prefs_text(
                    &fs::read_to_string(&target)?,
                    &fs::read_to_string(&source)?,
                    strategy,
                )?;
                fs::write(&target, merged)?;
                report.keys_added += stats.added;
                report.keys_replaced += stats.replaced;
                report.merged.push(trimmed.to_string());
            }
            FileKind::Json if target.exists() => {
                let mut merged = read_json(&target)?;
                merge_json_values(&mut merged, &read_json(&source)?, strategy);
                fs::write(&target, serde_json::to_string_pretty(&merged)?)?;
                report.merged.push(trimmed.to_string());
            }
            FileKind::Prefs | FileKind::Json => {
                copy_into_place(&source, &target)?;
                report.copied.push(trimmed.to_string());
            }
            FileKind::Opaque => {
                if copy_file(&source, &target, strategy)? {
                    report.copied.push(trimmed.to_string());
                } else {
                    report.skipped.push(trimmed.to_string());
                }
            }
        }
    }
    Ok(report)
}
