//! Plain-text rendering of engine results for the terminal.

use crate::backup::{BackupInfo, VerifyReport};
use crate::bookmarks::{BookmarkMergeReport, DedupReport};
use crate::file_merge::FileMergeReport;
use crate::history::HistoryMergeReport;
use crate::migrator::{DataTypeOutcome, MigrationReport};
use crate::session::SessionMergeReport;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

fn header(output: &mut String, title: &str) {
    output.push_str(&format!("\n{}\n", title));
    output.push_str(RULE);
    output.push_str("\n\n");
}

fn footer(output: &mut String, summary: &str) {
    output.push('\n');
    output.push_str(RULE);
    output.push_str(&format!("\n\n📊 Summary: {}\n\n", summary));
}

fn list(output: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    output.push_str(&format!("{}\n", title));
    for item in items {
        output.push_str(&format!("  • {}\n", item));
    }
    output.push('\n');
}

fn bookmark_lines(output: &mut String, r: &BookmarkMergeReport) {
    output.push_str(&format!("  Imported:            {}\n", r.imported));
    output.push_str(&format!("  Skipped duplicates:  {}\n", r.skipped_duplicates));
    output.push_str(&format!("  Folders created:     {}\n", r.folders_created));
}

fn history_lines(output: &mut String, r: &HistoryMergeReport) {
    output.push_str(&format!("  URLs imported:       {}\n", r.urls_imported));
    output.push_str(&format!("  URLs updated:        {}\n", r.urls_updated));
    output.push_str(&format!("  Visits imported:     {}\n", r.visits_imported));
    output.push_str(&format!("  Duplicates skipped:  {}\n", r.duplicates_skipped));
    output.push_str(&format!("  Frecency rescored:   {}\n", r.frecency_recomputed));
}

fn session_lines(output: &mut String, r: &SessionMergeReport) {
    output.push_str(&format!("  Windows added:       {}\n", r.windows_added));
    output.push_str(&format!("  Tabs added:          {}\n", r.tabs_added));
    output.push_str(&format!("  Tabs skipped:        {}\n", r.tabs_skipped));
    output.push_str(&format!("  Closed windows:      {}\n", r.closed_windows_added));
}

fn file_lines(output: &mut String, r: &FileMergeReport) {
    output.push_str(&format!("  Copied:              {}\n", r.copied.join(", ")));
    output.push_str(&format!("  Merged:              {}\n", r.merged.join(", ")));
    output.push_str(&format!("  Kept:                {}\n", r.skipped.join(", ")));
    if r.keys_added + r.keys_replaced > 0 {
        output.push_str(&format!(
            "  Pref keys:           {} added, {} replaced\n",
            r.keys_added, r.keys_replaced
        ));
    }
}

pub fn format_migration(report: &MigrationReport, detailed: bool) -> String {
    let mut output = String::new();
    header(&mut output, &format!("🚀 Migration: {} → {}", report.source, report.target));

    if let Some(backup) = &report.backup {
        output.push_str(&format!("💾 Backup: {}\n\n", backup.display()));
    }

    for (data_type, outcome) in &report.migrated_data {
        match outcome {
            DataTypeOutcome::Bookmarks(r) => {
                output.push_str(&format!("✅ {}\n", data_type));
                bookmark_lines(&mut output, r);
            }
            DataTypeOutcome::History(r) => {
                output.push_str(&format!("✅ {}\n", data_type));
                history_lines(&mut output, r);
            }
            DataTypeOutcome::Sessions(r) => {
                output.push_str(&format!("✅ {}\n", data_type));
                session_lines(&mut output, r);
            }
            DataTypeOutcome::Files(r) => {
                output.push_str(&format!("✅ {}\n", data_type));
                file_lines(&mut output, r);
            }
            DataTypeOutcome::Skipped { reason } => {
                output.push_str(&format!("⏭️  {} - skipped\n", data_type));
                if detailed {
                    output.push_str(&format!("    Reason: {}\n", reason));
                }
            }
            DataTypeOutcome::NotImplemented { reason } => {
                output.push_str(&format!("⏭️  {} - not implemented\n", data_type));
                if detailed {
                    output.push_str(&format!("    Reason: {}\n", reason));
                }
            }
            DataTypeOutcome::Failed { error, .. } => {
                output.push_str(&format!("❌ {} - FAILED\n", data_type));
                output.push_str(&format!("    Error: {}\n", error));
            }
        }
    }
    output.push('\n');

    if let Some(dedup) = &report.dedup {
        output.push_str(&format!(
            "🧹 Deduplicated: {} sets, {} bookmarks removed\n\n",
            dedup.duplicate_sets, dedup.removed
        ));
    }

    if detailed {
        list(&mut output, "⚠️  Warnings:", &report.warnings);
    }
    list(&mut output, "❌ Errors:", &report.errors);

    let applied = report.migrated_data.values().filter(|o| o.is_applied()).count();
    footer(
        &mut output,
        &format!(
            "{}/{} data types applied{}",
            applied,
            report.migrated_data.len(),
            if report.success { "" } else { " (with errors)" }
        ),
    );
    output
}

pub fn format_bookmark_merge(report: &BookmarkMergeReport) -> String {
    let mut output = String::new();
    header(&mut output, "🔖 Bookmark Merge");
    bookmark_lines(&mut output, report);
    output.push('\n');
    list(&mut output, "⚠️  Warnings:", &report.warnings);
    list(&mut output, "❌ Errors:", &report.errors);
    footer(&mut output, &format!("{} sources merged", report.sources_merged));
    output
}

pub fn format_history_merge(report: &HistoryMergeReport) -> String {
    let mut output = String::new();
    header(&mut output, "🕘 History Merge");
    history_lines(&mut output, report);
    output.push('\n');
    list(&mut output, "⚠️  Warnings:", &report.warnings);
    list(&mut output, "❌ Errors:", &report.errors);
    footer(&mut output, &format!("{} sources merged", report.sources_merged));
    output
}

pub fn format_session_merge(report: &SessionMergeReport) -> String {
    let mut output = String::new();
    header(&mut output, "🗂️  Session Merge");
    session_lines(&mut output, report);
    output.push('\n');
    list(&mut output, "⚠️  Warnings:", &report.warnings);
    list(&mut output, "❌ Errors:", &report.errors);
    footer(&mut output, &format!("{} sources merged", report.sources_merged));
    output
}

pub fn format_dedup(report: &DedupReport, dry_run: bool) -> String {
    let mut output = String::new();
    header(&mut output, "🧹 Bookmark Deduplication");
    output.push_str(&format!("  Bookmarks scanned:   {}\n", report.total));
    output.push_str(&format!("  Duplicate sets:      {}\n", report.duplicate_sets));
    output.push_str(&format!(
        "  {}:   {}\n",
        if dry_run { "Would be removed" } else { "Removed         " },
        report.removed
    ));
    output.push('\n');
    list(&mut output, "❌ Errors:", &report.errors);
    footer(
        &mut output,
        &if report.duplicate_sets == 0 {
            "no duplicates found".to_string()
        } else {
            format!("{} duplicate sets", report.duplicate_sets)
        },
    );
    output
}

pub fn format_verify(report: &VerifyReport, detailed: bool) -> String {
    let mut output = String::new();
    header(&mut output, "🔐 Backup Verification");

    if let Some(manifest) = &report.manifest {
        output.push_str(&format!("  Browser:   {}\n", manifest.browser_id));
        output.push_str(&format!("  Profile:   {}\n", manifest.profile_name));
        output.push_str(&format!("  Created:   {}\n", manifest.created_at.to_rfc3339()));
        output.push_str(&format!("  Files:     {}\n\n", manifest.files.len()));
    }
    if let Some(error) = &report.error {
        output.push_str(&format!("❌ {}\n\n", error));
    }

    let missing = report.missing_files.len();
    let corrupted = report.corrupted_files.len();
    if detailed {
        list(&mut output, "❌ Missing:", &report.missing_files);
        list(&mut output, "❌ Hash mismatch:", &report.corrupted_files);
    } else if missing + corrupted > 0 {
        output.push_str(&format!("❌ {} missing, {} mismatched\n\n", missing, corrupted));
    }

    footer(
        &mut output,
        &format!(
            "{} - {} files verified",
            if report.is_valid { "✅ VALID" } else { "❌ INVALID" },
            report.verified_files
        ),
    );
    output
}

pub fn format_backup_list(backups: &[BackupInfo]) -> String {
    let mut output = String::new();
    header(&mut output, "💾 Backups");
    for backup in backups {
        let manifest = &backup.manifest;
        output.push_str(&format!(
            "  • {} / {}  {}  ({} files, {} KB)\n",
            manifest.browser_id,
            manifest.profile_name,
            manifest.created_at.format("%Y-%m-%d %H:%M:%S"),
            manifest.files.len(),
            backup.archive_size / 1024
        ));
        output.push_str(&format!("    {}\n", backup.path.display()));
    }
    footer(&mut output, &format!("{} backups", backups.len()));
    output
}
