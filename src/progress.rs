use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

/// Spinner shown while an archive is written or extracted.
pub fn archive_spinner(action: &str, subject: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(action.to_string());
    pb.set_message(subject.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

pub fn finish_archive(pb: &ProgressBar, summary: &str, path: &Path) {
    pb.finish_with_message(format!("✅ {} ({})", summary, path.display()));
}

pub fn abandon_archive(pb: &ProgressBar, error: &dyn Display) {
    pb.abandon_with_message(format!("❌ {}", error));
}
