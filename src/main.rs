use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use floorp_merge::backup::VerifyMode;
use floorp_merge::config::{default_settings_path, Settings};
use floorp_merge::profile::parse_data_types;
use floorp_merge::{bookmarks, history, progress, report, session};
use floorp_merge::{HandlerRegistry, MergeStrategy, MigrationOptions, Profile, ProfileMigrator};

#[derive(Parser)]
#[command(name = "floorp-merge")]
#[command(about = "Migrate and merge browser profiles into Floorp", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (default: <config_dir>/floorp-merge/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the structured result as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, inspect and restore profile backups
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Remove duplicate bookmarks (same URL) from a profile
    Dedup {
        /// Profile as BROWSER_ID:PATH
        profile: Profile,

        /// Show what would be removed without making changes
        #[arg(short, long)]
        dry_run: bool,

        /// Keep the first bookmark of a set instead of the newest
        #[arg(long)]
        keep_first: bool,

        /// Do not carry tags of removed bookmarks over to the survivor
        #[arg(long)]
        drop_tags: bool,
    },

    /// Merge bookmarks of several Firefox-family profiles into one
    MergeBookmarks {
        /// Target profile as BROWSER_ID:PATH
        #[arg(short, long)]
        target: Profile,

        /// Source profiles as BROWSER_ID:PATH
        #[arg(required = true)]
        sources: Vec<Profile>,

        /// Import into the target's folders directly instead of a per-profile folder
        #[arg(long)]
        flat: bool,

        /// Import bookmarks even if the URL is already bookmarked
        #[arg(long)]
        allow_duplicates: bool,

        #[arg(long)]
        no_tags: bool,
    },

    /// Merge history of several Firefox-family profiles into one
    MergeHistory {
        #[arg(short, long)]
        target: Profile,

        #[arg(required = true)]
        sources: Vec<Profile>,

        /// Only entries visited in the last N days (0 = all)
        #[arg(long)]
        max_age_days: Option<u32>,

        /// Recompute frecency for every place
        #[arg(long)]
        reset_frecency: bool,

        /// Skip individual visit rows
        #[arg(long)]
        no_visits: bool,
    },

    /// Merge open windows and tabs of several sessions into one
    MergeSessions {
        #[arg(short, long)]
        target: Profile,

        #[arg(required = true)]
        sources: Vec<Profile>,

        /// Keep tabs whose URL is already open in the target
        #[arg(long)]
        allow_duplicates: bool,
    },

    /// Migrate data types from one profile to another, across browser families
    Migrate {
        /// Source profile as BROWSER_ID:PATH
        source: Profile,

        /// Target profile as BROWSER_ID:PATH
        target: Profile,

        /// Data types (comma-separated) or "all"
        #[arg(short = 'd', long, default_value = "bookmarks,history,sessions")]
        data_types: String,

        /// Strategy for files without a merge engine: smart, append, overwrite
        #[arg(short = 's', long)]
        strategy: Option<MergeStrategy>,

        /// Skip the backup of the target
        #[arg(long)]
        no_backup: bool,

        /// Deduplicate the target's bookmarks afterwards
        #[arg(long)]
        deduplicate: bool,

        /// Show warnings and reasons in the report
        #[arg(long)]
        detailed: bool,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// Back up a profile directory
    Create {
        /// Profile as BROWSER_ID:PATH
        profile: Profile,
    },

    /// List backups, newest first
    List {
        #[arg(short, long)]
        browser: Option<String>,

        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Check a backup archive against its manifest
    Verify {
        backup: PathBuf,

        /// Re-hash every archived file
        #[arg(long)]
        content: bool,
    },

    /// Restore a backup
    Restore {
        backup: PathBuf,

        /// Destination (default: the directory the backup was taken from)
        #[arg(short, long)]
        target: Option<PathBuf>,

        /// Keep files that already exist at the destination
        #[arg(long)]
        merge: bool,
    },

    /// Delete a backup archive
    Delete { backup: PathBuf },
}

fn print_result<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("Failed to load settings from {:?}", settings_path))?;
    settings.validate().context("Invalid settings")?;

    match cli.command {
        Commands::Backup { action } => run_backup(action, &settings, cli.json)?,

        Commands::Dedup { profile, dry_run, keep_first, drop_tags } => {
            let mut options = settings.dedup;
            options.dry_run |= dry_run;
            options.preserve_newest &= !keep_first;
            options.preserve_tags &= !drop_tags;

            info!("🧹 Deduplicating bookmarks of {}", profile.name);
            let result = bookmarks::deduplicate(&profile.file("places.sqlite"), &options);
            print_result(cli.json, &result, || report::format_dedup(&result, options.dry_run))?;
            if !result.is_success() {
                bail!("Deduplication failed");
            }
        }

        Commands::MergeBookmarks { target, sources, flat, allow_duplicates, no_tags } => {
            let mut options = settings.bookmarks;
            options.preserve_structure &= !flat;
            options.avoid_duplicates &= !allow_duplicates;
            options.import_tags &= !no_tags;

            let result = bookmarks::merge_bookmarks(&sources, &target, &options);
            print_result(cli.json, &result, || report::format_bookmark_merge(&result))?;
            if !result.is_success() {
                bail!("Bookmark merge finished with errors");
            }
        }

        Commands::MergeHistory { target, sources, max_age_days, reset_frecency, no_visits } => {
            let mut options = settings.history;
            if let Some(days) = max_age_days {
                options.max_age_days = days;
            }
            options.preserve_frecency &= !reset_frecency;
            options.preserve_visits &= !no_visits;

            let result = history::merge_history(&sources, &target, &options);
            print_result(cli.json, &result, || report::format_history_merge(&result))?;
            if !result.is_success() {
                bail!("History merge finished with errors");
            }
        }

        Commands::MergeSessions { target, sources, allow_duplicates } => {
            let mut options = settings.sessions;
            options.allow_duplicates |= allow_duplicates;

            let result = session::merge_sessions(&sources, &target, &options);
            print_result(cli.json, &result, || report::format_session_merge(&result))?;
            if !result.is_success() {
                bail!("Session merge finished with errors");
            }
        }

        Commands::Migrate {
            source,
            target,
            data_types,
            strategy,
            no_backup,
            deduplicate,
            detailed,
        } => {
            let data_types = parse_data_types(&data_types).map_err(anyhow::Error::msg)?;
            let mut options = MigrationOptions::from(&settings);
            options.backup &= !no_backup;
            options.deduplicate = deduplicate;
            if let Some(strategy) = strategy {
                options.merge_strategy = strategy;
            }

            let backup = options.backup.then(|| settings.backup_manager());
            let migrator = ProfileMigrator::new(HandlerRegistry::with_defaults(), backup);
            let result = migrator.migrate(&source, &target, &data_types, &options);
            print_result(cli.json, &result, || report::format_migration(&result, detailed || cli.verbose))?;
            if !result.success {
                bail!("Migration finished with {} errors", result.errors.len());
            }
        }
    }

    Ok(())
}

fn run_backup(action: BackupAction, settings: &Settings, json: bool) -> Result<()> {
    let manager = settings.backup_manager();

    match action {
        BackupAction::Create { profile } => {
            let spinner = progress::archive_spinner("Backing up", &format!("{} ({})", profile.name, profile.browser_id));
            match manager.create_backup(&profile.path, &profile.browser_id, &profile.name) {
                Ok(path) => {
                    progress::finish_archive(&spinner, "Backup written", &path);
                    if json {
                        println!("{}", serde_json::json!({ "backup": path }));
                    }
                }
                Err(e) => {
                    progress::abandon_archive(&spinner, &e);
                    return Err(e).context("Failed to create backup");
                }
            }
        }

        BackupAction::List { browser, profile } => {
            let backups = manager
                .list_backups(browser.as_deref(), profile.as_deref())
                .context("Failed to list backups")?;
            print_result(json, &backups, || report::format_backup_list(&backups))?;
        }

        BackupAction::Verify { backup, content } => {
            let mode = if content { VerifyMode::Content } else { VerifyMode::Presence };
            let result = manager.verify_backup(&backup, mode);
            print_result(json, &result, || report::format_verify(&result, true))?;
            if !result.is_valid {
                bail!("Backup {:?} is not valid", backup);
            }
        }

        BackupAction::Restore { backup, target, merge } => {
            let spinner = progress::archive_spinner("Restoring", &backup.display().to_string());
            match manager.restore_backup(&backup, target.as_deref(), merge) {
                Ok(result) => {
                    progress::finish_archive(
                        &spinner,
                        &format!("Restored {} files, kept {}", result.restored, result.skipped),
                        &result.target,
                    );
                    if json {
                        println!("{}", serde_json::to_string_pretty(&result)?);
                    }
                }
                Err(e) => {
                    progress::abandon_archive(&spinner, &e);
                    return Err(e).context("Failed to restore backup");
                }
            }
        }

        BackupAction::Delete { backup } => {
            manager
                .delete_backup(&backup)
                .with_context(|| format!("Failed to delete {:?}", backup))?;
            info!("🗑️  Deleted {:?}", backup);
        }
    }

    Ok(())
}
