// Integration tests for floorp-merge
// Run with: cargo test --test integration_test

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::process::Command;

use flate2::read::GzDecoder;
use floorp_merge::backup::{ArchiveFormat, BackupManager, BackupManifest, VerifyMode, MANIFEST_NAME};
use floorp_merge::bookmarks::{self, DedupOptions};
use floorp_merge::places::{create_store, PlacesStore};
use floorp_merge::session::{self, mozlz4, SessionMergeOptions};
use floorp_merge::{
    DataType, DataTypeOutcome, HandlerRegistry, MergeStrategy, MigrationOptions, Profile, ProfileMigrator,
};
use rusqlite::{params, Connection};
use serde_json::json;
use tempfile::TempDir;
use walkdir::WalkDir;

fn relative_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}

fn write_session(dir: &Path, urls: &[&[&str]]) {
    let windows: Vec<_> = urls
        .iter()
        .map(|tabs| {
            json!({
                "tabs": tabs.iter().map(|u| json!({"entries": [{"url": u}], "index": 1})).collect::<Vec<_>>(),
                "width": 1280
            })
        })
        .collect();
    let doc = json!({"version": ["sessionrestore", 1], "windows": windows, "selectedWindow": 1});
    mozlz4::write_file(&dir.join(session::PRIMARY_FILE), doc.to_string().as_bytes()).unwrap();
}

#[test]
fn test_backup_round_trip_both_formats() {
    for format in [ArchiveFormat::Zip, ArchiveFormat::TarGz] {
        let dir = TempDir::new().unwrap();
        let profile = dir.path().join("profile");
        fs::create_dir_all(profile.join("bookmarkbackups")).unwrap();
        fs::create_dir_all(profile.join("templates")).unwrap();
        fs::create_dir_all(profile.join("storage/temporary/site")).unwrap();
        fs::write(profile.join("prefs.js"), "user_pref(\"x\", 1);\n").unwrap();
        fs::write(profile.join("templates/notes.txt"), "draft").unwrap();
        fs::write(profile.join("storage/temporary/site/data.bin"), vec![3u8; 64]).unwrap();
        fs::write(profile.join("bookmarkbackups/bookmarks-2024.jsonlz4"), vec![1u8; 5000]).unwrap();
        fs::write(profile.join("times.json"), "{}").unwrap();

        let manager = BackupManager::new(dir.path().join("backups"), format);
        let backup = manager.create_backup(&profile, "floorp", "default").unwrap();
        assert!(manager.verify_backup(&backup, VerifyMode::Content).is_valid);

        let restored = dir.path().join("restored");
        manager.restore_backup(&backup, Some(&restored), false).unwrap();
        assert_eq!(relative_files(&profile), relative_files(&restored));
        assert_eq!(fs::read_to_string(restored.join("templates/notes.txt")).unwrap(), "draft");
    }

    println!("✅ backup round trip works");
}

#[test]
fn test_tar_backup_carries_placeholder_then_final_manifest() {
    let dir = TempDir::new().unwrap();
    let profile = dir.path().join("profile");
    fs::create_dir_all(profile.join("storage/default")).unwrap();
    fs::write(profile.join("prefs.js"), "user_pref(\"x\", 1);\n").unwrap();
    fs::write(profile.join("storage/default/idb.sqlite"), vec![9u8; 2048]).unwrap();

    let manager = BackupManager::new(dir.path().join("backups"), ArchiveFormat::TarGz);
    let backup = manager.create_backup(&profile, "floorp", "default").unwrap();

    let mut archive = tar::Archive::new(GzDecoder::new(File::open(&backup).unwrap()));
    let mut manifests = Vec::new();
    let mut names = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        if name == MANIFEST_NAME {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            manifests.push(serde_json::from_slice::<BackupManifest>(&bytes).unwrap());
        }
        names.push(name);
    }

    assert_eq!(manifests.len(), 2);
    assert_eq!(names.first().map(String::as_str), Some(MANIFEST_NAME));
    assert_eq!(names.last().map(String::as_str), Some(MANIFEST_NAME));
    assert!(!manifests[0].complete);
    assert!(manifests[0].files.is_empty());
    assert!(manifests[1].complete);
    assert_eq!(manifests[1].files.len(), 2);

    let report = manager.verify_backup(&backup, VerifyMode::Content);
    assert!(report.is_valid, "{:?}", report);
    assert!(report.manifest.unwrap().complete);

    let restored = dir.path().join("restored");
    manager.restore_backup(&backup, Some(&restored), false).unwrap();
    assert_eq!(relative_files(&profile), relative_files(&restored));

    println!("✅ tar manifest layout works");
}

#[test]
fn test_dedup_scenario() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("places.sqlite");
    create_store(&db).unwrap();
    {
        let conn = Connection::open(&db).unwrap();
        let store = PlacesStore::new(&conn).unwrap();
        let place = store.ensure_place("http://a.com", "A").unwrap();
        store.insert_bookmark(place, 5, "A old", 100, 100).unwrap();
        store.insert_bookmark(place, 5, "A new", 200, 200).unwrap();
        // tags are per place, so the newer record's tag is attached to the shared place
        store.add_tags(place, ["news"]).unwrap();
    }

    let options = DedupOptions::default();
    let first = bookmarks::deduplicate(&db, &options);
    assert_eq!(first.removed, 1);

    let conn = Connection::open(&db).unwrap();
    let store = PlacesStore::new(&conn).unwrap();
    let records = store.read_bookmarks().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].date_added, 200);
    assert!(records[0].tags.contains("news"));
    drop(conn);

    let second = bookmarks::deduplicate(&db, &options);
    assert_eq!(second.duplicate_sets, 0);
    assert_eq!(second.removed, 0);

    println!("✅ dedup scenario works");
}

#[test]
fn test_session_merge_on_disk() {
    let dir = TempDir::new().unwrap();
    let target_dir = dir.path().join("floorp");
    let source_dir = dir.path().join("firefox");
    fs::create_dir_all(&target_dir).unwrap();
    fs::create_dir_all(&source_dir).unwrap();
    write_session(&target_dir, &[&["https://u1.example/"]]);
    write_session(
        &source_dir,
        &[&["https://u1.example/", "https://u2.example/"], &["https://u1.example/"]],
    );

    let target = Profile::new(&target_dir, "floorp", "main");
    let source = Profile::new(&source_dir, "firefox", "default");
    let result = session::merge_sessions(&[source], &target, &SessionMergeOptions::default());
    assert!(result.is_success(), "{:?}", result.errors);
    assert_eq!(result.tabs_added, 1);
    assert_eq!(result.windows_added, 1);

    let primary = fs::read(target_dir.join(session::PRIMARY_FILE)).unwrap();
    let recovery = fs::read(target_dir.join(session::RECOVERY_FILE)).unwrap();
    assert_eq!(primary, recovery);

    let merged = session::read_session(&target_dir).unwrap();
    assert_eq!(merged.windows.len(), 2);
    assert_eq!(merged.selected_window, 0);
    assert_eq!(merged.windows[1].extra["width"], json!(1280));

    println!("✅ session merge works");
}

#[test]
fn test_chromium_migration_with_isolation() {
    let dir = TempDir::new().unwrap();
    let chrome_dir = dir.path().join("chrome");
    let floorp_dir = dir.path().join("floorp");
    fs::create_dir_all(&chrome_dir).unwrap();
    fs::create_dir_all(&floorp_dir).unwrap();
    create_store(&floorp_dir.join("places.sqlite")).unwrap();

    let conn = Connection::open(chrome_dir.join("History")).unwrap();
    conn.execute_batch(
        "CREATE TABLE urls (id INTEGER PRIMARY KEY, url TEXT, title TEXT, visit_count INTEGER,
             typed_count INTEGER, last_visit_time INTEGER, hidden INTEGER);
         CREATE TABLE visits (id INTEGER PRIMARY KEY, url INTEGER, visit_time INTEGER,
             from_visit INTEGER, transition INTEGER);",
    )
    .unwrap();
    let visit_time: i64 = 13_350_000_000_000_000;
    conn.execute(
        "INSERT INTO urls VALUES (1, 'https://visited.example/', 'Visited', 1, 0, ?1, 0)",
        params![visit_time],
    )
    .unwrap();
    conn.execute("INSERT INTO visits VALUES (1, 1, ?1, 0, 1)", params![visit_time]).unwrap();
    drop(conn);

    let source = Profile::new(&chrome_dir, "chrome", "Default");
    let target = Profile::new(&floorp_dir, "floorp", "main");
    let migrator = ProfileMigrator::new(
        HandlerRegistry::with_defaults(),
        Some(BackupManager::new(dir.path().join("backups"), ArchiveFormat::Zip)),
    );
    let data_types = [DataType::History, DataType::Bookmarks, DataType::Sessions];
    let report = migrator.migrate(&source, &target, &data_types, &MigrationOptions::default());

    assert!(report.backup.is_some());
    match &report.migrated_data[&DataType::History] {
        DataTypeOutcome::History(h) => {
            assert_eq!(h.urls_imported, 1);
            assert_eq!(h.visits_imported, 1);
        }
        other => panic!("unexpected history outcome {:?}", other),
    }
    // no Bookmarks file: only that type is skipped
    assert!(matches!(
        report.migrated_data[&DataType::Bookmarks],
        DataTypeOutcome::Skipped { .. }
    ));
    assert!(matches!(
        report.migrated_data[&DataType::Sessions],
        DataTypeOutcome::NotImplemented { .. }
    ));
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.warnings.len(), 1);

    println!("✅ chromium migration works");
}

fn unix_seconds_ago(days: u64) -> u64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    now - days * 86_400
}

/// `(folder title, url)` of every bookmark in a folder directly below the
/// unfiled root.
fn unfiled_folder_bookmarks(floorp_dir: &Path) -> Vec<(String, String)> {
    let conn = Connection::open(floorp_dir.join("places.sqlite")).unwrap();
    let store = PlacesStore::new(&conn).unwrap();
    let unfiled = store.roots().unfiled;
    let folders = store.read_folders().unwrap();
    let mut found: Vec<(String, String)> = store
        .read_bookmarks()
        .unwrap()
        .into_iter()
        .filter_map(|record| {
            folders
                .iter()
                .find(|f| f.id == record.parent && f.parent == unfiled)
                .map(|f| (f.title.clone(), record.url))
        })
        .collect();
    found.sort();
    found
}

#[test]
fn test_qutebrowser_migration_through_flat_files() {
    let dir = TempDir::new().unwrap();
    let qute_dir = dir.path().join("qutebrowser");
    let floorp_dir = dir.path().join("floorp");
    fs::create_dir_all(qute_dir.join("bookmarks")).unwrap();
    fs::create_dir_all(&floorp_dir).unwrap();
    create_store(&floorp_dir.join("places.sqlite")).unwrap();

    fs::write(
        qute_dir.join("bookmarks/urls"),
        "https://docs.example/ Docs\nhttps://blog.example/ Blog\n",
    )
    .unwrap();
    fs::write(qute_dir.join("quickmarks"), "news https://news.example/\n").unwrap();
    let seen = unix_seconds_ago(2);
    fs::write(
        qute_dir.join("history"),
        format!(
            "https://docs.example/ Docs {}\nhttps://docs.example/ Docs {}\nhttps://other.example/|Other|{}\n",
            seen,
            seen + 60,
            seen
        ),
    )
    .unwrap();

    let source = Profile::new(&qute_dir, "qutebrowser", "default");
    let target = Profile::new(&floorp_dir, "floorp", "main");
    let migrator = ProfileMigrator::new(HandlerRegistry::with_defaults(), None);
    let report = migrator.migrate(
        &source,
        &target,
        &[DataType::Bookmarks, DataType::History],
        &MigrationOptions::default(),
    );
    assert!(report.success, "{:?}", report.errors);

    match &report.migrated_data[&DataType::Bookmarks] {
        DataTypeOutcome::Bookmarks(b) => assert_eq!(b.imported, 3),
        other => panic!("unexpected bookmarks outcome {:?}", other),
    }
    match &report.migrated_data[&DataType::History] {
        DataTypeOutcome::History(h) => {
            // docs.example already exists as a bookmarked place
            assert_eq!(h.urls_imported, 1);
            assert_eq!(h.urls_updated, 1);
            assert_eq!(h.visits_imported, 3);
        }
        other => panic!("unexpected history outcome {:?}", other),
    }

    assert_eq!(
        unfiled_folder_bookmarks(&floorp_dir),
        vec![
            ("From qutebrowser".to_string(), "https://blog.example/".to_string()),
            ("From qutebrowser".to_string(), "https://docs.example/".to_string()),
            ("From qutebrowser".to_string(), "https://news.example/".to_string()),
        ]
    );

    println!("✅ qutebrowser migration works");
}

#[test]
fn test_lynx_bookmark_file_migration() {
    let dir = TempDir::new().unwrap();
    let lynx_dir = dir.path().join("lynx");
    let floorp_dir = dir.path().join("floorp");
    fs::create_dir_all(&lynx_dir).unwrap();
    fs::create_dir_all(&floorp_dir).unwrap();
    create_store(&floorp_dir.join("places.sqlite")).unwrap();
    fs::write(
        lynx_dir.join("lynx_bookmarks.html"),
        "<head><title>Bookmark file</title></head>\n<ol>\n\
         <LI><a href=\"https://lynx.example/\">Lynx home</a>\n\
         <LI><a href=\"javascript:void(0)\">script</a>\n</ol>\n",
    )
    .unwrap();

    let source = Profile::new(&lynx_dir, "lynx", "default");
    let target = Profile::new(&floorp_dir, "floorp", "main");
    let migrator = ProfileMigrator::new(HandlerRegistry::with_defaults(), None);
    let report = migrator.migrate(
        &source,
        &target,
        &[DataType::Bookmarks, DataType::History],
        &MigrationOptions::default(),
    );

    match &report.migrated_data[&DataType::Bookmarks] {
        DataTypeOutcome::Bookmarks(b) => assert_eq!(b.imported, 1),
        other => panic!("unexpected bookmarks outcome {:?}", other),
    }
    // no history file: skipped with a warning, not a failure
    assert!(matches!(
        report.migrated_data[&DataType::History],
        DataTypeOutcome::Skipped { .. }
    ));
    assert!(report.success, "{:?}", report.errors);

    assert_eq!(
        unfiled_folder_bookmarks(&floorp_dir),
        vec![("From lynx".to_string(), "https://lynx.example/".to_string())]
    );

    println!("✅ lynx migration works");
}

#[test]
fn test_password_migration_keeps_logins_with_their_key() {
    let dir = TempDir::new().unwrap();
    let firefox_dir = dir.path().join("firefox");
    let floorp_dir = dir.path().join("floorp");
    fs::create_dir_all(&firefox_dir).unwrap();
    fs::create_dir_all(&floorp_dir).unwrap();
    let firefox_logins = r#"{"logins": [{"id": 1, "encryptedUsername": "SRC"}]}"#;
    let floorp_logins = r#"{"logins": [{"id": 1, "encryptedUsername": "DST"}]}"#;
    fs::write(firefox_dir.join("logins.json"), firefox_logins).unwrap();
    fs::write(firefox_dir.join("key4.db"), "srckey").unwrap();
    fs::write(floorp_dir.join("logins.json"), floorp_logins).unwrap();
    fs::write(floorp_dir.join("key4.db"), "dstkey").unwrap();

    let source = Profile::new(&firefox_dir, "firefox", "default");
    let target = Profile::new(&floorp_dir, "floorp", "main");
    let migrator = ProfileMigrator::new(HandlerRegistry::with_defaults(), None);

    let report = migrator.migrate(&source, &target, &[DataType::Passwords], &MigrationOptions::default());
    assert!(report.success, "{:?}", report.errors);
    match &report.migrated_data[&DataType::Passwords] {
        DataTypeOutcome::Files(files) => {
            assert!(files.merged.is_empty());
            assert_eq!(files.skipped, vec!["logins.json".to_string(), "key4.db".to_string()]);
        }
        other => panic!("unexpected passwords outcome {:?}", other),
    }
    assert_eq!(fs::read_to_string(floorp_dir.join("logins.json")).unwrap(), floorp_logins);
    assert_eq!(fs::read_to_string(floorp_dir.join("key4.db")).unwrap(), "dstkey");

    let overwrite = MigrationOptions {
        merge_strategy: MergeStrategy::Overwrite,
        ..MigrationOptions::default()
    };
    let report = migrator.migrate(&source, &target, &[DataType::Passwords], &overwrite);
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(fs::read_to_string(floorp_dir.join("logins.json")).unwrap(), firefox_logins);
    assert_eq!(fs::read_to_string(floorp_dir.join("key4.db")).unwrap(), "srckey");

    println!("✅ password pass-through works");
}

#[test]
fn test_cli_lists_empty_backup_dir() {
    let dir = TempDir::new().unwrap();
    let settings = dir.path().join("settings.json");
    fs::write(
        &settings,
        json!({"backup_dir": dir.path().join("backups")}).to_string(),
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_floorp-merge"))
        .args(["--config", settings.to_str().unwrap(), "--json", "backup", "list"])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "[]");

    println!("✅ backup list command works");
}
