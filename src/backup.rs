//! Profile backups: a single archive holding `metadata.json` plus a
//! `profile/` tree mirroring the profile directory.

use chrono::{DateTime, Local, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

pub const MANIFEST_NAME: &str = "metadata.json";
const PROFILE_DIR: &str = "profile";
const TRANSIENT_MARKERS: [&str; 4] = ["cache", "lock", "tmp", "temp"];
/// Browser cache directories, matched by exact name and skipped whole.
const CACHE_DIRS: [&str; 8] = [
    "cache2",
    "startupCache",
    "OfflineCache",
    "shader-cache",
    "Cache",
    "Code Cache",
    "GPUCache",
    "ShaderCache",
];
const CHUNK_SIZE: usize = 4096;
const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    #[default]
    Zip,
    TarGz,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub file_count: usize,
    pub total_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub browser_id: String,
    pub profile_name: String,
    pub timestamp: String,
    pub created_at: DateTime<Utc>,
    pub source_path: PathBuf,
    pub format: ArchiveFormat,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub files: Vec<ManifestEntry>,
    #[serde(default)]
    pub summary: Option<ManifestSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub archive_size: u64,
    pub manifest: BackupManifest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Every manifest entry has an archived file.
    Presence,
    /// Additionally re-hash every archived file.
    Content,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub is_valid: bool,
    pub verified_files: usize,
    pub missing_files: Vec<String>,
    pub corrupted_files: Vec<String>,
    pub error: Option<String>,
    pub manifest: Option<BackupManifest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub target: PathBuf,
    pub restored: usize,
    pub skipped: usize,
}

/// Wraps a reader and hashes every byte that passes through it.
struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (u64, String) {
        (self.bytes, hex(&self.hasher.finalize()))
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

fn hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Streaming SHA-256 of a reader, in fixed size chunks.
pub fn hash_reader<R: Read>(reader: R) -> io::Result<(u64, String)> {
    let mut hashing = HashingReader::new(reader);
    let mut buf = [0u8; CHUNK_SIZE];
    while hashing.read(&mut buf)? != 0 {}
    Ok(hashing.finish())
}

/// File names that belong to caches, locks and scratch files.
pub fn is_transient(name: &str) -> bool {
    let lower = name.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn is_cache_dir(name: &str) -> bool {
    CACHE_DIRS.contains(&name)
}

/// Yields exactly `limit` bytes of `inner`, failing if it ends sooner.
struct SizedReader<R> {
    inner: io::Take<R>,
}

impl<R: Read> SizedReader<R> {
    fn new(inner: R, limit: u64) -> Self {
        Self {
            inner: inner.take(limit),
        }
    }
}

impl<R: Read> Read for SizedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() && self.inner.limit() > 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file shrank while archiving, {} bytes missing", self.inner.limit()),
            ));
        }
        Ok(n)
    }
}

fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_NAME_LEN)
        .collect();
    if cleaned.trim().is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// `a/b/c` for a path relative to the profile root.
fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Relative path below `profile/`, or `None` for anything that would escape the target.
fn profile_relative(entry_path: &Path) -> Option<PathBuf> {
    let mut components = entry_path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == PROFILE_DIR => {}
        _ => return None,
    }
    let mut relative = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

enum ArchiveWriter {
    Zip(ZipWriter<File>),
    Tar(tar::Builder<GzEncoder<File>>),
}

impl ArchiveWriter {
    fn create(path: &Path, format: ArchiveFormat) -> Result<Self> {
        let file = File::create(path)?;
        Ok(match format {
            ArchiveFormat::Zip => ArchiveWriter::Zip(ZipWriter::new(file)),
            ArchiveFormat::TarGz => {
                ArchiveWriter::Tar(tar::Builder::new(GzEncoder::new(file, Compression::default())))
            }
        })
    }

    /// Tar streams may repeat a name; the last copy wins when reading.
    fn allows_repeated_names(&self) -> bool {
        matches!(self, ArchiveWriter::Tar(_))
    }

    /// Archive exactly `size` bytes of `reader`. Bytes a growing file gains
    /// after `size` was taken are left out.
    fn append<R: Read>(&mut self, name: &str, size: u64, reader: R) -> Result<(u64, String)> {
        let mut hashing = HashingReader::new(SizedReader::new(reader, size));
        match self {
            ArchiveWriter::Zip(zip) => {
                let options = SimpleFileOptions::default()
                    .compression_method(CompressionMethod::Deflated)
                    .large_file(size >= u64::from(u32::MAX));
                zip.start_file(name, options)?;
                io::copy(&mut hashing, zip)?;
            }
            ArchiveWriter::Tar(builder) => {
                let mut header = tar::Header::new_gnu();
                header.set_size(size);
                header.set_mode(0o644);
                header.set_mtime(Utc::now().timestamp().max(0) as u64);
                header.set_cksum();
                builder.append_data(&mut header, name, &mut hashing)?;
            }
        }
        Ok(hashing.finish())
    }

    fn append_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.append(name, bytes.len() as u64, bytes)?;
        Ok(())
    }

    /// Drop a partially written entry. Only zip can do this.
    fn discard_partial(&mut self) -> Result<()> {
        match self {
            ArchiveWriter::Zip(zip) => Ok(zip.abort_file()?),
            ArchiveWriter::Tar(_) => Err(Error::Backup(
                "tar stream cannot drop a partially written entry".to_string(),
            )),
        }
    }

    fn finish(self) -> Result<()> {
        match self {
            ArchiveWriter::Zip(zip) => {
                zip.finish()?;
            }
            ArchiveWriter::Tar(builder) => {
                let encoder = builder.into_inner()?;
                encoder.finish()?;
            }
        }
        Ok(())
    }
}

/// What a full pass over an archive found.
struct ArchiveScan {
    manifest: Option<BackupManifest>,
    /// Profile-relative name -> `(size, hash)` when hashing was requested.
    entries: HashMap<String, Option<(u64, String)>>,
}

fn parse_manifest(bytes: &[u8], path: &Path) -> Result<BackupManifest> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::format_invalid(path, format!("manifest: {}", e)))
}

fn scan_archive(path: &Path, hash_contents: bool) -> Result<ArchiveScan> {
    let format = ArchiveFormat::from_path(path)
        .ok_or_else(|| Error::format_invalid(path, "not a zip or tar.gz backup"))?;
    let mut scan = ArchiveScan {
        manifest: None,
        entries: HashMap::new(),
    };

    match format {
        ArchiveFormat::Zip => {
            let mut archive = ZipArchive::new(File::open(path)?)?;
            for index in 0..archive.len() {
                let mut entry = archive.by_index(index)?;
                if entry.is_dir() {
                    continue;
                }
                let name = entry.name().to_string();
                if name == MANIFEST_NAME {
                    let mut bytes = Vec::new();
                    entry.read_to_end(&mut bytes)?;
                    scan.manifest = Some(parse_manifest(&bytes, path)?);
                } else if let Some(relative) = entry.enclosed_name().as_deref().and_then(profile_relative) {
                    let digest = if hash_contents {
                        Some(hash_reader(&mut entry)?)
                    } else {
                        None
                    };
                    scan.entries.insert(archive_name(&relative), digest);
                }
            }
        }
        ArchiveFormat::TarGz => {
            let mut archive = tar::Archive::new(GzDecoder::new(File::open(path)?));
            for entry in archive.entries()? {
                let mut entry = entry?;
                if !entry.header().entry_type().is_file() {
                    continue;
                }
                let entry_path = entry.path()?.into_owned();
                if entry_path == Path::new(MANIFEST_NAME) {
                    let mut bytes = Vec::new();
                    entry.read_to_end(&mut bytes)?;
                    scan.manifest = Some(parse_manifest(&bytes, path)?);
                } else if let Some(relative) = profile_relative(&entry_path) {
                    let digest = if hash_contents {
                        Some(hash_reader(&mut entry)?)
                    } else {
                        None
                    };
                    scan.entries.insert(archive_name(&relative), digest);
                }
            }
        }
    }
    Ok(scan)
}

/// Read just the manifest of a backup archive.
pub fn read_manifest(path: &Path) -> Result<BackupManifest> {
    scan_archive(path, false)?
        .manifest
        .ok_or_else(|| Error::format_invalid(path, "backup has no metadata.json"))
}

/// Creates, checks, restores and lists backups in one directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
    format: ArchiveFormat,
}

impl BackupManager {
    pub fn new(backup_dir: impl Into<PathBuf>, format: ArchiveFormat) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            format,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn archive_path(&self, browser_id: &str, profile_name: &str, timestamp: &str) -> PathBuf {
        let stem = format!("{}_{}_{}", sanitize(browser_id), sanitize(profile_name), timestamp);
        let mut path = self
            .backup_dir
            .join(format!("{}.{}", stem, self.format.extension()));
        let mut counter = 1;
        while path.exists() {
            path = self
                .backup_dir
                .join(format!("{}_{}.{}", stem, counter, self.format.extension()));
            counter += 1;
        }
        path
    }

    /// Archive a profile directory. Returns the archive path, which identifies the backup.
    ///
    /// Unreadable files are logged and left out; they do not fail the backup.
    pub fn create_backup(&self, profile_path: &Path, browser_id: &str, profile_name: &str) -> Result<PathBuf> {
        if !profile_path.is_dir() {
            return Err(Error::SourceMissing(profile_path.to_path_buf()));
        }
        fs::create_dir_all(&self.backup_dir)?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let archive_path = self.archive_path(browser_id, profile_name, &timestamp);
        info!("💾 Backing up {:?} to {:?}", profile_path, archive_path);

        let mut manifest = BackupManifest {
            browser_id: browser_id.to_string(),
            profile_name: profile_name.to_string(),
            timestamp,
            created_at: Utc::now(),
            source_path: profile_path.to_path_buf(),
            format: self.format,
            complete: false,
            files: Vec::new(),
            summary: None,
        };

        let mut writer = ArchiveWriter::create(&archive_path, self.format)?;
        let result = self.fill_archive(&mut writer, profile_path, &mut manifest);
        let result = result.and_then(|()| writer.finish());
        if let Err(e) = result {
            let _ = fs::remove_file(&archive_path);
            return Err(Error::Backup(format!("{}: {}", archive_path.display(), e)));
        }

        let summary = manifest.summary.unwrap_or(ManifestSummary {
            file_count: 0,
            total_size: 0,
        });
        info!(
            "✅ Backup complete: {} files, {} bytes",
            summary.file_count, summary.total_size
        );
        Ok(archive_path)
    }

    fn fill_archive(
        &self,
        writer: &mut ArchiveWriter,
        profile_path: &Path,
        manifest: &mut BackupManifest,
    ) -> Result<()> {
        if writer.allows_repeated_names() {
            writer.append_bytes(MANIFEST_NAME, &serde_json::to_vec_pretty(manifest)?)?;
        }

        let walker = WalkDir::new(profile_path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || !(e.file_type().is_dir() && is_cache_dir(&e.file_name().to_string_lossy()))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("⚠️  Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = match entry.path().strip_prefix(profile_path) {
                Ok(relative) => archive_name(relative),
                Err(_) => continue,
            };
            if is_transient(&entry.file_name().to_string_lossy()) {
                debug!("Skipping transient file {}", relative);
                continue;
            }

            let file = match File::open(entry.path()) {
                Ok(file) => file,
                Err(e) => {
                    warn!("⚠️  Skipping {}: {}", relative, e);
                    continue;
                }
            };
            let size = match file.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!("⚠️  Skipping {}: {}", relative, e);
                    continue;
                }
            };

            let name = format!("{}/{}", PROFILE_DIR, relative);
            match writer.append(&name, size, file) {
                Ok((bytes, hash)) => {
                    debug!("Archived {} ({} bytes)", relative, bytes);
                    manifest.files.push(ManifestEntry {
                        path: relative,
                        size: bytes,
                        hash,
                    });
                }
                Err(e) => {
                    warn!("⚠️  Failed to archive {}: {}", relative, e);
                    writer.discard_partial()?;
                }
            }
        }

        manifest.complete = true;
        manifest.summary = Some(ManifestSummary {
            file_count: manifest.files.len(),
            total_size: manifest.files.iter().map(|f| f.size).sum(),
        });
        writer.append_bytes(MANIFEST_NAME, &serde_json::to_vec_pretty(manifest)?)?;
        Ok(())
    }

    /// Check that the archive has a manifest and every listed file.
    pub fn verify_backup(&self, backup: &Path, mode: VerifyMode) -> VerifyReport {
        let mut report = VerifyReport::default();

        let scan = match scan_archive(backup, mode == VerifyMode::Content) {
            Ok(scan) => scan,
            Err(e) => {
                report.error = Some(e.to_string());
                return report;
            }
        };
        let manifest = match scan.manifest {
            Some(manifest) => manifest,
            None => {
                report.error = Some("backup has no metadata.json".to_string());
                return report;
            }
        };

        for file in &manifest.files {
            match scan.entries.get(&file.path) {
                None => report.missing_files.push(file.path.clone()),
                Some(Some((size, hash))) if *size != file.size || *hash != file.hash => {
                    report.corrupted_files.push(file.path.clone())
                }
                Some(_) => report.verified_files += 1,
            }
        }

        if !manifest.complete {
            report.error = Some("backup was not finalized".to_string());
        }
        report.is_valid = report.error.is_none()
            && report.missing_files.is_empty()
            && report.corrupted_files.is_empty();
        report.manifest = Some(manifest);
        report
    }

    /// Extract a verified backup. `target` defaults to the profile it was taken from.
    ///
    /// With `merge`, files already present at the destination are kept.
    pub fn restore_backup(&self, backup: &Path, target: Option<&Path>, merge: bool) -> Result<RestoreReport> {
        let verification = self.verify_backup(backup, VerifyMode::Presence);
        let manifest = match (verification.is_valid, verification.manifest) {
            (true, Some(manifest)) => manifest,
            _ => {
                let reason = verification
                    .error
                    .unwrap_or_else(|| format!("{} files missing", verification.missing_files.len()));
                return Err(Error::Backup(format!(
                    "{} failed verification: {}",
                    backup.display(),
                    reason
                )));
            }
        };

        let target = target
            .map(Path::to_path_buf)
            .unwrap_or_else(|| manifest.source_path.clone());
        fs::create_dir_all(&target)?;
        info!("♻️  Restoring {:?} into {:?} (merge: {})", backup, target, merge);

        let mut report = RestoreReport {
            target: target.clone(),
            ..Default::default()
        };

        let mut place = |relative: PathBuf, reader: &mut dyn Read| -> Result<()> {
            let dest = target.join(&relative);
            if merge && dest.exists() {
                report.skipped += 1;
                return Ok(());
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&dest)?;
            io::copy(reader, &mut out)?;
            out.flush()?;
            report.restored += 1;
            Ok(())
        };

        match manifest.format {
            ArchiveFormat::Zip => {
                let mut archive = ZipArchive::new(File::open(backup)?)?;
                for index in 0..archive.len() {
                    let mut entry = archive.by_index(index)?;
                    if entry.is_dir() {
                        continue;
                    }
                    if let Some(relative) = entry.enclosed_name().as_deref().and_then(profile_relative) {
                        place(relative, &mut entry)?;
                    }
                }
            }
            ArchiveFormat::TarGz => {
                let mut archive = tar::Archive::new(GzDecoder::new(File::open(backup)?));
                for entry in archive.entries()? {
                    let mut entry = entry?;
                    if !entry.header().entry_type().is_file() {
                        continue;
                    }
                    let entry_path = entry.path()?.into_owned();
                    if let Some(relative) = profile_relative(&entry_path) {
                        place(relative, &mut entry)?;
                    }
                }
            }
        }

        info!("✅ Restored {} files, kept {} existing", report.restored, report.skipped);
        Ok(report)
    }

    /// Backups in the directory, newest first.
    pub fn list_backups(&self, browser_id: Option<&str>, profile_name: Option<&str>) -> Result<Vec<BackupInfo>> {
        let mut backups = Vec::new();
        if !self.backup_dir.is_dir() {
            return Ok(backups);
        }

        for entry in fs::read_dir(&self.backup_dir)? {
            let path = entry?.path();
            if !path.is_file() || ArchiveFormat::from_path(&path).is_none() {
                continue;
            }
            let manifest = match read_manifest(&path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("⚠️  Ignoring unreadable backup {:?}: {}", path, e);
                    continue;
                }
            };
            if browser_id.map_or(false, |b| b != manifest.browser_id) {
                continue;
            }
            if profile_name.map_or(false, |p| p != manifest.profile_name) {
                continue;
            }
            let archive_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            backups.push(BackupInfo {
                path,
                archive_size,
                manifest,
            });
        }

        backups.sort_by(|a, b| b.manifest.created_at.cmp(&a.manifest.created_at));
        Ok(backups)
    }

    pub fn delete_backup(&self, backup: &Path) -> Result<()> {
        if ArchiveFormat::from_path(backup).is_none() {
            return Err(Error::format_invalid(backup, "not a backup archive"));
        }
        if !backup.is_file() {
            return Err(Error::SourceMissing(backup.to_path_buf()));
        }
        fs::remove_file(backup)?;
        info!("🗑️  Deleted backup {:?}", backup);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_profile(dir: &Path) {
        fs::create_dir_all(dir.join("storage/default")).unwrap();
        fs::create_dir_all(dir.join("storage/temporary")).unwrap();
        fs::create_dir_all(dir.join("templates")).unwrap();
        fs::create_dir_all(dir.join("cache2/entries")).unwrap();
        fs::write(dir.join("prefs.js"), "user_pref(\"a\", 1);\n").unwrap();
        fs::write(dir.join("storage/temporary/t.bin"), b"data").unwrap();
        fs::write(dir.join("templates/notes.txt"), b"draft").unwrap();
        fs::write(dir.join("places.sqlite"), vec![7u8; 10_000]).unwrap();
        fs::write(dir.join("storage/default/data.bin"), b"payload").unwrap();
        fs::write(dir.join("cache2/entries/ABC"), b"cached").unwrap();
        fs::write(dir.join("parent.lock"), b"").unwrap();
        fs::write(dir.join("upload.tmp"), b"x").unwrap();
    }

    #[test]
    fn test_transient_names() {
        assert!(is_transient("cache2"));
        assert!(is_transient("parent.lock"));
        assert!(is_transient("TEMP_file"));
        assert!(is_transient("startupCache"));
        assert!(!is_transient("places.sqlite"));
        assert!(is_cache_dir("cache2"));
        assert!(is_cache_dir("Code Cache"));
        assert!(!is_cache_dir("templates"));
        assert!(!is_cache_dir("temporary"));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a<b>c:d"), "a_b_c_d");
        assert_eq!(sanitize(&"x".repeat(300)).len(), MAX_NAME_LEN);
        assert_eq!(sanitize(""), "unnamed");
    }

    #[test]
    fn test_profile_relative_rejects_escapes() {
        assert_eq!(
            profile_relative(Path::new("profile/a/b.txt")),
            Some(PathBuf::from("a/b.txt"))
        );
        assert_eq!(profile_relative(Path::new("profile/../etc/passwd")), None);
        assert_eq!(profile_relative(Path::new("other/a")), None);
        assert_eq!(profile_relative(Path::new("profile")), None);
    }

    #[test]
    fn test_hash_reader() {
        let (size, hash) = hash_reader(&b"abc"[..]).unwrap();
        assert_eq!(size, 3);
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    fn round_trip(format: ArchiveFormat) {
        let dir = TempDir::new().unwrap();
        let profile = dir.path().join("profile-src");
        sample_profile(&profile);
        let manager = BackupManager::new(dir.path().join("backups"), format);

        let backup = manager.create_backup(&profile, "floorp", "default").unwrap();
        assert!(backup.to_string_lossy().ends_with(format.extension()));

        let report = manager.verify_backup(&backup, VerifyMode::Content);
        assert!(report.is_valid, "{:?}", report);
        let manifest = report.manifest.unwrap();
        let paths: Vec<&str> = manifest.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "places.sqlite",
                "prefs.js",
                "storage/default/data.bin",
                "storage/temporary/t.bin",
                "templates/notes.txt",
            ]
        );
        assert_eq!(manifest.summary.unwrap().total_size, 10_000 + 19 + 7 + 4 + 5);

        let restored = dir.path().join("restored");
        let result = manager.restore_backup(&backup, Some(&restored), false).unwrap();
        assert_eq!(result.restored, 5);
        assert_eq!(fs::read(restored.join("storage/default/data.bin")).unwrap(), b"payload");
        assert_eq!(fs::read(restored.join("templates/notes.txt")).unwrap(), b"draft");
        assert!(!restored.join("cache2").exists());
    }

    #[test]
    fn test_zip_round_trip() {
        round_trip(ArchiveFormat::Zip);
    }

    #[test]
    fn test_tar_round_trip() {
        round_trip(ArchiveFormat::TarGz);
    }

    #[test]
    fn test_restore_merge_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let profile = dir.path().join("src");
        sample_profile(&profile);
        let manager = BackupManager::new(dir.path().join("backups"), ArchiveFormat::Zip);
        let backup = manager.create_backup(&profile, "floorp", "default").unwrap();

        let target = dir.path().join("target");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("prefs.js"), "mine").unwrap();

        let result = manager.restore_backup(&backup, Some(&target), true).unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.restored, 4);
        assert_eq!(fs::read_to_string(target.join("prefs.js")).unwrap(), "mine");

        manager.restore_backup(&backup, Some(&target), false).unwrap();
        assert_eq!(
            fs::read_to_string(target.join("prefs.js")).unwrap(),
            "user_pref(\"a\", 1);\n"
        );
    }

    #[test]
    fn test_append_takes_exactly_the_header_size() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("sized.tar.gz");
        let mut writer = ArchiveWriter::create(&archive, ArchiveFormat::TarGz).unwrap();

        // grew after the size was read: the extra bytes stay out
        let (bytes, hash) = writer.append("profile/grown.bin", 3, &b"abcdef"[..]).unwrap();
        assert_eq!(bytes, 3);
        assert_eq!(hash, hash_reader(&b"abc"[..]).unwrap().1);

        // shrank after the size was read
        assert!(writer.append("profile/shrunk.bin", 10, &b"abc"[..]).is_err());
    }

    #[test]
    fn test_shrunk_file_is_dropped_from_zip() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("sized.zip");
        let mut writer = ArchiveWriter::create(&archive, ArchiveFormat::Zip).unwrap();
        assert!(writer.append("profile/shrunk.bin", 10, &b"abc"[..]).is_err());
        writer.discard_partial().unwrap();
        writer.append_bytes("profile/ok.bin", b"ok").unwrap();
        writer.finish().unwrap();

        let scan = scan_archive(&archive, true).unwrap();
        assert!(scan.entries.contains_key("ok.bin"));
        assert!(!scan.entries.contains_key("shrunk.bin"));
    }

    #[test]
    fn test_missing_profile_produces_nothing() {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::new(dir.path().join("backups"), ArchiveFormat::Zip);
        let err = manager
            .create_backup(&dir.path().join("absent"), "floorp", "x")
            .unwrap_err();
        assert!(matches!(err, Error::SourceMissing(_)));
        assert!(!dir.path().join("backups").exists());
    }

    #[test]
    fn test_verify_detects_missing_file() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken.zip");
        let manifest = BackupManifest {
            browser_id: "floorp".into(),
            profile_name: "p".into(),
            timestamp: "20240101_000000".into(),
            created_at: Utc::now(),
            source_path: dir.path().to_path_buf(),
            format: ArchiveFormat::Zip,
            complete: true,
            files: vec![ManifestEntry {
                path: "gone.txt".into(),
                size: 1,
                hash: "00".into(),
            }],
            summary: None,
        };
        let mut writer = ArchiveWriter::create(&archive, ArchiveFormat::Zip).unwrap();
        writer
            .append_bytes(MANIFEST_NAME, &serde_json::to_vec(&manifest).unwrap())
            .unwrap();
        writer.finish().unwrap();

        let manager = BackupManager::new(dir.path(), ArchiveFormat::Zip);
        let report = manager.verify_backup(&archive, VerifyMode::Presence);
        assert!(!report.is_valid);
        assert_eq!(report.missing_files, vec!["gone.txt".to_string()]);
        assert!(manager.restore_backup(&archive, Some(&dir.path().join("t")), false).is_err());
        assert!(!dir.path().join("t").exists());
    }

    #[test]
    fn test_list_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        let profile = dir.path().join("src");
        sample_profile(&profile);
        let manager = BackupManager::new(dir.path().join("backups"), ArchiveFormat::Zip);

        let first = manager.create_backup(&profile, "floorp", "alpha").unwrap();
        let second = manager.create_backup(&profile, "floorp", "beta").unwrap();
        manager.create_backup(&profile, "firefox", "alpha").unwrap();

        let all = manager.list_backups(None, None).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].manifest.created_at >= w[1].manifest.created_at));

        let floorp = manager.list_backups(Some("floorp"), None).unwrap();
        assert_eq!(floorp.len(), 2);
        let alpha = manager.list_backups(Some("floorp"), Some("alpha")).unwrap();
        assert_eq!(alpha.len(), 1);
        assert_eq!(alpha[0].path, first);

        manager.delete_backup(&second).unwrap();
        assert_eq!(manager.list_backups(Some("floorp"), None).unwrap().len(), 1);
        assert!(manager.delete_backup(&second).is_err());
    }
}
