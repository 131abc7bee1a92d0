//! The `mozLz40` container used for `sessionstore.jsonlz4`.
//!
//! Layout: 8 byte magic `mozLz40\0`, little-endian u32 decompressed size,
//! then one raw LZ4 block.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub const MAGIC: &[u8; 8] = b"mozLz40\0";

pub fn decode(bytes: &[u8], path: &Path) -> Result<Vec<u8>> {
    if bytes.len() < MAGIC.len() + 4 {
        return Err(Error::format_invalid(path, "file too short for mozLz4 header"));
    }
    if &bytes[..MAGIC.len()] != MAGIC {
        return Err(Error::format_invalid(path, "missing mozLz40 magic"));
    }
    lz4_flex::decompress_size_prepended(&bytes[MAGIC.len()..])
        .map_err(|e| Error::format_invalid(path, format!("lz4 decompress: {}", e)))
}

pub fn encode(payload: &[u8]) -> Vec<u8> {
    let compressed = lz4_flex::compress_prepend_size(payload);
    let mut out = Vec::with_capacity(MAGIC.len() + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&compressed);
    out
}

pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(Error::SourceMissing(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    decode(&bytes, path)
}

/// Write through a sibling temp file so readers never see a half written container.
pub fn write_file(path: &Path, payload: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("jsonlz4.tmp");
    fs::write(&tmp, encode(payload))?;
    fs::rename(&tmp, path)?;
    Ok(())
}
