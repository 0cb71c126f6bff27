//! Content fingerprints of project directories.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use walkdir::WalkDir;

use crate::constants::FINGERPRINT_EXCLUDED_DIRS;
use crate::utils::normalize_path_for_storage;

/// SHA-256 of a single file, hex encoded.
pub fn file_checksum(path: &Path) -> Result<String> {
    let content = std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(&content)))
}

/// Deterministic checksum of every file below `path`, as `sha256:<hex>`.
///
/// Each file contributes its forward-slash relative path and content hash;
/// entries are sorted by path so the result does not depend on directory
/// iteration order. VCS metadata and generated state are skipped, so a fresh
/// checkout and an existing one of the same revision fingerprint identically.
pub fn directory_checksum(path: &Path) -> Result<String> {
    let mut file_hashes: Vec<(String, String)> = Vec::new();

    let walker = WalkDir::new(path).follow_links(false).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !(entry.file_type().is_dir()
                && FINGERPRINT_EXCLUDED_DIRS.iter().any(|excluded| entry.file_name() == *excluded))
    });

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to read directory entry in: {}", path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_path = entry.path();
        let relative = normalize_path_for_storage(file_path.strip_prefix(path).unwrap_or(file_path));
        file_hashes.push((relative, file_checksum(file_path)?));
    }

    file_hashes.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (relative, checksum) in &file_hashes {
        hasher.update(format!("{relative}:{checksum}\n").as_bytes());
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}
