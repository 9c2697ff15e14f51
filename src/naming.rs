use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Matches a content-hash stamp like `bfd8deac` in `resnet18-bfd8deac.pth.tar`.
/// The stamp is at least eight hex digits; when a name carries several, the
/// last one wins.
static HASH_STAMP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-([a-f0-9]{8,})\.(?:[^.]+(?:\.[^.]+)*)$").expect("hash stamp regex is valid")
});

#[derive(Debug, Error)]
pub enum NamingError {
    #[error("'{0}' is not a valid file")]
    NotAFile(PathBuf),
    #[error("an IO error occurred while {0} {1}")]
    IoError(String, PathBuf, #[source] std::io::Error),
}

/// Split a file name into the stem and the complete extension (all
/// suffixes), so `archive.tar.gz` becomes `("archive", ".tar.gz")`. A
/// leading dot is part of the stem, not an extension.
pub fn split_name(name: &str) -> (String, String) {
    let file = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);

    let trimmed = file.trim_start_matches('.');
    let leading_dots = file.len() - trimmed.len();
    match trimmed.find('.') {
        Some(idx) => {
            let split = leading_dots + idx;
            (file[..split].to_string(), file[split..].to_string())
        }
        None => (file.to_string(), String::new()),
    }
}

/// Extract the expected sha256 prefix embedded in a filename, if any.
pub fn sha_prefix_from_filename(filename: &str) -> Option<String> {
    HASH_STAMP_REGEX
        .captures_iter(filename)
        .last()
        .map(|captures| captures[1].to_string())
}

/// Compute the full sha256 hash of a file, streaming it in chunks so large
/// files do not land in memory.
pub fn compute_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = fs_err::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Rename a file to carry its own content hash: `{stem}-{hash[..len]}{ext}`.
///
/// Returns the new path. With `dry_run` set the rename is skipped and only
/// the computed target path is returned.
pub fn rename_with_hash(
    path: &Path,
    hash_length: usize,
    dry_run: bool,
) -> Result<PathBuf, NamingError> {
    if !path.is_file() {
        return Err(NamingError::NotAFile(path.to_path_buf()));
    }

    let full_hash = compute_sha256(path)
        .map_err(|e| NamingError::IoError("hashing".to_string(), path.to_path_buf(), e))?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| NamingError::NotAFile(path.to_path_buf()))?;
    let (stem, ext) = split_name(name);

    let hash_length = hash_length.min(full_hash.len());
    let new_name = format!("{stem}-{}{ext}", &full_hash[..hash_length]);
    let new_path = path.with_file_name(&new_name);

    if !dry_run {
        fs_err::rename(path, &new_path)
            .map_err(|e| NamingError::IoError("renaming".to_string(), path.to_path_buf(), e))?;
    }

    Ok(new_path)
}
