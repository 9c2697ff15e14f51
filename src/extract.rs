use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("an IO error occurred while {0} {1}")]
    IoError(String, PathBuf, #[source] std::io::Error),
    #[error("failed to expand archive {0}")]
    ZipError(PathBuf, #[source] zip::result::ZipError),
}

#[derive(Debug, Clone, Copy)]
enum ArchiveKind {
    TarGz,
    Tar,
    Zip,
}

/// Expand a cached file when it is a recognized archive.
///
/// Archives unpack into a sibling directory named after the file without
/// its archive suffix, and the directory path is returned. When that
/// directory already has content the expansion is skipped and the existing
/// directory is returned, so repeated fetches never unpack twice.
/// Non-archives return `None`.
pub fn expand_if_archive(path: &Path) -> Result<Option<PathBuf>, ExtractError> {
    let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
        return Ok(None);
    };
    let Some((kind, stem)) = split_archive_name(filename) else {
        return Ok(None);
    };

    let target = match path.parent() {
        Some(parent) => parent.join(stem),
        None => PathBuf::from(stem),
    };

    if dir_is_populated(&target) {
        tracing::debug!(
            "{} is already expanded into {}",
            path.display(),
            target.display()
        );
        return Ok(Some(target));
    }

    tracing::info!("expanding {} into {}", path.display(), target.display());
    fs_err::create_dir_all(&target)
        .map_err(|e| ExtractError::IoError("creating".to_string(), target.clone(), e))?;

    match kind {
        ArchiveKind::TarGz => unpack_tar(path, &target, true)?,
        ArchiveKind::Tar => unpack_tar(path, &target, false)?,
        ArchiveKind::Zip => unpack_zip(path, &target)?,
    }

    Ok(Some(target))
}

/// Match the archive suffix and return the filename without it. A name
/// that is nothing but a suffix (`.tar`) is not an archive.
fn split_archive_name(filename: &str) -> Option<(ArchiveKind, &str)> {
    let lower = filename.to_ascii_lowercase();
    for (suffix, kind) in [
        (".tar.gz", ArchiveKind::TarGz),
        (".tgz", ArchiveKind::TarGz),
        (".tar", ArchiveKind::Tar),
        (".zip", ArchiveKind::Zip),
    ] {
        if lower.ends_with(suffix) && filename.len() > suffix.len() {
            return Some((kind, &filename[..filename.len() - suffix.len()]));
        }
    }
    None
}

fn dir_is_populated(dir: &Path) -> bool {
    fs_err::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn unpack_tar(path: &Path, target: &Path, gz: bool) -> Result<(), ExtractError> {
    let file = fs_err::File::open(path)
        .map_err(|e| ExtractError::IoError("opening".to_string(), path.to_path_buf(), e))?;
    let result = if gz {
        Archive::new(GzDecoder::new(file)).unpack(target)
    } else {
        Archive::new(file).unpack(target)
    };
    result.map_err(|e| ExtractError::IoError("expanding".to_string(), path.to_path_buf(), e))
}

fn unpack_zip(path: &Path, target: &Path) -> Result<(), ExtractError> {
    let file = fs_err::File::open(path)
        .map_err(|e| ExtractError::IoError("opening".to_string(), path.to_path_buf(), e))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ExtractError::ZipError(path.to_path_buf(), e))?;
    archive
        .extract(target)
        .map_err(|e| ExtractError::ZipError(path.to_path_buf(), e))
}
