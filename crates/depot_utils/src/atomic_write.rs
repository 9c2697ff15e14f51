use std::path::Path;

use tempfile::{NamedTempFile, TempPath};

/// Build a [`tempfile::NamedTempFile`] in the same directory as `path`, using
/// the original filename as the prefix so the temp file is easily identifiable
/// (e.g. `.resnet18.pth.XXXXXX`). Placing it in the same directory guarantees
/// the final rename stays on one filesystem.
pub fn temp_file_for(path: &Path) -> std::io::Result<NamedTempFile> {
    let dir = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent directory",
        )
    })?;

    let prefix = format!(
        ".{}.",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("tmp")
    );

    tempfile::Builder::new().prefix(&prefix).tempfile_in(dir)
}

/// Atomically move a fully-written temp file into place. If this fails the
/// temp file is cleaned up when `temp` is dropped and the target path is left
/// untouched, so a reader never observes a partially-written file.
pub fn persist_temp_file(temp: TempPath, path: &Path) -> std::io::Result<()> {
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
