use std::path::{Path, PathBuf};
use std::time::Duration;

use async_fd_lock::{LockWrite, RwLockWriteGuard};

use depot_consts::consts;

use super::FetchError;

/// Cross-process exclusivity for a single cache destination.
///
/// The guard holds an advisory OS write lock on a `.lock` marker next to
/// the destination file. Dropping the guard releases the lock on every
/// exit path. The marker itself stays behind: unlinking it while another
/// process waits would hand out locks on two different inodes of the same
/// path.
#[derive(Debug)]
pub struct DownloadGuard {
    path: PathBuf,
    _lock: RwLockWriteGuard<tokio::fs::File>,
}

impl DownloadGuard {
    /// Acquire the lock for `destination`, waiting at most `timeout` for a
    /// competing process to release it.
    pub async fn acquire(
        destination: &Path,
        timeout: Duration,
    ) -> Result<DownloadGuard, FetchError> {
        let path = lock_path_for(destination);
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .read(true)
            .truncate(false)
            .create(true)
            .open(&path)
            .await
            .map_err(|e| {
                FetchError::IoError("opening the lock file".to_string(), path.clone(), e)
            })?;

        tracing::debug!("acquiring download lock {}", path.display());
        let lock = tokio::time::timeout(timeout, file.lock_write())
            .await
            .map_err(|_| FetchError::LockTimeout {
                path: path.clone(),
                waited: timeout,
            })?
            .map_err(|e| {
                FetchError::IoError("locking the lock file".to_string(), path.clone(), e.error)
            })?;

        Ok(DownloadGuard { path, _lock: lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Sibling marker file carrying the lock for a destination.
pub fn lock_path_for(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .unwrap_or_default()
        .to_os_string();
    name.push(consts::LOCK_FILE_SUFFIX);
    destination.with_file_name(name)
}
