use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use depot_config::Config;
use depot_consts::consts;

use crate::fingerprint::{FileFingerprint, FingerprintError};
use crate::source::RemoteSource;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("cannot derive a cache location for '{0}': unsupported scheme")]
    UnsupportedScheme(String),
}

/// Map a remote source to the directory its cached copy lives in. The
/// caller appends the filename; the four layout families are
/// `hashid/<hash>/<filename>`, `mnt/<authority>/<abs-path>`,
/// `<scheme>/<authority>/<key>` and `s3/<provider>/<authority>/<key>`.
///
/// The decision order is load-bearing and first-match-wins:
///
/// 1. an existing regular file goes to `hashid/<hash>` when a content hash
///    is available, otherwise under `mnt/` by its absolute path;
/// 2. a path whose parent directory exists (a pre-download target) goes
///    under `mnt/`;
/// 3. a plain web URL goes to `hashid/<hash>` when a content hash is
///    available, otherwise under `<scheme>/<authority>/`;
/// 4. an object-store reference (provider alias scheme, or any authority
///    starting with `s3`) goes under `s3/<scheme>/<authority>/`;
/// 5. everything else is an unsupported scheme.
///
/// The filesystem probes run before URL classification on purpose: a
/// reference that exists locally resolves as local even when it would also
/// parse as a URL. The fingerprint arrives as a `Result` so that probe
/// failures select the path-derived fallback branches explicitly. No
/// directory is created here.
pub fn cache_dir(
    source: &RemoteSource,
    cache_root: &Path,
    config: &Config,
    fingerprint: Result<&FileFingerprint, &FingerprintError>,
) -> Result<PathBuf, LayoutError> {
    if source.is_local_file() {
        if let Some(hash) = content_hash(fingerprint) {
            return Ok(cache_root.join(consts::HASHID_DIR).join(hash));
        }
        return Ok(mounted_dir(source, cache_root));
    }

    if source.parent_is_local_dir() {
        return Ok(mounted_dir(source, cache_root));
    }

    if source.is_web_url() && !source.authority_is_s3_like() {
        if let Some(hash) = content_hash(fingerprint) {
            return Ok(cache_root.join(consts::HASHID_DIR).join(hash));
        }
        return Ok(cache_root
            .join(source.scheme())
            .join(source.authority())
            .join(key_parent(source.key())));
    }

    if source.is_object_store(config) {
        return Ok(cache_root
            .join(consts::OBJECT_STORE_DIR)
            .join(source.scheme())
            .join(source.authority())
            .join(key_parent(source.key())));
    }

    Err(LayoutError::UnsupportedScheme(source.as_str().to_string()))
}

/// Whether any [`cache_dir`] branch for this source can consume a
/// fingerprint. Lets callers skip the probe when no branch would use it.
pub fn wants_fingerprint(source: &RemoteSource) -> bool {
    if source.is_local_file() {
        return true;
    }
    if source.parent_is_local_dir() {
        return false;
    }
    source.is_web_url() && !source.authority_is_s3_like()
}

/// A usable content hash: the fingerprint succeeded and saw a non-empty
/// object.
fn content_hash<'a>(
    fingerprint: Result<&'a FileFingerprint, &FingerprintError>,
) -> Option<&'a str> {
    fingerprint.ok().and_then(|fp| fp.hash.as_deref())
}

/// `mnt/<authority>/<absolute parent without its root>`, mirroring where
/// the file sits on the mounted filesystem.
fn mounted_dir(source: &RemoteSource, cache_root: &Path) -> PathBuf {
    let mut dir = cache_root.join(consts::MOUNT_DIR);
    if !source.authority().is_empty() {
        dir.push(source.authority());
    }
    if let Some(parent) = rootless_absolute(source.as_local_path()).parent() {
        dir.push(parent);
    }
    dir
}

/// The key with its final segment removed. Keys are URI paths, so the
/// separator is always a forward slash.
fn key_parent(key: &str) -> &str {
    key.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

fn rootless_absolute(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    absolute
        .components()
        .filter(|component| !matches!(component, Component::RootDir | Component::Prefix(_)))
        .collect()
}
