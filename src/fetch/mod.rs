pub mod lock;
pub mod transport;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use depot_config::{CacheRootError, Config};
use depot_consts::consts;

use crate::extract::{self, ExtractError};
use crate::fingerprint::{self, FingerprintError, FingerprintOptions};
use crate::integrity::{self, IntegrityError};
use crate::layout::{self, LayoutError};
use crate::naming;
use crate::source::RemoteSource;

use lock::DownloadGuard;
use transport::{
    CopyToolTransport, ObjectStoreTransport, ReqwestTransport, TransportOptions, TransportOutcome,
    UrlTransport,
};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("an IO error occurred while {0} {1}")]
    IoError(String, PathBuf, #[source] std::io::Error),

    #[error("cannot fetch '{0}': unsupported scheme")]
    UnsupportedScheme(String),

    #[error("failed to reach '{url}': {reason}")]
    Unreachable { url: String, reason: String },

    #[error("gave up waiting for the download lock on {path} after {} seconds", .waited.as_secs())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("checksum mismatch for {path}: expected '{expected}', computed '{computed}'")]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        computed: String,
    },

    #[error("{command} failed with return code {code}\n{diagnostic}")]
    TransportFailure {
        command: String,
        code: i32,
        diagnostic: String,
    },

    #[error("could not find '{0}' on the PATH")]
    CopyToolMissing(String, #[source] which::Error),

    #[error("no checksum is available to verify '{0}'")]
    NoChecksum(String),

    #[error("cannot derive a filename for '{0}'")]
    NoFilename(String),

    #[error(transparent)]
    NoCacheRoot(#[from] CacheRootError),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

impl From<FingerprintError> for FetchError {
    fn from(error: FingerprintError) -> Self {
        match error {
            FingerprintError::IoError(op, path, e) => FetchError::IoError(op, path, e),
            FingerprintError::Unreachable { url, reason } => FetchError::Unreachable { url, reason },
            FingerprintError::UnsupportedScheme(source) => FetchError::UnsupportedScheme(source),
        }
    }
}

impl From<LayoutError> for FetchError {
    fn from(error: LayoutError) -> Self {
        match error {
            LayoutError::UnsupportedScheme(source) => FetchError::UnsupportedScheme(source),
        }
    }
}

impl From<IntegrityError> for FetchError {
    fn from(error: IntegrityError) -> Self {
        match error {
            IntegrityError::IoError(op, path, e) => FetchError::IoError(op, path, e),
            IntegrityError::Mismatch {
                path,
                expected,
                computed,
            } => FetchError::IntegrityMismatch {
                path,
                expected,
                computed,
            },
            IntegrityError::Unreachable { url, reason } => FetchError::Unreachable { url, reason },
            IntegrityError::NoRemoteChecksum(source) => FetchError::NoChecksum(source),
        }
    }
}

/// Per-call fetch behavior.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Check the download against the provider checksum (object storage)
    /// or the filename hash stamp (URLs).
    pub verify: bool,
    /// Re-download even when a cached copy exists.
    pub force: bool,
    /// Cache under `hashid/` with a content-derived filename, so the same
    /// bytes fetched under different names share one slot.
    pub hash_filename: bool,
    /// Resolve the destination without transferring anything.
    pub dry_run: bool,
    pub show_progress: bool,
    /// Explicit checksum to verify against, instead of the provider- or
    /// filename-derived one.
    pub expected_checksum: Option<String>,
    /// Cache under this filename instead of the one in the source.
    pub dest_name: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            verify: false,
            force: false,
            hash_filename: false,
            dry_run: false,
            show_progress: true,
            expected_checksum: None,
            dest_name: None,
        }
    }
}

/// Shared pieces a fetch needs: configuration, the HTTP client, and the
/// two transports. Tests swap the transports for instrumented stubs.
pub struct FetchContext {
    config: Config,
    client: reqwest::Client,
    object_store: Arc<dyn ObjectStoreTransport>,
    url: Arc<dyn UrlTransport>,
}

impl FetchContext {
    pub fn new(config: Config, client: reqwest::Client) -> Self {
        let url_transport = ReqwestTransport::new(client.clone());
        Self {
            config,
            client,
            object_store: Arc::new(CopyToolTransport),
            url: Arc::new(url_transport),
        }
    }

    pub fn with_object_store_transport(
        mut self,
        transport: Arc<dyn ObjectStoreTransport>,
    ) -> Self {
        self.object_store = transport;
        self
    }

    pub fn with_url_transport(mut self, transport: Arc<dyn UrlTransport>) -> Self {
        self.url = transport;
        self
    }
}

/// How a fetch concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The file was transferred in this call.
    Downloaded,
    /// A valid cached copy was already present.
    CacheHit,
    /// The destination was resolved but nothing was transferred.
    DryRun,
}

impl From<TransportOutcome> for FetchOutcome {
    fn from(outcome: TransportOutcome) -> Self {
        match outcome {
            TransportOutcome::Downloaded => FetchOutcome::Downloaded,
            TransportOutcome::AlreadyPresent => FetchOutcome::CacheHit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub path: PathBuf,
    /// Directory the file was expanded into, when it is an archive.
    pub extracted_dir: Option<PathBuf>,
    pub outcome: FetchOutcome,
}

/// Fetch a remote source into the cache.
///
/// Local files resolve in place without copying. For remote sources the
/// destination is resolved, checked, locked, re-checked, downloaded,
/// optionally verified, and expanded, in that order. At most one process
/// downloads a given destination; concurrent callers wait on the
/// destination lock and then observe the completed file. A failed
/// download or verification removes the incomplete destination before the
/// error surfaces, so the next call starts clean.
pub async fn fetch(
    source: &RemoteSource,
    options: &FetchOptions,
    context: &FetchContext,
) -> Result<Fetched, FetchError> {
    if source.is_local_file() {
        let path = source.as_local_path().to_path_buf();
        tracing::debug!("{} is a mounted file, resolving in place", source);
        let extracted_dir = if options.dry_run {
            None
        } else {
            extract::expand_if_archive(&path)?
        };
        return Ok(Fetched {
            path,
            extracted_dir,
            outcome: FetchOutcome::CacheHit,
        });
    }

    let destination = resolve(source, options, context).await?;

    if options.dry_run {
        tracing::info!(
            "dry run: {} would be cached at {}",
            source,
            destination.display()
        );
        return Ok(Fetched {
            path: destination,
            extracted_dir: None,
            outcome: FetchOutcome::DryRun,
        });
    }

    // Optimistic check before taking the lock.
    if !options.force && is_present(&destination) {
        tracing::debug!("cache hit for {} at {}", source, destination.display());
        let extracted_dir = extract::expand_if_archive(&destination)?;
        return Ok(Fetched {
            path: destination,
            extracted_dir,
            outcome: FetchOutcome::CacheHit,
        });
    }

    if let Some(parent) = destination.parent() {
        fs_err::create_dir_all(parent)
            .map_err(|e| FetchError::IoError("creating".to_string(), parent.to_path_buf(), e))?;
    }

    let guard = DownloadGuard::acquire(&destination, context.config.lock_timeout()).await?;

    // Authoritative check: another process may have finished the download
    // while we waited for the lock.
    if !options.force && is_present(&destination) {
        tracing::debug!("{} appeared while waiting for the lock", destination.display());
        drop(guard);
        let extracted_dir = extract::expand_if_archive(&destination)?;
        return Ok(Fetched {
            path: destination,
            extracted_dir,
            outcome: FetchOutcome::CacheHit,
        });
    }

    if options.force && destination.exists() {
        fs_err::remove_file(&destination).map_err(|e| {
            FetchError::IoError("removing".to_string(), destination.to_path_buf(), e)
        })?;
    }

    let started = Instant::now();
    match download_and_verify(source, &destination, options, context).await {
        Ok(outcome) => {
            if outcome == TransportOutcome::Downloaded {
                let elapsed = Duration::from_millis(started.elapsed().as_millis() as u64);
                tracing::info!("fetched {} in {}", source, humantime::format_duration(elapsed));
            }
            drop(guard);
            let extracted_dir = extract::expand_if_archive(&destination)?;
            Ok(Fetched {
                path: destination,
                extracted_dir,
                outcome: outcome.into(),
            })
        }
        Err(error) => {
            discard_incomplete(&destination);
            drop(guard);
            Err(error)
        }
    }
}

/// Resolve the cache destination for a source without touching it. This is
/// the query half of [`fetch`]: no directory is created, nothing is
/// downloaded or locked.
pub async fn resolve_destination(
    source: &RemoteSource,
    options: &FetchOptions,
    context: &FetchContext,
) -> Result<PathBuf, FetchError> {
    resolve(source, options, context).await
}

async fn resolve(
    source: &RemoteSource,
    options: &FetchOptions,
    context: &FetchContext,
) -> Result<PathBuf, FetchError> {
    let cache_root = context.config.cache_root()?;
    let coords = source.object_store_coordinates(&context.config);

    // The fingerprint probe costs requests, so it only runs for sources
    // whose layout or filename can use the result.
    let fingerprint = if layout::wants_fingerprint(source)
        || (options.hash_filename && coords.is_none())
    {
        let fingerprint_options = FingerprintOptions::from_config(&context.config);
        Some(
            fingerprint::file_fingerprint(
                source,
                &context.client,
                &context.config,
                &fingerprint_options,
            )
            .await,
        )
    } else {
        None
    };

    if options.hash_filename {
        let dir = cache_root.join(consts::HASHID_DIR);
        // Object-store entries are named by their provider checksum, URL
        // and local entries by their fingerprint signature.
        let filename = if coords.is_some() {
            let etag = integrity::remote_etag(source, &context.client, &context.config).await?;
            let (_, ext) = naming::split_name(source.filename().unwrap_or_default());
            format!("{etag}{ext}")
        } else {
            match fingerprint {
                Some(Ok(fp)) => match fp.hashed_filename() {
                    Some(name) => name,
                    None if !fp.filename.is_empty() => fp.filename,
                    None => return Err(FetchError::NoFilename(source.as_str().to_string())),
                },
                Some(Err(error)) => return Err(error.into()),
                None => return Err(FetchError::UnsupportedScheme(source.as_str().to_string())),
            }
        };
        return Ok(dir.join(filename));
    }

    let not_attempted = FingerprintError::UnsupportedScheme(source.as_str().to_string());
    let fingerprint_ref = match &fingerprint {
        Some(result) => result.as_ref(),
        None => Err(&not_attempted),
    };
    let dir = layout::cache_dir(source, &cache_root, &context.config, fingerprint_ref)?;

    let filename = match &options.dest_name {
        Some(name) => name.clone(),
        None => source
            .filename()
            .map(str::to_string)
            .ok_or_else(|| FetchError::NoFilename(source.as_str().to_string()))?,
    };
    Ok(dir.join(filename))
}

async fn download_and_verify(
    source: &RemoteSource,
    destination: &Path,
    options: &FetchOptions,
    context: &FetchContext,
) -> Result<TransportOutcome, FetchError> {
    if let Some(coords) = source.object_store_coordinates(&context.config) {
        let transport_options = TransportOptions::for_coords(
            &coords,
            &context.config,
            &context.client,
            options.show_progress,
        )
        .await;
        let outcome = context
            .object_store
            .copy(&coords, destination, &transport_options)
            .await?;

        if options.verify {
            let expected = match &options.expected_checksum {
                Some(expected) => expected.clone(),
                None => integrity::remote_etag(source, &context.client, &context.config).await?,
            };
            tracing::debug!("verifying {} against '{expected}'", destination.display());
            integrity::verify(destination, &expected)?;
        }
        Ok(outcome)
    } else if source.is_web_url() {
        let expected_prefix = options.expected_checksum.clone().or_else(|| {
            naming::sha_prefix_from_filename(source.filename().unwrap_or_default())
        });
        if options.verify && expected_prefix.is_none() {
            tracing::warn!(
                "the filename of {} carries no hash stamp, skipping verification",
                source
            );
        }
        let prefix = if options.verify { expected_prefix } else { None };
        context
            .url
            .download(
                source.as_str(),
                destination,
                prefix.as_deref(),
                options.show_progress,
            )
            .await
    } else if source.parent_is_local_dir() {
        Err(FetchError::Unreachable {
            url: source.as_str().to_string(),
            reason: "the file does not exist on the mounted filesystem".to_string(),
        })
    } else {
        Err(FetchError::UnsupportedScheme(source.as_str().to_string()))
    }
}

/// Present means a non-empty regular file; zero-length files count as
/// debris from an interrupted download.
fn is_present(path: &Path) -> bool {
    fs_err::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.len() > 0)
        .unwrap_or(false)
}

fn discard_incomplete(destination: &Path) {
    if destination.exists() {
        if let Err(error) = fs_err::remove_file(destination) {
            tracing::warn!(
                "could not remove the incomplete download {}: {error}",
                destination.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context(root: &Path) -> FetchContext {
        let mut config = Config::default();
        config.cache.dir = Some(root.to_path_buf());
        FetchContext::new(config, reqwest::Client::new())
    }

    async fn without_cache_env<F: std::future::Future>(future: F) -> F::Output {
        temp_env::async_with_vars(
            [
                (consts::CACHE_DIR_ENV, None::<&str>),
                (consts::SHARED_CACHE_DIR_ENV, None::<&str>),
            ],
            future,
        )
        .await
    }

    #[test]
    fn test_is_present() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.bin");
        assert!(!is_present(&missing));

        let empty = dir.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();
        assert!(!is_present(&empty), "zero-length files are debris");

        let full = dir.path().join("full.bin");
        std::fs::write(&full, b"body").unwrap();
        assert!(is_present(&full));
    }

    #[tokio::test]
    async fn test_resolve_object_store_destination() {
        let root = tempfile::tempdir().unwrap();
        let context = test_context(root.path());
        let source = RemoteSource::parse("wasabi://visionlab/models/resnet.pth");

        let destination = without_cache_env(resolve_destination(
            &source,
            &FetchOptions::default(),
            &context,
        ))
        .await
        .unwrap();
        assert_eq!(
            destination,
            root.path().join("s3/wasabi/visionlab/models/resnet.pth")
        );
    }

    #[tokio::test]
    async fn test_resolve_unreachable_url_falls_back_to_url_layout() {
        let root = tempfile::tempdir().unwrap();
        let context = test_context(root.path());
        // reserved TLD: the fingerprint probe fails without a network round trip
        let source = RemoteSource::parse("https://depot-test.invalid/models/resnet.pth");

        let destination = without_cache_env(resolve_destination(
            &source,
            &FetchOptions::default(),
            &context,
        ))
        .await
        .unwrap();
        assert_eq!(
            destination,
            root.path().join("https/depot-test.invalid/models/resnet.pth")
        );
    }

    #[tokio::test]
    async fn test_resolve_honors_dest_name() {
        let root = tempfile::tempdir().unwrap();
        let context = test_context(root.path());
        let source = RemoteSource::parse("wasabi://visionlab/models/resnet.pth");
        let options = FetchOptions {
            dest_name: Some("current.pth".to_string()),
            ..FetchOptions::default()
        };

        let destination = without_cache_env(resolve_destination(&source, &options, &context))
            .await
            .unwrap();
        assert_eq!(
            destination,
            root.path().join("s3/wasabi/visionlab/models/current.pth")
        );
    }

    #[tokio::test]
    async fn test_resolve_reports_hash_slot_for_an_existing_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("weights.pth");
        std::fs::write(&file, b"body").unwrap();

        let root = tempfile::tempdir().unwrap();
        let context = test_context(root.path());
        let source = RemoteSource::parse(file.to_str().unwrap());

        // `fetch` serves an existing local file in place, but resolving it
        // still reports the content-addressed slot the mapper assigns.
        let destination = without_cache_env(resolve_destination(
            &source,
            &FetchOptions::default(),
            &context,
        ))
        .await
        .unwrap();
        assert!(destination.starts_with(root.path().join("hashid")));
        assert_eq!(destination.file_name().unwrap(), "weights.pth");
    }

    #[tokio::test]
    async fn test_fetch_local_file_resolves_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("weights.pth");
        std::fs::write(&file, b"body").unwrap();

        let root = tempfile::tempdir().unwrap();
        let context = test_context(root.path());
        let source = RemoteSource::parse(file.to_str().unwrap());

        let fetched = fetch(&source, &FetchOptions::default(), &context)
            .await
            .unwrap();
        assert_eq!(fetched.path, file);
        assert_eq!(fetched.outcome, FetchOutcome::CacheHit);
        assert_eq!(fetched.extracted_dir, None);
    }

    #[tokio::test]
    async fn test_dry_run_creates_nothing() {
        let root = tempfile::tempdir().unwrap();
        let context = test_context(root.path());
        let source = RemoteSource::parse("wasabi://visionlab/models/resnet.pth");
        let options = FetchOptions {
            dry_run: true,
            ..FetchOptions::default()
        };

        let fetched = without_cache_env(fetch(&source, &options, &context))
            .await
            .unwrap();
        assert_eq!(fetched.outcome, FetchOutcome::DryRun);
        assert!(!root.path().join("s3").exists());
    }
}
