use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use depot::fetch::transport::{
    ObjectStoreTransport, TransportOptions, TransportOutcome, UrlTransport,
};
use depot::fetch::{FetchContext, FetchError, FetchOptions, Fetched};
use depot::source::{ObjectStoreCoords, RemoteSource};
use depot_config::Config;
use depot_consts::consts;

/// Runs a future with the cache environment overrides cleared, so the
/// harness cache root is the one that gets used.
pub async fn sandboxed<F: Future>(future: F) -> F::Output {
    temp_env::async_with_vars(
        [
            (consts::CACHE_DIR_ENV, None::<&str>),
            (consts::SHARED_CACHE_DIR_ENV, None::<&str>),
        ],
        future,
    )
    .await
}

/// Same skip rule as the real transports: only a non-empty destination
/// short-circuits the transfer.
fn destination_is_populated(path: &Path) -> bool {
    path.metadata()
        .map(|metadata| metadata.is_file() && metadata.len() > 0)
        .unwrap_or(false)
}

/// Object-store transport that writes a fixed payload instead of shelling
/// out, counting how often it actually transfers.
pub struct StubObjectStore {
    payload: Vec<u8>,
    delay: Duration,
    copies: AtomicUsize,
}

#[async_trait]
impl ObjectStoreTransport for StubObjectStore {
    async fn copy(
        &self,
        _coords: &ObjectStoreCoords,
        destination: &Path,
        _options: &TransportOptions,
    ) -> Result<TransportOutcome, FetchError> {
        if destination_is_populated(destination) {
            return Ok(TransportOutcome::AlreadyPresent);
        }
        self.copies.fetch_add(1, Ordering::SeqCst);
        // Long enough for racing callers to pile up on the lock.
        tokio::time::sleep(self.delay).await;
        tokio::fs::write(destination, &self.payload)
            .await
            .map_err(|e| {
                FetchError::IoError("writing".to_string(), destination.to_path_buf(), e)
            })?;
        Ok(TransportOutcome::Downloaded)
    }
}

/// URL transport that honors the hash-stamp contract of the real one: when
/// an expected prefix is given, nothing is written unless the payload
/// digest starts with it.
pub struct StubUrlTransport {
    payload: Vec<u8>,
    payload_sha256: String,
    downloads: AtomicUsize,
}

#[async_trait]
impl UrlTransport for StubUrlTransport {
    async fn download(
        &self,
        _url: &str,
        destination: &Path,
        expected_sha_prefix: Option<&str>,
        _show_progress: bool,
    ) -> Result<TransportOutcome, FetchError> {
        if destination_is_populated(destination) {
            return Ok(TransportOutcome::AlreadyPresent);
        }
        if let Some(prefix) = expected_sha_prefix {
            if !self.payload_sha256.starts_with(prefix) {
                return Err(FetchError::IntegrityMismatch {
                    path: destination.to_path_buf(),
                    expected: prefix.to_string(),
                    computed: self.payload_sha256.clone(),
                });
            }
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(destination, &self.payload)
            .await
            .map_err(|e| {
                FetchError::IoError("writing".to_string(), destination.to_path_buf(), e)
            })?;
        Ok(TransportOutcome::Downloaded)
    }
}

/// Drives fetches against a throwaway cache root with instrumented
/// transports.
pub struct DepotControl {
    cache_root: TempDir,
    scratch: TempDir,
    object_store: Arc<StubObjectStore>,
    url: Arc<StubUrlTransport>,
    context: Arc<FetchContext>,
}

impl DepotControl {
    pub fn new() -> DepotControl {
        Self::with_payload(b"depot object payload")
    }

    pub fn with_payload(payload: &[u8]) -> DepotControl {
        let cache_root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();

        // Digest of the payload, for building stamped filenames and
        // checksums without re-implementing the hashing here.
        let reference = scratch.path().join("payload");
        std::fs::write(&reference, payload).unwrap();
        let payload_sha256 = depot::naming::compute_sha256(&reference).unwrap();

        let object_store = Arc::new(StubObjectStore {
            payload: payload.to_vec(),
            delay: Duration::from_millis(50),
            copies: AtomicUsize::new(0),
        });
        let url = Arc::new(StubUrlTransport {
            payload: payload.to_vec(),
            payload_sha256,
            downloads: AtomicUsize::new(0),
        });

        let mut config = Config::default();
        config.cache.dir = Some(cache_root.path().to_path_buf());
        let context = Arc::new(
            FetchContext::new(config, reqwest::Client::new())
                .with_object_store_transport(object_store.clone())
                .with_url_transport(url.clone()),
        );

        DepotControl {
            cache_root,
            scratch,
            object_store,
            url,
            context,
        }
    }

    pub fn cache_root(&self) -> &Path {
        self.cache_root.path()
    }

    pub fn context(&self) -> Arc<FetchContext> {
        self.context.clone()
    }

    /// Hex SHA256 digest of the payload the stub transports serve.
    pub fn payload_sha256(&self) -> &str {
        &self.url.payload_sha256
    }

    /// Provider-style checksum of the payload, as `verify` computes it.
    pub fn payload_etag(&self) -> String {
        let reference = self.scratch.path().join("payload");
        depot::integrity::compute_etag(&reference).unwrap()
    }

    /// Number of object-store transfers that actually ran.
    pub fn copies(&self) -> usize {
        self.object_store.copies.load(Ordering::SeqCst)
    }

    /// Number of URL downloads that actually ran.
    pub fn downloads(&self) -> usize {
        self.url.downloads.load(Ordering::SeqCst)
    }

    pub async fn fetch(&self, source: &str, options: &FetchOptions) -> Result<Fetched, FetchError> {
        let source = RemoteSource::parse(source);
        depot::fetch::fetch(&source, options, &self.context).await
    }

    /// Everything currently below the cache root, relative to it.
    pub fn cache_entries(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, base: &Path, out: &mut Vec<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                out.push(path.strip_prefix(base).unwrap().to_path_buf());
                if path.is_dir() {
                    walk(&path, base, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(self.cache_root.path(), self.cache_root.path(), &mut out);
        out.sort();
        out
    }
}
