use std::io::Read;
use std::path::{Path, PathBuf};

use reqwest::header;
use sha2::{Digest, Sha256};
use thiserror::Error;

use depot_config::Config;
use depot_consts::consts;

use crate::naming;
use crate::source::RemoteSource;

/// Knobs for fingerprint computation. The read limit bounds how much of the
/// object is hashed; the hash length truncates the hex digest.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintOptions {
    pub read_limit: usize,
    pub hash_length: usize,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self {
            read_limit: consts::DEFAULT_READ_LIMIT,
            hash_length: consts::DEFAULT_HASH_LENGTH,
        }
    }
}

impl FingerprintOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            // the ranged probe asks for `bytes=0-limit-1`, so the limit
            // must cover at least one byte
            read_limit: config.read_limit().max(1),
            ..Default::default()
        }
    }
}

/// Identity of a remote object, computed on demand and never persisted.
///
/// The hash covers at most `read_limit` bytes of content, which is enough to
/// tell objects apart without pulling whole datasets over the wire. Two
/// sources with the same signature map to the same cache entry.
#[derive(Debug, Clone)]
pub struct FileFingerprint {
    /// Hex sha256 of the first `read_limit` bytes, truncated to
    /// `hash_length`. `None` when the object reported a size of zero, in
    /// which case the fingerprint cannot address a `hashid/` slot.
    pub hash: Option<String>,
    pub size: u64,
    /// Content-hash stamp embedded in the filename (`resnet18-bfd8deac.pth`),
    /// when present.
    pub sha_prefix: Option<String>,
    /// `<hash>-<size>`, or the authority and path of the source when the
    /// size is zero.
    pub signature: String,
    pub filename: String,
    pub stem: String,
    pub ext: String,
}

impl FileFingerprint {
    /// Filename for hash-addressed cache slots: the signature with the
    /// original extension kept, so identical content fetched under
    /// different names lands in one file. `None` when the fingerprint has
    /// no content hash.
    pub fn hashed_filename(&self) -> Option<String> {
        self.hash
            .as_ref()
            .map(|_| format!("{}{}", self.signature, self.ext))
    }
}

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("an IO error occurred while {0} {1}")]
    IoError(String, PathBuf, #[source] std::io::Error),
    #[error("failed to reach '{url}': {reason}")]
    Unreachable { url: String, reason: String },
    #[error("cannot fingerprint '{0}': unsupported scheme")]
    UnsupportedScheme(String),
}

/// Compute the fingerprint of a remote source.
///
/// Local files are read directly. Web URLs are probed with a HEAD for the
/// size and a ranged GET for the content hash. Object-store references are
/// probed through their provider endpoint with unsigned requests; objects
/// that reject unsigned reads surface as [`FingerprintError::Unreachable`],
/// which the cache path mapper absorbs where a path-derived layout exists.
pub async fn file_fingerprint(
    source: &RemoteSource,
    client: &reqwest::Client,
    config: &Config,
    options: &FingerprintOptions,
) -> Result<FileFingerprint, FingerprintError> {
    let (full_hash, size) = if source.is_local_file() {
        local_probe(source.as_local_path(), options)?
    } else if source.is_web_url() && !source.authority_is_s3_like() {
        url_probe(source.as_str(), client, options).await?
    } else if let Some(coords) = source.object_store_coordinates(config) {
        let url = coords
            .object_url()
            .ok_or_else(|| FingerprintError::Unreachable {
                url: coords.normalized_uri(),
                reason: format!("no endpoint known for provider '{}'", coords.provider),
            })?;
        url_probe(url.as_str(), client, options).await?
    } else {
        return Err(FingerprintError::UnsupportedScheme(
            source.as_str().to_string(),
        ));
    };

    let filename = source.filename().unwrap_or_default().to_string();
    let (stem, ext) = naming::split_name(&filename);
    let sha_prefix = naming::sha_prefix_from_filename(&filename);

    let mut hash = full_hash;
    hash.truncate(options.hash_length);

    let (hash, signature) = if size > 0 {
        let signature = format!("{hash}-{size}");
        (Some(hash), signature)
    } else {
        // Nothing usable was observed; identify the object by where it
        // lives instead of what it contains.
        (None, format!("{}/{}", source.authority(), source.key()))
    };

    Ok(FileFingerprint {
        hash,
        size,
        sha_prefix,
        signature,
        filename,
        stem,
        ext,
    })
}

/// Hash the first `read_limit` bytes of a local file and report its exact
/// size from metadata.
fn local_probe(
    path: &Path,
    options: &FingerprintOptions,
) -> Result<(String, u64), FingerprintError> {
    let metadata = fs_err::metadata(path)
        .map_err(|e| FingerprintError::IoError("inspecting".to_string(), path.to_path_buf(), e))?;

    let file = fs_err::File::open(path)
        .map_err(|e| FingerprintError::IoError("opening".to_string(), path.to_path_buf(), e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file.take(options.read_limit as u64), &mut hasher)
        .map_err(|e| FingerprintError::IoError("reading".to_string(), path.to_path_buf(), e))?;

    Ok((format!("{:x}", hasher.finalize()), metadata.len()))
}

/// Probe a URL for size and prefix hash without downloading the object.
async fn url_probe(
    url: &str,
    client: &reqwest::Client,
    options: &FingerprintOptions,
) -> Result<(String, u64), FingerprintError> {
    let head = client
        .head(url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| unreachable(url, &e))?;
    let announced_size = header_content_length(&head);

    let response = client
        .get(url)
        .header(header::RANGE, format!("bytes=0-{}", options.read_limit - 1))
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| unreachable(url, &e))?;
    // Servers without range support answer 200 with the full body; capping
    // here keeps the hash identical either way.
    let hash = hash_body_prefix(response, options.read_limit)
        .await
        .map_err(|e| unreachable(url, &e))?;

    let size = match announced_size {
        Some(size) => size,
        // Some servers leave Content-Length off the HEAD response but
        // announce it on GET. The body itself is dropped unread.
        None => {
            let response = client
                .get(url)
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(|e| unreachable(url, &e))?;
            header_content_length(&response).unwrap_or(0)
        }
    };

    Ok((hash, size))
}

async fn hash_body_prefix(
    mut response: reqwest::Response,
    read_limit: usize,
) -> Result<String, reqwest::Error> {
    let mut hasher = Sha256::new();
    let mut remaining = read_limit;
    while remaining > 0 {
        let Some(chunk) = response.chunk().await? else {
            break;
        };
        let take = remaining.min(chunk.len());
        hasher.update(&chunk[..take]);
        remaining -= take;
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn header_content_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn unreachable(url: &str, error: &reqwest::Error) -> FingerprintError {
    let reason = match error.status() {
        Some(status) => status.to_string(),
        None => error.to_string(),
    };
    FingerprintError::Unreachable {
        url: url.to_string(),
        reason,
    }
}
