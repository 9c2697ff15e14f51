use std::path::Path;

use depot_config::Config;
use depot_consts::consts;
use url::Url;

/// A remote data reference, parsed once from the opaque string the caller
/// hands in. Parsing never fails: anything that does not look like a URL is
/// carried as a filesystem path and classified later by the cache path
/// mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSource {
    raw: String,
    scheme: String,
    authority: String,
    key: String,
}

/// Location of an object inside an S3-compatible store, resolved far enough
/// for a transport to act on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreCoords {
    pub provider: String,
    pub bucket: String,
    pub key: String,
    pub endpoint: Option<Url>,
    pub region: Option<String>,
}

impl ObjectStoreCoords {
    /// The `s3://bucket/key` form understood by the external copy tool,
    /// regardless of which provider alias the source was written with.
    pub fn normalized_uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    /// The plain HTTPS URL of the object on its endpoint, used for unsigned
    /// probes.
    pub fn object_url(&self) -> Option<Url> {
        let endpoint = self.endpoint.as_ref()?;
        let joined = format!(
            "{}/{}/{}",
            endpoint.as_str().trim_end_matches('/'),
            self.bucket,
            self.key
        );
        Url::parse(&joined).ok()
    }
}

impl RemoteSource {
    pub fn parse(raw: &str) -> RemoteSource {
        match Url::parse(raw) {
            // Two-letter minimum keeps Windows drive letters out of the
            // scheme position.
            Ok(url) if url.scheme().len() > 1 => RemoteSource {
                raw: raw.to_string(),
                scheme: url.scheme().to_string(),
                authority: url.authority().to_string(),
                key: url.path().trim_start_matches('/').to_string(),
            },
            _ => RemoteSource {
                raw: raw.to_string(),
                scheme: String::new(),
                authority: String::new(),
                key: raw.trim_start_matches('/').to_string(),
            },
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The path component without its leading slash.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The reference interpreted as a path on this machine.
    pub fn as_local_path(&self) -> &Path {
        Path::new(&self.raw)
    }

    pub fn is_local_file(&self) -> bool {
        self.as_local_path().is_file()
    }

    /// True when the parent directory exists locally, which marks the
    /// reference as a mounted-filesystem target even before the file itself
    /// appears.
    pub fn parent_is_local_dir(&self) -> bool {
        self.as_local_path().parent().is_some_and(Path::is_dir)
    }

    pub fn is_web_url(&self) -> bool {
        matches!(self.scheme.as_str(), "http" | "https")
    }

    /// True for hosts like `s3.amazonaws.com` or `s3.us-east-2.wasabisys.com`
    /// that mark an http(s) URL as endpoint-form object storage.
    pub fn authority_is_s3_like(&self) -> bool {
        self.authority.starts_with("s3")
    }

    /// True when the reference belongs in the object-store cache family:
    /// its scheme is a known provider alias (built-in or declared under
    /// `[s3-options]`), or its authority is s3-like.
    pub fn is_object_store(&self, config: &Config) -> bool {
        self.scheme_is_provider_alias(config) || self.authority_is_s3_like()
    }

    fn scheme_is_provider_alias(&self, config: &Config) -> bool {
        consts::PROVIDER_ENDPOINTS
            .iter()
            .any(|(alias, _)| *alias == self.scheme)
            || config.s3_options(&self.scheme).is_some()
    }

    /// Last path segment of the reference, used as the cached filename.
    pub fn filename(&self) -> Option<&str> {
        if self.scheme.is_empty() {
            self.as_local_path().file_name().and_then(|n| n.to_str())
        } else {
            self.key.rsplit('/').next().filter(|name| !name.is_empty())
        }
    }

    /// Resolve the reference into object-store coordinates when it addresses
    /// an S3-compatible store, either through a provider alias scheme
    /// (`wasabi://bucket/key`) or through an endpoint-form URL
    /// (`https://s3.<region>.<host>/bucket/key`).
    pub fn object_store_coordinates(&self, config: &Config) -> Option<ObjectStoreCoords> {
        if self.is_web_url() {
            if !self.authority_is_s3_like() {
                return None;
            }
            // Endpoint-form URL: the first path segment is the bucket.
            let (bucket, key) = self.key.split_once('/')?;
            let endpoint = Url::parse(&format!("{}://{}", self.scheme, self.authority)).ok()?;
            return Some(ObjectStoreCoords {
                provider: self.scheme.clone(),
                bucket: bucket.to_string(),
                key: key.to_string(),
                region: region_from_endpoint_host(&self.authority),
                endpoint: Some(endpoint),
            });
        }

        if !self.scheme_is_provider_alias(config) {
            return None;
        }

        Some(ObjectStoreCoords {
            provider: self.scheme.clone(),
            bucket: self.authority.clone(),
            key: self.key.clone(),
            region: config
                .s3_options(&self.scheme)
                .and_then(|options| options.region.clone()),
            endpoint: config.provider_endpoint(&self.scheme),
        })
    }
}

impl std::fmt::Display for RemoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Pull the region out of an endpoint host like `s3.us-east-2.wasabisys.com`.
/// Hosts without a region segment (`s3.amazonaws.com`) yield `None`.
fn region_from_endpoint_host(host: &str) -> Option<String> {
    let mut parts = host.split('.');
    let first = parts.next()?;
    if first != "s3" {
        return None;
    }
    let candidate = parts.next()?;
    (candidate.contains('-') && candidate.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
        .then(|| candidate.to_string())
}
