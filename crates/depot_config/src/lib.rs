use std::{
    collections::{BTreeSet as Set, HashMap},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use clap::{ArgAction, Parser};
use depot_consts::consts;
use itertools::Itertools;
use miette::{IntoDiagnostic, miette};
use serde::{Deserialize, Serialize};
use url::Url;

/// Get the depot home directory, default to `$HOME/.depot`.
///
/// It may be overridden by the `DEPOT_HOME` environment variable.
pub fn depot_home() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(consts::HOME_ENV) {
        Some(PathBuf::from(path))
    } else {
        dirs::home_dir().map(|path| path.join(consts::DEPOT_DIR))
    }
}

#[derive(Parser, Debug, Default, Clone)]
pub struct ConfigCli {
    /// Cache directory to resolve sources into.
    #[arg(long, help_heading = consts::CLAP_CONFIG_OPTIONS)]
    cache_dir: Option<PathBuf>,

    /// Seconds to wait for another process to release a destination lock,
    /// default is `600`
    #[arg(long, help_heading = consts::CLAP_CONFIG_OPTIONS)]
    lock_timeout: Option<u64>,

    /// Do not verify the TLS certificate of the server.
    #[arg(long, action = ArgAction::SetTrue, help_heading = consts::CLAP_CONFIG_OPTIONS)]
    tls_no_verify: bool,
}

/// Where the cache root may live. `dir` pins it explicitly; `search-dirs`
/// are ranked candidates probed in order, useful when the same config file is
/// shared between machines that mount different filesystems.
#[derive(Clone, Default, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_dirs: Vec<PathBuf>,
}

impl CacheConfig {
    pub fn is_default(&self) -> bool {
        self == &CacheConfig::default()
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            dir: other.dir.or(self.dir),
            search_dirs: if other.search_dirs.is_empty() {
                self.search_dirs
            } else {
                other.search_dirs
            },
        }
    }
}

fn default_lock_timeout() -> u64 {
    consts::DEFAULT_LOCK_TIMEOUT_SECS
}

fn default_read_limit() -> usize {
    consts::DEFAULT_READ_LIMIT
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct FetchConfig {
    /// Seconds to wait for another process to release a destination lock.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,

    /// Number of leading bytes hashed when fingerprinting a source.
    #[serde(default = "default_read_limit")]
    pub read_limit: usize,

    /// Verify the provider checksum after every download.
    #[serde(default)]
    pub verify: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout(),
            read_limit: default_read_limit(),
            verify: false,
        }
    }
}

impl FetchConfig {
    /// Merge the given config into self, the other config takes priority for
    /// fields that deviate from the defaults.
    pub fn merge(self, other: Self) -> Self {
        let defaults = FetchConfig::default();
        Self {
            lock_timeout_secs: if other.lock_timeout_secs != defaults.lock_timeout_secs {
                other.lock_timeout_secs
            } else {
                self.lock_timeout_secs
            },
            read_limit: if other.read_limit != defaults.read_limit {
                other.read_limit
            } else {
                self.read_limit
            },
            verify: other.verify || self.verify,
        }
    }

    pub fn is_default(&self) -> bool {
        self == &FetchConfig::default()
    }
}

/// Connection options for one object-storage provider, keyed by the provider
/// alias in the `s3-options` table.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct S3Options {
    /// S3 endpoint URL
    pub endpoint_url: Url,

    /// The name of the S3 region
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Skip request signing, for buckets that allow anonymous access
    #[serde(default)]
    pub no_sign_request: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// If set to true, depot will not verify the TLS certificate of the
    /// server.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_no_verify: Option<bool>,

    /// Where the local cache tree lives.
    #[serde(default)]
    #[serde(skip_serializing_if = "CacheConfig::is_default")]
    pub cache: CacheConfig,

    /// Knobs of the fetch state machine.
    #[serde(default)]
    #[serde(skip_serializing_if = "FetchConfig::is_default")]
    pub fetch: FetchConfig,

    /// Per-provider object-storage options.
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub s3_options: HashMap<String, S3Options>,

    #[serde(skip)]
    pub loaded_from: Vec<PathBuf>,
}

impl From<ConfigCli> for Config {
    fn from(cli: ConfigCli) -> Self {
        Self {
            tls_no_verify: if cli.tls_no_verify { Some(true) } else { None },
            cache: CacheConfig {
                dir: cli.cache_dir,
                ..Default::default()
            },
            fetch: FetchConfig {
                lock_timeout_secs: cli.lock_timeout.unwrap_or_else(default_lock_timeout),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("no file was found at {0}")]
    FileNotFound(PathBuf),
    #[error("failed to read config from '{0}'")]
    ReadError(std::io::Error),
    #[error("failed to parse config of {1}: {0}")]
    ParseError(miette::Report, PathBuf),
    #[error("validation error of {1}: {0}")]
    ValidationError(miette::Report, PathBuf),
}

#[derive(thiserror::Error, Debug)]
pub enum CacheRootError {
    #[error(
        "could not determine a cache directory: set {} or configure `cache.dir`",
        consts::CACHE_DIR_ENV
    )]
    NoCandidate,
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

impl Config {
    /// Parse the given toml string and return a Config instance.
    ///
    /// # Returns
    ///
    /// The parsed config, and the unused keys
    ///
    /// # Errors
    ///
    /// Parsing errors
    #[inline]
    pub fn from_toml(toml: &str) -> miette::Result<(Config, Set<String>)> {
        let de = toml_edit::de::Deserializer::from_str(toml).into_diagnostic()?;

        // Deserialize the config and collect unused keys
        let mut unused_keys = Set::new();
        let config: Config = serde_ignored::deserialize(de, |path| {
            unused_keys.insert(path.to_string());
        })
        .into_diagnostic()?;

        Ok((config, unused_keys))
    }

    /// Load the config from the given path.
    ///
    /// # Returns
    ///
    /// The loaded config
    ///
    /// # Errors
    ///
    /// I/O errors or parsing errors
    pub fn from_path(path: &Path) -> Result<Config, ConfigError> {
        tracing::debug!("Loading config from {}", path.display());
        let s = match fs_err::read_to_string(path) {
            Ok(content) => content,
            Err(e)
                if e.kind() == std::io::ErrorKind::NotFound
                    || e.kind() == std::io::ErrorKind::NotADirectory =>
            {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(ConfigError::ReadError(e)),
        };

        let (mut config, unused_keys) =
            Config::from_toml(&s).map_err(|e| ConfigError::ParseError(e, path.to_path_buf()))?;

        if !unused_keys.is_empty() {
            tracing::warn!(
                "Ignoring '{}' in at {}",
                console::style(unused_keys.iter().map(|s| s.as_str()).join(", ")).yellow(),
                path.display()
            );
        }

        config.loaded_from.push(path.to_path_buf());
        tracing::debug!("Loaded config from: {}", path.display());

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e, path.to_path_buf()))?;

        Ok(config)
    }

    /// Load the system config file from the system path.
    ///
    /// # Errors
    ///
    /// I/O errors or parsing errors
    pub fn try_load_system() -> Result<Config, ConfigError> {
        Self::from_path(&config_path_system())
    }

    /// Load the system config file from the system path.
    ///
    /// # Returns
    ///
    /// The loaded system config
    pub fn load_system() -> Config {
        Self::try_load_system().unwrap_or_else(|e| {
            match e {
                ConfigError::FileNotFound(_) => (), // it's fine that no file is there
                e => tracing::error!("{e}"),
            }

            Self::default()
        })
    }

    /// Validate the config file.
    pub fn validate(&self) -> miette::Result<()> {
        if let Some(dir) = self.cache.dir.as_ref() {
            if !expand_home(dir).is_absolute() {
                return Err(miette!(
                    "The `cache.dir` path must be an absolute path: {}",
                    dir.display()
                ));
            }
        }
        for dir in &self.cache.search_dirs {
            if !expand_home(dir).is_absolute() {
                return Err(miette!(
                    "The `cache.search-dirs` entries must be absolute paths: {}",
                    dir.display()
                ));
            }
        }

        if self.fetch.read_limit == 0 {
            return Err(miette!("`fetch.read-limit` must be at least 1"));
        }

        Ok(())
    }

    /// Load the global config file from various global paths.
    ///
    /// # Returns
    ///
    /// The loaded global config
    pub fn load_global() -> Config {
        let mut config = Self::load_system();

        for p in config_path_global() {
            match Self::from_path(&p) {
                Ok(c) => config = config.merge_config(c),
                Err(ConfigError::FileNotFound(_)) => (),
                Err(e) => tracing::error!(
                    "Failed to load global config '{}' with error: {}",
                    p.display(),
                    e
                ),
            }
        }

        config
    }

    /// Load the global config and layer the given cli config on top of it.
    pub fn with_cli_config(cli: &ConfigCli) -> Config {
        let config = Config::load_global();
        config.merge_config(cli.clone().into())
    }

    /// Merge the `other` config into `self`.
    /// The `other` config will have higher priority
    #[must_use]
    pub fn merge_config(self, mut other: Config) -> Self {
        other.loaded_from.extend(self.loaded_from);

        Self {
            tls_no_verify: other.tls_no_verify.or(self.tls_no_verify),
            cache: self.cache.merge(other.cache),
            fetch: self.fetch.merge(other.fetch),
            s3_options: {
                let mut merged = HashMap::new();
                merged.extend(self.s3_options);
                merged.extend(other.s3_options);
                merged
            },
            loaded_from: other.loaded_from,
        }
    }

    /// Whether TLS certificate verification is disabled.
    pub fn tls_no_verify(&self) -> bool {
        self.tls_no_verify.unwrap_or(false)
    }

    /// Bounded wait applied when acquiring a destination lock.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.lock_timeout_secs)
    }

    /// Number of leading bytes hashed when fingerprinting a source.
    pub fn read_limit(&self) -> usize {
        self.fetch.read_limit
    }

    /// Whether downloads are verified against the provider checksum by
    /// default.
    pub fn verify_downloads(&self) -> bool {
        self.fetch.verify
    }

    /// The configured options for an object-storage provider, if any.
    pub fn s3_options(&self, provider: &str) -> Option<&S3Options> {
        self.s3_options.get(provider)
    }

    /// Resolve the endpoint for a provider alias: configuration first, then
    /// the built-in table.
    pub fn provider_endpoint(&self, provider: &str) -> Option<Url> {
        if let Some(options) = self.s3_options.get(provider) {
            return Some(options.endpoint_url.clone());
        }
        consts::PROVIDER_ENDPOINTS
            .iter()
            .find(|(alias, _)| *alias == provider)
            .map(|(_, endpoint)| Url::parse(endpoint).expect("built-in endpoint is a valid URL"))
    }

    /// Resolve the cache root for this invocation.
    ///
    /// Most important is the `DEPOT_CACHE_DIR` environment variable.
    /// - If that is not set, the configured `cache.dir` is used.
    /// - If that is not set, the first existing directory among the
    ///   configured `cache.search-dirs` and the `DEPOT_SHARED_CACHE_DIR`
    ///   environment variable is used.
    /// - Otherwise the platform cache directory is used, created on demand
    ///   by the first fetch that writes into it.
    ///
    /// No directory is created here; `depot resolve` must stay side-effect
    /// free.
    pub fn cache_root(&self) -> Result<PathBuf, CacheRootError> {
        if let Some(dir) = std::env::var_os(consts::CACHE_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }
        if let Some(dir) = self.cache.dir.as_ref() {
            return Ok(expand_home(dir));
        }

        let shared = std::env::var_os(consts::SHARED_CACHE_DIR_ENV).map(PathBuf::from);
        for candidate in self
            .cache
            .search_dirs
            .iter()
            .map(|dir| expand_home(dir))
            .chain(shared)
        {
            if candidate.is_dir() {
                return Ok(candidate);
            }
        }

        dirs::cache_dir()
            .map(|d| d.join(consts::CONFIG_DIR))
            .ok_or(CacheRootError::NoCandidate)
    }
}

/// Returns the path to the system-level depot config file.
pub fn config_path_system() -> PathBuf {
    // TODO: the base_path for Windows is currently hardcoded, it should be
    // determined via the system API to support general volume label
    #[cfg(target_os = "windows")]
    let base_path = PathBuf::from("C:\\ProgramData");
    #[cfg(not(target_os = "windows"))]
    let base_path = PathBuf::from("/etc");

    base_path.join(consts::CONFIG_DIR).join(consts::CONFIG_FILE)
}

/// Returns the path(s) to the global depot config file.
pub fn config_path_global() -> Vec<PathBuf> {
    vec![
        // On macos, add the XDG_CONFIG_HOME directory as well, although it's not a standard and
        // not set by default.
        #[cfg(target_os = "macos")]
        std::env::var("XDG_CONFIG_HOME").ok().map(|d| {
            PathBuf::from(d)
                .join(consts::CONFIG_DIR)
                .join(consts::CONFIG_FILE)
        }),
        dirs::config_dir().map(|d| d.join(consts::CONFIG_DIR).join(consts::CONFIG_FILE)),
        depot_home().map(|d| d.join(consts::CONFIG_FILE)),
    ]
    .into_iter()
    .flatten()
    .collect()
}
