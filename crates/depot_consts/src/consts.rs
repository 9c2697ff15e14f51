use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

use console::Style;

pub const CONFIG_FILE: &str = "config.toml";
pub const CONFIG_DIR: &str = "depot";
pub const DEPOT_DIR: &str = ".depot";

pub const CLAP_CONFIG_OPTIONS: &str = "Config Options";

/// Cache layout families. The directory names are an observable contract:
/// callers may address files inside the cache by these paths.
pub const HASHID_DIR: &str = "hashid";
pub const MOUNT_DIR: &str = "mnt";
pub const OBJECT_STORE_DIR: &str = "s3";

pub const CACHE_DIR_ENV: &str = "DEPOT_CACHE_DIR";
pub const SHARED_CACHE_DIR_ENV: &str = "DEPOT_SHARED_CACHE_DIR";
pub const HOME_ENV: &str = "DEPOT_HOME";

/// Suffix of the sibling marker file used for destination-scoped advisory
/// locks.
pub const LOCK_FILE_SUFFIX: &str = ".lock";
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 600;

/// Number of leading bytes hashed when fingerprinting a remote object.
pub const DEFAULT_READ_LIMIT: usize = 64 * 1024;
/// Length the fingerprint hex digest is truncated to.
pub const DEFAULT_HASH_LENGTH: usize = 32;
/// Digest length used when stamping a content hash into a filename.
pub const DEFAULT_FILENAME_HASH_LENGTH: usize = 8;

/// Part size used by S3-compatible stores when computing multipart ETags.
pub const ETAG_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// External bulk-copy tool invoked for object-store transfers.
pub const COPY_TOOL: &str = "s5cmd";

/// Object-storage providers known out of the box, with their public
/// endpoints. Additional providers (or overrides) come from the
/// `s3-options` configuration table.
pub const PROVIDER_ENDPOINTS: &[(&str, &str)] = &[
    ("s3", "https://s3.amazonaws.com"),
    ("wasabi", "https://s3.wasabisys.com"),
    ("gcs", "https://storage.googleapis.com"),
];

pub static SOURCE_STYLE: LazyLock<Style> = LazyLock::new(|| Style::new().cyan());
pub static PATH_STYLE: LazyLock<Style> = LazyLock::new(|| Style::new().green());
pub static CHECKSUM_STYLE: LazyLock<Style> = LazyLock::new(|| Style::new().yellow());

pub struct CacheHitEmoji;

impl Display for CacheHitEmoji {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if console::Term::stderr().features().colors_supported() {
            write!(f, "{}", console::style("✔").bold().green())
        } else {
            write!(f, "(cached)")
        }
    }
}

pub struct DownloadEmoji;

impl Display for DownloadEmoji {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if console::Term::stderr().features().colors_supported() {
            write!(f, "{}", console::style("↓").bold().cyan())
        } else {
            write!(f, "(fetched)")
        }
    }
}
