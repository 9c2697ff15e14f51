pub mod cli;
pub mod extract;
pub mod fetch;
pub mod fingerprint;
pub mod integrity;
pub mod layout;
pub mod naming;
pub mod source;

pub use fetch::{fetch, FetchContext, FetchError, FetchOptions, FetchOutcome, Fetched};
pub use fingerprint::{file_fingerprint, FileFingerprint, FingerprintOptions};
pub use source::RemoteSource;
