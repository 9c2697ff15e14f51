use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use reqwest::header;
use thiserror::Error;
use url::Url;

use depot_config::Config;
use depot_consts::consts;

use crate::source::RemoteSource;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("an IO error occurred while {0} {1}")]
    IoError(String, PathBuf, #[source] std::io::Error),
    #[error("checksum mismatch for {path}: expected '{expected}', computed '{computed}'")]
    Mismatch {
        path: PathBuf,
        expected: String,
        computed: String,
    },
    #[error("failed to reach '{url}': {reason}")]
    Unreachable { url: String, reason: String },
    #[error("no checksum is available for '{0}'")]
    NoRemoteChecksum(String),
}

/// Compute the provider-style composite checksum of a local file with the
/// standard 8 MiB part size.
pub fn compute_etag(path: &Path) -> Result<String, IntegrityError> {
    compute_etag_with_chunk_size(path, consts::ETAG_CHUNK_SIZE)
}

/// Compute the composite checksum with an explicit part size.
///
/// Files no larger than one part get the plain hex MD5 of their content.
/// Larger files are split into exact `chunk_size` parts (the last may be
/// short), each part is MD5-hashed, the raw 16-byte digests are
/// concatenated, and the result is the hex MD5 of that concatenation with
/// a `-<part count>` suffix. This reproduces what S3-compatible stores
/// report for multipart uploads, so a locally computed value is comparable
/// to the remote `ETag`.
pub fn compute_etag_with_chunk_size(
    path: &Path,
    chunk_size: usize,
) -> Result<String, IntegrityError> {
    let mut file = fs_err::File::open(path)
        .map_err(|e| IntegrityError::IoError("opening".to_string(), path.to_path_buf(), e))?;

    let mut buffer = vec![0u8; chunk_size];
    let mut part_digests = Vec::new();
    loop {
        let filled = read_up_to(&mut file, &mut buffer)
            .map_err(|e| IntegrityError::IoError("reading".to_string(), path.to_path_buf(), e))?;
        if filled == 0 {
            break;
        }
        part_digests.push(Md5::digest(&buffer[..filled]));
        if filled < chunk_size {
            break;
        }
    }

    let etag = match part_digests.as_slice() {
        [] => format!("{:x}", Md5::digest(b"")),
        [single] => format!("{single:x}"),
        parts => {
            let mut hasher = Md5::new();
            for digest in parts {
                hasher.update(digest);
            }
            format!("{:x}-{}", hasher.finalize(), parts.len())
        }
    };
    Ok(etag)
}

/// Check a local file against an expected checksum, ignoring the quotes
/// providers wrap `ETag` values in. A mismatch reports both values and is
/// never retried here; the caller decides what to do with the file.
pub fn verify(path: &Path, expected: &str) -> Result<(), IntegrityError> {
    verify_with_chunk_size(path, expected, consts::ETAG_CHUNK_SIZE)
}

pub fn verify_with_chunk_size(
    path: &Path,
    expected: &str,
    chunk_size: usize,
) -> Result<(), IntegrityError> {
    let expected = expected.trim_matches('"');
    let computed = compute_etag_with_chunk_size(path, chunk_size)?;
    if computed == expected {
        Ok(())
    } else {
        Err(IntegrityError::Mismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            computed,
        })
    }
}

/// Look up the provider-reported checksum of a remote object: HEAD the
/// object URL and return the `ETag` header without its quotes. Works for
/// object-store references through their provider endpoint and for plain
/// web URLs whose server reports an entity tag.
pub async fn remote_etag(
    source: &RemoteSource,
    client: &reqwest::Client,
    config: &Config,
) -> Result<String, IntegrityError> {
    let url = if let Some(coords) = source.object_store_coordinates(config) {
        coords
            .object_url()
            .ok_or_else(|| IntegrityError::Unreachable {
                url: coords.normalized_uri(),
                reason: format!("no endpoint known for provider '{}'", coords.provider),
            })?
    } else if source.is_web_url() {
        Url::parse(source.as_str()).map_err(|e| IntegrityError::Unreachable {
            url: source.as_str().to_string(),
            reason: e.to_string(),
        })?
    } else {
        return Err(IntegrityError::NoRemoteChecksum(source.as_str().to_string()));
    };

    let response = client
        .head(url.clone())
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| IntegrityError::Unreachable {
            url: url.to_string(),
            reason: match e.status() {
                Some(status) => status.to_string(),
                None => e.to_string(),
            },
        })?;

    let etag = response
        .headers()
        .get(header::ETAG)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| IntegrityError::NoRemoteChecksum(url.to_string()))?;

    Ok(etag.trim_matches('"').to_string())
}

/// Read until the buffer is full or the reader is exhausted, so part
/// boundaries are stable regardless of how the underlying reads split.
fn read_up_to(reader: &mut impl Read, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = reader.read(&mut buffer[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const CHUNK: usize = 1024;

    fn write_blob(dir: &Path, size: usize) -> PathBuf {
        let path = dir.join("blob.bin");
        let content: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_empty_file_etag() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_blob(dir.path(), 0);
        // md5 of zero bytes
        assert_eq!(
            compute_etag_with_chunk_size(&path, CHUNK).unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn test_single_part_is_plain_md5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            compute_etag_with_chunk_size(&path, CHUNK).unwrap(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[rstest]
    #[case::exactly_one_part(CHUNK, None)]
    #[case::one_byte_over(CHUNK + 1, Some(2))]
    #[case::exactly_two_parts(2 * CHUNK, Some(2))]
    #[case::three_parts(3 * CHUNK, Some(3))]
    fn test_part_count_suffix(#[case] size: usize, #[case] parts: Option<usize>) {
        let dir = tempfile::tempdir().unwrap();
        let path = write_blob(dir.path(), size);

        let etag = compute_etag_with_chunk_size(&path, CHUNK).unwrap();
        match parts {
            None => {
                assert_eq!(etag.len(), 32);
                assert!(!etag.contains('-'));
            }
            Some(count) => {
                let (digest, suffix) = etag.split_once('-').unwrap();
                assert_eq!(digest.len(), 32);
                assert_eq!(suffix, count.to_string());
            }
        }
    }

    #[test]
    fn test_byte_flip_changes_etag() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_blob(dir.path(), 3 * CHUNK);
        let before = compute_etag_with_chunk_size(&path, CHUNK).unwrap();

        let mut content = std::fs::read(&path).unwrap();
        content[CHUNK + 512] ^= 0xff;
        std::fs::write(&path, content).unwrap();

        let after = compute_etag_with_chunk_size(&path, CHUNK).unwrap();
        assert_ne!(before, after);
        assert!(after.ends_with("-3"), "part count must not change");
    }

    #[test]
    fn test_verify_ignores_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.bin");
        std::fs::write(&path, b"abc").unwrap();

        verify_with_chunk_size(&path, "\"900150983cd24fb0d6963f7d28e17f72\"", CHUNK).unwrap();
        verify_with_chunk_size(&path, "900150983cd24fb0d6963f7d28e17f72", CHUNK).unwrap();
    }

    #[test]
    fn test_verify_mismatch_reports_both_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.bin");
        std::fs::write(&path, b"abc").unwrap();

        let err = verify_with_chunk_size(&path, "deadbeef", CHUNK).unwrap_err();
        match err {
            IntegrityError::Mismatch {
                expected, computed, ..
            } => {
                assert_eq!(expected, "deadbeef");
                assert_eq!(computed, "900150983cd24fb0d6963f7d28e17f72");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
