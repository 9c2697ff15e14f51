mod common;

use std::sync::Arc;

use common::{sandboxed, DepotControl};
use depot::fetch::lock::lock_path_for;
use depot::fetch::{FetchError, FetchOptions, FetchOutcome};
use depot::RemoteSource;

#[tokio::test]
async fn test_fetch_is_idempotent() {
    let control = DepotControl::new();
    let options = FetchOptions::default();

    sandboxed(async {
        let first = control
            .fetch("s3://visionlab/models/resnet.pth", &options)
            .await
            .unwrap();
        assert_eq!(first.outcome, FetchOutcome::Downloaded);
        assert_eq!(
            first.path,
            control.cache_root().join("s3/s3/visionlab/models/resnet.pth")
        );
        assert_eq!(std::fs::read(&first.path).unwrap(), b"depot object payload");
        assert!(
            lock_path_for(&first.path).exists(),
            "the lock marker stays behind as a sibling"
        );

        let second = control
            .fetch("s3://visionlab/models/resnet.pth", &options)
            .await
            .unwrap();
        assert_eq!(second.outcome, FetchOutcome::CacheHit);
        assert_eq!(second.path, first.path);
    })
    .await;

    assert_eq!(control.copies(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_fetches_transfer_once() {
    let control = Arc::new(DepotControl::new());

    sandboxed(async {
        let mut handles = Vec::new();
        for _ in 0..8 {
            let control = control.clone();
            handles.push(tokio::spawn(async move {
                control
                    .fetch("wasabi://bucket/data/shard-000.bin", &FetchOptions::default())
                    .await
            }));
        }

        let mut paths = Vec::new();
        for handle in handles {
            let fetched = handle.await.unwrap().unwrap();
            assert_eq!(
                std::fs::read(&fetched.path).unwrap(),
                b"depot object payload"
            );
            paths.push(fetched.path);
        }
        paths.dedup();
        assert_eq!(paths.len(), 1, "every caller resolves to the same slot");
    })
    .await;

    assert_eq!(
        control.copies(),
        1,
        "one caller transfers, the rest wait on the lock and hit the cache"
    );
}

#[tokio::test]
async fn test_corrupted_download_is_discarded() {
    let control = DepotControl::new();
    let options = FetchOptions {
        verify: true,
        expected_checksum: Some("00000000000000000000000000000000".to_string()),
        ..FetchOptions::default()
    };

    sandboxed(async {
        let error = control
            .fetch("s3://bucket/models/weights.bin", &options)
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::IntegrityMismatch { .. }));
        assert!(
            !control
                .cache_root()
                .join("s3/s3/bucket/models/weights.bin")
                .exists(),
            "a failed verification never leaves the file behind"
        );

        // The slot is clean, so a later fetch starts over.
        let fetched = control
            .fetch("s3://bucket/models/weights.bin", &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(fetched.outcome, FetchOutcome::Downloaded);
    })
    .await;

    assert_eq!(control.copies(), 2);
}

#[tokio::test]
async fn test_verification_accepts_the_provider_checksum() {
    let control = DepotControl::new();
    let options = FetchOptions {
        verify: true,
        expected_checksum: Some(control.payload_etag()),
        ..FetchOptions::default()
    };

    let fetched = sandboxed(control.fetch("s3://bucket/models/weights.bin", &options))
        .await
        .unwrap();
    assert_eq!(fetched.outcome, FetchOutcome::Downloaded);
    assert!(fetched.path.exists());
}

#[tokio::test]
async fn test_unknown_scheme_is_rejected_without_side_effects() {
    let control = DepotControl::new();

    let error = sandboxed(control.fetch(
        "ftp://mirror.example.com/datasets/imagenet.tar",
        &FetchOptions::default(),
    ))
    .await
    .unwrap_err();

    assert!(matches!(error, FetchError::UnsupportedScheme(_)));
    assert_eq!(control.cache_entries(), Vec::<std::path::PathBuf>::new());
    assert_eq!(control.copies() + control.downloads(), 0);
}

#[tokio::test]
async fn test_url_fetch_checks_the_filename_stamp() {
    let control = DepotControl::new();
    let stamped = format!(
        "https://mirror.invalid/models/encoder-{}.bin",
        &control.payload_sha256()[..8]
    );
    let options = FetchOptions {
        verify: true,
        ..FetchOptions::default()
    };

    let fetched = sandboxed(control.fetch(&stamped, &options)).await.unwrap();
    assert_eq!(fetched.outcome, FetchOutcome::Downloaded);
    assert!(fetched.path.starts_with(control.cache_root().join("https/mirror.invalid/models")));
    assert_eq!(control.downloads(), 1);
}

#[tokio::test]
async fn test_url_fetch_rejects_a_wrong_stamp() {
    let control = DepotControl::new();
    let options = FetchOptions {
        verify: true,
        ..FetchOptions::default()
    };

    let error = sandboxed(control.fetch(
        "https://mirror.invalid/models/encoder-deadbeef.bin",
        &options,
    ))
    .await
    .unwrap_err();

    assert!(matches!(error, FetchError::IntegrityMismatch { .. }));
    assert_eq!(control.downloads(), 0);
    assert!(
        !control
            .cache_root()
            .join("https/mirror.invalid/models/encoder-deadbeef.bin")
            .exists()
    );
}

#[tokio::test]
async fn test_force_refetches() {
    let control = DepotControl::new();

    sandboxed(async {
        control
            .fetch("s3://bucket/data.bin", &FetchOptions::default())
            .await
            .unwrap();
        let forced = FetchOptions {
            force: true,
            ..FetchOptions::default()
        };
        let again = control
            .fetch("s3://bucket/data.bin", &forced)
            .await
            .unwrap();
        assert_eq!(again.outcome, FetchOutcome::Downloaded);
    })
    .await;

    assert_eq!(control.copies(), 2);
}

#[tokio::test]
async fn test_fetch_honors_file_name_override() {
    let control = DepotControl::new();
    let options = FetchOptions {
        dest_name: Some("latest.bin".to_string()),
        ..FetchOptions::default()
    };

    let fetched = sandboxed(control.fetch("s3://bucket/models/v42.bin", &options))
        .await
        .unwrap();
    assert_eq!(
        fetched.path,
        control.cache_root().join("s3/s3/bucket/models/latest.bin")
    );
}

#[tokio::test]
async fn test_fetch_expands_archives() {
    let control = DepotControl::with_payload(&tar_gz_payload());

    sandboxed(async {
        let fetched = control
            .fetch("s3://bucket/models/bundle.tar.gz", &FetchOptions::default())
            .await
            .unwrap();
        let extracted = fetched
            .extracted_dir
            .expect("archives expand next to the cached copy");
        assert_eq!(
            extracted,
            control.cache_root().join("s3/s3/bucket/models/bundle")
        );
        assert_eq!(
            std::fs::read(extracted.join("inner/data.txt")).unwrap(),
            b"depot"
        );

        // The populated directory satisfies later fetches as-is.
        let again = control
            .fetch("s3://bucket/models/bundle.tar.gz", &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(again.outcome, FetchOutcome::CacheHit);
        assert_eq!(again.extracted_dir.as_deref(), Some(extracted.as_path()));
    })
    .await;
}

#[tokio::test]
async fn test_failed_expansion_keeps_the_download() {
    let control = DepotControl::with_payload(b"not actually a tar archive");

    sandboxed(async {
        let error = control
            .fetch("s3://bucket/models/bundle.tar", &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::Extract(_)));

        // The transfer itself succeeded, so the bytes stay cached and the
        // next call re-fails at expansion instead of re-downloading.
        let cached = control.cache_root().join("s3/s3/bucket/models/bundle.tar");
        assert!(cached.is_file());
        let again = control
            .fetch("s3://bucket/models/bundle.tar", &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(again, FetchError::Extract(_)));
    })
    .await;

    assert_eq!(control.copies(), 1);
}

#[tokio::test]
async fn test_hash_filename_needs_a_reachable_source() {
    let control = DepotControl::new();
    let options = FetchOptions {
        hash_filename: true,
        ..FetchOptions::default()
    };

    let error = sandboxed(control.fetch("https://mirror.invalid/models/weights.bin", &options))
        .await
        .unwrap_err();
    assert!(matches!(error, FetchError::Unreachable { .. }));
}

#[tokio::test]
async fn test_resolve_hash_filename_for_a_local_file() {
    let control = DepotControl::new();
    let scratch = tempfile::tempdir().unwrap();
    let file = scratch.path().join("weights.pth");
    std::fs::write(&file, b"0123456789").unwrap();

    let options = FetchOptions {
        hash_filename: true,
        ..FetchOptions::default()
    };
    let source = RemoteSource::parse(file.to_str().unwrap());
    let context = control.context();
    let destination = sandboxed(depot::fetch::resolve_destination(&source, &options, &context))
        .await
        .unwrap();

    assert!(destination.starts_with(control.cache_root().join("hashid")));
    let name = destination.file_name().unwrap().to_str().unwrap();
    assert!(name.ends_with("-10.pth"), "content signature is hash-size: {name}");
}

fn tar_gz_payload() -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(5);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "inner/data.txt", &b"depot"[..])
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}
