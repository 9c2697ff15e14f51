use std::path::PathBuf;

use clap::Parser;
use miette::IntoDiagnostic;

use depot_config::{Config, ConfigCli};
use depot_consts::consts;
use depot_progress::{await_in_progress, wrap_in_progress};
use depot_utils::reqwest::build_reqwest_client;

use crate::integrity::{self, IntegrityError};
use crate::naming;
use crate::source::RemoteSource;

/// Check a cached file against a checksum.
///
/// The expected value is taken from `--checksum`, from the remote object
/// named by `--source`, or from the hash stamp embedded in the filename
/// (`name-<hex>.ext`), in that order.
#[derive(Parser, Debug)]
pub struct Args {
    /// The local file to check.
    pub path: PathBuf,

    /// The expected checksum, plain or in the multipart `<hex>-<parts>`
    /// form.
    #[clap(long, value_name = "CHECKSUM", conflicts_with = "source")]
    pub checksum: Option<String>,

    /// Compare against the checksum this remote object reports.
    #[clap(long, value_name = "URI")]
    pub source: Option<String>,

    #[clap(flatten)]
    config: ConfigCli,
}

pub async fn execute(args: Args) -> miette::Result<()> {
    let expected = if let Some(checksum) = args.checksum {
        checksum
    } else if let Some(raw) = &args.source {
        let config = Config::with_cli_config(&args.config);
        let client = build_reqwest_client(Some(&config));
        let source = RemoteSource::parse(raw);
        await_in_progress("looking up the remote checksum", |_| {
            integrity::remote_etag(&source, &client, &config)
        })
        .await
        .into_diagnostic()?
    } else {
        let filename = args
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let Some(prefix) = naming::sha_prefix_from_filename(filename) else {
            miette::bail!(
                "the filename of {} carries no hash stamp; pass --checksum or --source",
                args.path.display()
            );
        };
        // The stamp is a prefix of the SHA256 digest, not a provider ETag.
        let computed = wrap_in_progress("computing the local checksum", || {
            naming::compute_sha256(&args.path)
        })
        .into_diagnostic()?;
        if !computed.starts_with(&prefix) {
            return Err(IntegrityError::Mismatch {
                path: args.path,
                expected: prefix,
                computed,
            })
            .into_diagnostic();
        }
        report_match(&args.path, &prefix);
        return Ok(());
    };

    wrap_in_progress("computing the local checksum", || {
        integrity::verify(&args.path, &expected)
    })
    .into_diagnostic()?;
    report_match(&args.path, &expected);
    Ok(())
}

fn report_match(path: &std::path::Path, expected: &str) {
    depot_progress::println!(
        "{} {} matches {}",
        consts::CacheHitEmoji,
        consts::PATH_STYLE.apply_to(path.display()),
        consts::CHECKSUM_STYLE.apply_to(expected)
    );
}
