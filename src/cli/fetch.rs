use clap::Parser;
use human_bytes::human_bytes;
use miette::IntoDiagnostic;

use depot_config::{Config, ConfigCli};
use depot_consts::consts;
use depot_progress::global_multi_progress;
use depot_utils::reqwest::build_reqwest_client;

use crate::fetch::{self, FetchContext, FetchOptions, FetchOutcome};
use crate::source::RemoteSource;

/// Fetch a remote source into the local cache.
///
/// The source may be an S3-style URI (`s3://bucket/key` or a provider alias
/// such as `wasabi://`), a web URL, or a path on a mounted filesystem. Each
/// object is downloaded at most once across processes; when the cached file
/// is an archive it is expanded next to the cached copy. The cached file
/// path is printed to stdout, followed by the expanded directory when there
/// is one.
#[derive(Parser, Debug)]
pub struct Args {
    /// The URI, URL or path to fetch.
    pub source: String,

    /// Verify the download against the provider checksum, or against the
    /// hash stamp in the filename for plain URLs.
    #[clap(long)]
    pub verify: bool,

    /// Re-download even when a cached copy exists.
    #[clap(long)]
    pub force: bool,

    /// Cache under a content-derived filename so the same bytes fetched
    /// under different names share one cache slot.
    #[clap(long)]
    pub hash_filename: bool,

    /// Print the cache destination without downloading anything.
    #[clap(long)]
    pub dry_run: bool,

    /// Verify against this checksum instead of the derived one.
    #[clap(long, value_name = "CHECKSUM")]
    pub checksum: Option<String>,

    /// Store the file under this name instead of the source filename.
    #[clap(long, value_name = "NAME")]
    pub file_name: Option<String>,

    #[clap(flatten)]
    config: ConfigCli,
}

pub async fn execute(args: Args) -> miette::Result<()> {
    let config = Config::with_cli_config(&args.config);
    let client = build_reqwest_client(Some(&config));
    let verify = args.verify || config.verify_downloads() || args.checksum.is_some();
    let context = FetchContext::new(config, client);

    let source = RemoteSource::parse(&args.source);
    let options = FetchOptions {
        verify,
        force: args.force,
        hash_filename: args.hash_filename,
        dry_run: args.dry_run,
        show_progress: !global_multi_progress().is_hidden(),
        expected_checksum: args.checksum,
        dest_name: args.file_name,
    };

    let fetched = fetch::fetch(&source, &options, &context)
        .await
        .into_diagnostic()?;

    match fetched.outcome {
        FetchOutcome::Downloaded => {
            let size = fs_err::metadata(&fetched.path)
                .map(|meta| human_bytes(meta.len() as f64))
                .unwrap_or_default();
            depot_progress::println!(
                "{} fetched {} ({size})",
                consts::DownloadEmoji,
                consts::SOURCE_STYLE.apply_to(&source)
            );
        }
        FetchOutcome::CacheHit => {
            depot_progress::println!(
                "{} {} is already cached",
                consts::CacheHitEmoji,
                consts::SOURCE_STYLE.apply_to(&source)
            );
        }
        FetchOutcome::DryRun => {}
    }

    println!("{}", fetched.path.display());
    if let Some(dir) = &fetched.extracted_dir {
        println!("{}", dir.display());
    }
    Ok(())
}
