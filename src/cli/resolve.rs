use std::path::Path;

use clap::Parser;
use miette::IntoDiagnostic;
use serde::Serialize;

use depot_config::{Config, ConfigCli};
use depot_utils::reqwest::build_reqwest_client;

use crate::fetch::{self, FetchContext, FetchOptions};
use crate::source::RemoteSource;

/// Show where a source is cached without fetching it.
///
/// Prints the full cache path the source resolves to. Resolving may probe
/// the remote side (a content fingerprint decides between the
/// content-addressed and the URL-derived layout) but never writes anything.
/// An existing local file reports the content-addressed slot the mapper
/// assigns it, even though `fetch` serves such a file from its own location
/// without copying.
#[derive(Parser, Debug)]
pub struct Args {
    /// The URI, URL or path to resolve.
    pub source: String,

    /// Resolve to a content-derived filename.
    #[clap(long)]
    pub hash_filename: bool,

    /// Resolve to this filename instead of the source filename.
    #[clap(long, value_name = "NAME")]
    pub file_name: Option<String>,

    /// Whether to show the output as JSON or not
    #[clap(long)]
    pub json: bool,

    #[clap(flatten)]
    config: ConfigCli,
}

#[derive(Serialize)]
struct Resolution<'a> {
    source: &'a str,
    path: &'a Path,
    cached: bool,
}

pub async fn execute(args: Args) -> miette::Result<()> {
    let config = Config::with_cli_config(&args.config);
    let client = build_reqwest_client(Some(&config));
    let context = FetchContext::new(config, client);

    let source = RemoteSource::parse(&args.source);
    let options = FetchOptions {
        hash_filename: args.hash_filename,
        dest_name: args.file_name,
        show_progress: false,
        ..FetchOptions::default()
    };

    let destination = fetch::resolve_destination(&source, &options, &context)
        .await
        .into_diagnostic()?;

    if args.json {
        let resolution = Resolution {
            source: source.as_str(),
            path: &destination,
            cached: destination.is_file(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&resolution).into_diagnostic()?
        );
    } else {
        println!("{}", destination.display());
    }
    Ok(())
}
