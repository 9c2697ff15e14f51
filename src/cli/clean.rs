use std::time::Duration;

use clap::Parser;
use indicatif::ProgressBar;
use miette::IntoDiagnostic;

use depot_config::{Config, ConfigCli};
use depot_progress::{global_multi_progress, long_running_progress_style};

/// Remove cached downloads.
///
/// The cache root itself is kept; `--all` empties it, `--family` removes a
/// single layout family (`hashid`, `mnt`, `s3`, or a URL scheme such as
/// `https`).
#[derive(Parser, Debug)]
pub struct Args {
    /// Remove every cache entry.
    #[clap(long)]
    pub all: bool,

    /// Remove only this layout family.
    #[clap(long, conflicts_with = "all", value_name = "FAMILY")]
    pub family: Option<String>,

    #[clap(flatten)]
    config: ConfigCli,
}

pub async fn execute(args: Args) -> miette::Result<()> {
    let config = Config::with_cli_config(&args.config);
    let cache_root = config.cache_root().into_diagnostic()?;

    let targets: Vec<std::path::PathBuf> = if args.all {
        match fs_err::read_dir(&cache_root) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .collect(),
            Err(_) => Vec::new(),
        }
    } else if let Some(family) = &args.family {
        vec![cache_root.join(family)]
    } else {
        miette::bail!("specify what to remove: `--all` or `--family <FAMILY>`");
    };

    let pb = global_multi_progress().add(ProgressBar::new_spinner());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_style(long_running_progress_style());
    let message = format!("cache entries under '{}'", cache_root.display());

    if targets.iter().all(|target| !target.exists()) {
        pb.finish_with_message(console::style(format!("no {}", message)).yellow().to_string());
        return Ok(());
    }
    pb.set_message(format!("{} {}", console::style("Removing").green(), message));

    for target in targets {
        if target.is_dir() {
            tokio::fs::remove_dir_all(&target).await.into_diagnostic()?;
        } else if target.exists() {
            tokio::fs::remove_file(&target).await.into_diagnostic()?;
        }
    }

    pb.finish_with_message(format!("{} {}", console::style("removed").green(), message));
    Ok(())
}
