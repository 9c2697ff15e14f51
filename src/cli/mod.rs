use std::{env, io::IsTerminal};

use clap::Parser;
use clap_verbosity_flag::Verbosity;
use indicatif::ProgressDrawTarget;
use miette::IntoDiagnostic;
use tracing_subscriber::{
    filter::LevelFilter, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
    EnvFilter,
};

use depot_progress::global_multi_progress;
use depot_utils::indicatif::IndicatifWriter;

pub mod clean;
pub mod fetch;
pub mod rename;
pub mod resolve;
pub mod verify;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "
Depot [version 0.4.1] - Fetch-once caching of remote datasets and model weights.

Depot resolves S3-style URIs, web URLs and mounted paths to a shared local
cache, downloads every object at most once across processes, and can verify
downloads against the storage provider's checksum.

Basic Usage:
    Fetch an object into the cache:
    $ depot fetch s3://visionlab/models/alexnet-fc6eeb4a.pth.tar

    Show where a source would land without downloading it:
    $ depot resolve https://example.com/data/imagenet-sample.tar.gz

Found a Bug or Have a Feature Request?
Open an issue at: https://github.com/visionlab-dev/depot/issues
"
)]
#[clap(arg_required_else_help = true)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// The verbosity level
    /// (-v for warning, -vv for info, -vvv for debug, -vvvv for trace, -q for
    /// quiet)
    #[command(flatten)]
    verbose: Verbosity,

    /// Whether the log needs to be colored.
    #[clap(long, default_value = "auto", global = true, env = "DEPOT_COLOR")]
    color: ColorOutput,

    /// Hide all progress bars
    #[clap(long, default_value = "false", global = true, env = "DEPOT_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Parser, Debug)]
pub enum Command {
    #[clap(visible_alias = "f")]
    Fetch(fetch::Args),
    Resolve(resolve::Args),
    Verify(verify::Args),
    Rename(rename::Args),
    Clean(clean::Args),
}

pub async fn execute() -> miette::Result<()> {
    let args = Args::parse();
    let use_colors = use_color_output(&args);

    // Set up the default miette handler based on whether we want colors or not.
    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::default()
                .color(use_colors)
                .build(),
        )
    }))?;

    // Honor FORCE_COLOR and NO_COLOR environment variables.
    // Those take precedence over the CLI flag and DEPOT_COLOR
    let use_colors = match env::var("FORCE_COLOR") {
        Ok(_) => true,
        Err(_) => match env::var("NO_COLOR") {
            Ok(_) => false,
            Err(_) => use_colors,
        },
    };

    // Enable disable colors for the colors crate
    console::set_colors_enabled(use_colors);
    console::set_colors_enabled_stderr(use_colors);

    // Hide all progress bars if the user requested it.
    if args.no_progress {
        global_multi_progress().set_draw_target(ProgressDrawTarget::hidden());
    }

    let (level_filter, depot_level) = match args.verbose.log_level_filter() {
        clap_verbosity_flag::LevelFilter::Off => (LevelFilter::OFF, LevelFilter::OFF),
        clap_verbosity_flag::LevelFilter::Error => (LevelFilter::ERROR, LevelFilter::WARN),
        clap_verbosity_flag::LevelFilter::Warn => (LevelFilter::WARN, LevelFilter::INFO),
        clap_verbosity_flag::LevelFilter::Info => (LevelFilter::WARN, LevelFilter::INFO),
        clap_verbosity_flag::LevelFilter::Debug => (LevelFilter::INFO, LevelFilter::DEBUG),
        clap_verbosity_flag::LevelFilter::Trace => (LevelFilter::TRACE, LevelFilter::TRACE),
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .from_env()
        .into_diagnostic()?
        // filter logs from the HTTP connection pool because they are very noisy
        .add_directive("hyper_util=off".parse().into_diagnostic()?)
        .add_directive(format!("depot={}", depot_level).parse().into_diagnostic()?);

    // Set up the tracing subscriber
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(use_colors)
        .with_writer(IndicatifWriter::new(global_multi_progress()))
        .without_time();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    // Execute the command
    execute_command(args.command).await
}

/// Execute the actual command
pub async fn execute_command(command: Command) -> miette::Result<()> {
    match command {
        Command::Fetch(cmd) => fetch::execute(cmd).await,
        Command::Resolve(cmd) => resolve::execute(cmd).await,
        Command::Verify(cmd) => verify::execute(cmd).await,
        Command::Rename(cmd) => rename::execute(cmd),
        Command::Clean(cmd) => clean::execute(cmd).await,
    }
}

/// Whether to use colored log format.
/// Option `Auto` enables color output only if the logging is done to a terminal
/// and  `NO_COLOR` environment variable is not set.
#[derive(clap::ValueEnum, Debug, Clone, Default)]
pub enum ColorOutput {
    Always,
    Never,

    #[default]
    Auto,
}

/// Returns true if the output is considered to be a terminal.
fn is_terminal() -> bool {
    std::io::stderr().is_terminal()
}

/// Returns true if the log outputs should be colored or not.
fn use_color_output(args: &Args) -> bool {
    match args.color {
        ColorOutput::Always => true,
        ColorOutput::Never => false,
        ColorOutput::Auto => std::env::var_os("NO_COLOR").is_none() && is_terminal(),
    }
}
