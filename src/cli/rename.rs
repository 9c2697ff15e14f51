use std::path::PathBuf;

use clap::Parser;
use miette::IntoDiagnostic;

use depot_consts::consts;

use crate::naming;

/// Stamp a file with a prefix of its SHA256 digest.
///
/// `weights.pth` becomes `weights-<hash>.pth`. The stamp is the naming
/// convention `fetch --verify` reads the expected hash from for plain URLs.
#[derive(Parser, Debug)]
pub struct Args {
    /// The file to rename.
    pub path: PathBuf,

    /// Number of digest characters to embed.
    #[clap(long, default_value_t = consts::DEFAULT_FILENAME_HASH_LENGTH)]
    pub hash_length: usize,

    /// Print the stamped name without renaming the file.
    #[clap(long)]
    pub dry_run: bool,
}

pub fn execute(args: Args) -> miette::Result<()> {
    let renamed =
        naming::rename_with_hash(&args.path, args.hash_length, args.dry_run).into_diagnostic()?;
    println!("{}", renamed.display());
    Ok(())
}
