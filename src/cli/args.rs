//! Command line arguments of `local_merger`, parsed with clap.

use std::path::PathBuf;

use clap::Parser;

/// Merge the segments of an index directory on this machine
#[derive(Parser, Debug, Clone)]
#[command(name = "local_merger")]
#[command(about = "Merge the segments of a local index directory")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct LocalMergerArgs {
    /// Index directory holding the version and segment files
    #[arg(value_name = "INDEX_DIR")]
    pub index_dir: PathBuf,

    /// Schema file (JSON)
    #[arg(value_name = "SCHEMA_PATH")]
    pub schema_path: PathBuf,

    /// Index partition options file (JSON); defaults apply when omitted
    #[arg(value_name = "OPTIONS_JSON")]
    pub options_json: Option<PathBuf>,

    /// Plan an optimize merge instead of a regular one
    #[arg(long)]
    pub optimize: bool,

    /// Override the number of merge threads per instance
    #[arg(short = 't', long, env = "INDEXLIB_MERGE_THREAD_NUM")]
    pub thread_num: Option<usize>,

    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,
}

impl LocalMergerArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }
}
