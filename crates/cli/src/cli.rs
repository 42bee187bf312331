use clap::{Args, Parser, Subcommand, ValueEnum};
use docshift_core::SanitizeMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docshift")]
#[command(author, version, about = "Batch-convert Pages documents to Word through the Pages app")]
pub struct Cli {
    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert every pending document under a folder
    Convert(ConvertArgs),

    /// Report document names that would trip up the conversion engine
    CheckNames {
        /// Folder to scan (prompted for when omitted)
        root: Option<PathBuf>,
    },

    /// Rename documents with unsafe names
    FixNames {
        /// Folder to scan (prompted for when omitted)
        root: Option<PathBuf>,

        /// Perform the renames instead of only listing them
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Args)]
pub struct ConvertArgs {
    /// Folder to convert (prompted for when omitted)
    pub root: Option<PathBuf>,

    /// Files per chunk; the engine restarts between chunks
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Per-file conversion timeout
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Restart the engine after this many conversions
    #[arg(long, value_name = "N")]
    pub restart_every: Option<u32>,

    /// Abort after this many consecutive engine failures
    #[arg(long, value_name = "N")]
    pub max_failures: Option<u32>,

    /// What to do about unsafe file names before converting
    #[arg(long, value_enum)]
    pub sanitize: Option<SanitizeArg>,

    /// Where to write the run log (defaults to the Desktop)
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SanitizeArg {
    Off,
    Warn,
    Apply,
}

impl From<SanitizeArg> for SanitizeMode {
    fn from(arg: SanitizeArg) -> Self {
        match arg {
            SanitizeArg::Off => SanitizeMode::Off,
            SanitizeArg::Warn => SanitizeMode::Warn,
            SanitizeArg::Apply => SanitizeMode::Apply,
        }
    }
}
