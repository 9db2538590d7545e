//! CLI definitions for folo.
//!
//! Uses clap for argument parsing with derive macros.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// folo - keep a fast local mirror of your following list
#[derive(Parser, Debug)]
#[command(name = "folo")]
#[command(version)]
#[command(about = "Mirror, search, and batch-manage the accounts you follow")]
#[command(long_about = r#"
folo keeps a local, searchable mirror of your bilibili following list
and runs paced batch follow/unfollow operations against it.

Features:
  - Full refresh of the mirror with crash-safe persistence and backups
  - Prefix and keyword search over names, ids, and bios
  - Rate-governed batch unfollow/follow with per-item tallies
  - JSON export of the current mirror

Quick start:
  1. Run: folo config init
  2. Put your DedeUserID and bili_jct cookies in the config file
  3. Run: folo fetch
  4. Search: folo search "name"
"#)]
pub struct Cli {
    /// Path to the config file
    #[arg(long, env = "FOLO_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the mirror, backups, and search history
    #[arg(long, env = "FOLO_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Be verbose (repeat for trace output)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Be quiet (suppress non-error output)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Refresh the local mirror from the remote
    Fetch(FetchArgs),

    /// Search the local mirror
    Search(SearchArgs),

    /// Unfollow accounts in a paced batch
    Unfollow(UnfollowArgs),

    /// Follow accounts from a file in a paced batch
    Follow(FollowArgs),

    /// Export the mirror as simplified JSON records
    Export(ExportArgs),

    /// Show mirror statistics
    Stats,

    /// Show or clear recent search queries
    History(HistoryArgs),

    /// Delete the local mirror
    Clear(ClearArgs),

    /// Verify the session and show the logged-in account
    Whoami,

    /// Show or manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Accounts per page request
    #[arg(long, short = 'p')]
    pub page_size: Option<u32>,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search query (multiple words match any)
    pub query: String,

    /// Require the whole query as one phrase
    #[arg(long, short = 'e')]
    pub exact: bool,

    /// Result page to show
    #[arg(long, default_value = "1")]
    pub page: usize,

    /// Results per page
    #[arg(long, short = 'n', default_value = "20")]
    pub page_size: usize,
}

#[derive(Args, Debug)]
pub struct UnfollowArgs {
    /// Account ids to unfollow
    pub ids: Vec<String>,

    /// Unfollow every account in the mirror
    #[arg(long, conflicts_with = "ids")]
    pub all: bool,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct FollowArgs {
    /// JSON file with accounts to follow (export or raw shape)
    #[arg(long, short = 'F', value_name = "PATH")]
    pub from_file: PathBuf,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Only export accounts matching this query
    #[arg(long, short = 'Q')]
    pub query: Option<String>,

    /// Directory to write the export into (data dir if not given)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Forget all recorded queries
    #[arg(long)]
    pub clear: bool,

    /// Number of queries to show
    #[arg(long, short = 'n', default_value = "10")]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (cookies redacted)
    Show,
    /// Print the config file path
    Path,
    /// Write a starter config file
    Init,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonPretty,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn unfollow_all_conflicts_with_ids() {
        let err = Cli::try_parse_from(["folo", "unfollow", "--all", "123"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["folo", "-vv", "stats"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
