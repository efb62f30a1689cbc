use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Full, incremental and differential backups to local and remote storage.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct BackupArgs {
    /// Local directory to back up
    pub source: String,

    /// Backup directory on the configured storage
    pub destination: String,

    /// Only back up files whose name matches this regex
    #[arg(long, value_name = "REGEX")]
    pub files: Option<String>,

    /// Only descend into directories whose name matches this regex
    #[arg(long, value_name = "REGEX")]
    pub dirs: Option<String>,

    /// Store the backup as a single archive, optionally naming the method
    #[arg(long, num_args = 0..=1, require_equals = true, value_name = "METHOD")]
    // Not `chainbak_archive::cli::Flag`: clap derive only recognizes the literal type.
    pub compress: Option<Option<String>>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Back up every file
    Full(BackupArgs),

    /// Back up changes since the whole chain of the last full backup
    Incremental(BackupArgs),

    /// Back up changes since the last full backup
    Differential(BackupArgs),

    /// Restore the newest recorded state of a source
    Restore {
        /// Source directory the backups were taken from
        source: String,

        /// Local directory to restore into
        destination: String,

        /// Restore the state as of this backup id instead of the newest
        #[arg(long, value_name = "ID")]
        until: Option<u64>,
    },

    /// Delete backups and drop them from the catalog
    Delete {
        #[arg(required = true, value_name = "ID")]
        ids: Vec<u64>,
    },

    /// List recorded backups
    List,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_compress_flag_shapes() {
        let parse = |args: &[&str]| match Cli::parse_from(args).command {
            Command::Full(args) => args.compress,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(parse(&["chainbak", "full", "/src", "/dst"]), None);
        assert_eq!(parse(&["chainbak", "full", "/src", "/dst", "--compress"]), Some(None));
        assert_eq!(parse(&["chainbak", "full", "/src", "/dst", "--compress=bz2"]), Some(Some("bz2".to_string())));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["chainbak", "list", "-vv", "--config", "/etc/chainbak.toml"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/chainbak.toml")));
    }
}
