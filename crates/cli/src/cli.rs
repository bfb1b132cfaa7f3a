//! Command-line surface. Kept separate from `main` so the parser can be
//! exercised with [`Cli::try_parse_from`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use writers_backup_core::settings::validate_interval_ms;

fn parse_interval_ms(s: &str) -> Result<u64, String> {
    let ms: u64 = s.parse().map_err(|e| format!("invalid integer: {e}"))?;
    validate_interval_ms(ms).map_err(|e| e.to_string())?;
    Ok(ms)
}

/// Timestamped, self-pruning backups for manuscripts and writing projects.
#[derive(Parser, Debug)]
#[command(name = "writers-backup", version, about, long_about = None)]
#[command(after_help = "\
EXAMPLES:
  writers-backup create draft.md                 Back up one file
  writers-backup create --project my-novel/      Archive a whole project
  writers-backup list draft.md                   Show backups, newest first
  writers-backup restore .backups/draft.md.2026-10-17T09-05-03-042Z.backup
  writers-backup watch draft.md notes.md         Back up every few minutes")]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true, env = "WRITERS_BACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Capture a backup now.
    Create {
        path: PathBuf,
        /// Treat PATH as a project directory and archive all of it.
        #[arg(long)]
        project: bool,
    },
    /// Restore a backup artifact over its source (or another destination).
    Restore {
        artifact: PathBuf,
        /// Where to write the restored content. Defaults to the original source.
        #[arg(long = "to", value_name = "DEST")]
        destination: Option<PathBuf>,
        /// Overwrite the destination without capturing it first.
        #[arg(long)]
        no_safety_backup: bool,
    },
    /// List the backups of a file or project, newest first.
    List {
        path: PathBuf,
        #[arg(long)]
        project: bool,
    },
    /// Delete one backup artifact.
    Delete { artifact: PathBuf },
    /// Check that an artifact is intact.
    Verify { artifact: PathBuf },
    /// Back up the given paths periodically until interrupted.
    Watch {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        project: bool,
        /// Override the configured interval (minimum 60000).
        #[arg(long, value_parser = parse_interval_ms)]
        interval_ms: Option<u64>,
    },
}
