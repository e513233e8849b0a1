use crate::reconcile::RefreshPolicy;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tfvc-scm: pending changes of TFVC workspaces, grouped into included and excluded
#[derive(Parser, Debug)]
#[command(
    name = "tfvc-scm",
    about,
    long_about = None,
    disable_version_flag = true
)]
pub struct Cli {
    /// folder to open; repeat for several, defaults to the current directory
    #[arg(long = "root", global = true, value_name = "DIR")]
    pub roots: Vec<PathBuf>,

    /// `tf` executable
    #[arg(long, global = true, env = "TFVC_SCM_TF", value_name = "PATH")]
    pub tf: Option<PathBuf>,

    /// seconds before a `tf` call is killed
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// what to do with a refresh requested while one is running
    #[arg(long, global = true, value_enum)]
    pub refresh_policy: Option<RefreshPolicy>,

    /// file that commands act on when no path is given
    #[arg(long, global = true, env = "TFVC_SCM_ACTIVE_FILE", value_name = "PATH")]
    pub active: Option<PathBuf>,

    /// config file to use instead of the standard locations
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// directory for pending-change state
    #[arg(long, global = true, env = "TFVC_SCM_STATE_DIR", value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// print machine-readable JSON where supported
    #[arg(long, global = true)]
    pub json: bool,

    /// echo every `tf` call
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// show included and excluded changes (the default)
    Status,
    /// requery the backend and report counts
    Refresh,
    /// mark changes for the next check-in
    Include { paths: Vec<PathBuf> },
    /// unmark changes
    Exclude { paths: Vec<PathBuf> },
    /// mark every reported change
    IncludeAll,
    /// unmark everything
    ExcludeAll,
    /// add a file or folder to version control
    Add { path: Option<PathBuf> },
    /// check out for editing
    Checkout { path: Option<PathBuf> },
    /// delete from version control
    Delete { path: Option<PathBuf> },
    /// undo pending changes
    Undo { path: Option<PathBuf> },
    /// get the latest version
    Get { path: Option<PathBuf> },
    /// check in the included changes
    Checkin {
        /// check-in comment; prompted for when omitted
        #[arg(short, long)]
        message: Option<String>,
        /// do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// print the server version of a file
    View { path: Option<PathBuf> },
    /// print local and server information for an item
    Info { path: Option<PathBuf> },
    /// print the web address of an item in the server's version control browser
    Url { path: Option<PathBuf> },
    /// exit 0 if the item is under version control, 1 otherwise
    Versioned { path: Option<PathBuf> },
    /// list collections, workspaces and working folders
    Mappings,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// the chosen subcommand, `status` if none
    pub fn subcommand(&self) -> Command {
        self.command.clone().unwrap_or(Command::Status)
    }
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
    fn test_defaults_to_status() {
        let cli = Cli::try_parse_from(["tfvc-scm"]).unwrap();
        assert_eq!(cli.subcommand(), Command::Status);
        assert!(cli.roots.is_empty());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tfvc-scm",
            "checkin",
            "-m",
            "fix build",
            "--root",
            "a",
            "--root",
            "b",
            "--refresh-policy",
            "trailing",
        ])
        .unwrap();
        assert_eq!(cli.roots, [PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(cli.refresh_policy, Some(RefreshPolicy::Trailing));
        assert_eq!(
            cli.subcommand(),
            Command::Checkin {
                message: Some("fix build".to_string()),
                yes: false
            }
        );
    }

    #[test]
    fn test_operation_path_is_optional() {
        let cli = Cli::try_parse_from(["tfvc-scm", "undo"]).unwrap();
        assert_eq!(cli.subcommand(), Command::Undo { path: None });

        let cli = Cli::try_parse_from(["tfvc-scm", "url", "a.txt"]).unwrap();
        assert_eq!(
            cli.subcommand(),
            Command::Url {
                path: Some(PathBuf::from("a.txt"))
            }
        );
    }
}
