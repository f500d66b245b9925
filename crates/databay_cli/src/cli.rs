//! Command-line definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use databay_core::{BranchName, DraftStatus};
use std::path::PathBuf;

/// DataBay dataset versioning client.
#[derive(Debug, Parser)]
#[command(name = "databay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Server URL
    #[arg(global = true, long, env = "DATABAY_URL", default_value = "http://localhost:8080")]
    pub url: String,

    /// Access key sent with every request
    #[arg(global = true, long, env = "DATABAY_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,

    /// Output format
    #[arg(global = true, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// How listings are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per entry
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage datasets
    #[command(subcommand)]
    Dataset(DatasetCommand),

    /// Upload a directory of files into a draft
    Upload(UploadArgs),

    /// List, and optionally download, the contents of a revision
    Read(ReadArgs),

    /// Manage branches
    #[command(subcommand)]
    Branch(BranchCommand),

    /// Manage drafts
    #[command(subcommand)]
    Draft(DraftCommand),

    /// Commit a draft as it stands on the server
    ///
    /// Checks that the draft is open and based on the branch head. Use
    /// `upload --message` to commit only once every uploaded item is on the
    /// server.
    Commit {
        /// Dataset name
        dataset: String,
        /// Draft number
        draft: u64,
        /// Commit message
        #[arg(short, long)]
        message: String,
    },

    /// Show the history of a revision
    Log {
        /// Dataset name
        dataset: String,
        /// Branch, commit or draft
        #[arg(default_value = "main")]
        revision: String,
        /// Maximum number of commits
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

/// `dataset` subcommands.
#[derive(Debug, Subcommand)]
pub enum DatasetCommand {
    /// Create a dataset
    Create {
        /// Dataset name
        name: String,
    },
    /// List datasets
    List,
    /// Delete a dataset with all its history
    Delete {
        /// Dataset name
        name: String,
    },
}

/// `upload` arguments.
#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Dataset name
    pub dataset: String,

    /// File or directory to upload
    pub source: PathBuf,

    /// Target segment, defaults to the source directory name
    #[arg(short, long)]
    pub segment: Option<String>,

    /// Sensor name recorded for every file
    #[arg(long, default_value = "default")]
    pub sensor: String,

    /// Upload into this existing draft instead of opening a new one
    #[arg(short, long)]
    pub draft: Option<u64>,

    /// Branch a new draft is opened on
    #[arg(short, long, default_value = "main")]
    pub branch: BranchName,

    /// Title of a new draft
    #[arg(short, long)]
    pub title: Option<String>,

    /// Commit the draft with this message once everything is uploaded
    #[arg(short, long)]
    pub message: Option<String>,

    /// Part size in bytes
    #[arg(long)]
    pub part_size: Option<u64>,

    /// Parallel uploads
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,
}

/// `read` arguments.
#[derive(Debug, Args)]
pub struct ReadArgs {
    /// Dataset name
    pub dataset: String,

    /// Branch, commit or draft
    #[arg(default_value = "main")]
    pub revision: String,

    /// Only this segment
    #[arg(short, long)]
    pub segment: Option<String>,

    /// Download item payloads into this directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// `branch` subcommands.
#[derive(Debug, Subcommand)]
pub enum BranchCommand {
    /// List branches
    List {
        /// Dataset name
        dataset: String,
    },
    /// Create a branch
    Create {
        /// Dataset name
        dataset: String,
        /// Branch name
        name: BranchName,
        /// Commit to start from, defaults to the empty root
        #[arg(long)]
        from: Option<String>,
    },
    /// Delete a branch
    Delete {
        /// Dataset name
        dataset: String,
        /// Branch name
        name: BranchName,
    },
}

/// `draft` subcommands.
#[derive(Debug, Subcommand)]
pub enum DraftCommand {
    /// Open a draft
    Create {
        /// Dataset name
        dataset: String,
        /// Title
        title: String,
        /// Branch the draft targets
        #[arg(short, long, default_value = "main")]
        branch: BranchName,
    },
    /// List drafts
    List {
        /// Dataset name
        dataset: String,
        /// Only drafts on this branch
        #[arg(short, long)]
        branch: Option<BranchName>,
        /// Only drafts with this status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    /// Close a draft without committing it
    Close {
        /// Dataset name
        dataset: String,
        /// Draft number
        draft: u64,
    },
}

/// Draft status filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    /// Open drafts
    Open,
    /// Closed drafts
    Closed,
    /// Committed drafts
    Committed,
}

impl From<StatusArg> for DraftStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Open => DraftStatus::Open,
            StatusArg::Closed => DraftStatus::Closed,
            StatusArg::Committed => DraftStatus::Committed,
        }
    }
}
