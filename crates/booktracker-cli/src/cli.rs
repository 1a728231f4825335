use std::path::PathBuf;

use booktracker_core::models::ReadingStatus;
use booktracker_core::sync::{SyncMode, Winner};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "booktracker")]
#[command(about = "Track your reading locally and mirror it to Notion")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a book to the library
    #[command(alias = "new")]
    Add {
        /// Book title
        title: Vec<String>,
        #[command(flatten)]
        fields: BookArgs,
    },
    /// List books
    #[command(alias = "ls")]
    List {
        /// Only show books with this status
        #[arg(long)]
        status: Option<ReadingStatus>,
        /// Include deleted books
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing book
    Edit {
        /// Book ID or unique ID prefix
        id: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: BookArgs,
        /// Clear optional fields
        #[arg(long, value_enum, value_delimiter = ',')]
        clear: Vec<ClearableField>,
    },
    /// Delete a book
    #[command(alias = "rm")]
    Delete {
        /// Book ID or unique ID prefix
        id: String,
    },
    /// Sync the local library with Notion
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
        #[command(flatten)]
        run: SyncRunArgs,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Configure Notion sync settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Manage the Notion API token
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

/// Optional book fields shared by `add` and `edit`
#[derive(Args, Debug, Default, Clone)]
pub struct BookArgs {
    /// Author name
    #[arg(short, long)]
    pub author: Option<String>,
    /// Reading status (wishlist, reading, completed, skimmed, on-hold, dnf, owned)
    #[arg(short, long)]
    pub status: Option<ReadingStatus>,
    /// Rating from 1 to 5
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=5))]
    pub rating: Option<u8>,
    /// ISBN-10
    #[arg(long)]
    pub isbn: Option<String>,
    /// ISBN-13
    #[arg(long)]
    pub isbn13: Option<String>,
    /// Number of pages
    #[arg(long, value_name = "N")]
    pub pages: Option<u32>,
    /// Progress marker, e.g. "45%" or "p. 120"
    #[arg(long)]
    pub progress: Option<String>,
    /// Day reading started (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub started: Option<NaiveDate>,
    /// Day reading finished (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub finished: Option<NaiveDate>,
    /// Tag, repeatable
    #[arg(short, long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ClearableField {
    Rating,
    Isbn,
    Isbn13,
    Pages,
    Progress,
    Started,
    Finished,
    Tags,
}

/// Flags of a sync run
#[derive(Args, Debug, Default, Clone)]
pub struct SyncRunArgs {
    /// What the run may do
    #[arg(long, default_value = "full", value_name = "MODE")]
    pub mode: SyncMode,
    /// Settle conflicts automatically; without a value the configured policy is used
    #[arg(long, num_args = 0..=1, value_name = "local|remote")]
    pub auto_resolve: Option<Option<Winner>>,
    /// Output the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Report pending changes and conflicts without writing anything
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle a conflict by picking a side
    Resolve {
        /// Book ID or unique ID prefix
        id: String,
        /// Side whose copy is kept
        #[arg(long)]
        winner: Winner,
    },
    /// List queued local changes
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update sync settings
    Init {
        /// Notion database ID holding the books
        #[arg(long, value_name = "ID")]
        database_id: Option<String>,
        /// Notion API base URL
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Policy used by `sync --auto-resolve` (none, local, remote)
        #[arg(long, value_name = "POLICY")]
        auto_resolve_policy: Option<booktracker_core::sync::AutoResolvePolicy>,
        /// Local database path to remember
        #[arg(long, value_name = "PATH")]
        library_path: Option<PathBuf>,
    },
    /// Print effective settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Store a Notion integration token in the OS keychain
    Login {
        /// Notion integration token
        #[arg(long, value_name = "TOKEN")]
        token: String,
    },
    /// Show where the Notion token comes from
    Status,
    /// Remove the stored Notion token
    Logout,
}
