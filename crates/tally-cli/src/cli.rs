use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Track ledgers and transactions, synced across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name holding replica and remote configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage ledgers ("books")
    #[command(alias = "book")]
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },
    /// Manage categories
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },
    /// Manage transactions inside a ledger
    #[command(alias = "tx")]
    Entry {
        #[command(subcommand)]
        command: EntryCommands,
    },
    /// Reconcile the local replica with the configured remote
    Sync {
        /// Keep running, syncing on an interval and after local changes
        #[arg(long)]
        watch: bool,
        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync status for this replica
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and resolve sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
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
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// Create a new ledger
    Add {
        /// Ledger name
        name: String,
        /// ISO 4217 currency code
        #[arg(short, long, default_value = "USD")]
        currency: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List ledgers
    List {
        /// Include deleted ledgers
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing ledger
    Edit {
        /// Ledger ID or unique ID prefix
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        currency: Option<String>,
        /// Pin an exchange rate (0 clears it)
        #[arg(long, value_name = "RATE")]
        rate: Option<f64>,
        #[arg(long)]
        archived: Option<bool>,
    },
    /// Delete a ledger
    Delete {
        /// Ledger ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum CategoryCommands {
    /// Create a new category
    Add {
        name: String,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        icon: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List categories
    List {
        /// Include deleted categories
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a category
    Delete {
        /// Category ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum EntryCommands {
    /// Record a transaction
    Add {
        /// Ledger ID or unique ID prefix
        ledger: String,
        /// Signed amount, e.g. -12.50 for money out
        #[arg(allow_hyphen_values = true)]
        amount: String,
        /// Who the money went to or came from
        counterparty: String,
        /// Category ID or unique ID prefix
        #[arg(long)]
        category: Option<String>,
        /// Payment mode (cash, card, bank_transfer, wallet, other)
        #[arg(long, default_value = "cash")]
        mode: String,
        /// Date as YYYY-MM-DD or RFC 3339 (defaults to now)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        remarks: Option<String>,
        /// Tag, may be repeated
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// List transactions of a ledger, newest first
    List {
        /// Ledger ID or unique ID prefix
        ledger: String,
        /// Number of transactions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit a transaction
    Edit {
        /// Transaction ID or unique ID prefix
        id: String,
        #[arg(long, allow_hyphen_values = true)]
        amount: Option<String>,
        #[arg(long)]
        counterparty: Option<String>,
        /// Category ID or prefix; "none" clears it
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        remarks: Option<String>,
    },
    /// Delete a transaction
    Delete {
        /// Transaction ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List conflicts waiting for a decision
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve one conflict
    Resolve {
        /// Conflict key as shown by `tally conflicts list`
        key: String,
        /// `local`, `remote`, or a literal value for the field
        #[arg(required_unless_present = "value")]
        choice: Option<String>,
        /// Literal value for the field, taken verbatim even if it reads `local` or `remote`
        #[arg(long, value_name = "VALUE", conflicts_with = "choice")]
        value: Option<String>,
    },
    /// Resolve every pending conflict with one choice
    ResolveAll {
        /// Side to keep for every conflict
        #[arg(long, value_enum, default_value_t = ConflictSide::Remote)]
        keep: ConflictSide,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConflictSide {
    Local,
    Remote,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Relay base URL (e.g. <http://localhost:8080>)
        #[arg(long, value_name = "URL")]
        remote_url: Option<String>,
        /// Bearer token for the relay
        #[arg(long, value_name = "TOKEN")]
        remote_token: Option<String>,
        /// Use a shared SQLite file as the remote instead of a relay
        #[arg(long, value_name = "PATH")]
        remote_db_path: Option<PathBuf>,
        /// Periodic sync interval for `tally sync --watch` (0 disables)
        #[arg(long, value_name = "SECS")]
        interval_secs: Option<u64>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
