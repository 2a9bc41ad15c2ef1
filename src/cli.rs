//! CLI struct definitions for the aipm command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "aipm",
    version = env!("CARGO_PKG_VERSION"),
    about = "AIPM is the local-first state engine that tracks workflow decisions alongside git branches: precomputed configuration, atomic locked updates, and bidirectional git synchronization."
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Initialize workspace state (.aipm directory, opinions, state document)
    #[clap(name = "init", visible_alias = "i")]
    Init(InitCli),

    /// Begin a work session
    #[clap(name = "start")]
    Start(StartCli),

    /// End the active work session
    #[clap(name = "stop")]
    Stop,

    /// State document access: reads, refreshes, reports, validation
    #[clap(name = "state", visible_alias = "s")]
    State(StateCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct InitCli {
    /// Directory to initialize (defaults to current working directory).
    #[clap(short, long)]
    pub dir: Option<PathBuf>,
    /// Rebuild state even when a state document already exists.
    #[clap(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct StartCli {
    /// Start a session for a named project.
    #[clap(long, conflicts_with = "framework")]
    pub project: Option<String>,
    /// Start a session for the primary framework workspace (the default).
    #[clap(long)]
    pub framework: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct StateCli {
    #[clap(subcommand)]
    pub command: StateCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum StateCommand {
    /// Read a value by dotted path (lockless)
    Get {
        /// Dotted path into the state document, e.g. `decisions.mergeTarget`.
        path: String,
        /// Output format: 'json' or 'raw'.
        #[clap(long, default_value = "json")]
        format: String,
    },
    /// Re-sync state from the repository
    Refresh {
        /// Scope: 'all', 'runtime', 'branches', 'status', or 'session'.
        #[clap(long, default_value = "runtime")]
        scope: String,
    },
    /// Push a known git mutation into runtime without a full resync
    Report(ReportCli),
    /// Check state document consistency
    Validate {
        /// Re-run the relevant refresh for auto-repairable drift.
        #[clap(long)]
        repair: bool,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct ReportCli {
    /// Event kind: branch-created, branch-deleted, branch-switched,
    /// commit-created, files-staged, branch-merged, remote-synced,
    /// stash-saved, stash-popped.
    pub event: String,
    /// Branch name (branch-created, branch-deleted, branch-switched).
    #[clap(long)]
    pub name: Option<String>,
    /// Base branch (branch-created).
    #[clap(long)]
    pub base: Option<String>,
    /// Commit hash (commit-created).
    #[clap(long)]
    pub hash: Option<String>,
    /// Commit message (commit-created).
    #[clap(long)]
    pub message: Option<String>,
    /// Staged file count (files-staged).
    #[clap(long)]
    pub count: Option<u64>,
    /// Merge source branch (branch-merged).
    #[clap(long)]
    pub source: Option<String>,
    /// Merge target branch (branch-merged).
    #[clap(long)]
    pub target: Option<String>,
    /// Commits ahead of upstream (remote-synced).
    #[clap(long)]
    pub ahead: Option<u64>,
    /// Commits behind upstream (remote-synced).
    #[clap(long)]
    pub behind: Option<u64>,
}
