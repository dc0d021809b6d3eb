//! CLI struct definitions for the `cohort` command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `dispatch`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "cohort",
    version = env!("CARGO_PKG_VERSION"),
    about = "Local coordination for agents sharing one repository: sessions, file claims, an activity bulletin, commit-time policy checks and a health grade."
)]
pub(crate) struct Cli {
    /// Project directory (defaults to the nearest ancestor containing `.cohort/`).
    #[clap(short = 'C', long, global = true)]
    pub dir: Option<PathBuf>,
    /// Output format: 'text' or 'json'.
    #[clap(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    pub format: String,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create `.cohort/` with the datastore and a default config
    #[clap(name = "init")]
    Init {
        /// Copy the built-in policy documents into `.cohort/policies/` for editing.
        #[clap(long)]
        policies: bool,
    },
    /// Register, renew and end agent sessions
    #[clap(name = "session", visible_alias = "s")]
    Session(SessionCli),
    /// Claim and release file patterns
    #[clap(name = "claim", visible_alias = "c")]
    Claim(ClaimCli),
    /// Read and append to the shared activity log
    #[clap(name = "bulletin", visible_alias = "b")]
    Bulletin(BulletinCli),
    /// List and evaluate policy rules
    #[clap(name = "policy", visible_alias = "p")]
    Policy(PolicyCli),
    /// Score repository health
    #[clap(name = "health")]
    Health(HealthCli),
    /// Install or remove the git pre-commit hook
    #[clap(name = "hook")]
    Hook(HookCli),
    /// Poll the working tree and post file changes and commits to the bulletin
    #[clap(name = "watch")]
    Watch {
        /// Milliseconds between polls.
        #[clap(long, default_value = "2000")]
        interval_ms: u64,
        /// Stop after this many polls.
        #[clap(long)]
        ticks: Option<u64>,
        /// Agent name for the watcher's own session.
        #[clap(long, default_value = "cohort-watch")]
        agent: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct SessionCli {
    #[clap(subcommand)]
    pub command: SessionCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum SessionCommand {
    /// Register a new session and print its id
    Start {
        #[clap(long)]
        agent: String,
        #[clap(long)]
        intent: Option<String>,
        /// Process id of the agent, if known.
        #[clap(long)]
        pid: Option<i64>,
    },
    /// Renew a session's lease
    Touch { id: String },
    /// Pause a session; it keeps its claims and is not swept until touched again
    Idle { id: String },
    /// End a session and release its claims
    End { id: String },
    /// List active sessions
    List,
    /// End sessions idle past the stale window
    Sweep {
        /// Override the configured stale window.
        #[clap(long)]
        minutes: Option<i64>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct ClaimCli {
    #[clap(subcommand)]
    pub command: ClaimCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ClaimCommand {
    /// Claim a glob pattern for a session
    Add {
        #[clap(long)]
        session: String,
        pattern: String,
        /// Advisory claims are 'soft'; 'hard' signals exclusive intent.
        #[clap(long = "type", default_value = "soft")]
        claim_type: String,
    },
    /// Release one pattern, or every claim when no pattern is given
    Release {
        #[clap(long)]
        session: String,
        pattern: Option<String>,
    },
    /// List active claims
    List {
        #[clap(long)]
        session: Option<String>,
    },
    /// Report which claim, if any, covers a path
    Check {
        path: String,
        /// Only report a conflict when the claim belongs to some other session.
        #[clap(long)]
        session: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct BulletinCli {
    #[clap(subcommand)]
    pub command: BulletinCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum BulletinCommand {
    /// Append a note
    Post {
        message: String,
        #[clap(long = "type", default_value = "note")]
        entry_type: String,
        #[clap(long)]
        session: Option<String>,
        #[clap(long)]
        agent: Option<String>,
        #[clap(long = "file")]
        files: Vec<String>,
    },
    /// Show the latest entries, newest first
    List {
        #[clap(long, default_value = "10")]
        limit: usize,
    },
    /// Show entries after a timestamp (epoch milliseconds), oldest first
    Since { timestamp: i64 },
}

#[derive(clap::Args, Debug)]
pub(crate) struct PolicyCli {
    #[clap(subcommand)]
    pub command: PolicyCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum PolicyCommand {
    /// List loaded rules
    List,
    /// Evaluate rules against files or the staged changeset
    Check {
        /// Paths relative to the project root.
        paths: Vec<String>,
        /// Evaluate the git index instead of working-tree files.
        #[clap(long)]
        staged: bool,
        /// Exit non-zero when the configured strictness blocks a result.
        #[clap(long)]
        enforce: bool,
        /// Override the configured strictness.
        #[clap(long)]
        strictness: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct HealthCli {
    #[clap(subcommand)]
    pub command: HealthCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum HealthCommand {
    /// Score the repository and record the result
    Calc,
    /// Print the last recorded snapshot
    Show,
    /// Print recorded scores, newest first
    History {
        #[clap(long, default_value = "10")]
        limit: usize,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct HookCli {
    #[clap(subcommand)]
    pub command: HookCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum HookCommand {
    /// Write `.git/hooks/pre-commit`
    Install {
        /// Replace a pre-commit hook not written by cohort.
        #[clap(long)]
        force: bool,
    },
    /// Remove the pre-commit hook if cohort wrote it
    Uninstall,
}

impl HookCli {
    /// Installing needs an initialized project; removing works without one.
    pub fn requires_project(&self) -> bool {
        matches!(self.command, HookCommand::Install { .. })
    }
}
