//! Cohort: local coordination for agents sharing one repository.
//!
//! Several coding agents (and the humans around them) often work in the same checkout at the
//! same time. Cohort gives them a shared, on-disk picture of who is doing what:
//!
//! - **Sessions**: leases that agents renew while they work; quiet ones are reclaimed
//! - **Claims**: advisory glob patterns over files, newest claim wins on overlap
//! - **Bulletin**: an append-only activity log every lifecycle change writes to
//! - **Policies**: commit-time rules that classify findings by severity
//! - **Health**: a deterministic score and letter grade for the repository
//!
//! All state lives in `<project>/.cohort/`. Every process opens the same SQLite datastore in
//! WAL mode; there is no daemon and no in-process lock. Coordination is data.
//!
//! # Examples
//!
//! ```bash
//! cohort init
//! SID=$(cohort session start --agent claude --intent "refactor auth")
//! cohort claim add --session "$SID" 'src/auth/**'
//! cohort claim check src/auth/login.rs
//! cohort hook install
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: project layout, datastore handle, errors, config, globs, git changeset
//! - [`plugins`]: sessions, claims, bulletin, policy engine, health scorer, watcher

pub mod core;
pub mod plugins;

mod cli;
mod dispatch;

use clap::Parser;
use cli::{Cli, Command};
use core::error::CohortError;
use core::output::OutputFormat;
use core::store::Store;
use dispatch::Context;

/// Parses the process arguments and runs one command.
pub fn run() -> Result<(), CohortError> {
    let cli = Cli::parse();
    let format = OutputFormat::parse(&cli.format);
    let cwd = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let open = || Context::open(Store::discover(&cwd)?, format);

    match cli.command {
        Command::Init { policies } => dispatch::run_init(&cwd, policies, format),
        Command::Hook(hook) => {
            // The hook lives in the repository root, which is also the project root.
            let root = match Store::discover(&cwd) {
                Ok(store) => store.root,
                Err(e) if hook.requires_project() => return Err(e),
                Err(_) => cwd.clone(),
            };
            dispatch::run_hook_cli(&root, hook, format)
        }
        Command::Session(c) => dispatch::run_session_cli(&open()?, c),
        Command::Claim(c) => dispatch::run_claim_cli(&open()?, c),
        Command::Bulletin(c) => dispatch::run_bulletin_cli(&open()?, c),
        Command::Policy(c) => dispatch::run_policy_cli(&open()?, c),
        Command::Health(c) => dispatch::run_health_cli(&open()?, c),
        Command::Watch {
            interval_ms,
            ticks,
            agent,
        } => dispatch::run_watch(&open()?, interval_ms, ticks, agent),
    }
}
