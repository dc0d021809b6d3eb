//! Command handlers. Each takes parsed clap args and the project context, prints either
//! colored text or JSON, and returns errors for `main` to report.

use crate::cli::{
    BulletinCli, BulletinCommand, ClaimCli, ClaimCommand, HealthCli, HealthCommand, HookCli,
    HookCommand, PolicyCli, PolicyCommand, SessionCli, SessionCommand,
};
use crate::core::config::{self, ProjectConfig, Strictness};
use crate::core::db::Datastore;
use crate::core::error::CohortError;
use crate::core::output::{self, OutputFormat};
use crate::core::store::Store;
use crate::core::vcs::GitChangeset;
use crate::plugins::bulletin::{self, BulletinEntry, NewBulletinEntry};
use crate::plugins::claim::{self, ActiveClaim, ClaimStatus, ClaimType};
use crate::plugins::encounter::{self, Novelty};
use crate::plugins::health::{self, HealthReport};
use crate::plugins::policy::{self, PolicyEngine, PolicyResult, Severity};
use crate::plugins::session::{self, Session};
use crate::plugins::watcher::{self, WatchOptions};
use colored::Colorize;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

const HOOK_MARKER: &str = "# Installed by cohort";

/// Everything a handler needs: project layout, open datastore, config and output mode.
pub(crate) struct Context {
    pub store: Store,
    pub db: Datastore,
    pub config: ProjectConfig,
    pub format: OutputFormat,
}

impl Context {
    pub fn open(store: Store, format: OutputFormat) -> Result<Self, CohortError> {
        let config = config::load_config(&store)?;
        let db = Datastore::open(&store)?;
        Ok(Self {
            store,
            db,
            config,
            format,
        })
    }

    /// Opportunistic stale sweep before anything that reads or writes session state.
    fn sweep(&self) {
        let reclaimed = session::sweep_stale(&self.db, self.config.stale_minutes);
        if reclaimed > 0 {
            tracing::info!(reclaimed, "reclaimed stale sessions");
        }
    }
}

pub(crate) fn run_init(root: &Path, install_policies: bool, format: OutputFormat) -> Result<(), CohortError> {
    let store = Store::new(root);
    let existed = store.db_path().exists();
    Datastore::initialize(&store)?;
    let wrote_config = config::write_default_config(&store)?;
    let installed = if install_policies {
        policy::install_builtin_policies(&store)?
    } else {
        Vec::new()
    };

    if format.is_json() {
        return output::print_json(&serde_json::json!({
            "root": store.root,
            "datastore": store.db_path(),
            "created": !existed,
            "config_written": wrote_config,
            "policies_installed": installed,
        }));
    }
    let verb = if existed { "Reused" } else { "Created" };
    println!("{} {} {}", "✓".green().bold(), verb, store.db_path().display());
    if wrote_config {
        println!("{} Wrote {}", "✓".green().bold(), store.config_path().display());
    }
    for path in installed {
        println!("{} Installed {}", "✓".green().bold(), path.display());
    }
    Ok(())
}

fn print_session(s: &Session) {
    let status = match s.status {
        session::SessionStatus::Active => s.status.to_string().green(),
        session::SessionStatus::Idle => s.status.to_string().yellow(),
        session::SessionStatus::Ended => s.status.to_string().dimmed(),
    };
    println!(
        "{}  {:<16} {:<7} {:>9}  {}",
        s.id.bright_white(),
        s.agent.bold(),
        status,
        output::age(s.last_activity_at),
        s.intent.as_deref().unwrap_or("")
    );
}

pub(crate) fn run_session_cli(ctx: &Context, cli: SessionCli) -> Result<(), CohortError> {
    ctx.sweep();
    match cli.command {
        SessionCommand::Start { agent, intent, pid } => {
            let s = session::register_session(&ctx.db, &agent, pid, intent.as_deref())?;
            if ctx.format.is_json() {
                output::print_json(&s)
            } else {
                println!("{}", s.id);
                Ok(())
            }
        }
        SessionCommand::Touch { id } => {
            session::touch_session(&ctx.db, &id)?;
            report_ok(ctx.format, "touched", &id)
        }
        SessionCommand::Idle { id } => {
            session::idle_session(&ctx.db, &id)?;
            report_ok(ctx.format, "idled", &id)
        }
        SessionCommand::End { id } => {
            session::end_session(&ctx.db, &id)?;
            report_ok(ctx.format, "ended", &id)
        }
        SessionCommand::List => {
            let sessions = session::list_active_sessions(&ctx.db)?;
            if ctx.format.is_json() {
                return output::print_json(&sessions);
            }
            if sessions.is_empty() {
                println!("{}", "No active sessions".dimmed());
            }
            sessions.iter().for_each(print_session);
            Ok(())
        }
        SessionCommand::Sweep { minutes } => {
            let minutes = minutes.unwrap_or(ctx.config.stale_minutes);
            let reclaimed = session::cleanup_stale_sessions(&ctx.db, minutes)?;
            if ctx.format.is_json() {
                output::print_json(&serde_json::json!({ "reclaimed": reclaimed }))
            } else {
                println!("Reclaimed {} stale session(s)", reclaimed);
                Ok(())
            }
        }
    }
}

fn report_ok(format: OutputFormat, action: &str, id: &str) -> Result<(), CohortError> {
    if format.is_json() {
        output::print_json(&serde_json::json!({ "id": id, "status": action }))
    } else {
        println!("{} Session {} {}", "✓".green().bold(), id, action);
        Ok(())
    }
}

fn print_claim(c: &ActiveClaim) {
    let kind = match c.claim_type {
        ClaimType::Hard => c.claim_type.to_string().red().bold(),
        ClaimType::Soft => c.claim_type.to_string().cyan(),
    };
    println!(
        "{:<32} {:<5} {:<16} {}  {}",
        c.pattern.bold(),
        kind,
        c.agent,
        c.session_id.dimmed(),
        output::age(c.created_at)
    );
}

pub(crate) fn run_claim_cli(ctx: &Context, cli: ClaimCli) -> Result<(), CohortError> {
    ctx.sweep();
    match cli.command {
        ClaimCommand::Add {
            session,
            pattern,
            claim_type,
        } => {
            let claim_type: ClaimType = claim_type.parse()?;
            let created = claim::create_claim(&ctx.db, &session, &pattern, claim_type)?;
            if ctx.format.is_json() {
                output::print_json(&created)
            } else {
                println!("{} Claimed {} ({})", "✓".green().bold(), created.pattern.bold(), claim_type);
                Ok(())
            }
        }
        ClaimCommand::Release { session, pattern } => {
            let released = claim::release_claim(&ctx.db, &session, pattern.as_deref())?;
            if ctx.format.is_json() {
                output::print_json(&serde_json::json!({ "released": released }))
            } else {
                println!("Released {} claim(s)", released);
                Ok(())
            }
        }
        ClaimCommand::List { session } => {
            let claims = match session {
                Some(id) => claim::list_session_claims(&ctx.db, &id)?,
                None => claim::list_active_claims(&ctx.db)?,
            };
            if ctx.format.is_json() {
                return output::print_json(&claims);
            }
            if claims.is_empty() {
                println!("{}", "No active claims".dimmed());
            }
            claims.iter().for_each(print_claim);
            Ok(())
        }
        ClaimCommand::Check { path, session } => {
            let status = claim::check_file(&ctx.db, &path)?;
            let conflict = status.conflict_for(&path, session.as_deref());
            if ctx.format.is_json() {
                return output::print_json(&serde_json::json!({
                    "status": status,
                    "conflict": conflict,
                }));
            }
            match (&status, conflict) {
                (_, Some(warning)) => println!("{} {}", "⚠".yellow().bold(), warning),
                (ClaimStatus::Claimed(c), None) => {
                    println!("{} {} is claimed by your session via '{}'", "✓".green(), path, c.pattern)
                }
                (ClaimStatus::Unclaimed, None) => println!("{} {} is unclaimed", "✓".green(), path),
            }
            Ok(())
        }
    }
}

fn print_entry(e: &BulletinEntry) {
    let who = e.agent.as_deref().unwrap_or("-");
    println!(
        "{:>9}  {:<13} {:<14} {}",
        output::age(e.created_at).dimmed(),
        e.entry_type.cyan(),
        who,
        output::compact_line(&e.message, 100)
    );
    if let Some(files) = &e.files {
        println!("{:>9}  {}", "", output::preview_paths(files, 5).dimmed());
    }
    if let Some(w) = &e.warning {
        println!("{:>9}  {} {}", "", "⚠".yellow().bold(), output::compact_line(w, 100));
    }
}

pub(crate) fn run_bulletin_cli(ctx: &Context, cli: BulletinCli) -> Result<(), CohortError> {
    let entries = match cli.command {
        BulletinCommand::Post {
            message,
            entry_type,
            session,
            agent,
            files,
        } => {
            let mut entry = NewBulletinEntry::new(&entry_type, message);
            if let Some(s) = &session {
                entry = entry.session(s);
            }
            if let Some(a) = &agent {
                entry = entry.agent(a);
            }
            if !files.is_empty() {
                entry = entry.files(files);
            }
            let stored = bulletin::post_bulletin(&ctx.db, &entry)?;
            if ctx.format.is_json() {
                return output::print_json(&stored);
            }
            println!("{}", stored.id);
            return Ok(());
        }
        BulletinCommand::List { limit } => bulletin::get_recent_bulletin(&ctx.db, limit)?,
        BulletinCommand::Since { timestamp } => bulletin::get_bulletin_since(&ctx.db, timestamp)?,
    };
    if ctx.format.is_json() {
        return output::print_json(&entries);
    }
    if entries.is_empty() {
        println!("{}", "No bulletin entries".dimmed());
    }
    entries.iter().for_each(print_entry);
    Ok(())
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Red => "RED".red().bold(),
        Severity::Yellow => "YELLOW".yellow().bold(),
        Severity::Green => "GREEN".green(),
    }
}

fn print_result(r: &PolicyResult) {
    let location = match (&r.file, r.line) {
        (Some(f), Some(l)) => format!("{}:{}", f, l),
        (Some(f), None) => f.clone(),
        _ => "(repository)".to_string(),
    };
    println!(
        "{:<6} {} {} {}",
        severity_label(r.severity),
        r.rule_id.bold(),
        location.bright_white(),
        r.rule_name.dimmed()
    );
    if let Some(m) = &r.matched {
        println!("       {}", output::compact_line(m, 100).dimmed());
    }
    // First encounters get the full explanation; repeats get a one-line reminder.
    match r.novelty {
        Some(Novelty::Reminder) => println!("       {}", r.fix_suggestion),
        _ => {
            println!("       {}", r.teaching);
            if !r.fix_suggestion.is_empty() {
                println!("       {} {}", "fix:".cyan(), r.fix_suggestion);
            }
        }
    }
}

pub(crate) fn run_policy_cli(ctx: &Context, cli: PolicyCli) -> Result<(), CohortError> {
    let (engine, skipped) = PolicyEngine::for_project(&ctx.store, &ctx.config)?;
    for s in &skipped {
        tracing::warn!(source = %s.source, rule = ?s.rule_id, reason = %s.reason, "policy rule skipped");
    }
    match cli.command {
        PolicyCommand::List => {
            let rules = engine.list_rules();
            if ctx.format.is_json() {
                return output::print_json(&rules);
            }
            for r in rules {
                println!(
                    "{:<6} {:<9} {:<13} {}",
                    severity_label(r.severity),
                    r.rule_id.bold(),
                    r.mode.cyan(),
                    r.name
                );
            }
            Ok(())
        }
        PolicyCommand::Check {
            paths,
            staged,
            enforce,
            strictness,
        } => {
            let strictness: Strictness = match strictness {
                Some(raw) => raw.parse()?,
                None => ctx.config.strictness,
            };
            let mut results = if staged {
                engine.check_staged(&ctx.store.root, &GitChangeset::new(&ctx.store.root))?
            } else if paths.is_empty() {
                engine.check_repository(&ctx.store.root)
            } else {
                engine.check_paths(&ctx.store.root, &paths)
            };
            encounter::mark_encounters(&ctx.db, &mut results)?;
            let enforcement = policy::enforce(&results, strictness);

            if ctx.format.is_json() {
                output::print_json(&serde_json::json!({
                    "results": results,
                    "strictness": strictness,
                    "blocked": enforcement.is_blocked(),
                }))?;
            } else if results.is_empty() {
                println!("{} No policy findings", "✓".green().bold());
            } else {
                results.iter().for_each(print_result);
                println!();
                if enforcement.is_blocked() {
                    println!(
                        "{} {} finding(s) block at {} strictness",
                        "✗".red().bold(),
                        enforcement.blocking.len(),
                        strictness
                    );
                } else {
                    println!("{} finding(s), none blocking at {} strictness", results.len(), strictness);
                }
            }

            if enforce && enforcement.is_blocked() {
                return Err(CohortError::CommitBlocked(enforcement.blocking.len()));
            }
            Ok(())
        }
    }
}

fn print_health(report: &HealthReport) {
    let grade = match report.overall_score {
        90.. => report.grade.green().bold(),
        70..=89 => report.grade.yellow().bold(),
        _ => report.grade.red().bold(),
    };
    println!("{} {}  {}/100", report.project.bold(), grade, report.overall_score);
    for (name, cat) in &report.categories {
        println!("  {:<14} {:>3}  (weight {})", name, cat.score, cat.weight);
        for finding in &cat.findings {
            println!("  {:<14} {}", "", finding.dimmed());
        }
    }
}

pub(crate) fn run_health_cli(ctx: &Context, cli: HealthCli) -> Result<(), CohortError> {
    match cli.command {
        HealthCommand::Calc => {
            let report = health::calculate_health(&ctx.store.root)?;
            health::record_health(&ctx.db, &ctx.store, &report)?;
            bulletin::post_bulletin(
                &ctx.db,
                &NewBulletinEntry::new(
                    bulletin::entry_types::HEALTH,
                    format!("health {} ({}/100)", report.grade, report.overall_score),
                ),
            )?;
            if ctx.format.is_json() {
                output::print_json(&report)
            } else {
                print_health(&report);
                Ok(())
            }
        }
        HealthCommand::Show => {
            let report = health::read_snapshot(&ctx.store)?;
            if ctx.format.is_json() {
                output::print_json(&report)
            } else {
                print_health(&report);
                Ok(())
            }
        }
        HealthCommand::History { limit } => {
            let history = health::health_history(&ctx.db, limit)?;
            if ctx.format.is_json() {
                return output::print_json(&history);
            }
            for r in history {
                println!("{:>9}  {:<3} {:>3}", output::age(r.timestamp), r.grade, r.overall_score);
            }
            Ok(())
        }
    }
}

fn hook_script() -> String {
    format!(
        r#"#!/bin/sh
{}
# Blocks the commit when policy findings reach the configured strictness.
# A missing binary or project state is reported and lets the commit through.

if ! command -v cohort >/dev/null 2>&1; then
    echo "cohort: not found on PATH, skipping policy check" >&2
    exit 0
fi
if [ ! -d "$(git rev-parse --show-toplevel)/.cohort" ]; then
    echo "cohort: project not initialized (run 'cohort init'), skipping policy check" >&2
    exit 0
fi

exec cohort policy check --staged --enforce
"#,
        HOOK_MARKER
    )
}

pub(crate) fn run_hook_cli(root: &Path, cli: HookCli, format: OutputFormat) -> Result<(), CohortError> {
    let git_dir = root.join(".git");
    if !git_dir.is_dir() {
        return Err(CohortError::ValidationError(format!(
            "{} is not a git repository root",
            root.display()
        )));
    }
    let hooks_dir = git_dir.join("hooks");
    let hook_path = hooks_dir.join("pre-commit");
    let ours = fs::read_to_string(&hook_path)
        .map(|body| body.contains(HOOK_MARKER))
        .unwrap_or(false);

    let action = match cli.command {
        HookCommand::Install { force } => {
            if hook_path.exists() && !ours && !force {
                return Err(CohortError::ValidationError(format!(
                    "{} exists and was not written by cohort (use --force to replace it)",
                    hook_path.display()
                )));
            }
            fs::create_dir_all(&hooks_dir)?;
            fs::write(&hook_path, hook_script())?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mut perms = fs::metadata(&hook_path)?.permissions();
                perms.set_mode(0o755);
                fs::set_permissions(&hook_path, perms)?;
            }
            "installed"
        }
        HookCommand::Uninstall => {
            if ours {
                fs::remove_file(&hook_path)?;
                "removed"
            } else {
                "absent"
            }
        }
    };

    if format.is_json() {
        output::print_json(&serde_json::json!({ "hook": hook_path, "status": action }))
    } else {
        println!("{} pre-commit hook {}", "✓".green().bold(), action);
        Ok(())
    }
}

pub(crate) fn run_watch(
    ctx: &Context,
    interval_ms: u64,
    ticks: Option<u64>,
    agent: String,
) -> Result<(), CohortError> {
    let opts = WatchOptions {
        interval: Duration::from_millis(interval_ms.max(100)),
        agent,
        stale_minutes: ctx.config.stale_minutes,
        max_ticks: ticks,
    };
    let stop = AtomicBool::new(false);
    let json = ctx.format.is_json();
    if !json {
        println!("Watching {} (Ctrl-C to stop)", ctx.store.root.display());
    }
    watcher::run_watch(&ctx.db, &ctx.store, &opts, &stop, |report| {
        if json {
            if let Ok(line) = serde_json::to_string(report) {
                println!("{}", line);
            }
            return;
        }
        if !report.changed.is_empty() {
            println!("{} {}", "changed".cyan(), output::preview_paths(&report.changed, 5));
        }
        for c in &report.conflicts {
            println!("{} {}", "⚠".yellow().bold(), c);
        }
        if let Some(rev) = &report.commit {
            println!("{} {}", "commit".green(), rev);
        }
    })?;
    Ok(())
}
