//! AIPM: branch-aware workflow state for git workspaces.
//!
//! **AIPM is a local-first state engine.** One state document per workspace
//! caches everything a wrapper script would otherwise recompute on every
//! invocation: the resolved opinions tree, values derived from it (branch
//! naming patterns, protected branches, lifecycle rules, workflow choices),
//! live repository facts, and the operational decisions that follow from
//! both.
//!
//! # Architecture
//!
//! - **Opinions** (`core::opinions`): explicit TOML document layered over
//!   compiled-in defaults, validated at load, hashed for change detection.
//! - **Computer** (`core::compute`, `core::decide`): pure derivations;
//!   `computed` is a function of `rawConfig`, `decisions` of
//!   `computed` + `runtime`.
//! - **Store** (`core::store`, `core::document`): one JSON artifact,
//!   lockless dotted-path reads, atomic whole-file swaps.
//! - **Transactions** (`core::txn`, `core::lock`): every mutation holds the
//!   exclusive advisory lock, validates before persisting, and rolls back on
//!   any early exit. Safe across independent OS processes.
//! - **Sync** (`core::sync`, `core::gitfacts`): pull facts from the
//!   repository, or accept pushed `report` events from actors that just
//!   performed a git mutation.
//!
//! Wrapper scripts read with `aipm state get` and write through
//! `aipm state report` / `aipm state refresh` only.

pub mod core;

mod cli;

use crate::cli::{Cli, Command, ReportCli, StateCommand};
use crate::core::error::AipmError;
use crate::core::gitfacts::GitCli;
use crate::core::opinions::{DEFAULT_OPINIONS, ResolvedOpinions};
use crate::core::session::{self, SessionContext};
use crate::core::store::{AIPM_DIR, StateStore, ValidationReport};
use crate::core::sync::{ReportEvent, SyncEngine};

use clap::Parser;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

fn find_workspace_root(start_dir: &Path) -> Result<PathBuf, AipmError> {
    let mut current = PathBuf::from(start_dir);
    loop {
        if current.join(AIPM_DIR).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(AipmError::NotFound(format!(
                "'{AIPM_DIR}' directory not found in current or parent directories. Run `aipm init` first."
            )));
        }
    }
}

fn open_store(start_dir: &Path) -> Result<StateStore, AipmError> {
    let root = find_workspace_root(start_dir)?;
    let git = GitCli::discover(&root)?;
    Ok(StateStore::open(&root, Box::new(git)))
}

pub fn run() -> Result<(), AipmError> {
    let cli = Cli::parse();
    let current_dir = std::env::current_dir()?;

    match cli.command {
        Command::Init(init_cli) => {
            let target = match init_cli.dir {
                Some(d) => fs::canonicalize(&d)?,
                None => current_dir,
            };
            run_init(&target, init_cli.force)
        }
        Command::Start(start_cli) => {
            let store = open_store(&current_dir)?;
            let (context, project) = match start_cli.project {
                Some(name) => (SessionContext::Project, Some(name)),
                None => (SessionContext::Framework, None),
            };
            // Honor the configured sync trigger before the session begins.
            let sync_on_start = store
                .get("computed.workflows.syncTrigger")
                .ok()
                .and_then(|v| v.as_str().map(|s| s == "on-start"))
                .unwrap_or(true);
            if sync_on_start {
                store.refresh("runtime")?;
            }
            let descriptor = session::start_session(&store, context, project)?;
            println!(
                "{} Session {} started ({})",
                "●".bright_green(),
                descriptor.id.bright_white(),
                descriptor
                    .project
                    .as_deref()
                    .unwrap_or("framework")
                    .bright_cyan()
            );
            Ok(())
        }
        Command::Stop => {
            let store = open_store(&current_dir)?;
            let descriptor = session::end_session(&store)?;
            println!(
                "{} Session {} ended",
                "●".bright_green(),
                descriptor.id.bright_white()
            );
            Ok(())
        }
        Command::State(state_cli) => {
            let store = open_store(&current_dir)?;
            match state_cli.command {
                StateCommand::Get { path, format } => {
                    let value = store.get(&path)?;
                    if format == "raw" {
                        match value.as_str() {
                            Some(s) => println!("{s}"),
                            None => println!("{value}"),
                        }
                    } else {
                        println!("{}", serde_json::to_string_pretty(&value)?);
                    }
                    Ok(())
                }
                StateCommand::Refresh { scope } => {
                    store.refresh(&scope)?;
                    println!("{} Refreshed '{}'", "✓".bright_green(), scope);
                    Ok(())
                }
                StateCommand::Report(report_cli) => {
                    let event = parse_report_event(&report_cli)?;
                    SyncEngine::new(&store).report(&event)?;
                    println!("{} Reported {}", "✓".bright_green(), event.kind());
                    Ok(())
                }
                StateCommand::Validate { repair, format } => {
                    let report = if repair {
                        store.repair()?
                    } else {
                        store.validate()?
                    };
                    render_validation(&report, &format)?;
                    if !report.errors.is_empty() {
                        return Err(report.into_error());
                    }
                    Ok(())
                }
            }
        }
    }
}

fn run_init(target: &Path, force: bool) -> Result<(), AipmError> {
    let aipm_dir = target.join(AIPM_DIR);
    let git = GitCli::discover(target)?;

    if aipm_dir.join("state.json").exists() && !force {
        println!(
            "{} Workspace already initialized. Use {} to rebuild.",
            "⚠".bright_yellow(),
            "--force".bright_cyan().bold()
        );
        return Ok(());
    }

    fs::create_dir_all(&aipm_dir)?;

    let opinions_path = aipm_dir.join("opinions.toml");
    if opinions_path.exists() {
        println!(
            "    {} {} {}",
            "✓".bright_green(),
            "opinions.toml".bright_white(),
            "(preserved - existing opinions kept)".bright_black()
        );
    } else {
        fs::write(&opinions_path, DEFAULT_OPINIONS)?;
        println!(
            "    {} {}",
            "●".bright_green(),
            "opinions.toml".bright_white()
        );
    }

    // Surface validation problems before any state is written.
    let opinions = ResolvedOpinions::load(Some(&opinions_path))?;

    let store = StateStore::open(target, Box::new(git));
    store.initialize()?;

    println!(
        "    {} {}",
        "●".bright_green(),
        "state.json".bright_white()
    );
    println!();
    println!(
        "{} Workspace initialized (config {})",
        "✓".bright_green().bold(),
        &opinions.content_hash()[..12].bright_black()
    );
    Ok(())
}

fn parse_report_event(cli: &ReportCli) -> Result<ReportEvent, AipmError> {
    let need = |field: Option<&String>, flag: &str| -> Result<String, AipmError> {
        field.cloned().ok_or_else(|| {
            AipmError::ConfigError(format!("event '{}' requires {}", cli.event, flag))
        })
    };
    match cli.event.as_str() {
        "branch-created" => Ok(ReportEvent::BranchCreated {
            name: need(cli.name.as_ref(), "--name")?,
            base_branch: need(cli.base.as_ref(), "--base")?,
        }),
        "branch-deleted" => Ok(ReportEvent::BranchDeleted {
            name: need(cli.name.as_ref(), "--name")?,
        }),
        "branch-switched" => Ok(ReportEvent::BranchSwitched {
            name: need(cli.name.as_ref(), "--name")?,
        }),
        "commit-created" => Ok(ReportEvent::CommitCreated {
            hash: need(cli.hash.as_ref(), "--hash")?,
            message: cli.message.clone().unwrap_or_default(),
        }),
        "files-staged" => Ok(ReportEvent::FilesStaged {
            count: cli.count.unwrap_or(1),
        }),
        "branch-merged" => Ok(ReportEvent::BranchMerged {
            source: need(cli.source.as_ref(), "--source")?,
            target: need(cli.target.as_ref(), "--target")?,
        }),
        "remote-synced" => Ok(ReportEvent::RemoteSynced {
            ahead: cli.ahead.unwrap_or(0),
            behind: cli.behind.unwrap_or(0),
        }),
        "stash-saved" => Ok(ReportEvent::StashSaved),
        "stash-popped" => Ok(ReportEvent::StashPopped),
        other => Err(AipmError::ConfigError(format!(
            "unknown report event '{other}'"
        ))),
    }
}

fn render_validation(report: &ValidationReport, format: &str) -> Result<(), AipmError> {
    if format == "json" {
        let findings = |items: &[crate::core::store::Finding]| {
            items
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "section": f.section.as_str(),
                        "detail": f.detail,
                    })
                })
                .collect::<Vec<_>>()
        };
        let payload = serde_json::json!({
            "clean": report.is_clean(),
            "errors": findings(&report.errors),
            "drift": findings(&report.drift),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if report.is_clean() {
        println!("{} State document is consistent", "✓".bright_green());
        return Ok(());
    }
    for finding in &report.errors {
        println!(
            "{} [{}] {}",
            "✗".bright_red(),
            finding.section.as_str().bright_white(),
            finding.detail
        );
    }
    for finding in &report.drift {
        println!(
            "{} [{}] drift: {} {}",
            "⚠".bright_yellow(),
            finding.section.as_str().bright_white(),
            finding.detail,
            "(run `aipm state validate --repair`)".bright_black()
        );
    }
    Ok(())
}
