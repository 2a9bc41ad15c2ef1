//! Reconciliation between cached runtime facts and the real repository.
//!
//! Two directions: sync pulls facts from `GitFacts` into `runtime` (fully or
//! for a named subsection), and `report` lets an actor that just performed a
//! git mutation push the known effect without waiting for the next poll.
//! Either way the work happens inside a single transaction, so `decisions`
//! is re-derived with the same commit and readers never observe a half-done
//! sync. A failed fact query rolls the transaction back and leaves the prior
//! runtime intact.

use crate::core::compute::Computed;
use crate::core::document::{BranchInfo, BranchInventory, GitSnapshot, Runtime};
use crate::core::error::AipmError;
use crate::core::gitfacts::GitFacts;
use crate::core::store::StateStore;
use crate::core::time;
use serde::{Deserialize, Serialize};

/// Sections accepted by `partial_sync` / `Refresh`.
pub const SYNC_SECTIONS: &[&str] = &["branches", "status", "session"];

/// Caller-pushed notification of a git mutation that already happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ReportEvent {
    BranchCreated { name: String, base_branch: String },
    BranchDeleted { name: String },
    BranchSwitched { name: String },
    CommitCreated { hash: String, message: String },
    FilesStaged { count: u64 },
    BranchMerged { source: String, target: String },
    RemoteSynced { ahead: u64, behind: u64 },
    StashSaved,
    StashPopped,
}

impl ReportEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ReportEvent::BranchCreated { .. } => "branch-created",
            ReportEvent::BranchDeleted { .. } => "branch-deleted",
            ReportEvent::BranchSwitched { .. } => "branch-switched",
            ReportEvent::CommitCreated { .. } => "commit-created",
            ReportEvent::FilesStaged { .. } => "files-staged",
            ReportEvent::BranchMerged { .. } => "branch-merged",
            ReportEvent::RemoteSynced { .. } => "remote-synced",
            ReportEvent::StashSaved => "stash-saved",
            ReportEvent::StashPopped => "stash-popped",
        }
    }
}

/// Deterministic runtime effect of one report event. Pure: same event and
/// same prior runtime, same resulting runtime.
pub fn apply_event(runtime: &mut Runtime, event: &ReportEvent) {
    match event {
        ReportEvent::BranchCreated { name, .. } => {
            if !runtime.branches.all.contains(name) {
                runtime.branches.all.push(name.clone());
            }
            runtime.current_branch = name.clone();
        }
        ReportEvent::BranchDeleted { name } => {
            runtime.branches.all.retain(|b| b != name);
            runtime.branches.details.remove(name);
        }
        ReportEvent::BranchSwitched { name } => {
            runtime.current_branch = name.clone();
        }
        ReportEvent::CommitCreated { hash, .. } => {
            runtime.git.uncommitted_count = 0;
            runtime.git.is_clean = true;
            runtime.git.has_staged = false;
            runtime.git.last_commit = Some(hash.clone());
        }
        ReportEvent::FilesStaged { .. } => {
            runtime.git.has_staged = true;
            runtime.git.is_clean = false;
        }
        ReportEvent::BranchMerged { source, .. } => {
            if !runtime.branches.merged.contains(source) {
                runtime.branches.merged.push(source.clone());
            }
        }
        ReportEvent::RemoteSynced { ahead, behind } => {
            runtime.git.ahead = *ahead;
            runtime.git.behind = *behind;
            runtime.git.has_upstream = true;
        }
        ReportEvent::StashSaved => {
            runtime.git.stash_count += 1;
        }
        ReportEvent::StashPopped => {
            runtime.git.stash_count = runtime.git.stash_count.saturating_sub(1);
        }
    }
}

/// Pull the branch inventory (names, merged set, per-branch activity dates).
pub fn gather_branches(
    git: &dyn GitFacts,
    merge_base: &str,
) -> Result<BranchInventory, AipmError> {
    let all = git.all_branches()?;
    let merged = git.merged_branches(merge_base)?;
    let mut details = std::collections::BTreeMap::new();
    for branch in &all {
        details.insert(
            branch.clone(),
            BranchInfo {
                created_at: git.branch_creation_date(branch)?.map(time::to_rfc3339),
                last_commit_at: git.branch_last_commit_date(branch)?.map(time::to_rfc3339),
            },
        );
    }
    Ok(BranchInventory {
        all,
        merged,
        details,
    })
}

/// Pull working-tree status, upstream counts, and stash depth.
pub fn gather_status(git: &dyn GitFacts) -> Result<GitSnapshot, AipmError> {
    let uncommitted = git.uncommitted_count()?;
    let ahead_behind = git.ahead_behind()?;
    Ok(GitSnapshot {
        is_clean: uncommitted == 0,
        uncommitted_count: uncommitted,
        has_staged: git.has_staged()?,
        ahead: ahead_behind.ahead,
        behind: ahead_behind.behind,
        has_upstream: ahead_behind.has_upstream,
        stash_count: git.stash_count()?,
        last_commit: Some(git.branch_commit("HEAD")?),
    })
}

/// Pull every fact. The session is not a git fact and carries over from the
/// previous runtime untouched.
pub fn gather_runtime(
    git: &dyn GitFacts,
    merge_base: &str,
    previous: Option<&Runtime>,
) -> Result<Runtime, AipmError> {
    let mut runtime = Runtime {
        current_branch: git.current_branch()?,
        branches: gather_branches(git, merge_base)?,
        git: gather_status(git)?,
        ..Runtime::default()
    };
    if let Some(prev) = previous {
        runtime.session = prev.session.clone();
        runtime.session_history = prev.session_history.clone();
    }
    Ok(runtime)
}

/// Reconciles the store's runtime section with the repository.
pub struct SyncEngine<'a> {
    store: &'a StateStore,
}

impl<'a> SyncEngine<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        SyncEngine { store }
    }

    /// Pull every GitFacts field into `runtime`, one transaction.
    pub fn full_sync(&self) -> Result<(), AipmError> {
        self.store.ensure_initialized()?;
        let mut tx = self.store.begin("sync.full")?;
        let computed: Computed = tx.doc().section("computed")?;
        let previous = tx.doc().runtime()?;
        let runtime = gather_runtime(
            self.store.git(),
            &computed.default_merge_target,
            Some(&previous),
        )?;
        tx.doc().set_section("runtime", &runtime)?;
        tx.commit()
    }

    /// Pull one named subsection into `runtime`, one transaction.
    pub fn partial_sync(&self, section: &str) -> Result<(), AipmError> {
        if !SYNC_SECTIONS.contains(&section) {
            return Err(AipmError::NotFound(format!(
                "unknown sync section '{section}' (expected one of {SYNC_SECTIONS:?})"
            )));
        }
        self.store.ensure_initialized()?;
        let mut tx = self.store.begin(&format!("sync.{section}"))?;
        let mut runtime = tx.doc().runtime()?;
        match section {
            "branches" => {
                let computed: Computed = tx.doc().section("computed")?;
                runtime.branches =
                    gather_branches(self.store.git(), &computed.default_merge_target)?;
                runtime.current_branch = self.store.git().current_branch()?;
            }
            "status" => {
                runtime.git = gather_status(self.store.git())?;
                runtime.current_branch = self.store.git().current_branch()?;
            }
            // The session has no external source of truth; re-commit as-is
            // so decisions are re-derived against current computed values.
            "session" => {}
            _ => unreachable!("section membership checked above"),
        }
        tx.doc().set_section("runtime", &runtime)?;
        tx.commit()
    }

    /// Push one known git mutation into `runtime` without a poll.
    pub fn report(&self, event: &ReportEvent) -> Result<(), AipmError> {
        self.store.ensure_initialized()?;
        let mut tx = self.store.begin(&format!("report.{}", event.kind()))?;
        let mut runtime = tx.doc().runtime()?;
        apply_event(&mut runtime, event);
        tx.doc().set_section("runtime", &runtime)?;
        tx.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> Runtime {
        Runtime {
            current_branch: "main".to_string(),
            branches: BranchInventory {
                all: vec!["main".to_string()],
                ..BranchInventory::default()
            },
            ..Runtime::default()
        }
    }

    #[test]
    fn test_branch_create_then_delete_restores_inventory() {
        let mut rt = runtime();
        let before = rt.branches.all.clone();

        apply_event(
            &mut rt,
            &ReportEvent::BranchCreated {
                name: "AIPM_feature/x".to_string(),
                base_branch: "main".to_string(),
            },
        );
        assert!(rt.branches.all.contains(&"AIPM_feature/x".to_string()));
        assert_eq!(rt.current_branch, "AIPM_feature/x");

        apply_event(
            &mut rt,
            &ReportEvent::BranchDeleted {
                name: "AIPM_feature/x".to_string(),
            },
        );
        assert_eq!(rt.branches.all, before);
    }

    #[test]
    fn test_commit_created_clears_dirty_state() {
        let mut rt = runtime();
        rt.git.uncommitted_count = 4;
        rt.git.is_clean = false;
        rt.git.has_staged = true;

        apply_event(
            &mut rt,
            &ReportEvent::CommitCreated {
                hash: "abc123".to_string(),
                message: "save".to_string(),
            },
        );
        assert_eq!(rt.git.uncommitted_count, 0);
        assert!(rt.git.is_clean);
        assert!(!rt.git.has_staged);
        assert_eq!(rt.git.last_commit.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_stash_count_saturates_at_zero() {
        let mut rt = runtime();
        apply_event(&mut rt, &ReportEvent::StashPopped);
        assert_eq!(rt.git.stash_count, 0);
        apply_event(&mut rt, &ReportEvent::StashSaved);
        apply_event(&mut rt, &ReportEvent::StashSaved);
        apply_event(&mut rt, &ReportEvent::StashPopped);
        assert_eq!(rt.git.stash_count, 1);
    }

    #[test]
    fn test_apply_event_is_deterministic() {
        let event = ReportEvent::RemoteSynced {
            ahead: 2,
            behind: 1,
        };
        let mut a = runtime();
        let mut b = runtime();
        apply_event(&mut a, &event);
        apply_event(&mut b, &event);
        assert_eq!(a, b);
    }
}
