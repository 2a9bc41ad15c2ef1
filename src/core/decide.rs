//! Operational decisions derived from `computed` + `runtime`.
//!
//! One pure function per decision category, composed by `evaluate`. The
//! stored `decisions` section must always equal a fresh `evaluate` over the
//! document's own `computed` and `runtime`; transactions re-run it whenever
//! either input changes.

use crate::core::compute::{
    self, BranchCreationRule, Computed, LifecycleTiming, LifecycleTrigger,
};
use crate::core::document::{Runtime, StateDocument};
use crate::core::error::AipmError;
use crate::core::time;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The `decisions` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Decisions {
    pub can_create_branch: bool,
    #[serde(default)]
    pub branch_creation_blocked_by: Option<String>,
    pub merge_target: String,
    pub on_protected_branch: bool,
    pub cleanup_candidates: Vec<String>,
}

/// Whether a new branch may be created right now, with the blocking reason
/// when it may not.
pub fn can_create_branch(computed: &Computed, runtime: &Runtime) -> (bool, Option<String>) {
    if computed.workflows.branch_creation == BranchCreationRule::RequireClean
        && !runtime.git.is_clean
    {
        let reason = computed
            .workflows
            .prompts
            .get("branch_creation")
            .cloned()
            .unwrap_or_else(|| "working tree is not clean".to_string());
        return (false, Some(reason));
    }
    (true, None)
}

/// Merge target for the current branch: per-type target when the branch
/// matches a declared pattern, else the configured default.
pub fn merge_target(computed: &Computed, runtime: &Runtime) -> String {
    compute::match_branch_type(computed, &runtime.current_branch)
        .and_then(|ty| computed.merge_targets.get(ty))
        .cloned()
        .unwrap_or_else(|| computed.default_merge_target.clone())
}

/// Branches whose lifecycle rule says they are due for deletion, given the
/// current time and each branch's last-activity timestamp. Protected
/// branches and the current branch are never candidates.
pub fn cleanup_candidates(
    computed: &Computed,
    runtime: &Runtime,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut candidates = Vec::new();
    for branch in &runtime.branches.all {
        if branch == &runtime.current_branch || computed.protected_branches.contains(branch) {
            continue;
        }
        let Some(ty) = compute::match_branch_type(computed, branch) else {
            continue;
        };
        let Some(rule) = computed.lifecycle_matrix.get(ty) else {
            continue;
        };
        let trigger_met = match rule.trigger {
            LifecycleTrigger::Merge => runtime.branches.merged.contains(branch),
            LifecycleTrigger::LastCommit => true,
        };
        if !trigger_met {
            continue;
        }
        let due = match rule.timing {
            LifecycleTiming::Immediate => true,
            LifecycleTiming::AfterDays { days } => last_activity(runtime, branch)
                .map(|at| at + Duration::days(i64::from(days)) <= now)
                .unwrap_or(false),
            LifecycleTiming::Never => false,
        };
        if due {
            candidates.push(branch.clone());
        }
    }
    candidates
}

fn last_activity(runtime: &Runtime, branch: &str) -> Option<DateTime<Utc>> {
    let info = runtime.branches.details.get(branch)?;
    let raw = info.last_commit_at.as_ref().or(info.created_at.as_ref())?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Thin orchestrator over the per-category functions.
pub fn evaluate(computed: &Computed, runtime: &Runtime, now: DateTime<Utc>) -> Decisions {
    let (can_create, blocked_by) = can_create_branch(computed, runtime);
    Decisions {
        can_create_branch: can_create,
        branch_creation_blocked_by: blocked_by,
        merge_target: merge_target(computed, runtime),
        on_protected_branch: computed
            .protected_branches
            .contains(&runtime.current_branch),
        cleanup_candidates: cleanup_candidates(computed, runtime, now),
    }
}

/// Re-derive the `decisions` section from the document's own `computed` and
/// `runtime` and write it back.
pub fn refresh_decisions(doc: &mut StateDocument) -> Result<(), AipmError> {
    let computed: Computed = doc.section("computed")?;
    let runtime = doc.runtime()?;
    let decisions = evaluate(&computed, &runtime, time::now());
    doc.set_section("decisions", &decisions)
}
