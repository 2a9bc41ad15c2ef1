//! Pure derivations from the resolved opinions tree.
//!
//! Everything in here is a deterministic function of `rawConfig`: same input,
//! byte-identical serialized output. Containers are `BTreeMap`/`BTreeSet` so
//! recomputation can be compared against the persisted `computed` section
//! verbatim. No I/O, no clock, no git.

use crate::core::opinions::ResolvedOpinions;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Naming rules for one declared branch type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BranchPattern {
    /// User-facing template, e.g. `feature/{description}`.
    pub template: String,
    /// Fully-prefixed form, e.g. `AIPM_feature/{description}`.
    pub full: String,
    /// Shell glob over real branch names, e.g. `AIPM_feature/*`.
    pub glob: String,
    /// Anchored regex matching real branch names of this type.
    pub matcher: String,
}

impl BranchPattern {
    /// Literal part of the prefixed form before the first placeholder; the
    /// specificity measure for tie-breaking.
    pub fn literal_prefix(&self) -> &str {
        match self.full.find('{') {
            Some(idx) => &self.full[..idx],
            None => &self.full,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LifecycleTiming {
    Immediate,
    AfterDays { days: u32 },
    Never,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleTrigger {
    Merge,
    LastCommit,
}

/// Deletion timing for one branch type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRule {
    pub timing: LifecycleTiming,
    pub trigger: LifecycleTrigger,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BranchCreationRule {
    RequireClean,
    AllowDirty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProtectionResponse {
    Block,
    Warn,
    Allow,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowTrigger {
    Auto,
    Prompt,
    Manual,
    OnStart,
    OnMerge,
    Scheduled,
    Never,
}

/// Resolved enum choice per workflow category, plus prompt text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTable {
    pub branch_creation: BranchCreationRule,
    pub protection_response: ProtectionResponse,
    pub merge_trigger: WorkflowTrigger,
    pub sync_trigger: WorkflowTrigger,
    pub cleanup_trigger: WorkflowTrigger,
    #[serde(default)]
    pub prompts: BTreeMap<String, String>,
}

/// The `computed` section: derived, deterministic values produced from
/// `rawConfig` alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Computed {
    pub branch_patterns: BTreeMap<String, BranchPattern>,
    pub protected_branches: BTreeSet<String>,
    pub lifecycle_matrix: BTreeMap<String, LifecycleRule>,
    pub workflows: WorkflowTable,
    pub merge_targets: BTreeMap<String, String>,
    pub default_merge_target: String,
}

/// Branch naming patterns for every declared type.
pub fn branch_patterns(opinions: &ResolvedOpinions) -> BTreeMap<String, BranchPattern> {
    let prefix = opinions.prefix();
    opinions
        .branch_types()
        .iter()
        .map(|(name, cfg)| {
            let full = format!("{}{}", prefix, cfg.template);
            (
                name.clone(),
                BranchPattern {
                    template: cfg.template.clone(),
                    glob: template_to_glob(&full),
                    matcher: template_to_regex(&full),
                    full,
                },
            )
        })
        .collect()
}

/// Union of explicitly listed user branches and the prefixed main/reserved
/// branch names.
pub fn protected_branches(opinions: &ResolvedOpinions) -> BTreeSet<String> {
    let prefix = opinions.prefix();
    let main = opinions.main_branch();
    let mut protected: BTreeSet<String> =
        opinions.protected_user_branches().into_iter().collect();
    protected.insert(main.clone());
    protected.insert(format!("{prefix}{main}"));
    for reserved in opinions.reserved_branches() {
        protected.insert(format!("{prefix}{reserved}"));
    }
    protected
}

/// Per-branch-type deletion timing and triggering event.
pub fn lifecycle_matrix(opinions: &ResolvedOpinions) -> BTreeMap<String, LifecycleRule> {
    opinions
        .branch_types()
        .iter()
        .map(|(name, cfg)| {
            let timing = match cfg.lifecycle.as_str() {
                "immediate" => LifecycleTiming::Immediate,
                "scheduled" => LifecycleTiming::AfterDays {
                    days: cfg.retention_days.unwrap_or(7),
                },
                _ => LifecycleTiming::Never,
            };
            let trigger = match cfg.trigger.as_str() {
                "last-commit" => LifecycleTrigger::LastCommit,
                _ => LifecycleTrigger::Merge,
            };
            (name.clone(), LifecycleRule { timing, trigger })
        })
        .collect()
}

/// Resolved workflow choices. Input enums were validated at load time, so
/// every match arm here is total over valid input.
pub fn workflow_rules(opinions: &ResolvedOpinions) -> WorkflowTable {
    let branch_creation = match opinions.workflow_choice("branch_creation").as_str() {
        "allow-dirty" => BranchCreationRule::AllowDirty,
        _ => BranchCreationRule::RequireClean,
    };
    let protection_response = match opinions.workflow_choice("protection_response").as_str() {
        "warn" => ProtectionResponse::Warn,
        "allow" => ProtectionResponse::Allow,
        _ => ProtectionResponse::Block,
    };
    WorkflowTable {
        branch_creation,
        protection_response,
        merge_trigger: parse_trigger(&opinions.workflow_choice("merge_trigger")),
        sync_trigger: parse_trigger(&opinions.workflow_choice("sync_trigger")),
        cleanup_trigger: parse_trigger(&opinions.workflow_choice("cleanup_trigger")),
        prompts: opinions.workflow_prompts(),
    }
}

fn parse_trigger(value: &str) -> WorkflowTrigger {
    match value {
        "auto" => WorkflowTrigger::Auto,
        "prompt" => WorkflowTrigger::Prompt,
        "on-start" => WorkflowTrigger::OnStart,
        "on-merge" => WorkflowTrigger::OnMerge,
        "scheduled" => WorkflowTrigger::Scheduled,
        "never" => WorkflowTrigger::Never,
        _ => WorkflowTrigger::Manual,
    }
}

/// Derive the whole `computed` section.
pub fn derive(opinions: &ResolvedOpinions) -> Computed {
    let merge_targets = opinions
        .branch_types()
        .iter()
        .filter_map(|(name, cfg)| cfg.merge_into.clone().map(|t| (name.clone(), t)))
        .collect();
    Computed {
        branch_patterns: branch_patterns(opinions),
        protected_branches: protected_branches(opinions),
        lifecycle_matrix: lifecycle_matrix(opinions),
        workflows: workflow_rules(opinions),
        merge_targets,
        default_merge_target: opinions.default_merge_target(),
    }
}

/// Resolve a real branch name to its declared type.
///
/// When a name matches several type patterns, the most specific pattern
/// (longest literal prefix) wins; remaining ties resolve by declaration
/// order of the resolved tree.
pub fn match_branch_type<'a>(computed: &'a Computed, branch: &str) -> Option<&'a str> {
    let mut candidates: Vec<(&str, usize)> = computed
        .branch_patterns
        .iter()
        .filter(|(_, pattern)| {
            regex::Regex::new(&pattern.matcher)
                .map(|re| re.is_match(branch))
                .unwrap_or(false)
        })
        .map(|(name, pattern)| (name.as_str(), pattern.literal_prefix().len()))
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    candidates.first().map(|(name, _)| *name)
}

fn template_to_glob(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut rest = full;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        out.push('*');
        match rest[open..].find('}') {
            Some(close) => rest = &rest[open + close + 1..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn template_to_regex(full: &str) -> String {
    let mut out = String::from("^");
    let mut rest = full;
    while let Some(open) = rest.find('{') {
        out.push_str(&regex::escape(&rest[..open]));
        out.push_str(".+");
        match rest[open..].find('}') {
            Some(close) => rest = &rest[open + close + 1..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(&regex::escape(rest));
    out.push('$');
    out
}
