mod common;

use aipm::core::decide;
use aipm::core::error::AipmError;
use aipm::core::time;
use common::{workspace, workspace_with_opinions};
use serde_json::json;

#[test]
fn initialize_builds_all_sections() {
    let (_dir, _git, store) = workspace();
    store.initialize().expect("initialize");

    assert_eq!(store.get("metadata.version").expect("version"), json!("2"));
    assert_eq!(
        store.get("rawConfig.branching.prefix").expect("prefix"),
        json!("AIPM_")
    );
    assert_eq!(
        store
            .get("computed.branchPatterns.feature.glob")
            .expect("glob"),
        json!("AIPM_feature/*")
    );
    assert_eq!(
        store.get("runtime.currentBranch").expect("branch"),
        json!("main")
    );
    assert_eq!(
        store.get("decisions.canCreateBranch").expect("decision"),
        json!(true)
    );
    let hash = store.get("metadata.configHash").expect("hash");
    assert_eq!(hash.as_str().map(str::len), Some(64));
}

#[test]
fn initialize_honors_explicit_opinions() {
    let (_dir, _git, store) = workspace_with_opinions(
        r#"
[branching]
prefix = "TEAM_"
main = "trunk"
default_merge_target = "trunk"

[memory]
entity_prefix = "TEAM_"

[workflows]
branch_creation = "allow-dirty"
"#,
    );
    store.initialize().expect("initialize");

    assert_eq!(
        store
            .get("computed.branchPatterns.feature.glob")
            .expect("glob"),
        json!("TEAM_feature/*")
    );
    assert_eq!(
        store.get("decisions.mergeTarget").expect("target"),
        json!("trunk")
    );
    // allow-dirty: a dirty tree no longer blocks creation.
    assert_eq!(
        store
            .get("computed.workflows.branchCreation")
            .expect("rule"),
        json!("allow-dirty")
    );
}

#[test]
fn get_missing_path_is_not_found() {
    let (_dir, _git, store) = workspace();
    store.initialize().expect("initialize");
    let err = store.get("runtime.no.such.path").unwrap_err();
    assert!(matches!(err, AipmError::NotFound(_)));
}

#[test]
fn update_persists_and_stamps_metadata() {
    let (_dir, _git, store) = workspace();
    store.initialize().expect("initialize");

    store
        .update("runtime.git.stashCount", json!(5))
        .expect("update");
    assert_eq!(store.get("runtime.git.stashCount").expect("get"), json!(5));
    assert_eq!(
        store.get("metadata.lastOperation").expect("op"),
        json!("state.update")
    );
}

#[test]
fn update_batch_is_all_or_nothing() {
    let (_dir, _git, store) = workspace();
    store.initialize().expect("initialize");
    let before = std::fs::read_to_string(store.state_path()).expect("read state");

    let err = store
        .update_batch(&[
            ("runtime.git.ahead".to_string(), json!(2)),
            ("runtime..bad".to_string(), json!(1)),
        ])
        .unwrap_err();
    assert!(matches!(err, AipmError::TransactionError(_)));

    let after = std::fs::read_to_string(store.state_path()).expect("read state");
    assert_eq!(before, after);
    assert_eq!(store.get("runtime.git.ahead").expect("ahead"), json!(0));
}

#[test]
fn update_batch_applies_every_value() {
    let (_dir, _git, store) = workspace();
    store.initialize().expect("initialize");

    store
        .update_batch(&[
            ("runtime.git.ahead".to_string(), json!(2)),
            ("runtime.git.behind".to_string(), json!(1)),
        ])
        .expect("batch");
    assert_eq!(store.get("runtime.git.ahead").expect("ahead"), json!(2));
    assert_eq!(store.get("runtime.git.behind").expect("behind"), json!(1));
}

#[test]
fn session_refresh_reevaluates_decisions_in_place() {
    let (_dir, _git, store) = workspace();
    store.initialize().expect("initialize");
    let before = store.get("runtime").expect("runtime");
    store.refresh("session").expect("refresh session");
    assert_eq!(store.get("runtime").expect("runtime"), before);
    assert_eq!(
        store.get("metadata.lastOperation").expect("op"),
        json!("sync.session")
    );
}

#[test]
fn unknown_refresh_scope_is_rejected() {
    let (_dir, _git, store) = workspace();
    store.initialize().expect("initialize");
    let err = store.refresh("everything").unwrap_err();
    assert!(matches!(err, AipmError::NotFound(_)));
}

#[test]
fn mutations_require_initialization() {
    let (_dir, _git, store) = workspace();
    let err = store.update("runtime.git.ahead", json!(1)).unwrap_err();
    assert!(matches!(err, AipmError::NotFound(_)));
}

#[test]
fn dirty_tree_refresh_blocks_branch_creation() {
    let (_dir, git, store) = workspace();
    store.initialize().expect("initialize");
    assert_eq!(
        store.get("decisions.canCreateBranch").expect("decision"),
        json!(true)
    );

    git.with(|s| s.uncommitted = 3);
    store.refresh("runtime").expect("refresh");

    assert_eq!(
        store.get("runtime.git.uncommittedCount").expect("count"),
        json!(3)
    );
    assert_eq!(
        store.get("decisions.canCreateBranch").expect("decision"),
        json!(false)
    );
    assert!(
        store
            .get("decisions.branchCreationBlockedBy")
            .expect("reason")
            .is_string()
    );
}

#[test]
fn stored_decisions_match_recomputation_after_commit() {
    let (_dir, git, store) = workspace();
    store.initialize().expect("initialize");

    git.with(|s| {
        s.uncommitted = 1;
        s.branches.push("AIPM_fix/typo".to_string());
        s.merged.push("AIPM_fix/typo".to_string());
    });
    store.refresh("runtime").expect("refresh");

    let doc = store.load().expect("load");
    let computed = doc.section("computed").expect("computed");
    let runtime = doc.runtime().expect("runtime");
    let recomputed = decide::evaluate(&computed, &runtime, time::now());
    let stored: aipm::core::decide::Decisions = doc.section("decisions").expect("decisions");
    assert_eq!(stored, recomputed);
    assert!(stored.cleanup_candidates.contains(&"AIPM_fix/typo".to_string()));
}

#[test]
fn refresh_status_updates_only_git_facts() {
    let (_dir, git, store) = workspace();
    store.initialize().expect("initialize");

    git.with(|s| {
        s.uncommitted = 2;
        s.branches.push("AIPM_feature/extra".to_string());
    });
    store.refresh("status").expect("refresh status");

    assert_eq!(
        store.get("runtime.git.uncommittedCount").expect("count"),
        json!(2)
    );
    // The branch inventory was out of scope for this refresh.
    let all = store.get("runtime.branches.all").expect("branches");
    assert_eq!(all, json!(["main"]));

    store.refresh("branches").expect("refresh branches");
    let all = store.get("runtime.branches.all").expect("branches");
    assert_eq!(all, json!(["main", "AIPM_feature/extra"]));
}

#[test]
fn failed_git_facts_keep_previous_runtime() {
    let (_dir, git, store) = workspace();
    store.initialize().expect("initialize");
    let before = std::fs::read_to_string(store.state_path()).expect("read state");

    git.with(|s| s.fail = true);
    let err = store.refresh("runtime").unwrap_err();
    assert!(matches!(err, AipmError::ExternalFactError(_)));

    let after = std::fs::read_to_string(store.state_path()).expect("read state");
    assert_eq!(before, after);
}
