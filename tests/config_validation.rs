use aipm::core::error::AipmError;
use aipm::core::opinions::ResolvedOpinions;
use tempfile::TempDir;

fn write_opinions(content: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("opinions.toml");
    std::fs::write(&path, content).expect("write opinions");
    (dir, path)
}

#[test]
fn mismatched_prefixes_fail_naming_both_fields() {
    let (_dir, path) = write_opinions(
        r#"
[branching]
prefix = "AIPM_"

[memory]
entity_prefix = "TEAM_"
"#,
    );
    let err = ResolvedOpinions::load(Some(&path)).unwrap_err();
    let AipmError::ValidationError(issues) = err else {
        panic!("expected validation error, got {err}");
    };
    let joined = issues.join("\n");
    assert!(joined.contains("branching.prefix"), "{joined}");
    assert!(joined.contains("memory.entity_prefix"), "{joined}");
    assert!(joined.contains("AIPM_"), "{joined}");
    assert!(joined.contains("TEAM_"), "{joined}");
}

#[test]
fn enum_violation_names_field_value_and_allowed_set() {
    let (_dir, path) = write_opinions(
        r#"
[workflows]
merge_trigger = "psychic"
"#,
    );
    let err = ResolvedOpinions::load(Some(&path)).unwrap_err();
    let AipmError::ValidationError(issues) = err else {
        panic!("expected validation error, got {err}");
    };
    let joined = issues.join("\n");
    assert!(joined.contains("workflows.merge_trigger"), "{joined}");
    assert!(joined.contains("psychic"), "{joined}");
    assert!(joined.contains("auto"), "{joined}");
    assert!(joined.contains("manual"), "{joined}");
}

#[test]
fn boolean_field_must_be_boolean() {
    let (_dir, path) = write_opinions(
        r#"
[branching]
allow_custom_types = "yes"
"#,
    );
    let err = ResolvedOpinions::load(Some(&path)).unwrap_err();
    assert!(matches!(err, AipmError::ValidationError(_)));
}

#[test]
fn prefix_must_match_declared_pattern() {
    let (_dir, path) = write_opinions(
        r#"
[branching]
prefix = "lowercase_"

[memory]
entity_prefix = "lowercase_"
"#,
    );
    let err = ResolvedOpinions::load(Some(&path)).unwrap_err();
    let AipmError::ValidationError(issues) = err else {
        panic!("expected validation error, got {err}");
    };
    assert!(issues.iter().any(|i| i.contains("does not match pattern")));
}

#[test]
fn prefix_must_not_collide_with_reserved_prefixes() {
    let (_dir, path) = write_opinions(
        r#"
[branching]
prefix = "GIT_"

[memory]
entity_prefix = "GIT_"
"#,
    );
    let err = ResolvedOpinions::load(Some(&path)).unwrap_err();
    let AipmError::ValidationError(issues) = err else {
        panic!("expected validation error, got {err}");
    };
    assert!(issues.iter().any(|i| i.contains("reserved prefix")));
}

#[test]
fn warn_policy_substitutes_defaults_for_offending_fields() {
    let (_dir, path) = write_opinions(
        r#"
[validation]
on_error = "warn"

[workflows]
cleanup_trigger = "eventually"
"#,
    );
    let opinions = ResolvedOpinions::load(Some(&path)).expect("warn policy recovers");
    assert_eq!(opinions.workflow_choice("cleanup_trigger"), "on-merge");
}

#[test]
fn use_defaults_policy_recovers_silently() {
    let (_dir, path) = write_opinions(
        r#"
[validation]
on_error = "use-defaults"

[branching]
prefix = "bad prefix"
"#,
    );
    let opinions = ResolvedOpinions::load(Some(&path)).expect("use-defaults recovers");
    assert_eq!(opinions.prefix(), "AIPM_");
}

#[test]
fn missing_required_section_is_unrecoverable() {
    let (_dir, path) = write_opinions(
        r#"
requires = ["branching", "workflows", "ledger"]

[validation]
on_error = "use-defaults"
"#,
    );
    let err = ResolvedOpinions::load(Some(&path)).unwrap_err();
    let AipmError::ValidationError(issues) = err else {
        panic!("expected validation error, got {err}");
    };
    assert!(issues.iter().any(|i| i.contains("ledger")));
}

#[test]
fn unknown_top_level_sections_are_permitted() {
    let (_dir, path) = write_opinions(
        r#"
[experimental]
anything = "goes"
"#,
    );
    let opinions = ResolvedOpinions::load(Some(&path)).expect("unknown sections permitted");
    assert_eq!(opinions.prefix(), "AIPM_");
}

#[test]
fn explicit_values_win_over_defaults() {
    let (_dir, path) = write_opinions(
        r#"
[branching]
prefix = "WORK_"
main = "trunk"

[memory]
entity_prefix = "WORK_"
"#,
    );
    let opinions = ResolvedOpinions::load(Some(&path)).expect("load");
    assert_eq!(opinions.prefix(), "WORK_");
    assert_eq!(opinions.main_branch(), "trunk");
    // Untouched defaults survive the merge.
    assert!(opinions.branch_types().contains_key("feature"));
}

#[test]
fn resolved_tree_round_trips_through_serialization() {
    let (_dir, path) = write_opinions(
        r#"
[branching]
prefix = "WORK_"

[memory]
entity_prefix = "WORK_"

[branching.types.spike]
template = "spike/{topic}"
lifecycle = "immediate"
trigger = "last-commit"
"#,
    );
    let first = ResolvedOpinions::load(Some(&path)).expect("first load");

    let round_dir = TempDir::new().expect("tempdir");
    let round_path = round_dir.path().join("opinions.toml");
    std::fs::write(&round_path, first.to_toml_string().expect("serialize")).expect("write");

    let second = ResolvedOpinions::load(Some(&round_path)).expect("second load");
    assert_eq!(first.raw(), second.raw());
    assert_eq!(first.content_hash(), second.content_hash());
}

#[test]
fn content_hash_tracks_config_changes() {
    let (_dir, path) = write_opinions("[branching]\nmain = \"trunk\"\n");
    let defaults = ResolvedOpinions::load(None).expect("defaults");
    let custom = ResolvedOpinions::load(Some(&path)).expect("custom");
    assert_ne!(defaults.content_hash(), custom.content_hash());
}
