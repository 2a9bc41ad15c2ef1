//! Opinions loading: the layered, validated configuration source.
//!
//! Resolution is a deep merge of the explicit document (`.aipm/opinions.toml`,
//! optional) over the compiled-in defaults; explicit values always win.
//! Core logic never mutates the resolved tree — it is replaced wholesale on
//! reload.

use crate::core::document;
use crate::core::error::AipmError;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Compiled-in defaults for every recognized key.
pub const DEFAULT_OPINIONS: &str = include_str!("../../opinions/defaults.toml");

const ON_ERROR_VALUES: &[&str] = &["fail", "warn", "use-defaults"];
const LIFECYCLE_VALUES: &[&str] = &["immediate", "scheduled", "never"];
const TRIGGER_VALUES: &[&str] = &["merge", "last-commit"];
const WORKFLOW_ENUMS: &[(&str, &[&str])] = &[
    ("workflows.branch_creation", &["require-clean", "allow-dirty"]),
    ("workflows.protection_response", &["block", "warn", "allow"]),
    ("workflows.merge_trigger", &["auto", "prompt", "manual"]),
    ("workflows.sync_trigger", &["on-start", "manual", "never"]),
    ("workflows.cleanup_trigger", &["on-merge", "scheduled", "manual"]),
];
const BOOL_FIELDS: &[&str] = &["branching.allow_custom_types"];
const NUMBER_FIELDS: &[&str] = &["state.lock_timeout_secs"];

/// Behavior when the explicit document fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnErrorPolicy {
    Fail,
    Warn,
    UseDefaults,
}

impl OnErrorPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "fail" => Some(OnErrorPolicy::Fail),
            "warn" => Some(OnErrorPolicy::Warn),
            "use-defaults" => Some(OnErrorPolicy::UseDefaults),
            _ => None,
        }
    }
}

/// A single load-time validation finding.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Dotted path of the offending field (or a `a / b` pair for cross-field rules).
    pub field: String,
    pub message: String,
    /// Paths to reset to their default values when policy allows recovery.
    /// Empty means the finding has no default to fall back to.
    substitute: Vec<String>,
}

impl ValidationIssue {
    fn new(field: &str, message: String) -> Self {
        ValidationIssue {
            field: field.to_string(),
            message,
            substitute: vec![field.to_string()],
        }
    }

    fn cross(fields: &[&str], message: String) -> Self {
        ValidationIssue {
            field: fields.join(" / "),
            message,
            substitute: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn unrecoverable(field: &str, message: String) -> Self {
        ValidationIssue {
            field: field.to_string(),
            message,
            substitute: vec![],
        }
    }

    fn render(&self) -> String {
        format!("{}: {}", self.field, self.message)
    }
}

/// Per-branch-type declaration from the opinions document.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchTypeConfig {
    pub template: String,
    #[serde(default)]
    pub merge_into: Option<String>,
    #[serde(default = "default_lifecycle")]
    pub lifecycle: String,
    #[serde(default)]
    pub retention_days: Option<u32>,
    #[serde(default = "default_trigger")]
    pub trigger: String,
}

fn default_lifecycle() -> String {
    "never".to_string()
}

fn default_trigger() -> String {
    "merge".to_string()
}

/// The fully-resolved opinions tree (explicit document over defaults).
///
/// Immutable once loaded; the derivation functions in `compute` consume it
/// through the typed accessors below.
#[derive(Debug, Clone)]
pub struct ResolvedOpinions {
    tree: JsonValue,
}

impl ResolvedOpinions {
    /// Load and resolve opinions. `path` is the explicit document; a missing
    /// file is not an error (pure defaults apply).
    pub fn load(path: Option<&Path>) -> Result<Self, AipmError> {
        let defaults: toml::Value = toml::from_str(DEFAULT_OPINIONS)
            .map_err(|e| AipmError::ConfigError(format!("built-in defaults are invalid: {e}")))?;

        let merged = match path {
            Some(p) if p.exists() => {
                let content = fs::read_to_string(p)?;
                let explicit: toml::Value = toml::from_str(&content)?;
                deep_merge(&defaults, &explicit)
            }
            _ => defaults.clone(),
        };

        let mut tree = toml_to_json(&merged);
        let default_tree = toml_to_json(&defaults);

        let issues = validate_tree(&tree);
        if !issues.is_empty() {
            let policy = on_error_policy(&tree);
            match policy {
                OnErrorPolicy::Fail => {
                    return Err(AipmError::ValidationError(
                        issues.iter().map(ValidationIssue::render).collect(),
                    ));
                }
                OnErrorPolicy::Warn | OnErrorPolicy::UseDefaults => {
                    let mut unrecoverable = Vec::new();
                    for issue in &issues {
                        if policy == OnErrorPolicy::Warn {
                            eprintln!("warning: opinions: {}", issue.render());
                        }
                        if issue.substitute.is_empty() {
                            unrecoverable.push(issue.render());
                            continue;
                        }
                        for field in &issue.substitute {
                            match document::json_get(&default_tree, field) {
                                Some(v) => {
                                    document::json_set(&mut tree, field, v.clone()).map_err(
                                        |e| AipmError::ConfigError(format!("{field}: {e}")),
                                    )?;
                                }
                                None => document::json_remove(&mut tree, field),
                            }
                        }
                    }
                    if !unrecoverable.is_empty() {
                        return Err(AipmError::ValidationError(unrecoverable));
                    }
                }
            }
            // Substituted values must themselves validate.
            let residual = validate_tree(&tree);
            if !residual.is_empty() {
                return Err(AipmError::ValidationError(
                    residual.iter().map(ValidationIssue::render).collect(),
                ));
            }
        }

        Ok(ResolvedOpinions { tree })
    }

    /// Wrap an already-resolved tree (the `rawConfig` section of a persisted
    /// document). No validation is re-run: the tree was validated at load.
    pub fn from_resolved(tree: JsonValue) -> Self {
        ResolvedOpinions { tree }
    }

    pub fn raw(&self) -> &JsonValue {
        &self.tree
    }

    /// Stable digest over the resolved tree, used for change detection.
    /// `serde_json` objects serialize with sorted keys, so the serialization
    /// is canonical.
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_string(&self.tree).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Render the resolved tree back out as a TOML document.
    pub fn to_toml_string(&self) -> Result<String, AipmError> {
        let value = json_to_toml(&self.tree)
            .ok_or_else(|| AipmError::ConfigError("resolved tree is not a table".into()))?;
        toml::to_string_pretty(&value)
            .map_err(|e| AipmError::ConfigError(format!("serialize opinions: {e}")))
    }

    fn str_at(&self, path: &str) -> String {
        document::json_get(&self.tree, path)
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn list_at(&self, path: &str) -> Vec<String> {
        document::json_get(&self.tree, path)
            .and_then(JsonValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn prefix(&self) -> String {
        self.str_at("branching.prefix")
    }

    pub fn main_branch(&self) -> String {
        self.str_at("branching.main")
    }

    pub fn reserved_branches(&self) -> Vec<String> {
        self.list_at("branching.reserved")
    }

    pub fn protected_user_branches(&self) -> Vec<String> {
        self.list_at("branching.protected")
    }

    pub fn default_merge_target(&self) -> String {
        self.str_at("branching.default_merge_target")
    }

    pub fn workflow_choice(&self, category: &str) -> String {
        self.str_at(&format!("workflows.{category}"))
    }

    pub fn workflow_prompts(&self) -> BTreeMap<String, String> {
        document::json_get(&self.tree, "workflows.prompts")
            .and_then(JsonValue::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn branch_types(&self) -> BTreeMap<String, BranchTypeConfig> {
        document::json_get(&self.tree, "branching.types")
            .and_then(JsonValue::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(name, v)| {
                        serde_json::from_value::<BranchTypeConfig>(v.clone())
                            .ok()
                            .map(|c| (name.clone(), c))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn lock_timeout(&self) -> Duration {
        let secs = document::json_get(&self.tree, "state.lock_timeout_secs")
            .and_then(JsonValue::as_u64)
            .unwrap_or(30);
        Duration::from_secs(secs)
    }
}

fn on_error_policy(tree: &JsonValue) -> OnErrorPolicy {
    document::json_get(tree, "validation.on_error")
        .and_then(JsonValue::as_str)
        .and_then(OnErrorPolicy::parse)
        .unwrap_or(OnErrorPolicy::Fail)
}

/// Run every load-time rule over the resolved tree.
fn validate_tree(tree: &JsonValue) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    check_enum(tree, "validation.on_error", ON_ERROR_VALUES, &mut issues);
    for (path, allowed) in WORKFLOW_ENUMS {
        check_enum(tree, path, allowed, &mut issues);
    }

    for path in BOOL_FIELDS {
        if let Some(v) = document::json_get(tree, path)
            && !v.is_boolean()
        {
            issues.push(ValidationIssue::new(
                path,
                format!("expected a boolean, got {v}"),
            ));
        }
    }
    for path in NUMBER_FIELDS {
        if let Some(v) = document::json_get(tree, path)
            && !v.is_number()
        {
            issues.push(ValidationIssue::new(
                path,
                format!("expected a number, got {v}"),
            ));
        }
    }

    validate_branch_types(tree, &mut issues);
    validate_prefix_rules(tree, &mut issues);
    validate_required_sections(tree, &mut issues);

    issues
}

fn check_enum(tree: &JsonValue, path: &str, allowed: &[&str], issues: &mut Vec<ValidationIssue>) {
    let Some(v) = document::json_get(tree, path) else {
        return;
    };
    match v.as_str() {
        Some(s) if allowed.contains(&s) => {}
        Some(s) => issues.push(ValidationIssue::new(
            path,
            format!("value '{}' is not one of {:?}", s, allowed),
        )),
        None => issues.push(ValidationIssue::new(
            path,
            format!("expected one of {:?}, got {}", allowed, v),
        )),
    }
}

fn validate_branch_types(tree: &JsonValue, issues: &mut Vec<ValidationIssue>) {
    let Some(types) = document::json_get(tree, "branching.types").and_then(JsonValue::as_object)
    else {
        return;
    };
    for (name, v) in types {
        let base = format!("branching.types.{name}");
        let Some(obj) = v.as_object() else {
            issues.push(ValidationIssue::unrecoverable(
                &base,
                "expected a table".into(),
            ));
            continue;
        };
        if !obj.get("template").is_some_and(JsonValue::is_string) {
            issues.push(ValidationIssue::unrecoverable(
                &format!("{base}.template"),
                "branch type must declare a string template".into(),
            ));
        }
        if let Some(lc) = obj.get("lifecycle") {
            match lc.as_str() {
                Some(s) if LIFECYCLE_VALUES.contains(&s) => {
                    if s == "scheduled" && !obj.get("retention_days").is_some_and(JsonValue::is_u64)
                    {
                        issues.push(ValidationIssue::unrecoverable(
                            &format!("{base}.retention_days"),
                            "scheduled lifecycle requires a numeric retention_days".into(),
                        ));
                    }
                }
                _ => issues.push(ValidationIssue::unrecoverable(
                    &format!("{base}.lifecycle"),
                    format!("value {} is not one of {:?}", lc, LIFECYCLE_VALUES),
                )),
            }
        }
        if let Some(tr) = obj.get("trigger")
            && !tr.as_str().is_some_and(|s| TRIGGER_VALUES.contains(&s))
        {
            issues.push(ValidationIssue::unrecoverable(
                &format!("{base}.trigger"),
                format!("value {} is not one of {:?}", tr, TRIGGER_VALUES),
            ));
        }
    }
}

fn validate_prefix_rules(tree: &JsonValue, issues: &mut Vec<ValidationIssue>) {
    let prefix = document::json_get(tree, "branching.prefix").and_then(JsonValue::as_str);
    let entity = document::json_get(tree, "memory.entity_prefix").and_then(JsonValue::as_str);

    if let (Some(prefix), Some(entity)) = (prefix, entity)
        && prefix != entity
    {
        issues.push(ValidationIssue::cross(
            &["branching.prefix", "memory.entity_prefix"],
            format!(
                "branch prefix '{}' must equal entity prefix '{}'",
                prefix, entity
            ),
        ));
    }

    let Some(prefix) = prefix else { return };

    if let Some(pattern) = document::json_get(tree, "branching.prefix_pattern")
        .and_then(JsonValue::as_str)
    {
        match Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(prefix) {
                    issues.push(ValidationIssue::new(
                        "branching.prefix",
                        format!("value '{}' does not match pattern '{}'", prefix, pattern),
                    ));
                }
            }
            Err(e) => issues.push(ValidationIssue::new(
                "branching.prefix_pattern",
                format!("invalid pattern: {e}"),
            )),
        }
    }

    let reserved = document::json_get(tree, "branching.reserved_prefixes")
        .and_then(JsonValue::as_array)
        .map(|a| {
            a.iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if reserved.iter().any(|r| r == prefix) {
        issues.push(ValidationIssue::new(
            "branching.prefix",
            format!("value '{}' collides with a reserved prefix", prefix),
        ));
    }
}

fn validate_required_sections(tree: &JsonValue, issues: &mut Vec<ValidationIssue>) {
    let Some(required) = document::json_get(tree, "requires").and_then(JsonValue::as_array) else {
        return;
    };
    for section in required.iter().filter_map(JsonValue::as_str) {
        if !document::json_get(tree, section).is_some_and(JsonValue::is_object) {
            issues.push(ValidationIssue::unrecoverable(
                section,
                "required section is missing".into(),
            ));
        }
    }
}

/// Recursive merge: tables merge key-by-key, everything else the explicit
/// value wins.
fn deep_merge(defaults: &toml::Value, explicit: &toml::Value) -> toml::Value {
    match (defaults, explicit) {
        (toml::Value::Table(d), toml::Value::Table(e)) => {
            let mut out = d.clone();
            for (k, ev) in e {
                let merged = match d.get(k) {
                    Some(dv) => deep_merge(dv, ev),
                    None => ev.clone(),
                };
                out.insert(k.clone(), merged);
            }
            toml::Value::Table(out)
        }
        _ => explicit.clone(),
    }
}

fn toml_to_json(value: &toml::Value) -> JsonValue {
    match value {
        toml::Value::String(s) => JsonValue::String(s.clone()),
        toml::Value::Integer(i) => JsonValue::from(*i),
        toml::Value::Float(f) => {
            serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number)
        }
        toml::Value::Boolean(b) => JsonValue::Bool(*b),
        toml::Value::Datetime(dt) => JsonValue::String(dt.to_string()),
        toml::Value::Array(items) => JsonValue::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => JsonValue::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}

fn json_to_toml(value: &JsonValue) -> Option<toml::Value> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(b) => Some(toml::Value::Boolean(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(toml::Value::Integer(i))
            } else {
                n.as_f64().map(toml::Value::Float)
            }
        }
        JsonValue::String(s) => Some(toml::Value::String(s.clone())),
        JsonValue::Array(items) => Some(toml::Value::Array(
            items.iter().filter_map(json_to_toml).collect(),
        )),
        JsonValue::Object(map) => Some(toml::Value::Table(
            map.iter()
                .filter_map(|(k, v)| json_to_toml(v).map(|tv| (k.clone(), tv)))
                .collect(),
        )),
    }
}
