//! The persisted state document.
//!
//! One JSON artifact per workspace with five sections: `metadata`,
//! `rawConfig`, `computed`, `runtime`, `decisions`. The document is only
//! ever swapped whole (write to temp, atomic rename), so lockless readers
//! observe either the pre- or post-transaction value, never a torn write.
//!
//! All navigation is by dotted path over a typed JSON tree. Paths are data,
//! not identifiers: there is no dynamic name construction anywhere.

use crate::core::error::AipmError;
use crate::core::session::SessionDescriptor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use ulid::Ulid;

/// Schema version of the persisted document. A mismatch on load is fatal:
/// the document was produced by an incompatible release and must be
/// re-initialized, not patched.
pub const STATE_VERSION: &str = "2";

pub const SECTION_NAMES: &[&str] = &["metadata", "rawConfig", "computed", "runtime", "decisions"];

/// `metadata` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub version: String,
    pub config_hash: String,
    pub last_refresh: String,
    pub last_operation: String,
}

/// Point-in-time git facts cached in `runtime.git`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitSnapshot {
    pub is_clean: bool,
    pub uncommitted_count: u64,
    #[serde(default)]
    pub has_staged: bool,
    pub ahead: u64,
    pub behind: u64,
    #[serde(default)]
    pub has_upstream: bool,
    pub stash_count: u64,
    #[serde(default)]
    pub last_commit: Option<String>,
}

/// Per-branch facts used by cleanup timing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_commit_at: Option<String>,
}

/// `runtime.branches` subsection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BranchInventory {
    pub all: Vec<String>,
    #[serde(default)]
    pub merged: Vec<String>,
    #[serde(default)]
    pub details: BTreeMap<String, BranchInfo>,
}

/// `runtime` section: a cache of the external repository, with the
/// repository itself as source of truth.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Runtime {
    pub current_branch: String,
    #[serde(default)]
    pub branches: BranchInventory,
    #[serde(default)]
    pub git: GitSnapshot,
    #[serde(default)]
    pub session: Option<SessionDescriptor>,
    #[serde(default)]
    pub session_history: Vec<SessionDescriptor>,
}

/// Dotted-path lookup into a JSON tree.
pub fn json_get<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Reject paths that cannot name a document location.
pub fn validate_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("empty path".into());
    }
    if path.split('.').any(str::is_empty) {
        return Err("empty path segment".into());
    }
    Ok(())
}

/// Dotted-path write; intermediate objects are created as needed. Fails on a
/// malformed path or when a non-object value sits on the path.
pub fn json_set(root: &mut JsonValue, path: &str, value: JsonValue) -> Result<(), String> {
    validate_path(path)?;
    let mut current = root;
    let segments: Vec<&str> = path.split('.').collect();
    for segment in &segments[..segments.len() - 1] {
        let obj = current
            .as_object_mut()
            .ok_or_else(|| format!("'{segment}' traverses a non-object value"))?;
        current = obj
            .entry(segment.to_string())
            .or_insert_with(|| JsonValue::Object(Default::default()));
    }
    let last = segments[segments.len() - 1];
    let obj = current
        .as_object_mut()
        .ok_or_else(|| format!("'{last}' traverses a non-object value"))?;
    obj.insert(last.to_string(), value);
    Ok(())
}

/// Dotted-path removal; absent paths are a no-op.
pub fn json_remove(root: &mut JsonValue, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        match current.as_object_mut().and_then(|o| o.get_mut(*segment)) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(obj) = current.as_object_mut() {
        obj.remove(segments[segments.len() - 1]);
    }
}

/// The in-memory form of the persisted artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDocument {
    root: JsonValue,
}

impl StateDocument {
    /// A document shell with every section present but empty. `initialize`
    /// fills the sections before first persist.
    pub fn empty() -> Self {
        let mut root = JsonValue::Object(Default::default());
        for section in SECTION_NAMES {
            // Shell construction over a fresh object cannot fail.
            let _ = json_set(&mut root, section, JsonValue::Object(Default::default()));
        }
        StateDocument { root }
    }

    pub fn from_value(root: JsonValue) -> Result<Self, AipmError> {
        if !root.is_object() {
            return Err(AipmError::ConsistencyError {
                section: crate::core::error::StateSection::Metadata,
                detail: "state document root is not an object".into(),
            });
        }
        Ok(StateDocument { root })
    }

    /// Read the persisted document. Lockless: readers tolerate observing the
    /// pre- or post-state of at most one in-flight transaction.
    pub fn load(path: &Path) -> Result<Self, AipmError> {
        if !path.exists() {
            return Err(AipmError::NotFound(format!(
                "state document {} does not exist; run `aipm init` first",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        let root: JsonValue = serde_json::from_str(&content)?;
        StateDocument::from_value(root)
    }

    /// Persist atomically: write a temp sibling, fsync, rename over the
    /// target. Readers never observe a partial document.
    pub fn save(&self, path: &Path) -> Result<(), AipmError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("json.tmp.{}", Ulid::new()));
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(self.to_pretty_json()?.as_bytes())?;
            f.write_all(b"\n")?;
            f.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn as_value(&self) -> &JsonValue {
        &self.root
    }

    pub fn to_pretty_json(&self) -> Result<String, AipmError> {
        Ok(serde_json::to_string_pretty(&self.root)?)
    }

    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        json_get(&self.root, path)
    }

    pub fn set(&mut self, path: &str, value: JsonValue) -> Result<(), AipmError> {
        json_set(&mut self.root, path, value)
            .map_err(|e| AipmError::TransactionError(format!("invalid path '{path}': {e}")))
    }

    /// Deserialize a named section into its typed form.
    pub fn section<T: DeserializeOwned>(&self, name: &str) -> Result<T, AipmError> {
        let value = self
            .get(name)
            .cloned()
            .ok_or_else(|| AipmError::NotFound(format!("section '{name}' is missing")))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize a typed section back into the tree.
    pub fn set_section<T: Serialize>(&mut self, name: &str, section: &T) -> Result<(), AipmError> {
        let value = serde_json::to_value(section)?;
        self.set(name, value)
    }

    pub fn metadata(&self) -> Result<Metadata, AipmError> {
        self.section("metadata")
    }

    pub fn runtime(&self) -> Result<Runtime, AipmError> {
        self.section("runtime")
    }

    pub fn raw_config(&self) -> Result<JsonValue, AipmError> {
        self.get("rawConfig")
            .cloned()
            .ok_or_else(|| AipmError::NotFound("section 'rawConfig' is missing".into()))
    }
}
