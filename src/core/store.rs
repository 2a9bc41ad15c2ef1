//! The state store: owner of the persisted document.
//!
//! Reads are lockless and tolerate at most one in-flight transaction (the
//! document is only ever swapped whole). Every mutation path — initialize,
//! update, refresh, sync, report, session — goes through `Transaction`, so
//! it holds the exclusive lock and either commits a validated document or
//! leaves the previous one untouched.

use crate::core::compute;
use crate::core::document::{self, Metadata, SECTION_NAMES, STATE_VERSION, StateDocument};
use crate::core::error::{AipmError, StateSection};
use crate::core::gitfacts::GitFacts;
use crate::core::lock::LockManager;
use crate::core::opinions::ResolvedOpinions;
use crate::core::sync::SyncEngine;
use crate::core::time;
use crate::core::txn::Transaction;
use serde_json::Value as JsonValue;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Workspace dot-directory holding the opinions document, the state
/// document, the lock, and the audit log.
pub const AIPM_DIR: &str = ".aipm";

/// One validation finding over a persisted document.
#[derive(Debug, Clone)]
pub struct Finding {
    pub section: StateSection,
    pub detail: String,
}

/// Outcome of `Validate()`: hard errors (commit-blocking; fatal when they
/// concern `metadata`/`rawConfig`/`computed`) and drift (a mismatch between
/// cached runtime facts and the observable repository, auto-repairable).
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<Finding>,
    pub drift: Vec<Finding>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.drift.is_empty()
    }

    pub fn has_fatal(&self) -> bool {
        self.errors.iter().any(|f| f.section.is_fatal())
    }

    pub(crate) fn into_error(self) -> AipmError {
        if let Some(fatal) = self.errors.iter().find(|f| f.section.is_fatal()) {
            return AipmError::ConsistencyError {
                section: fatal.section,
                detail: fatal.detail.clone(),
            };
        }
        AipmError::ValidationError(
            self.errors
                .into_iter()
                .map(|f| format!("{}: {}", f.section, f.detail))
                .collect(),
        )
    }
}

pub struct StateStore {
    workspace_root: PathBuf,
    aipm_dir: PathBuf,
    pub(crate) state_path: PathBuf,
    opinions_path: PathBuf,
    pub(crate) events_path: PathBuf,
    pub(crate) locks: LockManager,
    pub(crate) lock_timeout: Duration,
    pub(crate) txn_open: Cell<bool>,
    git: Box<dyn GitFacts>,
}

impl StateStore {
    /// Bind a store to a workspace root. The git gateway is a hard
    /// dependency supplied at construction; there is no fallback path.
    pub fn open(workspace_root: &Path, git: Box<dyn GitFacts>) -> Self {
        let aipm_dir = workspace_root.join(AIPM_DIR);
        let opinions_path = aipm_dir.join("opinions.toml");
        let lock_timeout = ResolvedOpinions::load(Some(&opinions_path))
            .map(|o| o.lock_timeout())
            .unwrap_or(Duration::from_secs(30));
        StateStore {
            locks: LockManager::new(&aipm_dir),
            state_path: aipm_dir.join("state.json"),
            events_path: aipm_dir.join("events.jsonl"),
            workspace_root: workspace_root.to_path_buf(),
            aipm_dir,
            opinions_path,
            lock_timeout,
            txn_open: Cell::new(false),
            git,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn aipm_dir(&self) -> &Path {
        &self.aipm_dir
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn opinions_path(&self) -> &Path {
        &self.opinions_path
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    pub fn git(&self) -> &dyn GitFacts {
        self.git.as_ref()
    }

    /// Load the persisted document (lockless).
    pub fn load(&self) -> Result<StateDocument, AipmError> {
        StateDocument::load(&self.state_path)
    }

    pub fn is_initialized(&self) -> bool {
        self.state_path.exists()
    }

    pub(crate) fn ensure_initialized(&self) -> Result<(), AipmError> {
        if !self.is_initialized() {
            return Err(AipmError::NotFound(format!(
                "state document {} does not exist; run `aipm init` first",
                self.state_path.display()
            )));
        }
        Ok(())
    }

    /// Dotted-path read. Never blocks on the lock: a reader may observe the
    /// pre- or post-state of one in-flight transaction, never a torn write.
    pub fn get(&self, path: &str) -> Result<JsonValue, AipmError> {
        let doc = self.load()?;
        doc.get(path)
            .cloned()
            .ok_or_else(|| AipmError::NotFound(format!("no value at '{path}'")))
    }

    /// Open a transaction. All mutations compose inside one begin/commit
    /// pair; nesting fails fast.
    pub fn begin(&self, name: &str) -> Result<Transaction<'_>, AipmError> {
        Transaction::begin(self, name)
    }

    /// Full rebuild: load opinions, derive computed values, sync runtime
    /// from the repository, evaluate decisions, persist. One transaction.
    pub fn initialize(&self) -> Result<(), AipmError> {
        let opinions = ResolvedOpinions::load(Some(&self.opinions_path))?;
        let computed = compute::derive(&opinions);

        let mut tx = self.begin("state.initialize")?;
        let previous_runtime = tx.snapshot().runtime().ok();
        let runtime = crate::core::sync::gather_runtime(
            self.git(),
            &computed.default_merge_target,
            previous_runtime.as_ref(),
        )?;

        let doc = tx.doc();
        *doc = StateDocument::empty();
        doc.set("rawConfig", opinions.raw().clone())?;
        doc.set_section("computed", &computed)?;
        doc.set_section("runtime", &runtime)?;
        tx.commit()
    }

    /// Single-value write wrapped in an implicit one-operation transaction.
    pub fn update(&self, path: &str, value: JsonValue) -> Result<(), AipmError> {
        self.ensure_initialized()?;
        let mut tx = self.begin("state.update")?;
        tx.update(path, value)?;
        tx.commit()
    }

    /// All-or-nothing batch: every path is checked before any value is
    /// applied, so an invalid path leaves the document untouched.
    pub fn update_batch(&self, updates: &[(String, JsonValue)]) -> Result<(), AipmError> {
        self.ensure_initialized()?;
        for (path, _) in updates {
            document::validate_path(path)
                .map_err(|e| AipmError::TransactionError(format!("invalid path '{path}': {e}")))?;
        }
        let mut tx = self.begin("state.update-batch")?;
        for (path, value) in updates {
            tx.update(path, value.clone())?;
        }
        tx.commit()
    }

    /// Re-sync from the external repository. `all` is a full rebuild;
    /// `runtime` re-pulls every git fact; a named subsection re-pulls only
    /// that subsection. Decisions are re-derived in the same transaction.
    pub fn refresh(&self, scope: &str) -> Result<(), AipmError> {
        match scope {
            "all" => self.initialize(),
            "runtime" => SyncEngine::new(self).full_sync(),
            section => SyncEngine::new(self).partial_sync(section),
        }
    }

    /// State-consistency validation of the persisted document, including the
    /// drift check against the observable current branch.
    pub fn validate(&self) -> Result<ValidationReport, AipmError> {
        let doc = self.load()?;
        self.validate_document(&doc, Some(self.git()))
    }

    /// Re-run the relevant refresh for auto-repairable findings. Fatal
    /// findings refuse repair: the document must be re-initialized.
    pub fn repair(&self) -> Result<ValidationReport, AipmError> {
        let report = self.validate()?;
        if report.has_fatal() {
            return Err(report.into_error());
        }
        if !report.is_clean() {
            SyncEngine::new(self).full_sync()?;
        }
        self.validate()
    }

    pub(crate) fn stamp_metadata(
        &self,
        doc: &mut StateDocument,
        operation: &str,
    ) -> Result<(), AipmError> {
        let raw = doc.raw_config()?;
        let metadata = Metadata {
            version: STATE_VERSION.to_string(),
            config_hash: ResolvedOpinions::from_resolved(raw).content_hash(),
            last_refresh: time::now_rfc3339(),
            last_operation: operation.to_string(),
        };
        doc.set_section("metadata", &metadata)
    }

    /// Structural and reproducibility checks over a document. With a git
    /// gateway supplied, also checks the cached current branch against the
    /// observable one (drift, not a hard error).
    pub(crate) fn validate_document(
        &self,
        doc: &StateDocument,
        git: Option<&dyn GitFacts>,
    ) -> Result<ValidationReport, AipmError> {
        let mut report = ValidationReport::default();

        for name in SECTION_NAMES {
            if !doc.get(name).is_some_and(JsonValue::is_object) {
                report.errors.push(Finding {
                    section: section_of(name),
                    detail: format!("required section '{name}' is missing"),
                });
            }
        }
        if !report.errors.is_empty() {
            return Ok(report);
        }

        match doc.metadata() {
            Ok(metadata) => {
                if metadata.version != STATE_VERSION {
                    report.errors.push(Finding {
                        section: StateSection::Metadata,
                        detail: format!(
                            "schema version '{}' does not match '{}'; re-initialize the workspace",
                            metadata.version, STATE_VERSION
                        ),
                    });
                }
                if let Ok(raw) = doc.raw_config() {
                    let expected = ResolvedOpinions::from_resolved(raw).content_hash();
                    if metadata.config_hash != expected {
                        report.errors.push(Finding {
                            section: StateSection::RawConfig,
                            detail: "configHash does not match rawConfig".to_string(),
                        });
                    }
                }
            }
            Err(e) => report.errors.push(Finding {
                section: StateSection::Metadata,
                detail: format!("metadata is unreadable: {e}"),
            }),
        }

        match doc.raw_config() {
            Ok(raw) => {
                let recomputed = compute::derive(&ResolvedOpinions::from_resolved(raw));
                match serde_json::to_value(&recomputed) {
                    Ok(expected) => {
                        if doc.get("computed") != Some(&expected) {
                            report.errors.push(Finding {
                                section: StateSection::Computed,
                                detail: "computed is not reproducible from rawConfig".to_string(),
                            });
                        }
                    }
                    Err(e) => report.errors.push(Finding {
                        section: StateSection::Computed,
                        detail: format!("recomputation failed to serialize: {e}"),
                    }),
                }
            }
            Err(e) => report.errors.push(Finding {
                section: StateSection::RawConfig,
                detail: e.to_string(),
            }),
        }

        match doc.runtime() {
            Ok(runtime) => {
                if let Some(git) = git {
                    let observed = git.current_branch()?;
                    if runtime.current_branch != observed {
                        report.drift.push(Finding {
                            section: StateSection::Runtime,
                            detail: format!(
                                "cached currentBranch '{}' differs from observed '{}'",
                                runtime.current_branch, observed
                            ),
                        });
                    }
                }
            }
            Err(e) => report.errors.push(Finding {
                section: StateSection::Runtime,
                detail: format!("runtime is unreadable: {e}"),
            }),
        }

        Ok(report)
    }
}

fn section_of(name: &str) -> StateSection {
    match name {
        "metadata" => StateSection::Metadata,
        "rawConfig" => StateSection::RawConfig,
        "computed" => StateSection::Computed,
        "runtime" => StateSection::Runtime,
        _ => StateSection::Decisions,
    }
}
