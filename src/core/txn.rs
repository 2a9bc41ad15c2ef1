//! Atomic operations over the state document.
//!
//! A `Transaction` is the only mutation path: it holds the exclusive lock for
//! its whole lifetime, buffers changes in a working copy, and persists them
//! in a single atomic swap at commit. The persisted file is untouched until
//! commit, so a crash or an early return between `begin` and `commit` leaves
//! the document byte-identical to its pre-begin state; the drop guard logs
//! the rollback either way.

use crate::core::decide;
use crate::core::document::StateDocument;
use crate::core::error::AipmError;
use crate::core::lock::LockHandle;
use crate::core::store::StateStore;
use crate::core::time;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// One line of `.aipm/events.jsonl`: the audit trail of state mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEvent {
    pub ts: String,
    pub event_id: String,
    pub op: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Append an audit event. Best-effort callers may ignore the result on
/// already-failing paths.
pub fn append_event(
    path: &Path,
    op: &str,
    status: &str,
    detail: Option<&str>,
) -> Result<(), AipmError> {
    let event = StateEvent {
        ts: time::now_rfc3339(),
        event_id: time::new_event_id(),
        op: op.to_string(),
        status: status.to_string(),
        detail: detail.map(str::to_string),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{}", serde_json::to_string(&event)?)?;
    Ok(())
}

/// An in-flight mutation of the state document.
pub struct Transaction<'a> {
    store: &'a StateStore,
    name: String,
    lock: Option<LockHandle>,
    snapshot: StateDocument,
    working: StateDocument,
    resolved: bool,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("name", &self.name)
            .field("resolved", &self.resolved)
            .finish_non_exhaustive()
    }
}

impl<'a> Transaction<'a> {
    /// Acquire the lock and snapshot the current document. Fails fast when a
    /// transaction is already open on this store: compose multiple mutations
    /// inside one begin/commit pair instead of nesting.
    pub(crate) fn begin(store: &'a StateStore, name: &str) -> Result<Self, AipmError> {
        if store.txn_open.get() {
            return Err(AipmError::TransactionError(format!(
                "transaction '{name}' rejected: another transaction is already open"
            )));
        }
        let lock = store.locks.acquire(store.lock_timeout)?;
        let snapshot = if store.state_path.exists() {
            match StateDocument::load(&store.state_path) {
                Ok(doc) => doc,
                // An unparseable document must still be recoverable by a
                // full re-initialize; any other transaction will fail its
                // commit validation against this empty shell.
                Err(AipmError::JsonError(_)) => StateDocument::empty(),
                Err(e) => return Err(e),
            }
        } else {
            StateDocument::empty()
        };
        store.txn_open.set(true);
        Ok(Transaction {
            store,
            name: name.to_string(),
            lock: Some(lock),
            working: snapshot.clone(),
            snapshot,
            resolved: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The working copy. Changes are invisible to readers until commit.
    pub fn doc(&mut self) -> &mut StateDocument {
        &mut self.working
    }

    /// Document state as of `begin` — the rollback point.
    pub fn snapshot(&self) -> &StateDocument {
        &self.snapshot
    }

    /// Single-value write into the working copy.
    pub fn update(&mut self, path: &str, value: JsonValue) -> Result<(), AipmError> {
        self.working.set(path, value)
    }

    /// Validate, persist atomically, stamp metadata, release the lock.
    ///
    /// `decisions` is re-derived first whenever `computed` or `runtime`
    /// changed in this transaction, so a successful commit can never leave
    /// it stale.
    pub fn commit(mut self) -> Result<(), AipmError> {
        let result = self.commit_inner();
        match &result {
            Ok(()) => self.finish("commit", None),
            Err(e) => self.finish("rollback", Some(&e.to_string())),
        }
        result
    }

    fn commit_inner(&mut self) -> Result<(), AipmError> {
        if self.working.get("computed") != self.snapshot.get("computed")
            || self.working.get("runtime") != self.snapshot.get("runtime")
        {
            decide::refresh_decisions(&mut self.working)?;
        }

        self.store.stamp_metadata(&mut self.working, &self.name)?;

        let report = self.store.validate_document(&self.working, None)?;
        if !report.errors.is_empty() {
            return Err(report.into_error());
        }

        self.working.save(&self.store.state_path)
    }

    /// Discard the working copy and log the abandoned operation. The
    /// persisted document was never touched.
    pub fn rollback(mut self) {
        self.finish("rollback", None);
    }

    fn finish(&mut self, status: &str, detail: Option<&str>) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        let _ = append_event(&self.store.events_path, &self.name, status, detail);
        if let Some(mut lock) = self.lock.take() {
            lock.release();
        }
        self.store.txn_open.set(false);
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        // Uncaught error paths between begin and commit land here.
        self.finish("rollback", Some("transaction dropped without commit"));
    }
}
