//! Shared test support: an in-memory GitFacts double and workspace helpers.
#![allow(dead_code)]

use aipm::core::error::AipmError;
use aipm::core::gitfacts::{AheadBehind, GitFacts};
use aipm::core::store::StateStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub struct FakeGitState {
    pub current_branch: String,
    pub branches: Vec<String>,
    pub merged: Vec<String>,
    pub uncommitted: u64,
    pub staged: bool,
    pub ahead: u64,
    pub behind: u64,
    pub has_upstream: bool,
    pub stash: u64,
    pub head: String,
    pub dates: BTreeMap<String, (Option<DateTime<Utc>>, Option<DateTime<Utc>>)>,
    pub fail: bool,
}

impl Default for FakeGitState {
    fn default() -> Self {
        FakeGitState {
            current_branch: "main".to_string(),
            branches: vec!["main".to_string()],
            merged: vec![],
            uncommitted: 0,
            staged: false,
            ahead: 0,
            behind: 0,
            has_upstream: true,
            stash: 0,
            head: "deadbeef".to_string(),
            dates: BTreeMap::new(),
            fail: false,
        }
    }
}

/// GitFacts double backed by shared mutable state, so a test can mutate the
/// "repository" while a store holds a clone of the handle.
#[derive(Debug, Clone, Default)]
pub struct FakeGit {
    pub state: Arc<Mutex<FakeGitState>>,
}

impl FakeGit {
    pub fn with<R>(&self, f: impl FnOnce(&mut FakeGitState) -> R) -> R {
        let mut guard = self.state.lock().expect("fake git state");
        f(&mut guard)
    }

    fn read(&self) -> Result<FakeGitState, AipmError> {
        let guard = self.state.lock().expect("fake git state");
        if guard.fail {
            return Err(AipmError::ExternalFactError("simulated git outage".into()));
        }
        Ok(guard.clone())
    }
}

impl GitFacts for FakeGit {
    fn current_branch(&self) -> Result<String, AipmError> {
        Ok(self.read()?.current_branch)
    }

    fn all_branches(&self) -> Result<Vec<String>, AipmError> {
        Ok(self.read()?.branches)
    }

    fn is_clean(&self) -> Result<bool, AipmError> {
        Ok(self.read()?.uncommitted == 0)
    }

    fn uncommitted_count(&self) -> Result<u64, AipmError> {
        Ok(self.read()?.uncommitted)
    }

    fn has_staged(&self) -> Result<bool, AipmError> {
        Ok(self.read()?.staged)
    }

    fn ahead_behind(&self) -> Result<AheadBehind, AipmError> {
        let state = self.read()?;
        Ok(AheadBehind {
            ahead: state.ahead,
            behind: state.behind,
            has_upstream: state.has_upstream,
        })
    }

    fn stash_count(&self) -> Result<u64, AipmError> {
        Ok(self.read()?.stash)
    }

    fn upstream_of(&self, branch: &str) -> Result<Option<String>, AipmError> {
        let state = self.read()?;
        Ok(state
            .has_upstream
            .then(|| format!("origin/{branch}")))
    }

    fn merged_branches(&self, _target: &str) -> Result<Vec<String>, AipmError> {
        Ok(self.read()?.merged)
    }

    fn branch_commit(&self, _reference: &str) -> Result<String, AipmError> {
        Ok(self.read()?.head)
    }

    fn branch_creation_date(&self, branch: &str) -> Result<Option<DateTime<Utc>>, AipmError> {
        Ok(self.read()?.dates.get(branch).and_then(|d| d.0))
    }

    fn branch_last_commit_date(&self, branch: &str) -> Result<Option<DateTime<Utc>>, AipmError> {
        Ok(self.read()?.dates.get(branch).and_then(|d| d.1))
    }
}

/// Fresh workspace on disk with a fake repository and a short lock timeout.
pub fn workspace() -> (TempDir, FakeGit, StateStore) {
    let dir = TempDir::new().expect("tempdir");
    let git = FakeGit::default();
    let store = StateStore::open(dir.path(), Box::new(git.clone()))
        .with_lock_timeout(Duration::from_secs(2));
    (dir, git, store)
}

/// Same as `workspace`, with an explicit opinions document written first.
pub fn workspace_with_opinions(opinions: &str) -> (TempDir, FakeGit, StateStore) {
    let dir = TempDir::new().expect("tempdir");
    let aipm_dir = dir.path().join(".aipm");
    std::fs::create_dir_all(&aipm_dir).expect("create .aipm");
    std::fs::write(aipm_dir.join("opinions.toml"), opinions).expect("write opinions");
    let git = FakeGit::default();
    let store = StateStore::open(dir.path(), Box::new(git.clone()))
        .with_lock_timeout(Duration::from_secs(2));
    (dir, git, store)
}
