//! Mutual exclusion for state-document mutations.
//!
//! Primary mechanism is an OS advisory file lock (`flock(2)` on Unix) via
//! `fs2`, which the kernel releases automatically when the owning process
//! exits — no PID tracking or stale-lock detection needed. Filesystems that
//! reject advisory locking fall back to an atomic directory-creation loop
//! with exponential backoff, bounded by the same deadline.

use crate::core::error::AipmError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Factory for exclusive locks over one state document.
#[derive(Debug, Clone)]
pub struct LockManager {
    lock_path: PathBuf,
    fallback_path: PathBuf,
}

#[derive(Debug)]
enum Backend {
    Advisory(File),
    Directory(PathBuf),
}

/// An acquired exclusive lock. Released explicitly or on drop; release is
/// idempotent so cleanup-on-exit paths may call it again safely.
#[derive(Debug)]
pub struct LockHandle {
    backend: Option<Backend>,
}

impl LockManager {
    pub fn new(aipm_dir: &Path) -> Self {
        LockManager {
            lock_path: aipm_dir.join("state.lock"),
            fallback_path: aipm_dir.join("state.lock.d"),
        }
    }

    /// Acquire the exclusive lock, polling with backoff until `timeout`.
    ///
    /// Never blocks past the timeout: callers must treat `LockTimeout` as
    /// "state is busy, retry or abort", not as a fatal condition.
    pub fn acquire(&self, timeout: Duration) -> Result<LockHandle, AipmError> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let deadline = Instant::now() + timeout;
        let mut backoff = INITIAL_BACKOFF;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    let _ = write_owner(&file);
                    return Ok(LockHandle {
                        backend: Some(Backend::Advisory(file)),
                    });
                }
                Err(e) if is_contended(&e) => {
                    if Instant::now() >= deadline {
                        return Err(AipmError::LockTimeout(timeout));
                    }
                    std::thread::sleep(backoff.min(remaining(deadline)));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                // Advisory locking unsupported on this filesystem.
                Err(_) => return self.acquire_dir(deadline, timeout),
            }
        }
    }

    fn acquire_dir(
        &self,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<LockHandle, AipmError> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match fs::create_dir(&self.fallback_path) {
                Ok(()) => {
                    let owner = self.fallback_path.join("owner");
                    if let Ok(mut f) = File::create(&owner) {
                        let _ = writeln!(f, "{}", std::process::id());
                    }
                    return Ok(LockHandle {
                        backend: Some(Backend::Directory(self.fallback_path.clone())),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(AipmError::LockTimeout(timeout));
                    }
                    std::thread::sleep(backoff.min(remaining(deadline)));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => return Err(AipmError::IoError(e)),
            }
        }
    }
}

impl LockHandle {
    /// Release the lock. A second call is a no-op, not an error.
    pub fn release(&mut self) {
        match self.backend.take() {
            Some(Backend::Advisory(file)) => {
                let _ = fs2::FileExt::unlock(&file);
            }
            Some(Backend::Directory(path)) => {
                let _ = fs::remove_file(path.join("owner"));
                let _ = fs::remove_dir(&path);
            }
            None => {}
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == fs2::lock_contended_error().kind()
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn write_owner(mut file: &File) -> std::io::Result<()> {
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
