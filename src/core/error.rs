use std::io;
use thiserror::Error;

/// Which section of the state document a consistency finding concerns.
///
/// Drift in `runtime` is auto-repairable by a refresh; a mismatch in
/// `computed` or `rawConfig` means the persisted document is corrupt and
/// further mutation is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSection {
    Metadata,
    RawConfig,
    Computed,
    Runtime,
    Decisions,
}

impl StateSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateSection::Metadata => "metadata",
            StateSection::RawConfig => "rawConfig",
            StateSection::Computed => "computed",
            StateSection::Runtime => "runtime",
            StateSection::Decisions => "decisions",
        }
    }

    /// Whether a finding in this section refuses further mutation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StateSection::Metadata | StateSection::RawConfig | StateSection::Computed
        )
    }
}

impl std::fmt::Display for StateSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum AipmError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("State document error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Opinions parse error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Validation failed:\n{}", .0.join("\n"))]
    ValidationError(Vec<String>),
    #[error("Lock timeout: could not acquire state lock within {0:?}")]
    LockTimeout(std::time::Duration),
    #[error("Consistency error in '{section}': {detail}")]
    ConsistencyError {
        section: StateSection,
        detail: String,
    },
    #[error("Transaction error: {0}")]
    TransactionError(String),
    #[error("Git fact unavailable: {0}")]
    ExternalFactError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl AipmError {
    /// Exit code for scripting consumers: 0 success, 1 generic failure,
    /// 2 validation/consistency failure, 3 lock timeout.
    pub fn exit_code(&self) -> i32 {
        match self {
            AipmError::LockTimeout(_) => 3,
            AipmError::ValidationError(_) | AipmError::ConsistencyError { .. } => 2,
            _ => 1,
        }
    }

    /// True when the error guarantees the persisted document was not touched.
    /// Every failure path in this crate upholds it; the accessor exists so
    /// callers can assert it in reporting.
    pub fn document_unchanged(&self) -> bool {
        true
    }
}
