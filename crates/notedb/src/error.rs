use notedb_core::id::{ChangeId, PatchSetId};
use thiserror::Error;

/// Rejected before any ref is written; the transaction aborts with zero
/// side effects.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("change {0} already exists")]
    ChangeExists(ChangeId),
    #[error("change {0} does not exist")]
    ChangeMissing(ChangeId),
    #[error("change {0} is closed")]
    ChangeClosed(ChangeId),
    #[error("unknown label: {0}")]
    UnknownLabel(String),
    #[error("approval {value} on label {label} outside configured range [{min}, {max}]")]
    ApprovalOutOfRange {
        label: String,
        value: i16,
        min: i16,
        max: i16,
    },
    #[error("comment parent {0} does not exist")]
    MissingCommentParent(String),
    #[error("patch set {0} does not exist")]
    UnknownPatchSet(PatchSetId),
    #[error("merge conflicts in {}", paths.join(", "))]
    MergeConflicts { paths: Vec<String> },
    #[error("commit message carries change key {found}, change uses {expected}")]
    WrongChangeKey { expected: String, found: String },
    #[error("invalid delta: {0}")]
    InvalidDelta(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Terminal transaction failure after exhausting CAS retries. The caller
    /// must assume zero applied effect.
    #[error("update failed after {attempts} attempts: ref {refname} kept moving")]
    RetryExhausted { refname: String, attempts: u32 },
    /// Unparsable entity history. Never auto-repaired; requires operator
    /// action on the underlying ref.
    #[error("corrupt entity at {refname}: {reason}")]
    CorruptEntity { refname: String, reason: String },
    #[error("sequence {counter} exhausted retries after {attempts} attempts")]
    SequenceExhausted { counter: String, attempts: u32 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("index error: {0}")]
    Index(String),
    #[error("store error: {0}")]
    Store(#[from] notedb_store::StoreError),
    #[error("core error: {0}")]
    Core(#[from] notedb_core::CoreError),
}
