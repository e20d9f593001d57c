use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not a notedb repository: {0}")]
    NotARepository(PathBuf),
    #[error("repository already exists: {0}")]
    RepositoryExists(PathBuf),
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),
    #[error("object not found: {0}")]
    ObjectNotFound(notedb_core::id::ObjectId),
    #[error("object {id} is a {actual}, expected {expected}")]
    WrongObjectType {
        id: notedb_core::id::ObjectId,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("lock contention on {0}")]
    LockContention(PathBuf),
    #[error("duplicate ref update for {0}")]
    DuplicateRefUpdate(String),
    #[error("invalid tree modification: {0}")]
    InvalidTreeOp(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("core error: {0}")]
    Core(#[from] notedb_core::CoreError),
    #[error("config error: {0}")]
    Config(String),
}
