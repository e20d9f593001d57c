//! Entity storage on a content-addressed object store. Every record lives
//! as a chain of commits behind a ref; reads replay the chain, writes go
//! through CAS-retried batch transactions. The only mutable state is the
//! refs; everything else is immutable and append-only.

pub mod batch;
pub mod change_key;
pub mod config;
pub mod delta;
pub mod error;
pub mod index;
pub mod merge;
pub mod notes;
pub mod ops;
mod retry;
pub mod seq;
pub mod state;

pub use batch::{BatchListener, BatchUpdate, ChangeContext, Op};
pub use config::NoteDbConfig;
pub use error::{EngineError, ValidationError};
pub use index::{ChangeIndex, IndexSynchronizer, RedbChangeIndex};
pub use notes::{ChangeNotes, DraftNotes};
pub use state::{ChangeState, ChangeStatus};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notedb_core::id::ChangeId;
use notedb_core::types::Ident;
use notedb_store::NoteDbRepo;

use crate::seq::Sequences;

/// One opened repository: object store, config, and id sequences.
pub struct NoteDb {
    repo: Arc<NoteDbRepo>,
    config: NoteDbConfig,
    sequences: Sequences,
}

impl NoteDb {
    pub fn init(root: &Path) -> Result<Self, EngineError> {
        Self::from_repo(NoteDbRepo::init(root)?)
    }

    pub fn open(root: &Path) -> Result<Self, EngineError> {
        Self::from_repo(NoteDbRepo::open(root)?)
    }

    fn from_repo(repo: NoteDbRepo) -> Result<Self, EngineError> {
        let config = NoteDbConfig::load(&engine_config_path(&repo))?;
        let repo = Arc::new(repo);
        let sequences = Sequences::new(repo.clone(), &config.sequence);
        Ok(Self {
            repo,
            config,
            sequences,
        })
    }

    pub fn repo(&self) -> &Arc<NoteDbRepo> {
        &self.repo
    }

    pub fn config(&self) -> &NoteDbConfig {
        &self.config
    }

    pub fn sequences(&self) -> &Sequences {
        &self.sequences
    }

    /// Allocates the id for a new change. Allocation is independent of the
    /// batch that creates the change; an aborted batch leaves a gap, never a
    /// reused id.
    pub fn next_change_id(&self) -> Result<ChangeId, EngineError> {
        self.sequences.next_change_id()
    }

    /// Opens a transaction writing as `ident`.
    pub fn new_batch(&self, ident: Ident) -> BatchUpdate<'_> {
        BatchUpdate::new(&self.repo, self.config.clone(), ident)
    }

    /// `Ok(None)` if the change does not exist.
    pub fn load_change(&self, id: ChangeId) -> Result<Option<ChangeNotes>, EngineError> {
        ChangeNotes::load(&self.repo, id)
    }

    /// Opens the on-disk secondary index and its synchronizer.
    pub fn open_index(&self) -> Result<IndexSynchronizer, EngineError> {
        let index = Arc::new(RedbChangeIndex::open(&self.repo.layout().index_file())?);
        Ok(IndexSynchronizer::new(self.repo.clone(), index))
    }
}

fn engine_config_path(repo: &NoteDbRepo) -> PathBuf {
    repo.layout().notedb_dir().join("notedb.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::CreateChangeOp;
    use notedb_core::id::AccountId;
    use notedb_store::FileOp;

    #[test]
    fn facade_end_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        let db = NoteDb::init(tmp.path()).unwrap();

        let id = db.next_change_id().unwrap();
        assert_eq!(id, ChangeId::new(1));

        let ident = Ident::new("Uploader", "up@example.com", 1_000);
        let mut batch = db.new_batch(ident);
        batch.add_op(
            id,
            Box::new(
                CreateChangeOp::new("main", "First change", "First change\n", AccountId::new(1))
                    .files(vec![FileOp::put("README.md", "hello\n")]),
            ),
        );
        batch.execute().unwrap();

        let notes = db.load_change(id).unwrap().unwrap();
        assert_eq!(notes.state.subject, "First change");
        assert_eq!(notes.state.current_patch_set, 1);

        // reopening sees the same data and allocates past the used block
        drop(db);
        let db = NoteDb::open(tmp.path()).unwrap();
        assert!(db.load_change(id).unwrap().is_some());
        assert!(db.next_change_id().unwrap() > id);
    }
}
