//! Derived secondary index. The index is a queryable projection of NoteDb,
//! never the source of truth: after every committed batch the synchronizer
//! re-derives the document from a fresh replay, and `reconcile` repairs
//! drift out of band (at-least-once, best-effort; this is the mitigation
//! for the missing cross-repository atomicity).

use std::sync::Arc;

use redb::ReadableTable;

use notedb_core::id::ChangeId;
use notedb_core::refnames;
use notedb_store::NoteDbRepo;

use crate::batch::BatchListener;
use crate::notes::ChangeNotes;
use crate::state::{ChangeState, ChangeStatus};
use crate::EngineError;

pub trait ChangeIndex: Send + Sync {
    fn replace(&self, state: &ChangeState) -> Result<(), EngineError>;
    fn delete(&self, id: ChangeId) -> Result<(), EngineError>;
    fn get(&self, id: ChangeId) -> Result<Option<ChangeState>, EngineError>;
    fn by_status(&self, status: ChangeStatus) -> Result<Vec<ChangeId>, EngineError>;
}

const CHANGES_TABLE: redb::TableDefinition<u64, &[u8]> = redb::TableDefinition::new("changes");

pub struct RedbChangeIndex {
    db: redb::Database,
}

impl RedbChangeIndex {
    pub fn open(path: &std::path::Path) -> Result<Self, EngineError> {
        let db = redb::Database::create(path).map_err(|e| EngineError::Index(e.to_string()))?;
        // ensure the table exists so empty reads work
        let txn = db
            .begin_write()
            .map_err(|e| EngineError::Index(e.to_string()))?;
        txn.open_table(CHANGES_TABLE)
            .map_err(|e| EngineError::Index(e.to_string()))?;
        txn.commit().map_err(|e| EngineError::Index(e.to_string()))?;
        Ok(Self { db })
    }
}

impl ChangeIndex for RedbChangeIndex {
    fn replace(&self, state: &ChangeState) -> Result<(), EngineError> {
        let doc = serde_json::to_vec(state).map_err(|e| EngineError::Index(e.to_string()))?;
        let txn = self
            .db
            .begin_write()
            .map_err(|e| EngineError::Index(e.to_string()))?;
        {
            let mut table = txn
                .open_table(CHANGES_TABLE)
                .map_err(|e| EngineError::Index(e.to_string()))?;
            table
                .insert(state.id.get(), doc.as_slice())
                .map_err(|e| EngineError::Index(e.to_string()))?;
        }
        txn.commit().map_err(|e| EngineError::Index(e.to_string()))
    }

    fn delete(&self, id: ChangeId) -> Result<(), EngineError> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| EngineError::Index(e.to_string()))?;
        {
            let mut table = txn
                .open_table(CHANGES_TABLE)
                .map_err(|e| EngineError::Index(e.to_string()))?;
            table
                .remove(id.get())
                .map_err(|e| EngineError::Index(e.to_string()))?;
        }
        txn.commit().map_err(|e| EngineError::Index(e.to_string()))
    }

    fn get(&self, id: ChangeId) -> Result<Option<ChangeState>, EngineError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| EngineError::Index(e.to_string()))?;
        let table = txn
            .open_table(CHANGES_TABLE)
            .map_err(|e| EngineError::Index(e.to_string()))?;
        let Some(doc) = table
            .get(id.get())
            .map_err(|e| EngineError::Index(e.to_string()))?
        else {
            return Ok(None);
        };
        let state: ChangeState = serde_json::from_slice(doc.value())
            .map_err(|e| EngineError::Index(e.to_string()))?;
        Ok(Some(state))
    }

    fn by_status(&self, status: ChangeStatus) -> Result<Vec<ChangeId>, EngineError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| EngineError::Index(e.to_string()))?;
        let table = txn
            .open_table(CHANGES_TABLE)
            .map_err(|e| EngineError::Index(e.to_string()))?;
        let mut out = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| EngineError::Index(e.to_string()))?
        {
            let (key, doc) = entry.map_err(|e| EngineError::Index(e.to_string()))?;
            let state: ChangeState = serde_json::from_slice(doc.value())
                .map_err(|e| EngineError::Index(e.to_string()))?;
            if state.status == status {
                out.push(ChangeId::new(key.value()));
            }
        }
        Ok(out)
    }
}

/// Keeps the index consistent with NoteDb after committed transactions.
pub struct IndexSynchronizer {
    repo: Arc<NoteDbRepo>,
    index: Arc<dyn ChangeIndex>,
}

impl IndexSynchronizer {
    pub fn new(repo: Arc<NoteDbRepo>, index: Arc<dyn ChangeIndex>) -> Self {
        Self { repo, index }
    }

    pub fn index(&self) -> &Arc<dyn ChangeIndex> {
        &self.index
    }

    /// Re-derives one change's indexed document from a fresh replay.
    pub fn sync(&self, id: ChangeId) -> Result<(), EngineError> {
        match ChangeNotes::load(&self.repo, id)? {
            Some(notes) => self.index.replace(&notes.state),
            None => self.index.delete(id),
        }
    }

    /// Walks every meta ref and re-syncs it. Returns the number of changes
    /// visited.
    pub fn reconcile(&self) -> Result<usize, EngineError> {
        let refs = self.repo.list_refs(refnames::REFS_CHANGES.trim_end_matches('/'))?;
        let mut visited = 0;
        for (refname, _) in refs {
            let Ok(id) = refnames::change_id_from_meta_ref(&refname) else {
                continue; // patch set refs live in the same namespace
            };
            self.sync(id)?;
            visited += 1;
        }
        tracing::debug!(visited, "index reconciliation pass finished");
        Ok(visited)
    }
}

impl BatchListener for IndexSynchronizer {
    fn after_commit(&self, changes: &[ChangeId]) {
        for id in changes {
            if let Err(e) = self.sync(*id) {
                // The ref update already committed; the index catches up on
                // the next reconcile pass.
                tracing::warn!(change = %id, error = %e, "post-commit index sync failed");
            }
        }
    }
}
