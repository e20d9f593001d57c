//! Entity notes reader/writer: reconstructs a change by replaying its meta
//! ref oldest-to-newest and emits the next incremental commit for a delta.
//! Meta history is linear; a merge commit or a cycle on a meta ref is
//! corruption.

use std::collections::BTreeMap;
use std::collections::HashSet;

use notedb_core::id::{AccountId, ChangeId, ObjectId};
use notedb_core::refnames;
use notedb_core::types::{Commit, Ident};
use notedb_store::NoteDbRepo;

use crate::delta::{decode_draft, decode_meta, encode_draft, encode_meta, ChangeDelta, DraftDelta};
use crate::state::{self, ChangeState, Comment};
use crate::EngineError;

#[derive(Debug, Clone)]
pub struct ChangeNotes {
    pub change_id: ChangeId,
    pub refname: String,
    pub tip: ObjectId,
    pub state: ChangeState,
}

impl ChangeNotes {
    /// Loads a change from its meta ref tip. `Ok(None)` means the change
    /// does not exist.
    pub fn load(repo: &NoteDbRepo, change_id: ChangeId) -> Result<Option<Self>, EngineError> {
        let refname = refnames::change_meta_ref(change_id);
        match repo.read_ref(&refname)? {
            Some(tip) => Ok(Some(Self::load_at(repo, change_id, tip)?)),
            None => Ok(None),
        }
    }

    /// Replays history from an explicit tip, for loads pinned to an
    /// observed snapshot.
    pub fn load_at(
        repo: &NoteDbRepo,
        change_id: ChangeId,
        tip: ObjectId,
    ) -> Result<Self, EngineError> {
        let refname = refnames::change_meta_ref(change_id);
        let commits = walk_linear(repo, &refname, tip)?;

        let mut state: Option<ChangeState> = None;
        for commit in &commits {
            let delta = decode_meta(&refname, &commit.message)?;
            state = Some(
                state::apply(state, change_id, &delta, commit.committer.when_ms).map_err(|e| {
                    EngineError::CorruptEntity {
                        refname: refname.clone(),
                        reason: e.to_string(),
                    }
                })?,
            );
        }

        // walk_linear returns at least the tip commit
        let state = state.ok_or_else(|| EngineError::CorruptEntity {
            refname: refname.clone(),
            reason: "empty history".to_string(),
        })?;
        Ok(Self {
            change_id,
            refname,
            tip,
            state,
        })
    }
}

/// Creates the next meta commit for `delta` on top of `tip` without
/// touching any ref. The commit's tree is always empty; state lives in the
/// payload chain.
pub fn new_meta_commit(
    repo: &NoteDbRepo,
    tip: Option<ObjectId>,
    delta: &ChangeDelta,
    ident: &Ident,
) -> Result<ObjectId, EngineError> {
    let message = encode_meta(delta)?;
    let tree = repo.insert_tree(None, &[])?;
    let id = repo.insert_commit(
        tree,
        tip.into_iter().collect(),
        ident.clone(),
        ident.clone(),
        message,
    )?;
    Ok(id)
}

/// One account's draft comments on one change, replayed from its draft ref.
#[derive(Debug, Clone)]
pub struct DraftNotes {
    pub refname: String,
    pub tip: ObjectId,
    pub comments: BTreeMap<String, Comment>,
}

impl DraftNotes {
    pub fn load(
        repo: &NoteDbRepo,
        change_id: ChangeId,
        account: AccountId,
    ) -> Result<Option<Self>, EngineError> {
        let refname = refnames::draft_comments_ref(change_id, account);
        let Some(tip) = repo.read_ref(&refname)? else {
            return Ok(None);
        };
        Ok(Some(Self::load_at(repo, change_id, account, tip)?))
    }

    pub fn load_at(
        repo: &NoteDbRepo,
        change_id: ChangeId,
        account: AccountId,
        tip: ObjectId,
    ) -> Result<Self, EngineError> {
        let refname = refnames::draft_comments_ref(change_id, account);
        let commits = walk_linear(repo, &refname, tip)?;

        let mut comments = BTreeMap::new();
        for commit in &commits {
            let delta = decode_draft(&refname, &commit.message)?;
            for comment in delta.puts {
                comments.insert(comment.uuid.clone(), comment);
            }
            for uuid in &delta.deletes {
                comments.remove(uuid);
            }
        }
        Ok(Self {
            refname,
            tip,
            comments,
        })
    }
}

pub fn new_draft_commit(
    repo: &NoteDbRepo,
    tip: Option<ObjectId>,
    delta: &DraftDelta,
    ident: &Ident,
) -> Result<ObjectId, EngineError> {
    let message = encode_draft(delta)?;
    let tree = repo.insert_tree(None, &[])?;
    let id = repo.insert_commit(
        tree,
        tip.into_iter().collect(),
        ident.clone(),
        ident.clone(),
        message,
    )?;
    Ok(id)
}

/// Walks a meta-style ref tip back to its root and returns commits oldest
/// first. Rejects merge commits and cycles.
fn walk_linear(
    repo: &NoteDbRepo,
    refname: &str,
    tip: ObjectId,
) -> Result<Vec<Commit>, EngineError> {
    let mut commits = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = Some(tip);
    while let Some(id) = cursor {
        if !seen.insert(id) {
            return Err(EngineError::CorruptEntity {
                refname: refname.to_string(),
                reason: format!("history cycle at {id}"),
            });
        }
        let commit = repo.parse_commit(&id)?;
        if commit.parents.len() > 1 {
            return Err(EngineError::CorruptEntity {
                refname: refname.to_string(),
                reason: format!("merge commit {id} in linear history"),
            });
        }
        cursor = commit.parents.first().copied();
        commits.push(commit);
    }
    commits.reverse();
    Ok(commits)
}
