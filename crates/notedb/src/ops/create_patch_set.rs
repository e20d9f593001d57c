use notedb_core::id::{AccountId, ObjectId};
use notedb_core::refnames;
use notedb_store::FileOp;

use crate::batch::{ChangeContext, Op};
use crate::change_key;
use crate::delta::{ChangeDelta, PatchSetDelta};
use crate::merge::{self, MergeStrategy};
use crate::state::{ChangeMessage, ConflictInfo};
use crate::{EngineError, ValidationError};

/// Merge input for a merge patch set: the commit to merge into the change's
/// current patch set.
#[derive(Debug, Clone)]
pub struct MergeSpec {
    pub theirs: ObjectId,
    pub strategy: MergeStrategy,
    pub allow_conflicts: bool,
}

/// Appends a new patch set. The number is always `max + 1` as observed this
/// attempt, so a retry after a concurrent upload recomputes it and numbers
/// stay dense with no duplicates.
pub struct CreatePatchSetOp {
    message: String,
    uploader: AccountId,
    files: Vec<FileOp>,
    merge: Option<MergeSpec>,
    description: Option<String>,
}

impl CreatePatchSetOp {
    pub fn new(message: impl Into<String>, uploader: AccountId) -> Self {
        Self {
            message: message.into(),
            uploader,
            files: Vec::new(),
            merge: None,
            description: None,
        }
    }

    pub fn files(mut self, files: Vec<FileOp>) -> Self {
        self.files = files;
        self
    }

    pub fn merge_of(mut self, spec: MergeSpec) -> Self {
        self.merge = Some(spec);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Op for CreatePatchSetOp {
    fn execute(&mut self, ctx: &mut ChangeContext<'_>) -> Result<(), EngineError> {
        let state = ctx
            .state()
            .ok_or(ValidationError::ChangeMissing(ctx.change_id))?;
        if !state.status.is_open() {
            return Err(ValidationError::ChangeClosed(ctx.change_id).into());
        }

        // The commit message may carry a foreign Change-Id; a patch set can
        // only extend the change it is uploaded to.
        if let Some(found) = change_key::from_message(&self.message) {
            if found != state.change_key {
                return Err(ValidationError::WrongChangeKey {
                    expected: state.change_key.as_str().to_string(),
                    found: found.as_str().to_string(),
                }
                .into());
            }
        }
        let message = change_key::ensure_footer(&self.message, &state.change_key);

        let number = state.max_patch_set_number() + 1;
        let ours = state.current().commit;
        let change_key = state.change_key.clone();

        let repo = ctx.repo();
        let (tree, parents, conflicts) = match &self.merge {
            Some(spec) => {
                let outcome = merge::merge_commits(
                    repo,
                    &ours,
                    &spec.theirs,
                    spec.strategy,
                    spec.allow_conflicts,
                )?;
                let conflicts = if outcome.conflicts.is_empty() {
                    None
                } else {
                    Some(ConflictInfo {
                        ours,
                        theirs: spec.theirs,
                        paths: outcome.conflicts,
                    })
                };
                (outcome.tree, vec![ours, spec.theirs], conflicts)
            }
            None => {
                let base_tree = repo.parse_commit(&ours)?.tree;
                let tree = repo.insert_tree(Some(&base_tree), &self.files)?;
                (tree, vec![ours], None)
            }
        };

        let ident = ctx.ident().clone();
        // synthesized keys never apply here; the footer was pinned above
        debug_assert_eq!(change_key::from_message(&message).as_ref(), Some(&change_key));
        let commit = repo.insert_commit(tree, parents, ident.clone(), ident, message)?;

        ctx.push_delta(ChangeDelta {
            patch_set: Some(PatchSetDelta {
                number,
                commit,
                uploader: self.uploader,
                description: self.description.clone(),
                conflicts,
            }),
            current_patch_set: Some(number),
            message: Some(ChangeMessage {
                author: self.uploader,
                text: format!("Uploaded patch set {number}."),
                when_ms: 0,
            }),
            ..Default::default()
        })?;
        ctx.add_ref_update(
            refnames::patch_set_ref(ctx.change_id, number),
            None,
            Some(commit),
        );
        Ok(())
    }
}
