use notedb_core::id::{AccountId, ObjectId};
use notedb_core::refnames;
use notedb_store::FileOp;

use crate::batch::{ChangeContext, Op};
use crate::change_key;
use crate::delta::{ChangeCreation, ChangeDelta, PatchSetDelta, TopicEdit};
use crate::state::ChangeMessage;
use crate::{EngineError, ValidationError};

/// Creates a change with its first patch set. The code commit is built from
/// `files` on top of `parent` (or an empty tree), the Change-Id footer is
/// preserved when well-formed and synthesized otherwise, and the patch set
/// ref lands atomically with the meta ref.
pub struct CreateChangeOp {
    branch: String,
    subject: String,
    message: String,
    uploader: AccountId,
    files: Vec<FileOp>,
    parent: Option<ObjectId>,
    topic: Option<String>,
}

impl CreateChangeOp {
    pub fn new(
        branch: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
        uploader: AccountId,
    ) -> Self {
        Self {
            branch: branch.into(),
            subject: subject.into(),
            message: message.into(),
            uploader,
            files: Vec::new(),
            parent: None,
            topic: None,
        }
    }

    pub fn files(mut self, files: Vec<FileOp>) -> Self {
        self.files = files;
        self
    }

    pub fn parent(mut self, parent: ObjectId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

impl Op for CreateChangeOp {
    fn execute(&mut self, ctx: &mut ChangeContext<'_>) -> Result<(), EngineError> {
        if ctx.state().is_some() {
            return Err(ValidationError::ChangeExists(ctx.change_id).into());
        }

        let repo = ctx.repo();
        let base_tree = match &self.parent {
            Some(parent) => Some(repo.parse_commit(parent)?.tree),
            None => None,
        };
        let tree = repo.insert_tree(base_tree.as_ref(), &self.files)?;
        let parents: Vec<ObjectId> = self.parent.into_iter().collect();

        let ident = ctx.ident().clone();
        let key = change_key::derive(&self.message, &tree, &parents, &ident);
        let message = change_key::ensure_footer(&self.message, &key);
        let commit = repo.insert_commit(tree, parents, ident.clone(), ident, message)?;

        ctx.push_delta(ChangeDelta {
            create: Some(ChangeCreation {
                branch: self.branch.clone(),
                change_key: key,
            }),
            subject: Some(self.subject.clone()),
            topic: self.topic.clone().map(TopicEdit::Set),
            patch_set: Some(PatchSetDelta {
                number: 1,
                commit,
                uploader: self.uploader,
                description: None,
                conflicts: None,
            }),
            current_patch_set: Some(1),
            message: Some(ChangeMessage {
                author: self.uploader,
                text: "Uploaded patch set 1.".into(),
                when_ms: 0,
            }),
            ..Default::default()
        })?;
        ctx.add_ref_update(
            refnames::patch_set_ref(ctx.change_id, 1),
            None,
            Some(commit),
        );
        Ok(())
    }
}
