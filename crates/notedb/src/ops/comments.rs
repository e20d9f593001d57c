use notedb_core::id::{AccountId, PatchSetId};

use crate::batch::{ChangeContext, Op};
use crate::delta::{ChangeDelta, DraftDelta};
use crate::state::{ChangeMessage, ChangeState, Comment, CommentRange, CommentSide};
use crate::{EngineError, ValidationError};

/// Caller-facing comment fields. Anything left unset is inherited from the
/// parent comment when this is a reply: an explicit range wins over an
/// explicit line, and a reply with neither inherits the parent's anchors.
#[derive(Debug, Clone, Default)]
pub struct CommentInput {
    pub path: Option<String>,
    pub side: Option<CommentSide>,
    pub line: Option<u32>,
    pub range: Option<CommentRange>,
    pub text: String,
    pub parent_uuid: Option<String>,
    /// Defaults to the current patch set (or the parent's patch set for a
    /// reply).
    pub patch_set: Option<u32>,
}

fn new_uuid() -> String {
    // ulids are time-ordered, so a reply always sorts after its parent
    ulid::Ulid::new().to_string().to_lowercase()
}

fn resolve(
    input: &CommentInput,
    parent: Option<&Comment>,
    default_patch_set: u32,
    author: AccountId,
    written_on_ms: u64,
) -> Result<Comment, ValidationError> {
    let patch_set = input
        .patch_set
        .or(parent.map(|p| p.patch_set))
        .unwrap_or(default_patch_set);
    let path = input
        .path
        .clone()
        .or_else(|| parent.map(|p| p.path.clone()))
        .ok_or_else(|| ValidationError::InvalidDelta("comment has no path".into()))?;
    let side = input
        .side
        .or(parent.map(|p| p.side))
        .unwrap_or(CommentSide::Revision);
    let (line, range) = if let Some(range) = input.range {
        (Some(range.end_line), Some(range))
    } else if input.line.is_some() {
        (input.line, None)
    } else {
        match parent {
            Some(p) => (p.line, p.range),
            None => (None, None),
        }
    };
    Ok(Comment {
        uuid: new_uuid(),
        patch_set,
        path,
        side,
        line,
        range,
        author,
        written_on_ms,
        text: input.text.clone(),
        parent_uuid: input.parent_uuid.clone(),
    })
}

fn check_patch_set(state: &ChangeState, comment: &Comment) -> Result<(), ValidationError> {
    if !state.patch_sets.contains_key(&comment.patch_set) {
        return Err(ValidationError::UnknownPatchSet(PatchSetId::new(
            state.id,
            comment.patch_set,
        )));
    }
    Ok(())
}

/// Publishes one comment directly on the meta ref, bypassing drafts.
pub struct PostCommentOp {
    author: AccountId,
    input: CommentInput,
}

impl PostCommentOp {
    pub fn new(author: AccountId, input: CommentInput) -> Self {
        Self { author, input }
    }
}

impl Op for PostCommentOp {
    fn execute(&mut self, ctx: &mut ChangeContext<'_>) -> Result<(), EngineError> {
        let state = ctx
            .state()
            .ok_or(ValidationError::ChangeMissing(ctx.change_id))?;
        let parent = match &self.input.parent_uuid {
            Some(uuid) => Some(
                state
                    .comments
                    .get(uuid)
                    .ok_or_else(|| ValidationError::MissingCommentParent(uuid.clone()))?,
            ),
            None => None,
        };
        let comment = resolve(
            &self.input,
            parent,
            state.current_patch_set,
            self.author,
            ctx.ident().when_ms,
        )?;
        check_patch_set(state, &comment)?;
        ctx.push_delta(ChangeDelta {
            comments: vec![comment],
            ..Default::default()
        })
    }
}

/// Stages one draft comment on the author's draft ref. Invisible to other
/// accounts until published.
pub struct PutDraftOp {
    author: AccountId,
    input: CommentInput,
}

impl PutDraftOp {
    pub fn new(author: AccountId, input: CommentInput) -> Self {
        Self { author, input }
    }
}

impl Op for PutDraftOp {
    fn execute(&mut self, ctx: &mut ChangeContext<'_>) -> Result<(), EngineError> {
        let state = ctx
            .state()
            .ok_or(ValidationError::ChangeMissing(ctx.change_id))?;
        let current = state.current_patch_set;
        let patch_sets: std::collections::BTreeSet<u32> =
            state.patch_sets.keys().copied().collect();
        let published_parent = self
            .input
            .parent_uuid
            .as_ref()
            .and_then(|uuid| state.comments.get(uuid).cloned());
        // A draft may reply to a published comment or to another of the
        // author's own drafts.
        let parent = match &self.input.parent_uuid {
            Some(uuid) => match published_parent {
                Some(comment) => Some(comment),
                None => Some(
                    ctx.draft_comments(self.author)?
                        .get(uuid)
                        .cloned()
                        .ok_or_else(|| ValidationError::MissingCommentParent(uuid.clone()))?,
                ),
            },
            None => None,
        };
        let comment = resolve(
            &self.input,
            parent.as_ref(),
            current,
            self.author,
            ctx.ident().when_ms,
        )?;
        if !patch_sets.contains(&comment.patch_set) {
            return Err(ValidationError::UnknownPatchSet(PatchSetId::new(
                ctx.change_id,
                comment.patch_set,
            ))
            .into());
        }
        ctx.push_draft_delta(
            self.author,
            DraftDelta {
                puts: vec![comment],
                deletes: vec![],
            },
        )
    }
}

/// Discards one of the author's drafts.
pub struct DeleteDraftOp {
    author: AccountId,
    uuid: String,
}

impl DeleteDraftOp {
    pub fn new(author: AccountId, uuid: impl Into<String>) -> Self {
        Self {
            author,
            uuid: uuid.into(),
        }
    }
}

impl Op for DeleteDraftOp {
    fn execute(&mut self, ctx: &mut ChangeContext<'_>) -> Result<(), EngineError> {
        if ctx.state().is_none() {
            return Err(ValidationError::ChangeMissing(ctx.change_id).into());
        }
        if !ctx.draft_comments(self.author)?.contains_key(&self.uuid) {
            return Err(
                ValidationError::InvalidDelta(format!("draft {} does not exist", self.uuid))
                    .into(),
            );
        }
        ctx.push_draft_delta(
            self.author,
            DraftDelta {
                puts: vec![],
                deletes: vec![self.uuid.clone()],
            },
        )
    }
}

/// Atomically moves all of the author's drafts on this change to the meta
/// ref, optionally with a cover message. The draft ref is emptied (and thus
/// deleted) in the same batch; there is no state in which a comment is both
/// draft and published.
pub struct PublishCommentsOp {
    author: AccountId,
    message: Option<String>,
}

impl PublishCommentsOp {
    pub fn new(author: AccountId) -> Self {
        Self {
            author,
            message: None,
        }
    }

    pub fn message(mut self, text: impl Into<String>) -> Self {
        self.message = Some(text.into());
        self
    }
}

impl Op for PublishCommentsOp {
    fn execute(&mut self, ctx: &mut ChangeContext<'_>) -> Result<(), EngineError> {
        let Some(state) = ctx.state() else {
            return Err(ValidationError::ChangeMissing(ctx.change_id).into());
        };
        let published: std::collections::BTreeSet<String> =
            state.comments.keys().cloned().collect();
        let patch_sets: std::collections::BTreeSet<u32> =
            state.patch_sets.keys().copied().collect();

        let drafts = ctx.draft_comments(self.author)?.clone();
        // Reply chains must resolve entirely within published comments plus
        // this publish set; a dangling parent rejects the whole batch.
        for draft in drafts.values() {
            if let Some(parent) = &draft.parent_uuid {
                if !published.contains(parent) && !drafts.contains_key(parent) {
                    return Err(ValidationError::MissingCommentParent(parent.clone()).into());
                }
            }
            if !patch_sets.contains(&draft.patch_set) {
                return Err(ValidationError::UnknownPatchSet(PatchSetId::new(
                    ctx.change_id,
                    draft.patch_set,
                ))
                .into());
            }
        }

        let message = self.message.clone().map(|text| ChangeMessage {
            author: self.author,
            text,
            when_ms: 0,
        });
        if drafts.is_empty() && message.is_none() {
            return Ok(());
        }

        // Parents must precede their replies within the delta. Reply chains
        // are acyclic, so peeling off comments whose parent is already
        // resolved always terminates.
        let mut ordered: Vec<Comment> = Vec::with_capacity(drafts.len());
        let mut emitted = published;
        let mut pending: Vec<&Comment> = drafts.values().collect();
        while !pending.is_empty() {
            let (ready, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|c| {
                c.parent_uuid
                    .as_ref()
                    .map_or(true, |p| emitted.contains(p))
            });
            if ready.is_empty() {
                let uuid = rest[0].uuid.clone();
                return Err(
                    ValidationError::InvalidDelta(format!("reply cycle involving {uuid}")).into(),
                );
            }
            for comment in ready {
                emitted.insert(comment.uuid.clone());
                ordered.push(comment.clone());
            }
            pending = rest;
        }

        ctx.push_delta(ChangeDelta {
            comments: ordered,
            message,
            ..Default::default()
        })?;
        if !drafts.is_empty() {
            ctx.push_draft_delta(
                self.author,
                DraftDelta {
                    puts: vec![],
                    deletes: drafts.keys().cloned().collect(),
                },
            )?;
        }
        Ok(())
    }
}
