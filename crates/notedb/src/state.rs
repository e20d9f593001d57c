//! Event-sourced change state: a pure fold over ordered deltas. Nothing in
//! this module touches the object store, so replay semantics are testable
//! without a repository.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use notedb_core::id::{AccountId, ChangeId, ChangeKey, ObjectId};

use crate::delta::{ChangeDelta, ReviewerEdit, TopicEdit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeStatus {
    New,
    Merged,
    Abandoned,
}

impl ChangeStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ChangeStatus::New)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSet {
    pub number: u32,
    pub commit: ObjectId,
    pub uploader: AccountId,
    pub created_on_ms: u64,
    pub description: Option<String>,
    pub conflicts: Option<ConflictInfo>,
}

/// Provenance of a patch set created by a merge that kept conflict markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConflictInfo {
    pub ours: ObjectId,
    pub theirs: ObjectId,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeMessage {
    pub author: AccountId,
    pub text: String,
    #[serde(default)]
    pub when_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentSide {
    /// Anchored to the parent of the patch set commit.
    Parent,
    Revision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommentRange {
    pub start_line: u32,
    pub start_char: u32,
    pub end_line: u32,
    pub end_char: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Comment {
    pub uuid: String,
    pub patch_set: u32,
    pub path: String,
    pub side: CommentSide,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<CommentRange>,
    pub author: AccountId,
    pub written_on_ms: u64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalKey {
    pub patch_set: u32,
    pub account: AccountId,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeState {
    pub id: ChangeId,
    pub branch: String,
    pub change_key: ChangeKey,
    pub subject: String,
    pub status: ChangeStatus,
    pub topic: Option<String>,
    pub created_on_ms: u64,
    pub updated_on_ms: u64,
    pub current_patch_set: u32,
    pub patch_sets: BTreeMap<u32, PatchSet>,
    pub reviewers: BTreeSet<AccountId>,
    /// Latest value per (patch set, account, label); earlier values are only
    /// visible in meta history.
    pub approvals: BTreeMap<ApprovalKey, i16>,
    pub messages: Vec<ChangeMessage>,
    pub comments: BTreeMap<String, Comment>,
}

impl ChangeState {
    pub fn max_patch_set_number(&self) -> u32 {
        self.patch_sets.keys().next_back().copied().unwrap_or(0)
    }

    pub fn current(&self) -> &PatchSet {
        // current_patch_set is validated against patch_sets on every apply
        &self.patch_sets[&self.current_patch_set]
    }
}

/// Structural replay failure. Surfaced by the notes loader as
/// `CorruptEntity` on the offending ref.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("first delta does not create the change")]
    CreateMissing,
    #[error("create delta on existing change")]
    CreateOnExisting,
    #[error("create delta has no patch set")]
    CreateWithoutPatchSet,
    #[error("patch set {0} already exists")]
    DuplicatePatchSet(u32),
    #[error("current patch set {0} does not exist")]
    UnknownCurrentPatchSet(u32),
    #[error("approval references unknown patch set {0}")]
    ApprovalOnUnknownPatchSet(u32),
    #[error("comment references unknown patch set {0}")]
    CommentOnUnknownPatchSet(u32),
    #[error("duplicate comment {0}")]
    DuplicateComment(String),
    #[error("comment parent {0} does not exist")]
    MissingCommentParent(String),
}

/// Applies one delta, yielding the next state. `when_ms` is the committer
/// timestamp of the backing meta commit.
pub fn apply(
    state: Option<ChangeState>,
    id: ChangeId,
    delta: &ChangeDelta,
    when_ms: u64,
) -> Result<ChangeState, ApplyError> {
    let mut next = match (state, &delta.create) {
        (None, Some(create)) => {
            if delta.patch_set.is_none() || delta.current_patch_set.is_none() {
                return Err(ApplyError::CreateWithoutPatchSet);
            }
            ChangeState {
                id,
                branch: create.branch.clone(),
                change_key: create.change_key.clone(),
                subject: String::new(),
                status: ChangeStatus::New,
                topic: None,
                created_on_ms: when_ms,
                updated_on_ms: when_ms,
                current_patch_set: 0,
                patch_sets: BTreeMap::new(),
                reviewers: BTreeSet::new(),
                approvals: BTreeMap::new(),
                messages: Vec::new(),
                comments: BTreeMap::new(),
            }
        }
        (None, None) => return Err(ApplyError::CreateMissing),
        (Some(_), Some(_)) => return Err(ApplyError::CreateOnExisting),
        (Some(state), None) => state,
    };

    if let Some(subject) = &delta.subject {
        next.subject = subject.clone();
    }
    if let Some(status) = delta.status {
        next.status = status;
    }
    match &delta.topic {
        Some(TopicEdit::Set(topic)) => next.topic = Some(topic.clone()),
        Some(TopicEdit::Clear) => next.topic = None,
        None => {}
    }

    if let Some(ps) = &delta.patch_set {
        if next.patch_sets.contains_key(&ps.number) {
            return Err(ApplyError::DuplicatePatchSet(ps.number));
        }
        next.patch_sets.insert(
            ps.number,
            PatchSet {
                number: ps.number,
                commit: ps.commit,
                uploader: ps.uploader,
                created_on_ms: when_ms,
                description: ps.description.clone(),
                conflicts: ps.conflicts.clone(),
            },
        );
    }
    if let Some(current) = delta.current_patch_set {
        if !next.patch_sets.contains_key(&current) {
            return Err(ApplyError::UnknownCurrentPatchSet(current));
        }
        next.current_patch_set = current;
    }

    for reviewer in &delta.reviewers {
        match reviewer.edit {
            ReviewerEdit::Add => {
                next.reviewers.insert(reviewer.account);
            }
            ReviewerEdit::Remove => {
                next.reviewers.remove(&reviewer.account);
            }
        }
    }

    for approval in &delta.approvals {
        if !next.patch_sets.contains_key(&approval.patch_set) {
            return Err(ApplyError::ApprovalOnUnknownPatchSet(approval.patch_set));
        }
        let key = ApprovalKey {
            patch_set: approval.patch_set,
            account: approval.account,
            label: approval.label.clone(),
        };
        match approval.value {
            Some(value) => {
                next.approvals.insert(key, value);
            }
            None => {
                next.approvals.remove(&key);
            }
        }
    }

    for comment in &delta.comments {
        if !next.patch_sets.contains_key(&comment.patch_set) {
            return Err(ApplyError::CommentOnUnknownPatchSet(comment.patch_set));
        }
        if next.comments.contains_key(&comment.uuid) {
            return Err(ApplyError::DuplicateComment(comment.uuid.clone()));
        }
        if let Some(parent) = &comment.parent_uuid {
            // The parent may arrive earlier in this same delta; insertion
            // order within a delta is part of the format.
            if !next.comments.contains_key(parent) {
                return Err(ApplyError::MissingCommentParent(parent.clone()));
            }
        }
        next.comments.insert(comment.uuid.clone(), comment.clone());
    }

    if let Some(message) = &delta.message {
        let mut message = message.clone();
        message.when_ms = when_ms;
        next.messages.push(message);
    }

    next.updated_on_ms = when_ms;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{ApprovalDelta, ChangeCreation, PatchSetDelta, ReviewerDelta};
    use notedb_core::hash::content_hash;
    use notedb_core::object::TypeTag;
    use proptest::prelude::*;

    fn key() -> ChangeKey {
        ChangeKey::parse(&format!("I{}", "0123456789".repeat(4))).unwrap()
    }

    fn creation_delta(commit_seed: &[u8]) -> ChangeDelta {
        ChangeDelta {
            create: Some(ChangeCreation {
                branch: "main".into(),
                change_key: key(),
            }),
            subject: Some("initial".into()),
            patch_set: Some(PatchSetDelta {
                number: 1,
                commit: content_hash(TypeTag::Commit, commit_seed),
                uploader: AccountId::new(1000),
                description: None,
                conflicts: None,
            }),
            current_patch_set: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn creation_fold() {
        let id = ChangeId::new(1);
        let state = apply(None, id, &creation_delta(b"ps1"), 100).unwrap();
        assert_eq!(state.id, id);
        assert_eq!(state.status, ChangeStatus::New);
        assert_eq!(state.current_patch_set, 1);
        assert_eq!(state.created_on_ms, 100);
        assert_eq!(state.max_patch_set_number(), 1);
    }

    #[test]
    fn first_delta_must_create() {
        let delta = ChangeDelta {
            subject: Some("x".into()),
            ..Default::default()
        };
        assert_eq!(
            apply(None, ChangeId::new(1), &delta, 100),
            Err(ApplyError::CreateMissing)
        );
    }

    #[test]
    fn create_requires_patch_set() {
        let mut delta = creation_delta(b"ps1");
        delta.patch_set = None;
        delta.current_patch_set = None;
        assert_eq!(
            apply(None, ChangeId::new(1), &delta, 100),
            Err(ApplyError::CreateWithoutPatchSet)
        );
    }

    #[test]
    fn duplicate_patch_set_rejected() {
        let id = ChangeId::new(1);
        let state = apply(None, id, &creation_delta(b"ps1"), 100).unwrap();
        let delta = ChangeDelta {
            patch_set: Some(PatchSetDelta {
                number: 1,
                commit: content_hash(TypeTag::Commit, b"other"),
                uploader: AccountId::new(1000),
                description: None,
                conflicts: None,
            }),
            ..Default::default()
        };
        assert_eq!(
            apply(Some(state), id, &delta, 200),
            Err(ApplyError::DuplicatePatchSet(1))
        );
    }

    #[test]
    fn current_must_exist() {
        let id = ChangeId::new(1);
        let state = apply(None, id, &creation_delta(b"ps1"), 100).unwrap();
        let delta = ChangeDelta {
            current_patch_set: Some(7),
            ..Default::default()
        };
        assert_eq!(
            apply(Some(state), id, &delta, 200),
            Err(ApplyError::UnknownCurrentPatchSet(7))
        );
    }

    #[test]
    fn approval_last_write_wins_and_removal() {
        let id = ChangeId::new(1);
        let mut state = apply(None, id, &creation_delta(b"ps1"), 100).unwrap();
        let approve = |value| ChangeDelta {
            approvals: vec![ApprovalDelta {
                patch_set: 1,
                account: AccountId::new(2000),
                label: "Code-Review".into(),
                value,
            }],
            ..Default::default()
        };
        state = apply(Some(state), id, &approve(Some(1)), 200).unwrap();
        state = apply(Some(state), id, &approve(Some(2)), 300).unwrap();
        let key = ApprovalKey {
            patch_set: 1,
            account: AccountId::new(2000),
            label: "Code-Review".into(),
        };
        assert_eq!(state.approvals.get(&key), Some(&2));

        state = apply(Some(state), id, &approve(None), 400).unwrap();
        assert_eq!(state.approvals.get(&key), None);
    }

    #[test]
    fn reviewer_add_remove() {
        let id = ChangeId::new(1);
        let mut state = apply(None, id, &creation_delta(b"ps1"), 100).unwrap();
        let edit = |edit| ChangeDelta {
            reviewers: vec![ReviewerDelta {
                account: AccountId::new(42),
                edit,
            }],
            ..Default::default()
        };
        state = apply(Some(state), id, &edit(ReviewerEdit::Add), 200).unwrap();
        assert!(state.reviewers.contains(&AccountId::new(42)));
        state = apply(Some(state), id, &edit(ReviewerEdit::Remove), 300).unwrap();
        assert!(!state.reviewers.contains(&AccountId::new(42)));
    }

    #[test]
    fn comment_parent_must_exist() {
        let id = ChangeId::new(1);
        let state = apply(None, id, &creation_delta(b"ps1"), 100).unwrap();
        let comment = Comment {
            uuid: "reply-1".into(),
            patch_set: 1,
            path: "a.txt".into(),
            side: CommentSide::Revision,
            line: Some(3),
            range: None,
            author: AccountId::new(2000),
            written_on_ms: 200,
            text: "reply".into(),
            parent_uuid: Some("missing".into()),
        };
        let delta = ChangeDelta {
            comments: vec![comment],
            ..Default::default()
        };
        assert_eq!(
            apply(Some(state), id, &delta, 200),
            Err(ApplyError::MissingCommentParent("missing".into()))
        );
    }

    proptest! {
        // Replaying any sequence of approval writes on one key leaves the
        // last written value, regardless of the values in between.
        #[test]
        fn approvals_fold_to_last_value(values in proptest::collection::vec(-2i16..=2, 1..20)) {
            let id = ChangeId::new(1);
            let mut state = apply(None, id, &creation_delta(b"ps1"), 100).unwrap();
            for (i, value) in values.iter().enumerate() {
                let delta = ChangeDelta {
                    approvals: vec![ApprovalDelta {
                        patch_set: 1,
                        account: AccountId::new(7),
                        label: "Verified".into(),
                        value: Some(*value),
                    }],
                    ..Default::default()
                };
                state = apply(Some(state), id, &delta, 100 + i as u64).unwrap();
            }
            let key = ApprovalKey { patch_set: 1, account: AccountId::new(7), label: "Verified".into() };
            prop_assert_eq!(state.approvals.get(&key), Some(values.last().unwrap()));
        }
    }
}
