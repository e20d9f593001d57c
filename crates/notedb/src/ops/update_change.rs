use notedb_core::id::AccountId;

use crate::batch::{ChangeContext, Op};
use crate::delta::{ApprovalDelta, ChangeDelta, ReviewerDelta, ReviewerEdit, TopicEdit};
use crate::state::{ChangeMessage, ChangeStatus};
use crate::{EngineError, ValidationError};

/// A configured review label with its permitted value range.
#[derive(Debug, Clone)]
pub struct LabelType {
    pub name: String,
    pub min: i16,
    pub max: i16,
}

impl LabelType {
    pub fn new(name: impl Into<String>, min: i16, max: i16) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }
}

/// General-purpose review mutation: topic, status transitions, reviewers,
/// approvals, and a review message, all in one meta commit. Approvals are
/// validated against the configured labels and attach to the current patch
/// set as observed this attempt.
pub struct UpdateChangeOp {
    author: AccountId,
    labels: Vec<LabelType>,
    topic: Option<TopicEdit>,
    status: Option<ChangeStatus>,
    subject: Option<String>,
    reviewers: Vec<ReviewerDelta>,
    approvals: Vec<(String, Option<i16>)>,
    message: Option<String>,
}

impl UpdateChangeOp {
    pub fn new(author: AccountId) -> Self {
        Self {
            author,
            labels: Vec::new(),
            topic: None,
            status: None,
            subject: None,
            reviewers: Vec::new(),
            approvals: Vec::new(),
            message: None,
        }
    }

    /// Labels approvals are checked against. Required when any approval is
    /// staged.
    pub fn labels(mut self, labels: Vec<LabelType>) -> Self {
        self.labels = labels;
        self
    }

    pub fn set_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(TopicEdit::Set(topic.into()));
        self
    }

    pub fn clear_topic(mut self) -> Self {
        self.topic = Some(TopicEdit::Clear);
        self
    }

    pub fn set_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn abandon(mut self) -> Self {
        self.status = Some(ChangeStatus::Abandoned);
        self
    }

    pub fn restore(mut self) -> Self {
        self.status = Some(ChangeStatus::New);
        self
    }

    pub fn mark_merged(mut self) -> Self {
        self.status = Some(ChangeStatus::Merged);
        self
    }

    pub fn add_reviewer(mut self, account: AccountId) -> Self {
        self.reviewers.push(ReviewerDelta {
            account,
            edit: ReviewerEdit::Add,
        });
        self
    }

    pub fn remove_reviewer(mut self, account: AccountId) -> Self {
        self.reviewers.push(ReviewerDelta {
            account,
            edit: ReviewerEdit::Remove,
        });
        self
    }

    pub fn approve(mut self, label: impl Into<String>, value: i16) -> Self {
        self.approvals.push((label.into(), Some(value)));
        self
    }

    pub fn remove_approval(mut self, label: impl Into<String>) -> Self {
        self.approvals.push((label.into(), None));
        self
    }

    pub fn message(mut self, text: impl Into<String>) -> Self {
        self.message = Some(text.into());
        self
    }
}

impl Op for UpdateChangeOp {
    fn execute(&mut self, ctx: &mut ChangeContext<'_>) -> Result<(), EngineError> {
        let state = ctx
            .state()
            .ok_or(ValidationError::ChangeMissing(ctx.change_id))?;

        // Restoring reopens an abandoned change; everything else requires an
        // open one. A merged change never reopens.
        match self.status {
            Some(ChangeStatus::New) => {
                if state.status != ChangeStatus::Abandoned {
                    return Err(ValidationError::ChangeClosed(ctx.change_id).into());
                }
            }
            _ => {
                if !state.status.is_open() {
                    return Err(ValidationError::ChangeClosed(ctx.change_id).into());
                }
            }
        }

        let current = state.current_patch_set;
        let mut approvals = Vec::with_capacity(self.approvals.len());
        for (label, value) in &self.approvals {
            let label_type = self
                .labels
                .iter()
                .find(|l| &l.name == label)
                .ok_or_else(|| ValidationError::UnknownLabel(label.clone()))?;
            if let Some(value) = value {
                if *value < label_type.min || *value > label_type.max {
                    return Err(ValidationError::ApprovalOutOfRange {
                        label: label.clone(),
                        value: *value,
                        min: label_type.min,
                        max: label_type.max,
                    }
                    .into());
                }
            }
            approvals.push(ApprovalDelta {
                patch_set: current,
                account: self.author,
                label: label.clone(),
                value: *value,
            });
        }

        ctx.push_delta(ChangeDelta {
            subject: self.subject.clone(),
            status: self.status,
            topic: self.topic.clone(),
            reviewers: self.reviewers.clone(),
            approvals,
            message: self.message.clone().map(|text| ChangeMessage {
                author: self.author,
                text,
                when_ms: 0,
            }),
            ..Default::default()
        })
    }
}
