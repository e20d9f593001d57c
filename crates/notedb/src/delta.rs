//! Versioned meta payloads. Each meta commit's message carries exactly one
//! JSON-encoded delta; replaying a ref's history applies them in commit
//! order. Parsing fails closed: an unknown version or any unrecognized
//! field is corruption, never silently dropped.

use serde::{Deserialize, Serialize};

use notedb_core::id::{AccountId, ChangeKey, ObjectId};

use crate::state::{ChangeMessage, ChangeStatus, Comment, ConflictInfo};
use crate::EngineError;

pub const PAYLOAD_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetaPayload {
    version: u32,
    delta: ChangeDelta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangeDelta {
    /// Present only on the first commit of a meta ref.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create: Option<ChangeCreation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ChangeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<TopicEdit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_set: Option<PatchSetDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_patch_set: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<ChangeMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reviewers: Vec<ReviewerDelta>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub approvals: Vec<ApprovalDelta>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeCreation {
    pub branch: String,
    pub change_key: ChangeKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TopicEdit {
    Set(String),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchSetDelta {
    pub number: u32,
    pub commit: ObjectId,
    pub uploader: AccountId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<ConflictInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewerEdit {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewerDelta {
    pub account: AccountId,
    pub edit: ReviewerEdit,
}

/// `value: None` removes the approval for the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalDelta {
    pub patch_set: u32,
    pub account: AccountId,
    pub label: String,
    pub value: Option<i16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DraftDelta {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub puts: Vec<Comment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deletes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DraftPayload {
    version: u32,
    delta: DraftDelta,
}

pub fn encode_meta(delta: &ChangeDelta) -> Result<String, EngineError> {
    serde_json::to_string(&MetaPayload {
        version: PAYLOAD_VERSION,
        delta: delta.clone(),
    })
    .map_err(|e| EngineError::Core(notedb_core::CoreError::Serialization(e.to_string())))
}

pub fn decode_meta(refname: &str, message: &str) -> Result<ChangeDelta, EngineError> {
    let payload: MetaPayload =
        serde_json::from_str(message).map_err(|e| EngineError::CorruptEntity {
            refname: refname.to_string(),
            reason: e.to_string(),
        })?;
    if payload.version != PAYLOAD_VERSION {
        return Err(EngineError::CorruptEntity {
            refname: refname.to_string(),
            reason: format!("unsupported payload version {}", payload.version),
        });
    }
    Ok(payload.delta)
}

pub fn encode_draft(delta: &DraftDelta) -> Result<String, EngineError> {
    serde_json::to_string(&DraftPayload {
        version: PAYLOAD_VERSION,
        delta: delta.clone(),
    })
    .map_err(|e| EngineError::Core(notedb_core::CoreError::Serialization(e.to_string())))
}

pub fn decode_draft(refname: &str, message: &str) -> Result<DraftDelta, EngineError> {
    let payload: DraftPayload =
        serde_json::from_str(message).map_err(|e| EngineError::CorruptEntity {
            refname: refname.to_string(),
            reason: e.to_string(),
        })?;
    if payload.version != PAYLOAD_VERSION {
        return Err(EngineError::CorruptEntity {
            refname: refname.to_string(),
            reason: format!("unsupported payload version {}", payload.version),
        });
    }
    Ok(payload.delta)
}
