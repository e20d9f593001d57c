//! Built-in batch operations. Each op is a self-contained mutation that
//! derives everything from the per-attempt context, so re-execution after a
//! CAS conflict recomputes patch set numbers, parents, and anchors against
//! the state that actually won.

mod comments;
mod create_change;
mod create_patch_set;
mod update_change;

pub use comments::{CommentInput, DeleteDraftOp, PostCommentOp, PublishCommentsOp, PutDraftOp};
pub use create_change::CreateChangeOp;
pub use create_patch_set::{CreatePatchSetOp, MergeSpec};
pub use update_change::{LabelType, UpdateChangeOp};
