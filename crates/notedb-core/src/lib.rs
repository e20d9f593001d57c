pub mod envelope;
pub mod error;
pub mod hash;
pub mod id;
pub mod object;
pub mod refnames;
pub mod types;

pub use error::CoreError;
pub use hash::content_hash;
pub use id::{AccountId, ChangeId, ChangeKey, ObjectId, PatchSetId};
pub use object::Object;
