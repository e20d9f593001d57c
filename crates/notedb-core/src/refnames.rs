//! Ref name construction. Entity refs are sharded by the change id's two
//! low-order decimal digits so no refs directory holds more than 100
//! subdirectories, e.g. change 1234 lives under `changes/34/1234/`.

use crate::id::{AccountId, ChangeId};
use crate::CoreError;

pub const REFS_CHANGES: &str = "changes/";
pub const REFS_DRAFT_COMMENTS: &str = "draft-comments/";
pub const REFS_SEQUENCES: &str = "sequences/";

pub const META_SUFFIX: &str = "/meta";

/// Counter backing change id allocation.
pub const CHANGES_SEQUENCE: &str = "changes";

pub fn change_meta_ref(id: ChangeId) -> String {
    format!("{}{}/{}{}", REFS_CHANGES, id.shard(), id, META_SUFFIX)
}

pub fn patch_set_ref(id: ChangeId, number: u32) -> String {
    format!("{}{}/{}/{}", REFS_CHANGES, id.shard(), id, number)
}

pub fn draft_comments_ref(id: ChangeId, account: AccountId) -> String {
    format!("{}{}/{}/{}", REFS_DRAFT_COMMENTS, id.shard(), id, account)
}

pub fn sequence_ref(name: &str) -> String {
    format!("{REFS_SEQUENCES}{name}")
}

/// Extracts the change id from a meta ref name, e.g. `changes/34/1234/meta`.
pub fn change_id_from_meta_ref(refname: &str) -> Result<ChangeId, CoreError> {
    let rest = refname
        .strip_prefix(REFS_CHANGES)
        .and_then(|r| r.strip_suffix(META_SUFFIX))
        .ok_or_else(|| CoreError::InvalidRefName(refname.to_string()))?;
    let (shard, id_str) = rest
        .split_once('/')
        .ok_or_else(|| CoreError::InvalidRefName(refname.to_string()))?;
    let id: u64 = id_str
        .parse()
        .map_err(|_| CoreError::InvalidRefName(refname.to_string()))?;
    let change_id = ChangeId::new(id);
    if change_id.shard() != shard {
        return Err(CoreError::InvalidRefName(refname.to_string()));
    }
    Ok(change_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn meta_ref_layout() {
        assert_eq!(change_meta_ref(ChangeId::new(1234)), "changes/34/1234/meta");
        assert_eq!(change_meta_ref(ChangeId::new(5)), "changes/05/5/meta");
    }

    #[test]
    fn patch_set_ref_layout() {
        assert_eq!(patch_set_ref(ChangeId::new(1234), 2), "changes/34/1234/2");
    }

    #[test]
    fn draft_ref_layout() {
        assert_eq!(
            draft_comments_ref(ChangeId::new(1234), AccountId::new(1000001)),
            "draft-comments/34/1234/1000001"
        );
    }

    #[test]
    fn sequence_ref_layout() {
        assert_eq!(sequence_ref("changes"), "sequences/changes");
    }

    #[test]
    fn rejects_foreign_refs() {
        assert!(change_id_from_meta_ref("heads/main").is_err());
        assert!(change_id_from_meta_ref("changes/34/1234/2").is_err());
        // shard digits must match the id
        assert!(change_id_from_meta_ref("changes/99/1234/meta").is_err());
    }

    proptest! {
        #[test]
        fn meta_ref_parse_roundtrip(id in 1u64..1_000_000) {
            let change_id = ChangeId::new(id);
            let refname = change_meta_ref(change_id);
            prop_assert_eq!(change_id_from_meta_ref(&refname).unwrap(), change_id);
        }
    }
}
