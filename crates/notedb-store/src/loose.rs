use std::path::PathBuf;

use notedb_core::id::ObjectId;

use crate::layout::RepoLayout;
use crate::StoreError;

pub fn loose_object_path(layout: &RepoLayout, id: &ObjectId) -> PathBuf {
    let dir = layout.objects_dir().join(id.shard_prefix());
    dir.join(id.shard_suffix())
}

pub fn write_loose_object(
    layout: &RepoLayout,
    id: &ObjectId,
    data: &[u8],
) -> Result<(), StoreError> {
    let path = loose_object_path(layout, id);

    // Content-addressed: an existing file already holds these bytes.
    if path.exists() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Atomic write: temp file + rename
    let dir = path.parent().unwrap();
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(temp.path(), data)?;
    match temp.persist(&path) {
        Ok(_) => Ok(()),
        // A concurrent writer of the same object wins the rename; both
        // outcomes leave identical bytes in place.
        Err(e) if path.exists() => {
            drop(e);
            Ok(())
        }
        Err(e) => Err(StoreError::Io(e.error)),
    }
}

pub fn read_loose_object(layout: &RepoLayout, id: &ObjectId) -> Result<Vec<u8>, StoreError> {
    let path = loose_object_path(layout, id);
    if !path.exists() {
        return Err(StoreError::ObjectNotFound(*id));
    }
    let data = std::fs::read(&path)?;
    Ok(data)
}

pub fn has_loose_object(layout: &RepoLayout, id: &ObjectId) -> bool {
    loose_object_path(layout, id).exists()
}
