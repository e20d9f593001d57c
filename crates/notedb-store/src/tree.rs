//! Tree construction: flatten a base tree, apply ordered file
//! modifications, rebuild the nested tree bottom-up with sorted entries so
//! equal trees hash identically.

use std::collections::BTreeMap;

use notedb_core::id::ObjectId;
use notedb_core::object::Object;
use notedb_core::types::{Blob, FileMode, Tree, TreeEntry};

use crate::{NoteDbRepo, StoreError};

/// One ordered file modification applied on top of a base tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOp {
    /// Add a new file or replace an existing one.
    Put {
        path: String,
        data: Vec<u8>,
        mode: FileMode,
    },
    /// Remove a file. Removing an absent path is a no-op.
    Delete { path: String },
    /// Move a file, keeping content and mode. The source must exist.
    Rename { from: String, to: String },
}

impl FileOp {
    pub fn put(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        FileOp::Put {
            path: path.into(),
            data: data.into(),
            mode: FileMode::Regular,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        FileOp::Delete { path: path.into() }
    }

    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        FileOp::Rename {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Flat path -> (blob id, mode) view of a tree.
pub fn flatten_tree(
    repo: &NoteDbRepo,
    tree_id: &ObjectId,
) -> Result<BTreeMap<String, (ObjectId, FileMode)>, StoreError> {
    let mut out = BTreeMap::new();
    flatten_into(repo, tree_id, "", &mut out)?;
    Ok(out)
}

fn flatten_into(
    repo: &NoteDbRepo,
    tree_id: &ObjectId,
    prefix: &str,
    out: &mut BTreeMap<String, (ObjectId, FileMode)>,
) -> Result<(), StoreError> {
    let tree = repo.parse_tree(tree_id)?;
    for entry in &tree.entries {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", prefix, entry.name)
        };
        match entry.mode {
            FileMode::Directory => flatten_into(repo, &entry.object_id, &path, out)?,
            _ => {
                out.insert(path, (entry.object_id, entry.mode));
            }
        }
    }
    Ok(())
}

/// Applies `ops` in order on top of `base` (empty tree when `None`) and
/// stores the resulting tree, returning its id.
pub fn insert_tree(
    repo: &NoteDbRepo,
    base: Option<&ObjectId>,
    ops: &[FileOp],
) -> Result<ObjectId, StoreError> {
    let mut file_map = match base {
        Some(id) => flatten_tree(repo, id)?,
        None => BTreeMap::new(),
    };

    for op in ops {
        match op {
            FileOp::Put { path, data, mode } => {
                if path.is_empty() || path.split('/').any(|c| c.is_empty() || c == "." || c == "..")
                {
                    return Err(StoreError::InvalidTreeOp(format!("bad path: {path:?}")));
                }
                let blob_id = repo.insert_blob(data)?;
                file_map.insert(path.clone(), (blob_id, *mode));
            }
            FileOp::Delete { path } => {
                file_map.remove(path);
            }
            FileOp::Rename { from, to } => {
                let entry = file_map.remove(from).ok_or_else(|| {
                    StoreError::InvalidTreeOp(format!("rename source missing: {from}"))
                })?;
                file_map.insert(to.clone(), entry);
            }
        }
    }

    build_tree_from_flat(repo, &file_map)
}

/// Builds nested tree objects from a flat path map, bottom-up.
pub fn build_tree_from_flat(
    repo: &NoteDbRepo,
    file_map: &BTreeMap<String, (ObjectId, FileMode)>,
) -> Result<ObjectId, StoreError> {
    let mut children: BTreeMap<String, BTreeMap<String, (ObjectId, FileMode)>> = BTreeMap::new();
    let mut direct_files: BTreeMap<String, (ObjectId, FileMode)> = BTreeMap::new();

    for (path, entry) in file_map {
        if let Some((first, rest)) = path.split_once('/') {
            children
                .entry(first.to_string())
                .or_default()
                .insert(rest.to_string(), *entry);
        } else {
            direct_files.insert(path.clone(), *entry);
        }
    }

    let mut entries = Vec::new();
    for (name, sub_map) in &children {
        let sub_tree_id = build_tree_from_flat(repo, sub_map)?;
        entries.push(TreeEntry {
            name: name.clone(),
            mode: FileMode::Directory,
            object_id: sub_tree_id,
        });
    }
    for (name, (blob_id, mode)) in &direct_files {
        entries.push(TreeEntry {
            name: name.clone(),
            mode: *mode,
            object_id: *blob_id,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    repo.store_object(&Object::Tree(Tree { entries }))
}

/// Reads a file's content out of a tree, following nested directories.
pub fn read_file(
    repo: &NoteDbRepo,
    tree_id: &ObjectId,
    path: &str,
) -> Result<Option<Vec<u8>>, StoreError> {
    let files = flatten_tree(repo, tree_id)?;
    match files.get(path) {
        Some((blob_id, _)) => {
            let Object::Blob(Blob { data }) = repo.load_object(blob_id)? else {
                return Err(StoreError::WrongObjectType {
                    id: *blob_id,
                    expected: "blob",
                    actual: "tree or commit",
                });
            };
            Ok(Some(data))
        }
        None => Ok(None),
    }
}
