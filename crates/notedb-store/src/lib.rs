//! Object store adapter: a content-addressed object database plus CAS-only
//! mutable refs, on the local filesystem. Object writes are append-only and
//! safe under concurrency; refs are the single mutable resource and change
//! only through [`refs::batch_cas`].

pub mod error;
pub mod layout;
pub mod lockfile;
pub mod loose;
pub mod refs;
pub mod repo;
pub mod tree;

pub use error::StoreError;
pub use refs::{CasOutcome, RefUpdate};
pub use repo::RepoManager;
pub use tree::FileOp;

use std::path::Path;

use notedb_core::envelope::{envelope_decode, envelope_encode};
use notedb_core::hash::content_hash;
use notedb_core::id::ObjectId;
use notedb_core::object::Object;
use notedb_core::types::{Blob, Commit, Ident, Tree};

use crate::layout::RepoLayout;

pub struct NoteDbRepo {
    layout: RepoLayout,
}

impl NoteDbRepo {
    pub fn init(root: &Path) -> Result<Self, StoreError> {
        let layout = RepoLayout::new(root);
        layout.create_dirs()?;
        repo::write_default_config(&layout)?;
        Ok(Self { layout })
    }

    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let layout = RepoLayout::new(root);
        if !layout.notedb_dir().exists() {
            return Err(StoreError::NotARepository(root.to_path_buf()));
        }
        Ok(Self { layout })
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    pub fn store_object(&self, obj: &Object) -> Result<ObjectId, StoreError> {
        let payload = obj.serialize_payload()?;
        let type_tag = obj.type_tag();
        let id = content_hash(type_tag, &payload);
        let data = envelope_encode(type_tag, &payload)?;
        loose::write_loose_object(&self.layout, &id, &data)?;
        Ok(id)
    }

    pub fn load_object(&self, id: &ObjectId) -> Result<Object, StoreError> {
        let data = loose::read_loose_object(&self.layout, id)?;
        let (type_tag, payload) = envelope_decode(&data)?;
        let obj = Object::deserialize_payload(type_tag, &payload)?;
        Ok(obj)
    }

    pub fn has_object(&self, id: &ObjectId) -> bool {
        loose::has_loose_object(&self.layout, id)
    }

    pub fn insert_blob(&self, data: &[u8]) -> Result<ObjectId, StoreError> {
        self.store_object(&Object::Blob(Blob {
            data: data.to_vec(),
        }))
    }

    pub fn insert_commit(
        &self,
        tree: ObjectId,
        parents: Vec<ObjectId>,
        author: Ident,
        committer: Ident,
        message: String,
    ) -> Result<ObjectId, StoreError> {
        self.store_object(&Object::Commit(Commit {
            tree,
            parents,
            author,
            committer,
            message,
        }))
    }

    pub fn insert_tree(
        &self,
        base: Option<&ObjectId>,
        ops: &[FileOp],
    ) -> Result<ObjectId, StoreError> {
        tree::insert_tree(self, base, ops)
    }

    pub fn parse_commit(&self, id: &ObjectId) -> Result<Commit, StoreError> {
        match self.load_object(id)? {
            Object::Commit(c) => Ok(c),
            other => Err(StoreError::WrongObjectType {
                id: *id,
                expected: "commit",
                actual: other.type_tag().name(),
            }),
        }
    }

    pub fn parse_tree(&self, id: &ObjectId) -> Result<Tree, StoreError> {
        match self.load_object(id)? {
            Object::Tree(t) => Ok(t),
            other => Err(StoreError::WrongObjectType {
                id: *id,
                expected: "tree",
                actual: other.type_tag().name(),
            }),
        }
    }

    pub fn parse_blob(&self, id: &ObjectId) -> Result<Vec<u8>, StoreError> {
        match self.load_object(id)? {
            Object::Blob(b) => Ok(b.data),
            other => Err(StoreError::WrongObjectType {
                id: *id,
                expected: "blob",
                actual: other.type_tag().name(),
            }),
        }
    }

    pub fn read_ref(&self, name: &str) -> Result<Option<ObjectId>, StoreError> {
        refs::read_ref(&self.layout, name)
    }

    pub fn write_ref(&self, name: &str, target: &ObjectId) -> Result<(), StoreError> {
        refs::write_ref(&self.layout, name, target)
    }

    pub fn list_refs(&self, prefix: &str) -> Result<Vec<(String, ObjectId)>, StoreError> {
        refs::list_refs(&self.layout, prefix)
    }

    pub fn cas_ref(
        &self,
        name: &str,
        expected_old: Option<ObjectId>,
        new: Option<ObjectId>,
    ) -> Result<CasOutcome, StoreError> {
        refs::cas_ref(&self.layout, name, expected_old, new)
    }

    pub fn batch_cas(&self, updates: &[RefUpdate]) -> Result<CasOutcome, StoreError> {
        refs::batch_cas(&self.layout, updates)
    }
}
