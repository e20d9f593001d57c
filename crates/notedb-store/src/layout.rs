use std::path::{Path, PathBuf};

use crate::StoreError;

#[derive(Debug, Clone)]
pub struct RepoLayout {
    root: PathBuf,
}

impl RepoLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn notedb_dir(&self) -> PathBuf {
        self.root.join(".notedb")
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.notedb_dir().join("objects")
    }

    pub fn refs_dir(&self) -> PathBuf {
        self.notedb_dir().join("refs")
    }

    pub fn config_file(&self) -> PathBuf {
        self.notedb_dir().join("repo.toml")
    }

    pub fn index_file(&self) -> PathBuf {
        self.notedb_dir().join("index.db")
    }

    pub fn create_dirs(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(self.objects_dir())?;
        std::fs::create_dir_all(self.refs_dir().join("changes"))?;
        std::fs::create_dir_all(self.refs_dir().join("draft-comments"))?;
        std::fs::create_dir_all(self.refs_dir().join("sequences"))?;
        Ok(())
    }
}
