use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::layout::RepoLayout;
use crate::{NoteDbRepo, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub version: u32,
    pub name: Option<String>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            version: 1,
            name: None,
        }
    }
}

pub fn write_default_config(layout: &RepoLayout) -> Result<(), StoreError> {
    let config = RepoConfig::default();
    let toml_str =
        toml::to_string_pretty(&config).map_err(|e| StoreError::Config(e.to_string()))?;
    std::fs::write(layout.config_file(), toml_str)?;
    Ok(())
}

pub fn read_config(layout: &RepoLayout) -> Result<RepoConfig, StoreError> {
    let content = std::fs::read_to_string(layout.config_file())?;
    let config: RepoConfig =
        toml::from_str(&content).map_err(|e| StoreError::Config(e.to_string()))?;
    Ok(config)
}

/// Opens repositories by name under one base directory.
#[derive(Debug, Clone)]
pub struct RepoManager {
    base: PathBuf,
}

impl RepoManager {
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
        }
    }

    pub fn open(&self, name: &str) -> Result<NoteDbRepo, StoreError> {
        let root = self.base.join(name);
        if !root.exists() {
            return Err(StoreError::RepositoryNotFound(name.to_string()));
        }
        NoteDbRepo::open(&root)
    }

    pub fn create(&self, name: &str) -> Result<NoteDbRepo, StoreError> {
        let root = self.base.join(name);
        if RepoLayout::new(&root).notedb_dir().exists() {
            return Err(StoreError::RepositoryExists(root));
        }
        std::fs::create_dir_all(&root)?;
        NoteDbRepo::init(&root)
    }
}
