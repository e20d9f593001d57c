use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoteDbConfig {
    /// Whole-batch attempts before an update fails with `RetryExhausted`.
    pub max_attempts: u32,
    /// Base delay for jittered exponential backoff between attempts.
    pub retry_base_ms: u64,
    pub sequence: SequenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SequenceConfig {
    /// Ids reserved per counter CAS. Larger blocks mean fewer ref updates
    /// but more ids skipped on process restart.
    pub block_size: u64,
    pub max_retries: u32,
}

impl Default for NoteDbConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_base_ms: 5,
            sequence: SequenceConfig::default(),
        }
    }
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            block_size: 20,
            max_retries: 10,
        }
    }
}

impl NoteDbConfig {
    /// Reads config from a TOML file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Store(notedb_store::StoreError::Io(e)))?;
        toml::from_str(&content)
            .map_err(|e| EngineError::Store(notedb_store::StoreError::Config(e.to_string())))
    }
}
