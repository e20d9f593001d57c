//! Ref storage and the compare-and-swap primitives on top of it.
//!
//! Refs are the only mutable state in a repository. Every mutation goes
//! through [`batch_cas`]: all touched refs are locked in sorted name order,
//! every observed old value is re-verified under lock, and only then are the
//! new values written. Within one repository the batch is all-or-nothing; a
//! single stale tip fails the whole batch with no ref modified.

use std::time::Duration;

use notedb_core::id::ObjectId;

use crate::layout::RepoLayout;
use crate::lockfile::LockFile;
use crate::StoreError;

const LOCK_WAIT: Duration = Duration::from_millis(500);

/// One staged ref mutation. `expected_old == None` asserts the ref must not
/// exist; `new == None` deletes the ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub name: String,
    pub expected_old: Option<ObjectId>,
    pub new: Option<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    /// Some ref's current value did not match the expected old value.
    /// Nothing was written.
    Conflict {
        name: String,
        expected: Option<ObjectId>,
        actual: Option<ObjectId>,
    },
}

/// Readers take no lock, so a ref must flip from one complete value to the
/// next in a single rename. Truncate-and-write would expose an empty or
/// partial file to a concurrent [`read_ref`].
fn persist_ref(path: &std::path::Path, target: &ObjectId) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap();
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(temp.path(), target.to_hex())?;
    temp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

pub fn read_ref(layout: &RepoLayout, name: &str) -> Result<Option<ObjectId>, StoreError> {
    let path = layout.refs_dir().join(name);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    let id = ObjectId::from_hex(content.trim())?;
    Ok(Some(id))
}

/// Unconditional write, bypassing CAS. Reserved for repository setup and
/// test fixtures; live entity refs must go through [`batch_cas`].
pub fn write_ref(layout: &RepoLayout, name: &str, target: &ObjectId) -> Result<(), StoreError> {
    let path = layout.refs_dir().join(name);
    persist_ref(&path, target)
}

pub fn list_refs(layout: &RepoLayout, prefix: &str) -> Result<Vec<(String, ObjectId)>, StoreError> {
    let base = layout.refs_dir().join(prefix);
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut results = Vec::new();
    collect_refs(&base, &layout.refs_dir(), &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn collect_refs(
    dir: &std::path::Path,
    refs_root: &std::path::Path,
    results: &mut Vec<(String, ObjectId)>,
) -> Result<(), StoreError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_refs(&path, refs_root, results)?;
        } else if path.is_file() {
            if path.extension().is_some_and(|e| e == "lock") {
                continue;
            }
            // in-flight temp files from persist_ref are dotfiles
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            if let Ok(id) = ObjectId::from_hex(content.trim()) {
                let rel = path
                    .strip_prefix(refs_root)
                    .unwrap()
                    .to_string_lossy()
                    .to_string();
                results.push((rel, id));
            }
        }
    }
    Ok(())
}

/// Single-ref CAS; a one-element [`batch_cas`].
pub fn cas_ref(
    layout: &RepoLayout,
    name: &str,
    expected_old: Option<ObjectId>,
    new: Option<ObjectId>,
) -> Result<CasOutcome, StoreError> {
    batch_cas(
        layout,
        &[RefUpdate {
            name: name.to_string(),
            expected_old,
            new,
        }],
    )
}

pub fn batch_cas(layout: &RepoLayout, updates: &[RefUpdate]) -> Result<CasOutcome, StoreError> {
    let mut ordered: Vec<&RefUpdate> = updates.iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name));
    for pair in ordered.windows(2) {
        if pair[0].name == pair[1].name {
            return Err(StoreError::DuplicateRefUpdate(pair[0].name.clone()));
        }
    }

    // Locks acquired in sorted name order so concurrent batches touching
    // overlapping ref sets cannot deadlock.
    let mut locks = Vec::with_capacity(ordered.len());
    for update in &ordered {
        let path = layout.refs_dir().join(&update.name);
        locks.push(LockFile::acquire_blocking(&path, LOCK_WAIT)?);
    }

    // Verify every observed tip under lock before writing anything.
    for update in &ordered {
        let actual = read_ref(layout, &update.name)?;
        if actual != update.expected_old {
            tracing::debug!(
                refname = %update.name,
                "ref CAS conflict: tip moved since it was observed"
            );
            return Ok(CasOutcome::Conflict {
                name: update.name.clone(),
                expected: update.expected_old,
                actual,
            });
        }
    }

    for update in &ordered {
        let path = layout.refs_dir().join(&update.name);
        match update.new {
            Some(id) => persist_ref(&path, &id)?,
            None => {
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
            }
        }
    }

    drop(locks);
    Ok(CasOutcome::Applied)
}
