//! Tree merging for merge patch sets. Conflicts are detected before any
//! marker blob is written, so a disallowed conflict aborts with zero new
//! objects for the merged tree.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use notedb_core::id::ObjectId;
use notedb_core::types::FileMode;
use notedb_store::tree::{build_tree_from_flat, flatten_tree};
use notedb_store::NoteDbRepo;

use crate::{EngineError, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Per-file three-way merge against the common ancestor.
    ThreeWay,
    /// Take our side wholesale, ignoring theirs.
    Ours,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub tree: ObjectId,
    /// Paths written with conflict markers; empty for a clean merge.
    pub conflicts: Vec<String>,
}

/// Lowest common ancestor of two commits via lockstep BFS over parents.
pub fn find_merge_base(
    repo: &NoteDbRepo,
    left: &ObjectId,
    right: &ObjectId,
) -> Result<Option<ObjectId>, EngineError> {
    if left == right {
        return Ok(Some(*left));
    }

    let mut left_ancestors: HashSet<ObjectId> = HashSet::new();
    let mut right_ancestors: HashSet<ObjectId> = HashSet::new();
    let mut left_queue: VecDeque<ObjectId> = VecDeque::new();
    let mut right_queue: VecDeque<ObjectId> = VecDeque::new();

    left_ancestors.insert(*left);
    right_ancestors.insert(*right);
    left_queue.push_back(*left);
    right_queue.push_back(*right);

    while !left_queue.is_empty() || !right_queue.is_empty() {
        if let Some(id) = left_queue.pop_front() {
            if right_ancestors.contains(&id) {
                return Ok(Some(id));
            }
            let commit = repo.parse_commit(&id)?;
            for parent in &commit.parents {
                if left_ancestors.insert(*parent) {
                    left_queue.push_back(*parent);
                }
            }
        }
        if let Some(id) = right_queue.pop_front() {
            if left_ancestors.contains(&id) {
                return Ok(Some(id));
            }
            let commit = repo.parse_commit(&id)?;
            for parent in &commit.parents {
                if right_ancestors.insert(*parent) {
                    right_queue.push_back(*parent);
                }
            }
        }
    }
    Ok(None)
}

/// Merges the trees of two commits. With `allow_conflicts` unset, any real
/// conflict fails validation before marker content is written; with it set,
/// conflicting files carry markers and the conflicted paths are reported
/// for the caller's provenance record.
pub fn merge_commits(
    repo: &NoteDbRepo,
    ours: &ObjectId,
    theirs: &ObjectId,
    strategy: MergeStrategy,
    allow_conflicts: bool,
) -> Result<MergeOutcome, EngineError> {
    let ours_commit = repo.parse_commit(ours)?;
    let theirs_commit = repo.parse_commit(theirs)?;

    if strategy == MergeStrategy::Ours {
        return Ok(MergeOutcome {
            tree: ours_commit.tree,
            conflicts: Vec::new(),
        });
    }

    let base_tree = match find_merge_base(repo, ours, theirs)? {
        Some(base) => Some(repo.parse_commit(&base)?.tree),
        None => None,
    };
    let base_map = match &base_tree {
        Some(tree) => flatten_tree(repo, tree)?,
        None => BTreeMap::new(),
    };
    let ours_map = flatten_tree(repo, &ours_commit.tree)?;
    let theirs_map = flatten_tree(repo, &theirs_commit.tree)?;

    let mut paths: BTreeSet<&String> = BTreeSet::new();
    paths.extend(base_map.keys());
    paths.extend(ours_map.keys());
    paths.extend(theirs_map.keys());

    enum Resolution {
        Keep(Option<(ObjectId, FileMode)>),
        Conflict,
    }

    let mut resolutions: BTreeMap<String, Resolution> = BTreeMap::new();
    let mut conflicts: Vec<String> = Vec::new();
    for path in paths {
        let b = base_map.get(path).copied();
        let o = ours_map.get(path).copied();
        let t = theirs_map.get(path).copied();
        let resolution = if o == t {
            Resolution::Keep(o)
        } else if t == b {
            Resolution::Keep(o)
        } else if o == b {
            Resolution::Keep(t)
        } else {
            conflicts.push(path.clone());
            Resolution::Conflict
        };
        resolutions.insert(path.clone(), resolution);
    }

    if !conflicts.is_empty() && !allow_conflicts {
        return Err(ValidationError::MergeConflicts { paths: conflicts }.into());
    }

    let mut merged: BTreeMap<String, (ObjectId, FileMode)> = BTreeMap::new();
    for (path, resolution) in resolutions {
        match resolution {
            Resolution::Keep(Some(entry)) => {
                merged.insert(path, entry);
            }
            Resolution::Keep(None) => {}
            Resolution::Conflict => {
                let o = ours_map.get(&path).copied();
                let t = theirs_map.get(&path).copied();
                let content = conflict_markers(repo, o.map(|(id, _)| id), t.map(|(id, _)| id))?;
                let blob = repo.insert_blob(&content)?;
                let mode = o.or(t).map(|(_, m)| m).unwrap_or(FileMode::Regular);
                merged.insert(path, (blob, mode));
            }
        }
    }

    let tree = build_tree_from_flat(repo, &merged)?;
    Ok(MergeOutcome { tree, conflicts })
}

fn conflict_markers(
    repo: &NoteDbRepo,
    ours: Option<ObjectId>,
    theirs: Option<ObjectId>,
) -> Result<Vec<u8>, EngineError> {
    let mut out = Vec::new();
    out.extend_from_slice(b"<<<<<<< ours\n");
    append_side(repo, ours, &mut out)?;
    out.extend_from_slice(b"=======\n");
    append_side(repo, theirs, &mut out)?;
    out.extend_from_slice(b">>>>>>> theirs\n");
    Ok(out)
}

fn append_side(
    repo: &NoteDbRepo,
    blob: Option<ObjectId>,
    out: &mut Vec<u8>,
) -> Result<(), EngineError> {
    if let Some(id) = blob {
        let data = repo.parse_blob(&id)?;
        out.extend_from_slice(&data);
        if !data.is_empty() && !data.ends_with(b"\n") {
            out.push(b'\n');
        }
    }
    Ok(())
}
