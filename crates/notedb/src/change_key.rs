//! Change key derivation. A commit message's trailing footer block may
//! carry `Change-Id: I<40 hex>`; when absent, a key is synthesized
//! deterministically from the commit's content so re-deriving it for the
//! same content always yields the same key.

use notedb_core::id::{ChangeKey, ObjectId};
use notedb_core::types::Ident;

pub const CHANGE_ID_FOOTER: &str = "Change-Id:";

/// Extracts a well-formed change key from the message's footer block.
/// Multiple footers: the last one wins, matching footer conventions.
pub fn from_message(message: &str) -> Option<ChangeKey> {
    let trimmed = message.trim_end_matches('\n');
    let footer_block = trimmed.rsplit("\n\n").next().unwrap_or(trimmed);
    let mut found = None;
    for line in footer_block.lines() {
        if let Some(value) = line.strip_prefix(CHANGE_ID_FOOTER) {
            let value = value.trim();
            if ChangeKey::is_well_formed(value) {
                found = Some(ChangeKey::parse(value).expect("checked well-formed"));
            }
        }
    }
    found
}

/// Synthesizes a key from commit content. Same tree, parents, author, and
/// message always produce the same key.
pub fn synthesize(
    tree: &ObjectId,
    parents: &[ObjectId],
    author: &Ident,
    message: &str,
) -> ChangeKey {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"notedb-change-key\0");
    hasher.update(tree.as_bytes());
    for parent in parents {
        hasher.update(parent.as_bytes());
    }
    hasher.update(author.name.as_bytes());
    hasher.update(b"\0");
    hasher.update(author.email.as_bytes());
    hasher.update(b"\0");
    hasher.update(&author.when_ms.to_le_bytes());
    hasher.update(message.as_bytes());
    ChangeKey::from_raw_hash(hasher.finalize().as_bytes())
}

/// Ensures the message carries the given key as its final footer,
/// appending one if absent. A message already carrying the key is returned
/// unchanged apart from newline normalization.
pub fn ensure_footer(message: &str, key: &ChangeKey) -> String {
    if from_message(message).as_ref() == Some(key) {
        let mut out = message.trim_end_matches('\n').to_string();
        out.push('\n');
        return out;
    }
    let body = message.trim_end_matches('\n');
    format!("{body}\n\n{CHANGE_ID_FOOTER} {key}\n")
}

/// The caller-supplied footer when present, a synthesized one otherwise.
pub fn derive(
    message: &str,
    tree: &ObjectId,
    parents: &[ObjectId],
    author: &Ident,
) -> ChangeKey {
    from_message(message).unwrap_or_else(|| synthesize(tree, parents, author, message))
}
