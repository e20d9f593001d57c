use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CoreError;

const OBJECT_ID_PREFIX: &str = "ndb_";

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidObjectId(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidObjectId("expected 32 bytes".into()))?;
        Ok(Self(arr))
    }

    pub fn from_display(s: &str) -> Result<Self, CoreError> {
        let encoded = s.strip_prefix(OBJECT_ID_PREFIX).ok_or_else(|| {
            CoreError::InvalidObjectId(format!("missing prefix '{OBJECT_ID_PREFIX}'"))
        })?;
        let upper = encoded.to_uppercase();
        let bytes = BASE32_NOPAD
            .decode(upper.as_bytes())
            .map_err(|e| CoreError::InvalidObjectId(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidObjectId("expected 32 bytes".into()))?;
        Ok(Self(arr))
    }

    /// First 2 hex chars used for loose object directory sharding
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Remaining hex chars for the loose object filename
    pub fn shard_suffix(&self) -> String {
        hex::encode(&self.0[1..])
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = BASE32_NOPAD.encode(&self.0).to_lowercase();
        write!(f, "{OBJECT_ID_PREFIX}{encoded}")
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self)
    }
}

/// Sequence-allocated numeric change id. Monotonic, never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeId(u64);

impl ChangeId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Two low-order decimal digits, bounding ref directory fan-out.
    pub fn shard(&self) -> String {
        format!("{:02}", self.0 % 100)
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeId({})", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(u64);

impl AccountId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatchSetId {
    pub change_id: ChangeId,
    pub number: u32,
}

impl PatchSetId {
    pub fn new(change_id: ChangeId, number: u32) -> Self {
        Self { change_id, number }
    }
}

impl fmt::Display for PatchSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.change_id, self.number)
    }
}

impl fmt::Debug for PatchSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PatchSetId({})", self)
    }
}

/// Logical change identity carried as a commit message footer: `I` followed
/// by 40 lowercase hex digits. Stable across all patch sets of one change.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeKey(String);

impl ChangeKey {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if !Self::is_well_formed(s) {
            return Err(CoreError::InvalidChangeKey(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn is_well_formed(s: &str) -> bool {
        s.len() == 41
            && s.starts_with('I')
            && s[1..].bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
    }

    pub fn from_raw_hash(bytes: &[u8; 32]) -> Self {
        Self(format!("I{}", hex::encode(&bytes[..20])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeKey({})", self.0)
    }
}
