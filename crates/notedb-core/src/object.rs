use serde::{Deserialize, Serialize};

use crate::types::*;
use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TypeTag {
    Blob = 0x01,
    Tree = 0x02,
    Commit = 0x03,
}

impl TypeTag {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Blob),
            0x02 => Some(Self::Tree),
            0x03 => Some(Self::Commit),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
}

impl Object {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Object::Blob(_) => TypeTag::Blob,
            Object::Tree(_) => TypeTag::Tree,
            Object::Commit(_) => TypeTag::Commit,
        }
    }

    /// Serialize to canonical JSON. Tree entries are kept sorted by the
    /// writer, so equal objects encode to equal bytes.
    pub fn serialize_payload(&self) -> Result<Vec<u8>, CoreError> {
        let value = match self {
            Object::Blob(b) => serde_json::to_vec(b),
            Object::Tree(t) => serde_json::to_vec(t),
            Object::Commit(c) => serde_json::to_vec(c),
        };
        value.map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn deserialize_payload(type_tag: TypeTag, data: &[u8]) -> Result<Self, CoreError> {
        let obj = match type_tag {
            TypeTag::Blob => Object::Blob(
                serde_json::from_slice(data)
                    .map_err(|e| CoreError::Deserialization(e.to_string()))?,
            ),
            TypeTag::Tree => Object::Tree(
                serde_json::from_slice(data)
                    .map_err(|e| CoreError::Deserialization(e.to_string()))?,
            ),
            TypeTag::Commit => Object::Commit(
                serde_json::from_slice(data)
                    .map_err(|e| CoreError::Deserialization(e.to_string()))?,
            ),
        };
        Ok(obj)
    }
}
