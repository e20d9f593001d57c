use serde::{Deserialize, Serialize};

use crate::id::ObjectId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ident {
    pub name: String,
    pub email: String,
    pub when_ms: u64,
}

impl Ident {
    pub fn new(name: impl Into<String>, email: impl Into<String>, when_ms: u64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            when_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Ident,
    pub committer: Ident,
    pub message: String,
}
