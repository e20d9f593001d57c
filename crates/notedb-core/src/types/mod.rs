mod blob;
mod commit;
mod tree;

pub use blob::Blob;
pub use commit::{Commit, Ident};
pub use tree::{FileMode, Tree, TreeEntry};
