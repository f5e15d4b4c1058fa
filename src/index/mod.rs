mod cursor;
mod node;
mod tree;

pub use cursor::BTreeCursor;
pub use tree::BTreeIndex;
