mod bins;
mod catalog;
mod error;
mod id;
mod index;
mod paged_file;
mod query;
mod record;
mod schema;
mod tuple;

pub use catalog::{RelationManager, Setting};
pub use error::{error_kind, ErrorKind, StorageError};
pub use id::{PageNum, Rid};
pub use index::{BTreeCursor, BTreeIndex};
pub use paged_file::{create_file, destroy_file, Counters, FileHandle, PAGE_SIZE};
pub use query::{
    Condition, Filter, IndexNestedLoopJoin, IndexScan, Operand, Operator, Project, TableScan,
};
pub use record::{RecordScan, RecordStore};
pub use schema::{AttrType, Attribute, CompOp, Value};
pub use tuple::{decode_tuple, encode_tuple, format_tuple, tuple_size};
