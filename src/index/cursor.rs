use super::node::Node;
use crate::error::StorageError;
use crate::id::Rid;
use crate::paged_file::FileHandle;
use crate::schema::{AttrType, Value};

/// Key bounds of a range scan. A `None` bound is unbounded.
pub(crate) struct KeyRange {
    pub(crate) low: Option<Value>,
    pub(crate) low_inclusive: bool,
    pub(crate) high: Option<Value>,
    pub(crate) high_inclusive: bool,
}

/// Range scan over the leaf chain of a [`BTreeIndex`](super::BTreeIndex).
pub struct BTreeCursor {
    file: FileHandle,
    attr_type: AttrType,
    range: KeyRange,
    leaf: Option<Node>,
    index: usize,
}

impl BTreeCursor {
    /// Starts at entry `index` of `leaf`, the first leaf that may hold the low bound.
    pub(crate) fn new(
        file: FileHandle,
        attr_type: AttrType,
        range: KeyRange,
        leaf: Node,
        index: usize,
    ) -> Self {
        Self {
            file,
            attr_type,
            range,
            leaf: Some(leaf),
            index,
        }
    }

    /// Returns the next `(rid, key)` inside the range in key order, or `None`
    /// past the high bound or the last leaf.
    pub fn next_entry(&mut self) -> anyhow::Result<Option<(Rid, Value)>> {
        loop {
            let Some(leaf) = self.leaf.as_ref() else {
                return Ok(None);
            };
            if self.index >= leaf.count() {
                let next = leaf.next();
                self.index = 0;
                self.leaf = if next == 0 {
                    None
                } else {
                    let node = Node::load(&self.file, next)?;
                    if !node.is_leaf() {
                        return Err(StorageError::CorruptPage(next).into());
                    }
                    Some(node)
                };
                continue;
            }

            let key = leaf.key(self.attr_type, self.index)?;
            let rid = leaf.rid(self.index);
            self.index += 1;

            if let Some(low) = &self.range.low {
                let ord = key.key_cmp(low);
                if ord.is_lt() || (ord.is_eq() && !self.range.low_inclusive) {
                    continue;
                }
            }
            if let Some(high) = &self.range.high {
                let ord = key.key_cmp(high);
                if ord.is_gt() || (ord.is_eq() && !self.range.high_inclusive) {
                    self.leaf = None;
                    return Ok(None);
                }
            }
            return Ok(Some((rid, key)));
        }
    }

    pub fn close(self) {}
}

impl Iterator for BTreeCursor {
    type Item = anyhow::Result<(Rid, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}
