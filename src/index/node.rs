use crate::bins::{const_assert, range_size, SliceExt};
use crate::error::StorageError;
use crate::id::{PageNum, Rid};
use crate::paged_file::{FileHandle, PAGE_SIZE};
use crate::schema::{AttrType, Value};
use std::ops::Range;

const KIND_INDEX: usize = 0;
const KIND_LEAF: u8 = 0;
const KIND_INTERIOR: u8 = 1;

const INTERIOR_HEADER_COUNT_RANGE: Range<usize> = 1..5;
const INTERIOR_HEADER_FREE_OFFSET_RANGE: Range<usize> = 5..9;
const INTERIOR_HEADER_LEFT_RANGE: Range<usize> = 9..13;
const INTERIOR_ENTRIES_START: usize = 13;
const INTERIOR_ENTRY_SIZE: usize = 8;
const INTERIOR_ENTRY_CHILD_RANGE: Range<usize> = 4..8;

const LEAF_HEADER_PREV_RANGE: Range<usize> = 1..5;
const LEAF_HEADER_NEXT_RANGE: Range<usize> = 5..9;
const LEAF_HEADER_COUNT_RANGE: Range<usize> = 9..13;
const LEAF_HEADER_FREE_OFFSET_RANGE: Range<usize> = 13..17;
const LEAF_ENTRIES_START: usize = 17;
const LEAF_ENTRY_SIZE: usize = 12;
const LEAF_ENTRY_RID_RANGE: Range<usize> = 4..12;

const ENTRY_KEY_RANGE: Range<usize> = 0..4;
const VARCHAR_LEN_SIZE: usize = 4;

/// Longest varchar key. Any entry then takes at most a quarter of a page,
/// so both halves of a split always fit.
pub(crate) const MAX_KEY_SIZE: usize = PAGE_SIZE / 4 - LEAF_ENTRY_SIZE - VARCHAR_LEN_SIZE;

const_assert!(INTERIOR_HEADER_LEFT_RANGE.end == INTERIOR_ENTRIES_START);
const_assert!(range_size(INTERIOR_HEADER_COUNT_RANGE) == 4);
const_assert!(range_size(INTERIOR_HEADER_FREE_OFFSET_RANGE) == 4);
const_assert!(range_size(INTERIOR_HEADER_LEFT_RANGE) == 4);
const_assert!(INTERIOR_ENTRY_CHILD_RANGE.end == INTERIOR_ENTRY_SIZE);
const_assert!(LEAF_HEADER_FREE_OFFSET_RANGE.end == LEAF_ENTRIES_START);
const_assert!(range_size(LEAF_HEADER_PREV_RANGE) == 4);
const_assert!(range_size(LEAF_HEADER_NEXT_RANGE) == 4);
const_assert!(range_size(LEAF_HEADER_COUNT_RANGE) == 4);
const_assert!(LEAF_ENTRY_RID_RANGE.end == LEAF_ENTRY_SIZE);
const_assert!(range_size(ENTRY_KEY_RANGE) == 4);

struct Layout {
    count: Range<usize>,
    free_offset: Range<usize>,
    entries_start: usize,
    entry_size: usize,
}

static INTERIOR_LAYOUT: Layout = Layout {
    count: INTERIOR_HEADER_COUNT_RANGE,
    free_offset: INTERIOR_HEADER_FREE_OFFSET_RANGE,
    entries_start: INTERIOR_ENTRIES_START,
    entry_size: INTERIOR_ENTRY_SIZE,
};

static LEAF_LAYOUT: Layout = Layout {
    count: LEAF_HEADER_COUNT_RANGE,
    free_offset: LEAF_HEADER_FREE_OFFSET_RANGE,
    entries_start: LEAF_ENTRIES_START,
    entry_size: LEAF_ENTRY_SIZE,
};

/// One B+-tree page.
///
/// Entries are fixed-size and sorted, packed right after the header. The
/// first four bytes of an entry hold the key itself for ints and reals, or
/// the page offset of a `len u32 + bytes` heap cell for varchars. The heap
/// grows down from the end of the page; `free_offset` is its lowest byte.
pub(crate) struct Node {
    buf: Box<[u8; PAGE_SIZE]>,
}

impl Node {
    pub(crate) fn new_leaf(prev: PageNum, next: PageNum) -> Self {
        let mut node = Self::empty(KIND_LEAF);
        node.set_prev(prev);
        node.set_next(next);
        node
    }

    pub(crate) fn new_interior(left: PageNum) -> Self {
        let mut node = Self::empty(KIND_INTERIOR);
        node.buf[INTERIOR_HEADER_LEFT_RANGE].write_u32(left);
        node
    }

    fn empty(kind: u8) -> Self {
        let mut node = Self {
            buf: Box::new([0u8; PAGE_SIZE]),
        };
        node.buf[KIND_INDEX] = kind;
        node.set_free_offset(PAGE_SIZE);
        node
    }

    pub(crate) fn load(file: &FileHandle, page: PageNum) -> anyhow::Result<Self> {
        let mut buf = Box::new([0u8; PAGE_SIZE]);
        file.read_page(page, &mut buf)?;
        let node = Self { buf };

        let layout = node.layout();
        let valid = matches!(node.buf[KIND_INDEX], KIND_LEAF | KIND_INTERIOR)
            && node.free_offset() <= PAGE_SIZE
            && layout.entries_start + layout.entry_size * node.count() <= node.free_offset();
        if !valid {
            return Err(StorageError::CorruptPage(page).into());
        }
        Ok(node)
    }

    pub(crate) fn store(&self, file: &FileHandle, page: PageNum) -> anyhow::Result<()> {
        file.write_page(page, &self.buf)
    }

    pub(crate) fn append(&self, file: &FileHandle) -> anyhow::Result<PageNum> {
        file.append_page(&self.buf)
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.buf[KIND_INDEX] == KIND_LEAF
    }

    fn layout(&self) -> &'static Layout {
        if self.is_leaf() {
            &LEAF_LAYOUT
        } else {
            &INTERIOR_LAYOUT
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.buf[self.layout().count.clone()].read_u32() as usize
    }

    fn set_count(&mut self, count: usize) {
        let range = self.layout().count.clone();
        self.buf[range].write_u32(count as u32);
    }

    fn free_offset(&self) -> usize {
        self.buf[self.layout().free_offset.clone()].read_u32() as usize
    }

    fn set_free_offset(&mut self, offset: usize) {
        let range = self.layout().free_offset.clone();
        self.buf[range].write_u32(offset as u32);
    }

    pub(crate) fn free_space(&self) -> usize {
        let layout = self.layout();
        self.free_offset() - layout.entries_start - layout.entry_size * self.count()
    }

    /// Bytes available to entries and key heap on an empty page.
    pub(crate) fn capacity(&self) -> usize {
        PAGE_SIZE - self.layout().entries_start
    }

    /// Bytes an entry for `key` takes, including its heap cell.
    pub(crate) fn footprint(&self, key: &Value) -> usize {
        self.layout().entry_size + heap_size(key)
    }

    fn entry_range(&self, i: usize) -> Range<usize> {
        let layout = self.layout();
        let start = layout.entries_start + layout.entry_size * i;
        start..start + layout.entry_size
    }

    pub(crate) fn key(&self, attr_type: AttrType, i: usize) -> anyhow::Result<Value> {
        assert!(i < self.count(), "key index {i} out of bound");
        let field = &self.buf[self.entry_range(i)][ENTRY_KEY_RANGE];
        let value = match attr_type {
            AttrType::Int => Value::Int(field.read_i32()),
            AttrType::Real => Value::Real(field.read_f32()),
            AttrType::VarChar => {
                let offset = field.read_u32() as usize;
                let Some(cell) = self.buf.get(offset..offset + VARCHAR_LEN_SIZE) else {
                    return Err(StorageError::Malformed("key heap offset out of bounds").into());
                };
                let start = offset + VARCHAR_LEN_SIZE;
                let Some(bytes) = self.buf.get(start..start + cell.read_u32() as usize) else {
                    return Err(StorageError::Malformed("key heap cell out of bounds").into());
                };
                Value::VarChar(bytes.to_vec())
            }
        };
        Ok(value)
    }

    fn payload(&self, i: usize) -> &[u8] {
        &self.buf[self.entry_range(i)][ENTRY_KEY_RANGE.end..]
    }

    /// All entries as `(key, payload)`, where the payload is the rid of a
    /// leaf entry or the right child of an interior entry.
    pub(crate) fn entries(&self, attr_type: AttrType) -> anyhow::Result<Vec<(Value, Vec<u8>)>> {
        (0..self.count())
            .map(|i| Ok((self.key(attr_type, i)?, self.payload(i).to_vec())))
            .collect()
    }

    /// Number of entries whose key is strictly less than `key`. A `None` key
    /// sorts before everything.
    pub(crate) fn lower_bound(
        &self,
        attr_type: AttrType,
        key: Option<&Value>,
    ) -> anyhow::Result<usize> {
        let Some(key) = key else {
            return Ok(0);
        };
        let mut i = 0;
        while i < self.count() && self.key(attr_type, i)?.key_cmp(key).is_lt() {
            i += 1;
        }
        Ok(i)
    }

    /// Number of entries whose key is less than or equal to `key`.
    pub(crate) fn upper_bound(&self, attr_type: AttrType, key: &Value) -> anyhow::Result<usize> {
        let mut i = 0;
        while i < self.count() && self.key(attr_type, i)?.key_cmp(key).is_le() {
            i += 1;
        }
        Ok(i)
    }

    /// Inserts an entry at position `i`. Returns false when the page is full.
    pub(crate) fn try_insert(&mut self, i: usize, key: &Value, payload: &[u8]) -> bool {
        let count = self.count();
        assert!(i <= count, "insert index {i} out of bound, count={count}");
        assert_eq!(self.layout().entry_size - ENTRY_KEY_RANGE.end, payload.len());
        if self.free_space() < self.footprint(key) {
            return false;
        }

        let key_field = match key {
            Value::Int(v) => v.to_ne_bytes(),
            Value::Real(v) => v.to_ne_bytes(),
            Value::VarChar(bytes) => {
                let offset = self.free_offset() - heap_size(key);
                self.buf[offset..].write_u32(bytes.len() as u32);
                let start = offset + VARCHAR_LEN_SIZE;
                self.buf[start..start + bytes.len()].copy_from_slice(bytes);
                self.set_free_offset(offset);
                (offset as u32).to_ne_bytes()
            }
        };

        let start = self.entry_range(i).start;
        let end = self.entry_range(count).start;
        let entry_size = self.layout().entry_size;
        self.buf.copy_within(start..end, start + entry_size);
        let entry = &mut self.buf[start..start + entry_size];
        entry[ENTRY_KEY_RANGE].copy_from_slice(&key_field);
        entry[ENTRY_KEY_RANGE.end..].copy_from_slice(payload);
        self.set_count(count + 1);
        true
    }

    /// Removes entry `i`. The key heap is compacted so that free space stays
    /// one contiguous region.
    pub(crate) fn remove(&mut self, attr_type: AttrType, i: usize) {
        let count = self.count();
        assert!(i < count, "remove index {i} out of bound, count={count}");

        if attr_type == AttrType::VarChar {
            let offset = self.buf[self.entry_range(i)][ENTRY_KEY_RANGE].read_u32() as usize;
            let size = VARCHAR_LEN_SIZE + self.buf[offset..].read_u32() as usize;
            let free_offset = self.free_offset();
            self.buf.copy_within(free_offset..offset, free_offset + size);
            self.buf[free_offset..free_offset + size].fill(0);

            for j in (0..count).filter(|j| *j != i) {
                let range = self.entry_range(j);
                let other = self.buf[range.clone()][ENTRY_KEY_RANGE].read_u32() as usize;
                if other < offset {
                    self.buf[range][ENTRY_KEY_RANGE].write_u32((other + size) as u32);
                }
            }
            self.set_free_offset(free_offset + size);
        }

        let start = self.entry_range(i).start;
        let end = self.entry_range(count).start;
        let entry_size = self.layout().entry_size;
        self.buf.copy_within(start + entry_size..end, start);
        self.buf[end - entry_size..end].fill(0);
        self.set_count(count - 1);
    }

    pub(crate) fn rid(&self, i: usize) -> Rid {
        debug_assert!(self.is_leaf());
        Rid::from_ne_bytes(&self.buf[self.entry_range(i)][LEAF_ENTRY_RID_RANGE])
    }

    pub(crate) fn prev(&self) -> PageNum {
        self.buf[LEAF_HEADER_PREV_RANGE].read_u32()
    }

    pub(crate) fn set_prev(&mut self, page: PageNum) {
        self.buf[LEAF_HEADER_PREV_RANGE].write_u32(page);
    }

    /// Next leaf in key order, 0 at the end of the chain.
    pub(crate) fn next(&self) -> PageNum {
        self.buf[LEAF_HEADER_NEXT_RANGE].read_u32()
    }

    pub(crate) fn set_next(&mut self, page: PageNum) {
        self.buf[LEAF_HEADER_NEXT_RANGE].write_u32(page);
    }

    pub(crate) fn left_child(&self) -> PageNum {
        self.buf[INTERIOR_HEADER_LEFT_RANGE].read_u32()
    }

    /// Child `i` of an interior node: the left child for 0, otherwise the
    /// right child of entry `i - 1`.
    pub(crate) fn child(&self, i: usize) -> PageNum {
        debug_assert!(!self.is_leaf());
        if i == 0 {
            self.left_child()
        } else {
            self.buf[self.entry_range(i - 1)][INTERIOR_ENTRY_CHILD_RANGE].read_u32()
        }
    }
}

fn heap_size(key: &Value) -> usize {
    match key {
        Value::VarChar(bytes) => VARCHAR_LEN_SIZE + bytes.len(),
        _ => 0,
    }
}
