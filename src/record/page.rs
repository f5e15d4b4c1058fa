use crate::bins::{const_assert, range_size, SliceExt};
use crate::id::{PageNum, Rid};
use crate::paged_file::{FileHandle, PAGE_SIZE};
use std::ops::Range;

const HEADER_SIZE: usize = 4;
const HEADER_FREE_OFFSET_RANGE: Range<usize> = 0..2;
const HEADER_SLOT_COUNT_RANGE: Range<usize> = 2..4;

const SLOT_SIZE: usize = 8;
const SLOT_OFFSET_RANGE: Range<usize> = 0..4;
const SLOT_LENGTH_RANGE: Range<usize> = 4..8;
const SLOT_MOVED_FLAG: u32 = 0x8000_0000;

/// Largest stored record a fresh page can take.
pub(crate) const MAX_RECORD_SIZE: usize = PAGE_SIZE - HEADER_SIZE - SLOT_SIZE;

const_assert!(HEADER_FREE_OFFSET_RANGE.end <= HEADER_SIZE);
const_assert!(range_size(HEADER_FREE_OFFSET_RANGE) == 2);
const_assert!(HEADER_SLOT_COUNT_RANGE.end <= HEADER_SIZE);
const_assert!(range_size(HEADER_SLOT_COUNT_RANGE) == 2);
const_assert!(range_size(SLOT_OFFSET_RANGE) == 4);
const_assert!(range_size(SLOT_LENGTH_RANGE) == 4);
const_assert!(SLOT_LENGTH_RANGE.end <= SLOT_SIZE);
const_assert!(PAGE_SIZE <= u16::MAX as usize);

/// Decoded slot directory entry.
///
/// On disk `(0, 0)` is a free slot, a negative offset is a forward to
/// `(length, -offset - 1)` and anything else is `length` live bytes at `offset`.
/// Bytes that were moved here by a forward carry the high bit of `length`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slot {
    Empty,
    Direct { offset: usize, length: usize },
    /// Bytes of a record whose rid is a forward on another slot.
    Moved { offset: usize, length: usize },
    Forwarded(Rid),
}

impl Slot {
    fn decode(entry: &[u8]) -> Self {
        let offset = entry[SLOT_OFFSET_RANGE].read_i32();
        let length = entry[SLOT_LENGTH_RANGE].read_u32();
        if offset < 0 {
            Slot::Forwarded(Rid::new(length, offset.unsigned_abs() - 1))
        } else if offset == 0 && length == 0 {
            Slot::Empty
        } else if length & SLOT_MOVED_FLAG != 0 {
            Slot::Moved {
                offset: offset as usize,
                length: (length & !SLOT_MOVED_FLAG) as usize,
            }
        } else {
            Slot::Direct {
                offset: offset as usize,
                length: length as usize,
            }
        }
    }

    fn encode(self, entry: &mut [u8]) {
        let (offset, length) = match self {
            Slot::Empty => (0, 0),
            Slot::Direct { offset, length } => (offset as i32, length as u32),
            Slot::Moved { offset, length } => (offset as i32, length as u32 | SLOT_MOVED_FLAG),
            Slot::Forwarded(rid) => (-(rid.slot as i32) - 1, rid.page),
        };
        entry[SLOT_OFFSET_RANGE].write_i32(offset);
        entry[SLOT_LENGTH_RANGE].write_u32(length);
    }
}

/// A slotted page. The slot directory grows up from the header while record
/// bytes are allocated down from the end of the page; `free_offset` is the
/// lowest byte in use by records.
pub(crate) struct RecordPage {
    buf: Box<[u8; PAGE_SIZE]>,
}

impl RecordPage {
    pub(crate) fn new() -> Self {
        let mut page = Self {
            buf: Box::new([0u8; PAGE_SIZE]),
        };
        page.set_free_offset(PAGE_SIZE);
        page
    }

    pub(crate) fn load(file: &FileHandle, page: PageNum) -> anyhow::Result<Self> {
        let mut buf = Box::new([0u8; PAGE_SIZE]);
        file.read_page(page, &mut buf)?;
        Ok(Self { buf })
    }

    pub(crate) fn store(&self, file: &FileHandle, page: PageNum) -> anyhow::Result<()> {
        file.write_page(page, &self.buf)
    }

    pub(crate) fn append(&self, file: &FileHandle) -> anyhow::Result<PageNum> {
        file.append_page(&self.buf)
    }

    pub(crate) fn free_offset(&self) -> usize {
        self.buf[HEADER_FREE_OFFSET_RANGE].read_u16() as usize
    }

    fn set_free_offset(&mut self, offset: usize) {
        self.buf[HEADER_FREE_OFFSET_RANGE].write_u16(offset as u16);
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.buf[HEADER_SLOT_COUNT_RANGE].read_u16() as usize
    }

    fn set_slot_count(&mut self, count: usize) {
        self.buf[HEADER_SLOT_COUNT_RANGE].write_u16(count as u16);
    }

    /// Bytes between the end of the slot directory and the record heap.
    pub(crate) fn free_space(&self) -> usize {
        self.free_offset()
            .saturating_sub(HEADER_SIZE + SLOT_SIZE * self.slot_count())
    }

    fn slot_range(slot: usize) -> Range<usize> {
        let start = HEADER_SIZE + SLOT_SIZE * slot;
        start..start + SLOT_SIZE
    }

    pub(crate) fn slot(&self, slot: usize) -> Option<Slot> {
        if slot >= self.slot_count() {
            return None;
        }
        Some(Slot::decode(&self.buf[Self::slot_range(slot)]))
    }

    pub(crate) fn set_slot(&mut self, slot: usize, entry: Slot) {
        assert!(slot < self.slot_count(), "slot {slot} is not in the directory");
        entry.encode(&mut self.buf[Self::slot_range(slot)]);
    }

    fn free_slot(&self) -> Option<usize> {
        (0..self.slot_count()).find(|i| self.slot(*i) == Some(Slot::Empty))
    }

    pub(crate) fn read_at(&self, offset: usize, length: usize) -> &[u8] {
        &self.buf[offset..offset + length]
    }

    pub(crate) fn write_at(&mut self, offset: usize, bytes: &[u8]) {
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Whether a new record of `size` bytes fits along with one more slot entry.
    pub(crate) fn can_hold(&self, size: usize) -> bool {
        self.free_space() >= size + SLOT_SIZE
    }

    /// Stores `record` in the lowest free slot or a new one. Returns `None` when
    /// the page has no room. `moved` marks the target of a forward.
    pub(crate) fn insert(&mut self, record: &[u8], moved: bool) -> Option<usize> {
        if !self.can_hold(record.len()) {
            return None;
        }
        let slot = match self.free_slot() {
            Some(slot) => slot,
            None => {
                let slot = self.slot_count();
                self.set_slot_count(slot + 1);
                slot
            }
        };
        let offset = self.allocate(record);
        let length = record.len();
        let entry = if moved {
            Slot::Moved { offset, length }
        } else {
            Slot::Direct { offset, length }
        };
        self.set_slot(slot, entry);
        Some(slot)
    }

    /// Stores `record` under an existing slot. Returns false when it does not fit.
    pub(crate) fn place(&mut self, slot: usize, record: &[u8]) -> bool {
        if self.free_space() < record.len() {
            return false;
        }
        let offset = self.allocate(record);
        let length = record.len();
        self.set_slot(slot, Slot::Direct { offset, length });
        true
    }

    fn allocate(&mut self, record: &[u8]) -> usize {
        let offset = self.free_offset() - record.len();
        self.write_at(offset, record);
        self.set_free_offset(offset);
        offset
    }

    /// Drops the bytes under `slot`, compacting the heap. The slot becomes free.
    pub(crate) fn remove(&mut self, slot: usize) -> Option<usize> {
        let (offset, length) = match self.slot(slot) {
            Some(Slot::Direct { offset, length } | Slot::Moved { offset, length }) => {
                (offset, length)
            }
            _ => return None,
        };
        self.compact(offset, length);
        self.set_slot(slot, Slot::Empty);
        Some(length)
    }

    /// Closes the gap left by `length` bytes at `offset`. Records below the gap
    /// move up and their slot entries follow them.
    pub(crate) fn compact(&mut self, offset: usize, length: usize) {
        let free_offset = self.free_offset();
        self.buf.copy_within(free_offset..offset, free_offset + length);
        self.buf[free_offset..free_offset + length].fill(0);

        for i in 0..self.slot_count() {
            let moved = match self.slot(i) {
                Some(Slot::Direct { offset: other, length: other_length }) if other < offset => {
                    Slot::Direct {
                        offset: other + length,
                        length: other_length,
                    }
                }
                Some(Slot::Moved { offset: other, length: other_length }) if other < offset => {
                    Slot::Moved {
                        offset: other + length,
                        length: other_length,
                    }
                }
                _ => continue,
            };
            self.set_slot(i, moved);
        }
        self.set_free_offset(free_offset + length);
    }
}
