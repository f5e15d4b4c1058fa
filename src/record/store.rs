use super::codec::{decode_field, decode_record, encode_record};
use super::page::{RecordPage, Slot, MAX_RECORD_SIZE};
use super::scan::RecordScan;
use crate::error::StorageError;
use crate::id::{PageNum, Rid};
use crate::paged_file::{self, FileHandle};
use crate::schema::{attribute_position, Attribute, CompOp, Value};
use crate::tuple::format_tuple;
use std::path::Path;

/// Heap file of variable-length records addressed by [`Rid`].
///
/// A rid stays valid across updates: when an updated record no longer fits
/// its page, it moves elsewhere and its original slot becomes a forward.
#[derive(Clone, Debug)]
pub struct RecordStore {
    file: FileHandle,
}

/// Where the bytes of a record actually live.
struct Located {
    page: RecordPage,
    offset: usize,
    length: usize,
}

impl RecordStore {
    /// Creates the file with one empty slotted page.
    pub fn create_file(path: &Path) -> anyhow::Result<()> {
        paged_file::create_file(path)?;
        let file = FileHandle::open(path)?;
        RecordPage::new().append(&file)?;
        file.close()
    }

    pub fn destroy_file(path: &Path) -> anyhow::Result<()> {
        paged_file::destroy_file(path)
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(FileHandle::open(path)?))
    }

    pub fn new(file: FileHandle) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &FileHandle {
        &self.file
    }

    pub fn close(self) -> anyhow::Result<()> {
        self.file.close()
    }

    pub fn insert_record(&self, attrs: &[Attribute], data: &[u8]) -> anyhow::Result<Rid> {
        let record = encode_record(attrs, data)?;
        if record.len() > MAX_RECORD_SIZE {
            return Err(StorageError::RecordTooLarge(record.len()).into());
        }
        let rid = self.insert_encoded(&record, false)?;
        log::trace!("insert record rid={rid} size={}", record.len());
        Ok(rid)
    }

    /// First-fit over existing pages, then a fresh page.
    fn insert_encoded(&self, record: &[u8], moved: bool) -> anyhow::Result<Rid> {
        let count = self.file.page_count()?;
        for page_num in 0..count {
            let mut page = RecordPage::load(&self.file, page_num)?;
            if let Some(slot) = page.insert(record, moved) {
                page.store(&self.file, page_num)?;
                return Ok(Rid::new(page_num, slot as u32));
            }
        }

        let mut page = RecordPage::new();
        let slot = page
            .insert(record, moved)
            .ok_or(StorageError::RecordTooLarge(record.len()))?;
        let page_num = page.append(&self.file)?;
        log::debug!("appended record page page={page_num}");
        Ok(Rid::new(page_num, slot as u32))
    }

    fn load_slot(&self, rid: Rid) -> anyhow::Result<(RecordPage, Slot)> {
        let page = RecordPage::load(&self.file, rid.page)?;
        match page.slot(rid.slot as usize) {
            None => Err(StorageError::SlotOutOfRange {
                page: rid.page,
                slot: rid.slot,
                count: page.slot_count() as u32,
            }
            .into()),
            Some(Slot::Empty) => Err(StorageError::RecordNotFound(rid).into()),
            Some(slot) => Ok((page, slot)),
        }
    }

    /// Resolves `rid` to its bytes, following at most one forward.
    fn locate(&self, rid: Rid) -> anyhow::Result<Located> {
        let (page, slot) = self.load_slot(rid)?;
        match slot {
            Slot::Direct { offset, length } => Ok(Located {
                page,
                offset,
                length,
            }),
            Slot::Forwarded(target) => {
                let (page, slot) = self.load_slot(target)?;
                let Slot::Moved { offset, length } = slot else {
                    return Err(StorageError::BrokenForward(rid).into());
                };
                Ok(Located {
                    page,
                    offset,
                    length,
                })
            }
            // moved bytes are only reachable through their forward
            Slot::Empty | Slot::Moved { .. } => Err(StorageError::RecordNotFound(rid).into()),
        }
    }

    pub fn read_record(&self, attrs: &[Attribute], rid: Rid) -> anyhow::Result<Vec<u8>> {
        let located = self.locate(rid)?;
        decode_record(attrs, located.page.read_at(located.offset, located.length))
    }

    /// Reads one named attribute. Fails when the attribute is absent or null.
    pub fn read_attribute(
        &self,
        attrs: &[Attribute],
        rid: Rid,
        name: &str,
    ) -> anyhow::Result<Value> {
        let index = attribute_position(attrs, name)?;
        let located = self.locate(rid)?;
        let stored = located.page.read_at(located.offset, located.length);
        decode_field(attrs, stored, index)?
            .ok_or_else(|| StorageError::NullAttribute(name.to_string()).into())
    }

    pub fn delete_record(&self, rid: Rid) -> anyhow::Result<()> {
        let (mut page, _) = self.load_slot(rid)?;
        self.release(&mut page, rid)?;
        page.set_slot(rid.slot as usize, Slot::Empty);
        page.store(&self.file, rid.page)?;
        log::trace!("delete record rid={rid}");
        Ok(())
    }

    /// Frees the bytes behind `rid`, which lives on `page`. A forwarded record
    /// is freed on its target page. The slot of `rid` itself is left to the caller.
    fn release(&self, page: &mut RecordPage, rid: Rid) -> anyhow::Result<()> {
        match page.slot(rid.slot as usize) {
            Some(Slot::Direct { .. }) => {
                page.remove(rid.slot as usize);
            }
            Some(Slot::Forwarded(target)) if target.page == rid.page => {
                if !matches!(page.slot(target.slot as usize), Some(Slot::Moved { .. })) {
                    return Err(StorageError::BrokenForward(rid).into());
                }
                page.remove(target.slot as usize);
            }
            Some(Slot::Forwarded(target)) => {
                let mut target_page = RecordPage::load(&self.file, target.page)?;
                if !matches!(target_page.slot(target.slot as usize), Some(Slot::Moved { .. })) {
                    return Err(StorageError::BrokenForward(rid).into());
                }
                target_page.remove(target.slot as usize);
                target_page.store(&self.file, target.page)?;
            }
            Some(Slot::Empty | Slot::Moved { .. }) | None => {
                return Err(StorageError::RecordNotFound(rid).into())
            }
        }
        Ok(())
    }

    /// Replaces the record at `rid`. The new bytes go back into the original
    /// page when they fit, otherwise they are inserted elsewhere and `rid`
    /// becomes a forward to them. Forwards never chain.
    pub fn update_record(&self, attrs: &[Attribute], data: &[u8], rid: Rid) -> anyhow::Result<()> {
        let record = encode_record(attrs, data)?;
        if record.len() > MAX_RECORD_SIZE {
            return Err(StorageError::RecordTooLarge(record.len()).into());
        }

        let (mut page, _) = self.load_slot(rid)?;
        self.release(&mut page, rid)?;
        page.set_slot(rid.slot as usize, Slot::Empty);

        if page.place(rid.slot as usize, &record) {
            page.store(&self.file, rid.page)?;
            log::trace!("update record in place rid={rid} size={}", record.len());
            return Ok(());
        }

        let target = self.insert_encoded(&record, true)?;
        page.set_slot(rid.slot as usize, Slot::Forwarded(target));
        page.store(&self.file, rid.page)?;
        log::debug!("forward record rid={rid} target={target}");
        Ok(())
    }

    pub fn print_record(attrs: &[Attribute], data: &[u8]) -> anyhow::Result<String> {
        format_tuple(attrs, data)
    }

    /// Starts a scan yielding `projection` of every live record that satisfies
    /// `condition_attr op value`. `value` may be `None` only for [`CompOp::NoOp`].
    pub fn scan(
        &self,
        attrs: &[Attribute],
        condition_attr: &str,
        op: CompOp,
        value: Option<&Value>,
        projection: &[&str],
    ) -> anyhow::Result<RecordScan> {
        RecordScan::new(
            self.file.clone(),
            attrs,
            condition_attr,
            op,
            value,
            projection,
        )
    }

    /// Free bytes on `page`, as the slotted page accounts them.
    pub fn free_space(&self, page: PageNum) -> anyhow::Result<usize> {
        Ok(RecordPage::load(&self.file, page)?.free_space())
    }
}
