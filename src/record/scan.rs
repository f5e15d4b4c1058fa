use super::codec::{decode_field, decode_values};
use super::page::{RecordPage, Slot};
use crate::error::StorageError;
use crate::id::{PageNum, Rid};
use crate::paged_file::FileHandle;
use crate::schema::{attribute_position, Attribute, CompOp, Value};
use crate::tuple::encode_tuple;

/// Forward-only scan over the live records of a record file.
///
/// Every record is reported once under the rid it was inserted with: a forward
/// is followed to the moved bytes and the moved slot itself is skipped. The
/// page count is fixed when the scan starts.
pub struct RecordScan {
    file: FileHandle,
    attrs: Vec<Attribute>,
    condition: Option<(usize, CompOp, Value)>,
    projection: Vec<usize>,
    projected_attrs: Vec<Attribute>,
    page_count: PageNum,
    page_num: PageNum,
    slot: usize,
    page: Option<RecordPage>,
}

impl RecordScan {
    pub(crate) fn new(
        file: FileHandle,
        attrs: &[Attribute],
        condition_attr: &str,
        op: CompOp,
        value: Option<&Value>,
        projection: &[&str],
    ) -> anyhow::Result<Self> {
        let condition = match (op, value) {
            (CompOp::NoOp, _) => None,
            (op, Some(value)) => {
                let index = attribute_position(attrs, condition_attr)?;
                value.check_type(&attrs[index])?;
                Some((index, op, value.clone()))
            }
            (op, None) => {
                return Err(StorageError::InvalidArgument(format!(
                    "comparison {op:?} on {condition_attr:?} needs a value"
                ))
                .into());
            }
        };

        let projection = projection
            .iter()
            .map(|name| attribute_position(attrs, name))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let projected_attrs = projection.iter().map(|i| attrs[*i].clone()).collect();

        Ok(Self {
            page_count: file.page_count()?,
            file,
            attrs: attrs.to_vec(),
            condition,
            projection,
            projected_attrs,
            page_num: 0,
            slot: 0,
            page: None,
        })
    }

    /// Attributes of the tuples this scan yields.
    pub fn attributes(&self) -> &[Attribute] {
        &self.projected_attrs
    }

    /// Returns the next matching record as `(rid, projected tuple)`, or `None`
    /// once every page has been visited.
    pub fn next_record(&mut self) -> anyhow::Result<Option<(Rid, Vec<u8>)>> {
        loop {
            if self.page_num >= self.page_count {
                self.page = None;
                return Ok(None);
            }

            let page = match self.page.take() {
                Some(page) => page,
                None => RecordPage::load(&self.file, self.page_num)?,
            };
            if self.slot >= page.slot_count() {
                self.page_num += 1;
                self.slot = 0;
                continue;
            }

            let slot = self.slot;
            self.slot += 1;
            let found = match page.slot(slot) {
                Some(Slot::Direct { offset, length }) => {
                    self.project(page.read_at(offset, length))?
                }
                Some(Slot::Forwarded(target)) => {
                    self.follow(Rid::new(self.page_num, slot as u32), target)?
                }
                _ => None,
            };
            self.page = Some(page);

            if let Some(tuple) = found {
                return Ok(Some((Rid::new(self.page_num, slot as u32), tuple)));
            }
        }
    }

    fn follow(&self, rid: Rid, target: Rid) -> anyhow::Result<Option<Vec<u8>>> {
        let page = RecordPage::load(&self.file, target.page)?;
        match page.slot(target.slot as usize) {
            Some(Slot::Moved { offset, length }) => self.project(page.read_at(offset, length)),
            _ => Err(StorageError::BrokenForward(rid).into()),
        }
    }

    fn project(&self, stored: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        if let Some((index, op, value)) = &self.condition {
            let lhs = decode_field(&self.attrs, stored, *index)?;
            if !op.evaluate(lhs.as_ref(), value) {
                return Ok(None);
            }
        }

        let values = decode_values(&self.attrs, stored)?;
        let projected: Vec<Option<Value>> =
            self.projection.iter().map(|i| values[*i].clone()).collect();
        Ok(Some(encode_tuple(&self.projected_attrs, &projected)?))
    }

    /// Ends the scan and releases its page buffer.
    pub fn close(self) {}
}

impl Iterator for RecordScan {
    type Item = anyhow::Result<(Rid, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
