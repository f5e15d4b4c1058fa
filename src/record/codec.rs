//! Stored record layout:
//!
//! ```text
//! | field count u16 | null bitmap | end offset u16 x count | field bytes |
//! ```
//!
//! End offsets are relative to the start of the record. Null fields occupy no
//! bytes and repeat the previous end offset. Varchars are stored without their
//! length prefix, the length falls out of consecutive offsets.

use crate::bins::SliceExt;
use crate::error::StorageError;
use crate::schema::{AttrType, Attribute, Value};
use crate::tuple::{decode_tuple, encode_tuple, is_null, null_bitmap_size, set_null};

const FIELD_COUNT_SIZE: usize = 2;
const FIELD_OFFSET_SIZE: usize = 2;

fn header_size(fields: usize) -> usize {
    FIELD_COUNT_SIZE + null_bitmap_size(fields) + FIELD_OFFSET_SIZE * fields
}

/// Encodes an API-format tuple into its stored form.
pub(crate) fn encode_record(attrs: &[Attribute], data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let values = decode_tuple(attrs, data)?;
    encode_values(&values)
}

pub(crate) fn encode_values(values: &[Option<Value>]) -> anyhow::Result<Vec<u8>> {
    let fields = values.len();
    let bitmap_start = FIELD_COUNT_SIZE;
    let offsets_start = bitmap_start + null_bitmap_size(fields);
    let header_size = header_size(fields);

    let mut out = vec![0u8; header_size];
    out[..FIELD_COUNT_SIZE].write_u16(u16::try_from(fields)?);
    for (i, value) in values.iter().enumerate() {
        match value {
            Some(Value::Int(v)) => out.extend_from_slice(&v.to_ne_bytes()),
            Some(Value::Real(v)) => out.extend_from_slice(&v.to_ne_bytes()),
            Some(Value::VarChar(bytes)) => out.extend_from_slice(bytes),
            None => set_null(&mut out[bitmap_start..offsets_start], i),
        }
        let end = u16::try_from(out.len())?;
        let at = offsets_start + FIELD_OFFSET_SIZE * i;
        out[at..at + FIELD_OFFSET_SIZE].write_u16(end);
    }
    Ok(out)
}

/// Decodes a stored record back into an API-format tuple.
pub(crate) fn decode_record(attrs: &[Attribute], stored: &[u8]) -> anyhow::Result<Vec<u8>> {
    encode_tuple(attrs, &decode_values(attrs, stored)?)
}

/// Decodes every field of `attrs`. Fields past the stored field count come back null.
pub(crate) fn decode_values(
    attrs: &[Attribute],
    stored: &[u8],
) -> anyhow::Result<Vec<Option<Value>>> {
    let layout = Layout::parse(stored)?;
    (0..attrs.len())
        .map(|i| layout.field(attrs[i].attr_type, stored, i))
        .collect()
}

pub(crate) fn decode_field(
    attrs: &[Attribute],
    stored: &[u8],
    index: usize,
) -> anyhow::Result<Option<Value>> {
    let layout = Layout::parse(stored)?;
    layout.field(attrs[index].attr_type, stored, index)
}

struct Layout {
    fields: usize,
    bitmap_start: usize,
    offsets_start: usize,
    data_start: usize,
}

impl Layout {
    fn parse(stored: &[u8]) -> anyhow::Result<Self> {
        if stored.len() < FIELD_COUNT_SIZE {
            return Err(StorageError::Malformed("record header is truncated").into());
        }
        let fields = stored.read_u16() as usize;
        let data_start = header_size(fields);
        if stored.len() < data_start {
            return Err(StorageError::Malformed("record header is truncated").into());
        }
        Ok(Self {
            fields,
            bitmap_start: FIELD_COUNT_SIZE,
            offsets_start: FIELD_COUNT_SIZE + null_bitmap_size(fields),
            data_start,
        })
    }

    fn end_offset(&self, stored: &[u8], i: usize) -> usize {
        let at = self.offsets_start + FIELD_OFFSET_SIZE * i;
        stored[at..].read_u16() as usize
    }

    fn field(&self, attr_type: AttrType, stored: &[u8], i: usize) -> anyhow::Result<Option<Value>> {
        if i >= self.fields || is_null(&stored[self.bitmap_start..self.offsets_start], i) {
            return Ok(None);
        }

        let start = if i == 0 {
            self.data_start
        } else {
            self.end_offset(stored, i - 1)
        };
        let end = self.end_offset(stored, i);
        let Some(bytes) = stored.get(start..end) else {
            return Err(StorageError::Malformed("field offset out of bounds").into());
        };

        let value = match attr_type {
            AttrType::Int | AttrType::Real if bytes.len() != 4 => {
                return Err(StorageError::Malformed("numeric field is not 4 bytes").into());
            }
            AttrType::Int => Value::Int(bytes.read_i32()),
            AttrType::Real => Value::Real(bytes.read_f32()),
            AttrType::VarChar => Value::VarChar(bytes.to_vec()),
        };
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn attrs() -> Vec<Attribute> {
        vec![
            Attribute::new("id", AttrType::Int, 4),
            Attribute::new("name", AttrType::VarChar, 30),
            Attribute::new("score", AttrType::Real, 4),
            Attribute::new("note", AttrType::VarChar, 100),
        ]
    }

    #[test]
    fn test_record_layout() {
        let attrs = attrs();
        let values = vec![
            Some(Value::Int(7)),
            None,
            Some(Value::Real(0.25)),
            Some(Value::from("hi")),
        ];
        let stored = encode_values(&values).unwrap();

        // count + bitmap + 4 offsets, then 4 + 0 + 4 + 2 data bytes
        assert_eq!(2 + 1 + 8 + 10, stored.len());
        assert_eq!(4, stored.read_u16());
        assert_eq!(0b0100_0000, stored[2]);
        assert_eq!(15, stored[3..].read_u16());
        assert_eq!(15, stored[5..].read_u16());
        assert_eq!(19, stored[7..].read_u16());
        assert_eq!(21, stored[9..].read_u16());
        assert_eq!(values, decode_values(&attrs, &stored).unwrap());
        assert_eq!(Some(Value::from("hi")), decode_field(&attrs, &stored, 3).unwrap());
        assert_eq!(None, decode_field(&attrs, &stored, 1).unwrap());
    }

    #[test]
    fn test_record_round_trip_with_random_nulls() {
        let attrs = attrs();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        for _ in 0..200 {
            let values: Vec<Option<Value>> = attrs
                .iter()
                .map(|attr| {
                    if rng.gen_bool(0.3) {
                        return None;
                    }
                    Some(match attr.attr_type {
                        AttrType::Int => Value::Int(rng.gen()),
                        AttrType::Real => Value::Real(rng.gen_range(-1e6..1e6)),
                        AttrType::VarChar => {
                            let len = rng.gen_range(0..=attr.length as usize);
                            Value::VarChar((0..len).map(|_| rng.gen_range(b'a'..=b'z')).collect())
                        }
                    })
                })
                .collect();

            let data = encode_tuple(&attrs, &values).unwrap();
            let stored = encode_record(&attrs, &data).unwrap();
            assert_eq!(data, decode_record(&attrs, &stored).unwrap());
        }
    }

    #[test]
    fn test_record_schema_growth() {
        let attrs = attrs();
        let stored = encode_values(&[Some(Value::Int(1)), Some(Value::from("old"))]).unwrap();

        let values = decode_values(&attrs, &stored).unwrap();
        assert_eq!(
            vec![Some(Value::Int(1)), Some(Value::from("old")), None, None],
            values
        );
    }
}
