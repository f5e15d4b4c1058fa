//! The API record format: a null bitmap of `ceil(n/8)` bytes (MSB first, 1 = null)
//! followed by the non-null fields in schema order. Ints and reals take 4
//! native-endian bytes, varchars a 4-byte length followed by the raw bytes.

use crate::error::StorageError;
use crate::schema::{Attribute, Value};

pub(crate) fn null_bitmap_size(fields: usize) -> usize {
    fields.div_ceil(8)
}

pub(crate) fn is_null(bitmap: &[u8], i: usize) -> bool {
    bitmap[i / 8] & (0x80 >> (i % 8)) != 0
}

pub(crate) fn set_null(bitmap: &mut [u8], i: usize) {
    bitmap[i / 8] |= 0x80 >> (i % 8);
}

/// Builds an API-format tuple. `values` must line up with `attrs`.
pub fn encode_tuple(attrs: &[Attribute], values: &[Option<Value>]) -> anyhow::Result<Vec<u8>> {
    if attrs.len() != values.len() {
        return Err(StorageError::InvalidArgument(format!(
            "tuple has {} values for {} attributes",
            values.len(),
            attrs.len()
        ))
        .into());
    }

    let bitmap_size = null_bitmap_size(attrs.len());
    let data_size: usize = values.iter().flatten().map(Value::api_size).sum();
    let mut out = Vec::with_capacity(bitmap_size + data_size);
    out.resize(bitmap_size, 0);
    for (i, (attr, value)) in attrs.iter().zip(values).enumerate() {
        match value {
            Some(value) => {
                value.check_type(attr)?;
                value.write_api(&mut out);
            }
            None => set_null(&mut out[..bitmap_size], i),
        }
    }
    Ok(out)
}

pub fn decode_tuple(attrs: &[Attribute], data: &[u8]) -> anyhow::Result<Vec<Option<Value>>> {
    let (values, _) = decode_prefix(attrs, data)?;
    Ok(values)
}

/// Number of bytes the tuple occupies in `data`.
pub fn tuple_size(attrs: &[Attribute], data: &[u8]) -> anyhow::Result<usize> {
    let (_, size) = decode_prefix(attrs, data)?;
    Ok(size)
}

fn decode_prefix(attrs: &[Attribute], data: &[u8]) -> anyhow::Result<(Vec<Option<Value>>, usize)> {
    let bitmap_size = null_bitmap_size(attrs.len());
    if data.len() < bitmap_size {
        return Err(StorageError::Malformed("null bitmap is truncated").into());
    }
    let (bitmap, mut rest) = data.split_at(bitmap_size);

    let mut size = bitmap_size;
    let mut values = Vec::with_capacity(attrs.len());
    for (i, attr) in attrs.iter().enumerate() {
        if is_null(bitmap, i) {
            values.push(None);
            continue;
        }
        let (value, len) = Value::read_api(attr.attr_type, rest)?;
        rest = &rest[len..];
        size += len;
        values.push(Some(value));
    }
    Ok((values, size))
}

/// Reads field `index` without materializing the other fields.
pub(crate) fn tuple_field(
    attrs: &[Attribute],
    data: &[u8],
    index: usize,
) -> anyhow::Result<Option<Value>> {
    let bitmap_size = null_bitmap_size(attrs.len());
    if data.len() < bitmap_size {
        return Err(StorageError::Malformed("null bitmap is truncated").into());
    }
    let (bitmap, mut rest) = data.split_at(bitmap_size);
    for (i, attr) in attrs.iter().enumerate().take(index + 1) {
        if is_null(bitmap, i) {
            if i == index {
                return Ok(None);
            }
            continue;
        }
        let (value, len) = Value::read_api(attr.attr_type, rest)?;
        if i == index {
            return Ok(Some(value));
        }
        rest = &rest[len..];
    }
    Err(StorageError::Malformed("field index out of range").into())
}

/// Concatenates two tuples into one tuple over `left ++ right` attributes.
pub(crate) fn concat_tuples(
    left_attrs: &[Attribute],
    left: &[u8],
    right_attrs: &[Attribute],
    right: &[u8],
) -> anyhow::Result<Vec<u8>> {
    let left_bitmap = null_bitmap_size(left_attrs.len());
    let right_bitmap = null_bitmap_size(right_attrs.len());
    let left_size = tuple_size(left_attrs, left)?;
    let right_size = tuple_size(right_attrs, right)?;

    let bitmap_size = null_bitmap_size(left_attrs.len() + right_attrs.len());
    let mut out = vec![0u8; bitmap_size];
    for i in 0..left_attrs.len() {
        if is_null(left, i) {
            set_null(&mut out, i);
        }
    }
    for i in 0..right_attrs.len() {
        if is_null(right, i) {
            set_null(&mut out, left_attrs.len() + i);
        }
    }
    out.extend_from_slice(&left[left_bitmap..left_size]);
    out.extend_from_slice(&right[right_bitmap..right_size]);
    Ok(out)
}

/// Renders a tuple as `name: value` pairs, `NULL` for null fields.
pub fn format_tuple(attrs: &[Attribute], data: &[u8]) -> anyhow::Result<String> {
    let values = decode_tuple(attrs, data)?;
    let fields: Vec<String> = attrs
        .iter()
        .zip(&values)
        .map(|(attr, value)| match value {
            Some(value) => format!("{}: {value}", attr.name),
            None => format!("{}: NULL", attr.name),
        })
        .collect();
    Ok(fields.join("    "))
}
