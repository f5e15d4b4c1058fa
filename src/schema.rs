use crate::bins::SliceExt;
use crate::error::StorageError;
use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttrType {
    Int,
    Real,
    VarChar,
}

impl AttrType {
    /// Code stored in the catalog's `column-type` field.
    pub fn code(self) -> i32 {
        match self {
            Self::Int => 0,
            Self::Real => 1,
            Self::VarChar => 2,
        }
    }

    pub fn from_code(code: i32) -> anyhow::Result<Self> {
        match code {
            0 => Ok(Self::Int),
            1 => Ok(Self::Real),
            2 => Ok(Self::VarChar),
            _ => {
                let message = format!("unknown attribute type code {code}");
                Err(StorageError::InvalidArgument(message).into())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub attr_type: AttrType,
    pub length: u32,
}

impl Attribute {
    pub fn new(name: impl Into<String>, attr_type: AttrType, length: u32) -> Self {
        Self {
            name: name.into(),
            attr_type,
            length,
        }
    }
}

pub(crate) fn attribute_position(attrs: &[Attribute], name: &str) -> anyhow::Result<usize> {
    attrs
        .iter()
        .position(|attr| attr.name == name)
        .ok_or_else(|| StorageError::AttributeNotFound(name.to_string()).into())
}

/// A single non-null field value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Real(f32),
    VarChar(Vec<u8>),
}

impl Value {
    pub fn attr_type(&self) -> AttrType {
        match self {
            Self::Int(_) => AttrType::Int,
            Self::Real(_) => AttrType::Real,
            Self::VarChar(_) => AttrType::VarChar,
        }
    }

    /// Typed comparison. Strings compare as NUL-terminated byte strings.
    /// Returns `None` for values of different types or a NaN operand.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Real(a), Self::Real(b)) => a.partial_cmp(b),
            (Self::VarChar(a), Self::VarChar(b)) => Some(c_str(a).cmp(c_str(b))),
            _ => None,
        }
    }

    /// Total order used for index keys, where every key has the same type.
    pub(crate) fn key_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            // -0.0 and 0.0 are one key; NaN falls back to the total order
            (Self::Real(a), Self::Real(b)) => a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b)),
            (Self::VarChar(a), Self::VarChar(b)) => c_str(a).cmp(c_str(b)),
            (a, b) => a.attr_type().code().cmp(&b.attr_type().code()),
        }
    }

    pub(crate) fn check_type(&self, attr: &Attribute) -> anyhow::Result<()> {
        if self.attr_type() != attr.attr_type {
            return Err(StorageError::TypeMismatch {
                attr: attr.name.clone(),
                expected: attr.attr_type,
            }
            .into());
        }
        Ok(())
    }

    /// Size of the value in the API record format.
    pub(crate) fn api_size(&self) -> usize {
        match self {
            Self::Int(_) | Self::Real(_) => 4,
            Self::VarChar(bytes) => 4 + bytes.len(),
        }
    }

    pub(crate) fn write_api(&self, out: &mut Vec<u8>) {
        match self {
            Self::Int(v) => out.extend_from_slice(&v.to_ne_bytes()),
            Self::Real(v) => out.extend_from_slice(&v.to_ne_bytes()),
            Self::VarChar(bytes) => {
                out.extend_from_slice(&(bytes.len() as u32).to_ne_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }

    /// Parses one API-format value from the front of `buf`, returning it with its size.
    pub(crate) fn read_api(attr_type: AttrType, buf: &[u8]) -> anyhow::Result<(Value, usize)> {
        if buf.len() < 4 {
            return Err(StorageError::Malformed("field is truncated").into());
        }
        match attr_type {
            AttrType::Int => Ok((Self::Int(buf.read_i32()), 4)),
            AttrType::Real => Ok((Self::Real(buf.read_f32()), 4)),
            AttrType::VarChar => {
                let len = buf.read_u32() as usize;
                let Some(bytes) = buf.get(4..4 + len) else {
                    return Err(StorageError::Malformed("varchar is truncated").into());
                };
                Ok((Self::VarChar(bytes.to_vec()), 4 + len))
            }
        }
    }
}

fn c_str(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::VarChar(v.as_bytes().to_vec())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::VarChar(bytes) => write!(f, "{}", String::from_utf8_lossy(c_str(bytes))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    Ne,
    NoOp,
}

impl CompOp {
    /// Evaluates `lhs op rhs`. A null `lhs` only satisfies [`CompOp::NoOp`].
    pub fn evaluate(self, lhs: Option<&Value>, rhs: &Value) -> bool {
        if self == Self::NoOp {
            return true;
        }
        let Some(ord) = lhs.and_then(|lhs| lhs.compare(rhs)) else {
            return false;
        };
        match self {
            Self::Eq => ord.is_eq(),
            Self::Lt => ord.is_lt(),
            Self::Gt => ord.is_gt(),
            Self::Le => ord.is_le(),
            Self::Ge => ord.is_ge(),
            Self::Ne => ord.is_ne(),
            Self::NoOp => true,
        }
    }
}
