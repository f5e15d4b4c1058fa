use crate::bins::SliceExt;
use std::fmt;

/// Zero-based page number inside a paged file.
pub type PageNum = u32;

/// Record locator: the page and the slot a record was issued at.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rid {
    pub page: PageNum,
    pub slot: u32,
}

impl Rid {
    #[inline]
    pub fn new(page: PageNum, slot: u32) -> Self {
        Self { page, slot }
    }

    #[inline]
    pub(crate) fn from_ne_bytes(buf: &[u8]) -> Self {
        Self {
            page: buf[..4].read_u32(),
            slot: buf[4..8].read_u32(),
        }
    }

    #[inline]
    pub(crate) fn to_ne_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[..4].write_u32(self.page);
        buf[4..].write_u32(self.slot);
        buf
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.page, self.slot)
    }
}
