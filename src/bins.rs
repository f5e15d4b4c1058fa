use std::ops::Range;

pub(crate) trait SliceExt {
    fn read_u16(&self) -> u16;
    fn read_u32(&self) -> u32;
    fn read_i32(&self) -> i32;
    fn read_f32(&self) -> f32;
    fn write_u16(&mut self, val: u16);
    fn write_u32(&mut self, val: u32);
    fn write_i32(&mut self, val: i32);
}

impl SliceExt for [u8] {
    fn read_u16(&self) -> u16 {
        u16::from_ne_bytes(word(self))
    }
    fn read_u32(&self) -> u32 {
        u32::from_ne_bytes(word(self))
    }
    fn read_i32(&self) -> i32 {
        i32::from_ne_bytes(word(self))
    }
    fn read_f32(&self) -> f32 {
        f32::from_ne_bytes(word(self))
    }
    fn write_u16(&mut self, val: u16) {
        self[..2].copy_from_slice(&val.to_ne_bytes());
    }
    fn write_u32(&mut self, val: u32) {
        self[..4].copy_from_slice(&val.to_ne_bytes());
    }
    fn write_i32(&mut self, val: i32) {
        self[..4].copy_from_slice(&val.to_ne_bytes());
    }
}

fn word<const N: usize>(buf: &[u8]) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&buf[..N]);
    raw
}

pub(crate) const fn range_size(range: Range<usize>) -> usize {
    range.end - range.start
}

macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    }
}

pub(crate) use const_assert;
