// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::MIN_FLATBUFFER_SIZE;
use crate::error::DecodeError;
use byteorder::{ByteOrder, LittleEndian};

fn bytes_at(buf: &[u8], pos: usize, len: usize) -> Result<&[u8], DecodeError> {
    let end = pos.checked_add(len).ok_or(DecodeError::OutOfBounds)?;
    buf.get(pos..end).ok_or(DecodeError::OutOfBounds)
}

fn read_u16(buf: &[u8], pos: usize) -> Result<u16, DecodeError> {
    bytes_at(buf, pos, 2).map(LittleEndian::read_u16)
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32, DecodeError> {
    bytes_at(buf, pos, 4).map(LittleEndian::read_u32)
}

fn read_i32(buf: &[u8], pos: usize) -> Result<i32, DecodeError> {
    bytes_at(buf, pos, 4).map(LittleEndian::read_i32)
}

/// Follows the reference stored at `pos`.
fn deref(buf: &[u8], pos: usize) -> Result<usize, DecodeError> {
    let relative = read_u32(buf, pos)? as usize;
    let target = pos.checked_add(relative).ok_or(DecodeError::OutOfBounds)?;
    if target >= buf.len() {
        return Err(DecodeError::OutOfBounds);
    }
    Ok(target)
}

/// A table inside a flatbuffer. Every accessor is bounds checked; a missing field reads as its
/// default.
#[derive(Debug, Clone, Copy)]
pub struct Table<'a> {
    buf: &'a [u8],
    pos: usize,
    vtable: usize,
    vtable_len: usize,
}

impl<'a> Table<'a> {
    /// The root table of `buf`.
    pub fn root(buf: &'a [u8]) -> Result<Self, DecodeError> {
        if buf.len() < MIN_FLATBUFFER_SIZE {
            return Err(DecodeError::InvalidRoot);
        }
        let root = read_u32(buf, 0)? as usize;
        if root >= buf.len() - MIN_FLATBUFFER_SIZE {
            return Err(DecodeError::InvalidRoot);
        }
        Self::at(buf, root)
    }

    fn at(buf: &'a [u8], pos: usize) -> Result<Self, DecodeError> {
        let soffset = read_i32(buf, pos)? as i64;
        let vtable = usize::try_from(pos as i64 - soffset).map_err(|_| DecodeError::OutOfBounds)?;
        let vtable_len = read_u16(buf, vtable)? as usize;
        if vtable_len < 4 || vtable_len % 2 != 0 {
            return Err(DecodeError::OutOfBounds);
        }
        bytes_at(buf, vtable, vtable_len)?;
        Ok(Self {
            buf,
            pos,
            vtable,
            vtable_len,
        })
    }

    /// Absolute position of a field, or `None` if the field is absent.
    fn field(&self, slot: usize) -> Result<Option<usize>, DecodeError> {
        let entry = 4 + 2 * slot;
        if entry + 2 > self.vtable_len {
            return Ok(None);
        }
        let offset = read_u16(self.buf, self.vtable + entry)? as usize;
        if offset == 0 {
            return Ok(None);
        }
        Ok(Some(self.pos + offset))
    }

    fn scalar<const N: usize>(&self, slot: usize) -> Result<Option<&'a [u8]>, DecodeError> {
        match self.field(slot)? {
            Some(pos) => bytes_at(self.buf, pos, N).map(Some),
            None => Ok(None),
        }
    }

    pub fn read_u8(&self, slot: usize, default: u8) -> Result<u8, DecodeError> {
        Ok(self.scalar::<1>(slot)?.map_or(default, |b| b[0]))
    }

    pub fn read_i8(&self, slot: usize, default: i8) -> Result<i8, DecodeError> {
        Ok(self.scalar::<1>(slot)?.map_or(default, |b| b[0] as i8))
    }

    pub fn read_bool(&self, slot: usize, default: bool) -> Result<bool, DecodeError> {
        Ok(self.scalar::<1>(slot)?.map_or(default, |b| b[0] != 0))
    }

    pub fn read_i32(&self, slot: usize, default: i32) -> Result<i32, DecodeError> {
        Ok(self
            .scalar::<4>(slot)?
            .map_or(default, LittleEndian::read_i32))
    }

    pub fn read_u32(&self, slot: usize, default: u32) -> Result<u32, DecodeError> {
        Ok(self
            .scalar::<4>(slot)?
            .map_or(default, LittleEndian::read_u32))
    }

    pub fn read_u64(&self, slot: usize, default: u64) -> Result<u64, DecodeError> {
        Ok(self
            .scalar::<8>(slot)?
            .map_or(default, LittleEndian::read_u64))
    }

    pub fn read_f64(&self, slot: usize, default: f64) -> Result<f64, DecodeError> {
        Ok(self
            .scalar::<8>(slot)?
            .map_or(default, LittleEndian::read_f64))
    }

    /// Raw bytes of an inline struct of `size` bytes.
    pub fn read_struct(&self, slot: usize, size: usize) -> Result<Option<&'a [u8]>, DecodeError> {
        match self.field(slot)? {
            Some(pos) => bytes_at(self.buf, pos, size).map(Some),
            None => Ok(None),
        }
    }

    pub fn read_bytes(&self, slot: usize) -> Result<Option<&'a [u8]>, DecodeError> {
        let Some(pos) = self.field(slot)? else {
            return Ok(None);
        };
        let target = deref(self.buf, pos)?;
        let len = read_u32(self.buf, target)? as usize;
        bytes_at(self.buf, target + 4, len).map(Some)
    }

    pub fn read_str(&self, slot: usize) -> Result<Option<&'a str>, DecodeError> {
        match self.read_bytes(slot)? {
            Some(bytes) => std::str::from_utf8(bytes)
                .map(Some)
                .map_err(|_| DecodeError::InvalidUtf8),
            None => Ok(None),
        }
    }

    pub fn read_table(&self, slot: usize) -> Result<Option<Table<'a>>, DecodeError> {
        let Some(pos) = self.field(slot)? else {
            return Ok(None);
        };
        let target = deref(self.buf, pos)?;
        Table::at(self.buf, target).map(Some)
    }

    /// A vector of tables.
    pub fn read_vector(&self, slot: usize) -> Result<Option<TableVector<'a>>, DecodeError> {
        let Some(pos) = self.field(slot)? else {
            return Ok(None);
        };
        let target = deref(self.buf, pos)?;
        let len = read_u32(self.buf, target)? as usize;
        let size = len.checked_mul(4).ok_or(DecodeError::OutOfBounds)?;
        bytes_at(self.buf, target + 4, size)?;
        Ok(Some(TableVector {
            buf: self.buf,
            start: target + 4,
            len,
        }))
    }
}

/// A vector of references to tables.
#[derive(Debug, Clone, Copy)]
pub struct TableVector<'a> {
    buf: &'a [u8],
    start: usize,
    len: usize,
}

impl<'a> TableVector<'a> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Result<Table<'a>, DecodeError> {
        if index >= self.len {
            return Err(DecodeError::OutOfBounds);
        }
        let pos = self.start + 4 * index;
        Table::at(self.buf, deref(self.buf, pos)?)
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Table<'a>, DecodeError>> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatbuffer::Builder;

    fn sample() -> Vec<u8> {
        let mut b = Builder::default();
        let name = b.create_string("hello");
        let blob = b.create_bytes(&[1, 2, 3]);

        b.object_begin(1);
        b.object_prepend_i32(0, 9, 0);
        let child = b.object_end();
        let children = b.create_offset_vector(&[child, child]);

        b.object_begin(8);
        b.object_prepend_f64(6, 2.5, 0.0);
        b.object_prepend_u64(5, u64::MAX, 0);
        b.object_prepend_uoffset(0, name);
        b.object_prepend_uoffset(1, blob);
        b.object_prepend_uoffset(2, child);
        b.object_prepend_uoffset(3, children);
        b.object_prepend_i8(4, -3, 0);
        b.object_prepend_bool(7, true, false);
        let root = b.object_end();
        b.finish(root)
    }

    #[test]
    fn test_read_back() {
        let buf = sample();
        let root = Table::root(&buf).unwrap();
        assert_eq!(root.read_str(0).unwrap(), Some("hello"));
        assert_eq!(root.read_bytes(1).unwrap(), Some(&[1u8, 2, 3][..]));
        assert_eq!(root.read_table(2).unwrap().unwrap().read_i32(0, 0).unwrap(), 9);
        let children = root.read_vector(3).unwrap().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children.get(1).unwrap().read_i32(0, 0).unwrap(), 9);
        assert!(children.get(2).is_err());
        assert_eq!(root.read_i8(4, 0).unwrap(), -3);
        assert_eq!(root.read_u64(5, 0).unwrap(), u64::MAX);
        assert_eq!(root.read_f64(6, 0.0).unwrap(), 2.5);
        assert!(root.read_bool(7, false).unwrap());
        // slots past the vtable read as defaults
        assert_eq!(root.read_u32(40, 11).unwrap(), 11);
        assert_eq!(root.read_str(41).unwrap(), None);
    }

    #[test]
    fn test_truncated_buffers_are_rejected() {
        let buf = sample();
        for len in 0..buf.len() {
            let truncated = &buf[..len];
            if let Ok(root) = Table::root(truncated) {
                let _ = root.read_str(0);
                let _ = root.read_vector(3);
            }
        }
        assert_eq!(Table::root(&[]).unwrap_err(), DecodeError::InvalidRoot);
        assert_eq!(
            Table::root(&[200, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap_err(),
            DecodeError::InvalidRoot
        );
    }

    #[test]
    fn fuzz_reader_never_panics() {
        bolero::check!().with_type::<Vec<u8>>().for_each(|bytes| {
            if let Ok(root) = Table::root(bytes) {
                for slot in 0..16 {
                    let _ = root.read_u8(slot, 0);
                    let _ = root.read_u64(slot, 0);
                    let _ = root.read_str(slot);
                    let _ = root.read_struct(slot, 56);
                    if let Ok(Some(table)) = root.read_table(slot) {
                        let _ = table.read_str(0);
                    }
                    if let Ok(Some(vector)) = root.read_vector(slot) {
                        for table in vector.iter().take(64).flatten() {
                            let _ = table.read_bytes(0);
                        }
                    }
                }
            }
        });
    }
}
