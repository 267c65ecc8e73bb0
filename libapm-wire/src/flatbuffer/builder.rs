// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use byteorder::{ByteOrder, LittleEndian};

/// Offset of an object inside a [`Builder`], counted from the end of the buffer. Zero means
/// "absent".
pub type UOffset = u32;

const INITIAL_CAPACITY: usize = 1024;

/// Writes a flatbuffer back to front.
///
/// Children are written before their parents: strings and vectors first, then the tables that
/// reference them, and finally the root. Only one object can be under construction at a time.
#[derive(Debug)]
pub struct Builder {
    buf: Vec<u8>,
    head: usize,
    min_align: usize,
    vtable: Vec<UOffset>,
    object_start: UOffset,
}

impl Default for Builder {
    fn default() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }
}

impl Builder {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(16);
        Self {
            buf: vec![0; capacity],
            head: capacity,
            min_align: 1,
            vtable: Vec::new(),
            object_start: 0,
        }
    }

    /// Number of bytes written so far.
    pub fn offset(&self) -> UOffset {
        (self.buf.len() - self.head) as UOffset
    }

    fn grow(&mut self, needed: usize) {
        let used = self.buf.len() - self.head;
        let new_len = (self.buf.len() * 2).max(used + needed);
        let mut grown = vec![0; new_len];
        let new_head = new_len - used;
        grown[new_head..].copy_from_slice(&self.buf[self.head..]);
        self.buf = grown;
        self.head = new_head;
    }

    fn reserve(&mut self, n: usize) {
        if n > self.head {
            self.grow(n);
        }
    }

    pub fn pad(&mut self, n: usize) {
        self.reserve(n);
        self.head -= n;
        self.buf[self.head..self.head + n].fill(0);
    }

    /// Aligns the head so that after `additional` more bytes are written, the next write of
    /// `size` bytes is naturally aligned.
    pub fn prep(&mut self, size: usize, additional: usize) {
        self.min_align = self.min_align.max(size);
        let written = self.buf.len() - self.head + additional;
        let padding = (!written).wrapping_add(1) & (size - 1);
        self.reserve(padding + size + additional);
        self.pad(padding);
    }

    fn place(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.head -= bytes.len();
        self.buf[self.head..self.head + bytes.len()].copy_from_slice(bytes);
    }

    pub fn place_u8(&mut self, value: u8) {
        self.place(&[value]);
    }

    fn place_u16(&mut self, value: u16) {
        let mut b = [0; 2];
        LittleEndian::write_u16(&mut b, value);
        self.place(&b);
    }

    pub fn place_u32(&mut self, value: u32) {
        let mut b = [0; 4];
        LittleEndian::write_u32(&mut b, value);
        self.place(&b);
    }

    fn place_i32(&mut self, value: i32) {
        let mut b = [0; 4];
        LittleEndian::write_i32(&mut b, value);
        self.place(&b);
    }

    fn place_u64(&mut self, value: u64) {
        let mut b = [0; 8];
        LittleEndian::write_u64(&mut b, value);
        self.place(&b);
    }

    pub fn place_f64(&mut self, value: f64) {
        let mut b = [0; 8];
        LittleEndian::write_f64(&mut b, value);
        self.place(&b);
    }

    pub fn prepend_u8(&mut self, value: u8) {
        self.prep(1, 0);
        self.place_u8(value);
    }

    pub fn prepend_u16(&mut self, value: u16) {
        self.prep(2, 0);
        self.place_u16(value);
    }

    pub fn prepend_u32(&mut self, value: u32) {
        self.prep(4, 0);
        self.place_u32(value);
    }

    pub fn prepend_i32(&mut self, value: i32) {
        self.prep(4, 0);
        self.place_i32(value);
    }

    pub fn prepend_u64(&mut self, value: u64) {
        self.prep(8, 0);
        self.place_u64(value);
    }

    pub fn prepend_f64(&mut self, value: f64) {
        self.prep(8, 0);
        self.place_f64(value);
    }

    /// Writes a reference to `target`, relative to the position of the reference itself.
    pub fn prepend_uoffset(&mut self, target: UOffset) {
        self.prep(4, 0);
        let relative = self.offset().wrapping_sub(target).wrapping_add(4);
        self.place_u32(relative);
    }

    /// Writes a length prefixed, NUL terminated string.
    pub fn create_string(&mut self, s: &str) -> UOffset {
        self.prep(4, s.len() + 1);
        self.place_u8(0);
        self.place(s.as_bytes());
        self.place_u32(s.len() as u32);
        self.offset()
    }

    /// Writes a length prefixed byte vector.
    pub fn create_bytes(&mut self, bytes: &[u8]) -> UOffset {
        self.vector_begin(1, bytes.len(), 1);
        self.place(bytes);
        self.vector_end(bytes.len())
    }

    /// Starts a vector of `len` elements of `elem_size` bytes, each aligned to `alignment`.
    /// Elements are then prepended last to first.
    pub fn vector_begin(&mut self, elem_size: usize, len: usize, alignment: usize) {
        self.prep(4, elem_size * len);
        self.prep(alignment, elem_size * len);
    }

    pub fn vector_end(&mut self, len: usize) -> UOffset {
        self.prepend_u32(len as u32);
        self.offset()
    }

    /// Writes a vector of references, keeping the order of `targets`.
    pub fn create_offset_vector(&mut self, targets: &[UOffset]) -> UOffset {
        self.vector_begin(4, targets.len(), 4);
        for target in targets.iter().rev() {
            self.prepend_uoffset(*target);
        }
        self.vector_end(targets.len())
    }

    pub fn object_begin(&mut self, num_fields: usize) {
        self.vtable.clear();
        self.vtable.resize(num_fields, 0);
        self.object_start = self.offset();
    }

    fn slot(&mut self, slot: usize) {
        if let Some(entry) = self.vtable.get_mut(slot) {
            *entry = (self.buf.len() - self.head) as UOffset;
        }
    }

    pub fn object_prepend_bool(&mut self, slot: usize, value: bool, default: bool) {
        if value != default {
            self.prepend_u8(value as u8);
            self.slot(slot);
        }
    }

    pub fn object_prepend_u8(&mut self, slot: usize, value: u8, default: u8) {
        if value != default {
            self.prepend_u8(value);
            self.slot(slot);
        }
    }

    pub fn object_prepend_i8(&mut self, slot: usize, value: i8, default: i8) {
        if value != default {
            self.prepend_u8(value as u8);
            self.slot(slot);
        }
    }

    pub fn object_prepend_i32(&mut self, slot: usize, value: i32, default: i32) {
        if value != default {
            self.prepend_i32(value);
            self.slot(slot);
        }
    }

    pub fn object_prepend_u32(&mut self, slot: usize, value: u32, default: u32) {
        if value != default {
            self.prepend_u32(value);
            self.slot(slot);
        }
    }

    pub fn object_prepend_u64(&mut self, slot: usize, value: u64, default: u64) {
        if value != default {
            self.prepend_u64(value);
            self.slot(slot);
        }
    }

    pub fn object_prepend_f64(&mut self, slot: usize, value: f64, default: f64) {
        if value != default {
            self.prepend_f64(value);
            self.slot(slot);
        }
    }

    /// Adds a reference field. A zero target means the field is absent.
    pub fn object_prepend_uoffset(&mut self, slot: usize, target: UOffset) {
        if target != 0 {
            self.prepend_uoffset(target);
            self.slot(slot);
        }
    }

    /// Records an inline struct that was just written at `at`.
    pub fn object_prepend_struct(&mut self, slot: usize, at: UOffset) {
        if let Some(entry) = self.vtable.get_mut(slot) {
            *entry = at;
        }
    }

    /// Finishes the current object by writing its vtable in front of it.
    pub fn object_end(&mut self) -> UOffset {
        self.prepend_i32(0);
        let object_offset = self.offset();

        let used = self
            .vtable
            .iter()
            .rposition(|off| *off != 0)
            .map_or(0, |last| last + 1);
        for i in (0..used).rev() {
            let field = self.vtable[i];
            let rel = if field == 0 { 0 } else { object_offset - field };
            self.prepend_u16(rel as u16);
        }
        self.prepend_u16((object_offset - self.object_start) as u16);
        self.prepend_u16(((used + 2) * 2) as u16);

        let vtable_offset = self.offset();
        let object_pos = self.buf.len() - object_offset as usize;
        LittleEndian::write_i32(
            &mut self.buf[object_pos..object_pos + 4],
            vtable_offset as i32 - object_offset as i32,
        );
        self.vtable.clear();
        object_offset
    }

    /// Writes the root reference and returns the finished buffer.
    pub fn finish(mut self, root: UOffset) -> Vec<u8> {
        let min_align = self.min_align;
        self.prep(min_align, 4);
        self.prepend_uoffset(root);
        self.buf.split_off(self.head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_layout() {
        let mut b = Builder::with_capacity(16);
        let s = b.create_string("abc");
        let buf = b.finish(s);
        // root offset, length, bytes, NUL
        assert_eq!(buf, vec![4, 0, 0, 0, 3, 0, 0, 0, b'a', b'b', b'c', 0]);
    }

    #[test]
    fn test_table_layout() {
        let mut b = Builder::with_capacity(16);
        b.object_begin(2);
        b.object_prepend_i32(1, 7, 0);
        let table = b.object_end();
        let buf = b.finish(table);
        assert_eq!(
            buf,
            vec![
                12, 0, 0, 0, // root
                8, 0, // vtable size
                8, 0, // object size
                0, 0, // field 0 absent
                4, 0, // field 1
                8, 0, 0, 0, // soffset back to the vtable
                7, 0, 0, 0, // field 1 value
            ]
        );
    }

    #[test]
    fn test_grows_past_initial_capacity() {
        let mut b = Builder::with_capacity(16);
        let long = "x".repeat(1000);
        let s = b.create_string(&long);
        let buf = b.finish(s);
        assert_eq!(buf.len(), 4 + 4 + 1000 + 1 + 3);
        assert_eq!(&buf[8..1008], long.as_bytes());
    }

    #[test]
    fn test_default_values_are_skipped() {
        let mut b = Builder::default();
        b.object_begin(3);
        b.object_prepend_bool(0, false, false);
        b.object_prepend_u64(1, 0, 0);
        b.object_prepend_f64(2, 1.5, 0.0);
        let table = b.object_end();
        let buf = b.finish(table);
        // vtable keeps all three slots since the last one is set
        let root = LittleEndian::read_u32(&buf[0..4]) as usize;
        let soffset = LittleEndian::read_i32(&buf[root..root + 4]);
        let vtable = (root as i64 - soffset as i64) as usize;
        assert_eq!(LittleEndian::read_u16(&buf[vtable..]), 10);
        assert_eq!(LittleEndian::read_u16(&buf[vtable + 4..]), 0);
        assert_eq!(LittleEndian::read_u16(&buf[vtable + 6..]), 0);
        assert_ne!(LittleEndian::read_u16(&buf[vtable + 8..]), 0);
    }
}
