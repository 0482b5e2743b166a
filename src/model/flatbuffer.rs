//! Bounds-checked reader for the subset of flatbuffer encoding used by
//! TFLite model headers: tables, scalar fields, vectors and strings.
//!
//! Every offset is validated against the buffer; a malformed model yields
//! `ModelError::Malformed` instead of a panic.

use crate::error::ModelError;

type Result<T> = std::result::Result<T, ModelError>;

fn slice(buf: &[u8], pos: usize, len: usize) -> Result<&[u8]> {
    pos.checked_add(len)
        .and_then(|end| buf.get(pos..end))
        .ok_or(ModelError::Malformed("offset out of bounds"))
}

fn read_u16(buf: &[u8], pos: usize) -> Result<u16> {
    let b = slice(buf, pos, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32> {
    let b = slice(buf, pos, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_i32(buf: &[u8], pos: usize) -> Result<i32> {
    Ok(read_u32(buf, pos)? as i32)
}

fn read_i64(buf: &[u8], pos: usize) -> Result<i64> {
    let b = slice(buf, pos, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(b);
    Ok(i64::from_le_bytes(raw))
}

/// Follow a `uoffset_t` stored at `pos`.
fn follow(buf: &[u8], pos: usize) -> Result<usize> {
    let off = read_u32(buf, pos)? as usize;
    pos.checked_add(off)
        .filter(|target| *target < buf.len())
        .ok_or(ModelError::Malformed("reference out of bounds"))
}

/// Root table of a flatbuffer.
pub(crate) fn root(buf: &[u8]) -> Result<Table<'_>> {
    Table::at(buf, follow(buf, 0)?)
}

#[derive(Clone, Copy)]
pub(crate) struct Table<'a> {
    buf: &'a [u8],
    pos: usize,
    vtable: usize,
    vtable_len: usize,
}

impl<'a> Table<'a> {
    fn at(buf: &'a [u8], pos: usize) -> Result<Self> {
        let soffset = read_i32(buf, pos)? as i64;
        let vtable = pos as i64 - soffset;
        if vtable < 0 {
            return Err(ModelError::Malformed("vtable offset out of bounds"));
        }
        let vtable = vtable as usize;
        let vtable_len = read_u16(buf, vtable)? as usize;
        if vtable_len < 4 || vtable_len % 2 != 0 {
            return Err(ModelError::Malformed("bad vtable length"));
        }
        slice(buf, vtable, vtable_len)?;
        Ok(Self {
            buf,
            pos,
            vtable,
            vtable_len,
        })
    }

    /// Absolute position of field `slot`, `None` when the field is absent.
    fn field(&self, slot: usize) -> Result<Option<usize>> {
        let entry = 4 + slot * 2;
        if entry + 2 > self.vtable_len {
            return Ok(None);
        }
        let off = read_u16(self.buf, self.vtable + entry)? as usize;
        if off == 0 {
            return Ok(None);
        }
        Ok(Some(self.pos + off))
    }

    pub(crate) fn u32_or(&self, slot: usize, default: u32) -> Result<u32> {
        match self.field(slot)? {
            Some(pos) => read_u32(self.buf, pos),
            None => Ok(default),
        }
    }

    pub(crate) fn i32_or(&self, slot: usize, default: i32) -> Result<i32> {
        match self.field(slot)? {
            Some(pos) => read_i32(self.buf, pos),
            None => Ok(default),
        }
    }

    pub(crate) fn i8_or(&self, slot: usize, default: i8) -> Result<i8> {
        match self.field(slot)? {
            Some(pos) => Ok(slice(self.buf, pos, 1)?[0] as i8),
            None => Ok(default),
        }
    }

    pub(crate) fn table(&self, slot: usize) -> Result<Option<Table<'a>>> {
        match self.field(slot)? {
            Some(pos) => Ok(Some(Table::at(self.buf, follow(self.buf, pos)?)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn vector(&self, slot: usize) -> Result<Option<Vector<'a>>> {
        match self.field(slot)? {
            Some(pos) => {
                let start = follow(self.buf, pos)?;
                let len = read_u32(self.buf, start)? as usize;
                // Every element is at least one byte.
                slice(self.buf, start + 4, len)
                    .map_err(|_| ModelError::Malformed("vector length exceeds buffer"))?;
                Ok(Some(Vector {
                    buf: self.buf,
                    start: start + 4,
                    len,
                }))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn string(&self, slot: usize) -> Result<Option<String>> {
        match self.vector(slot)? {
            Some(v) => {
                let bytes = slice(self.buf, v.start, v.len)?;
                Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
            }
            None => Ok(None),
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Vector<'a> {
    buf: &'a [u8],
    start: usize,
    len: usize,
}

impl<'a> Vector<'a> {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Vector of table references, checked to fit in the buffer.
    pub(crate) fn tables(&self) -> Result<Vec<Table<'a>>> {
        self.check_extent(4)?;
        (0..self.len).map(|i| self.table(i)).collect()
    }

    /// Fails unless `len` elements of `size` bytes fit in the buffer.
    fn check_extent(&self, size: usize) -> Result<()> {
        self.len
            .checked_mul(size)
            .and_then(|bytes| slice(self.buf, self.start, bytes).ok())
            .map(|_| ())
            .ok_or(ModelError::Malformed("vector length exceeds buffer"))
    }

    fn element(&self, index: usize, size: usize) -> Result<usize> {
        if index >= self.len {
            return Err(ModelError::Malformed("vector index out of bounds"));
        }
        let pos = self.start + index * size;
        slice(self.buf, pos, size)?;
        Ok(pos)
    }

    pub(crate) fn table(&self, index: usize) -> Result<Table<'a>> {
        let pos = self.element(index, 4)?;
        Table::at(self.buf, follow(self.buf, pos)?)
    }

    pub(crate) fn i32s(&self) -> Result<Vec<i32>> {
        self.check_extent(4)?;
        (0..self.len)
            .map(|i| read_i32(self.buf, self.element(i, 4)?))
            .collect()
    }

    pub(crate) fn f32s(&self) -> Result<Vec<f32>> {
        self.check_extent(4)?;
        (0..self.len)
            .map(|i| Ok(f32::from_bits(read_u32(self.buf, self.element(i, 4)?)?)))
            .collect()
    }

    pub(crate) fn i64s(&self) -> Result<Vec<i64>> {
        self.check_extent(8)?;
        (0..self.len)
            .map(|i| read_i64(self.buf, self.element(i, 8)?))
            .collect()
    }
}
