//! Big-endian cursor over packet bodies.
//!
//! Used for tuple images and for the opaque switch transaction payload.

use crate::error::{PtxError, PtxResult};
use bytes::{Buf, BufMut, BytesMut};

/// Appends big-endian values to a packet buffer.
pub struct BufferWriter<'a> {
    buf: &'a mut BytesMut,
    start: usize,
    limit: usize,
}

impl<'a> BufferWriter<'a> {
    /// Writer appending to `buf`; the buffer may not grow past `limit` bytes.
    pub fn new(buf: &'a mut BytesMut, limit: usize) -> Self {
        let start = buf.len();
        Self { buf, start, limit }
    }

    /// Bytes written through this writer.
    pub fn size(&self) -> usize {
        self.buf.len() - self.start
    }

    fn reserve(&self, n: usize) -> PtxResult<()> {
        let requested = self.buf.len() + n;
        if requested > self.limit {
            return Err(PtxError::PacketTooSmall {
                requested,
                max: self.limit,
            });
        }
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> PtxResult<()> {
        self.reserve(1)?;
        self.buf.put_u8(v);
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> PtxResult<()> {
        self.reserve(2)?;
        self.buf.put_u16(v);
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> PtxResult<()> {
        self.reserve(4)?;
        self.buf.put_u32(v);
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> PtxResult<()> {
        self.reserve(8)?;
        self.buf.put_u64(v);
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> PtxResult<()> {
        self.reserve(4)?;
        self.buf.put_i32(v);
        Ok(())
    }

    pub fn write_i64(&mut self, v: i64) -> PtxResult<()> {
        self.reserve(8)?;
        self.buf.put_i64(v);
        Ok(())
    }

    pub fn write_bytes(&mut self, v: &[u8]) -> PtxResult<()> {
        self.reserve(v.len())?;
        self.buf.put_slice(v);
        Ok(())
    }
}

/// Reads big-endian values, failing with [`PtxError::BufferUnderflow`]
/// instead of panicking on short input.
pub struct BufferReader<'a> {
    buf: &'a [u8],
}

impl<'a> BufferReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, needed: usize) -> PtxResult<()> {
        if self.buf.remaining() < needed {
            return Err(PtxError::BufferUnderflow {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> PtxResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> PtxResult<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self) -> PtxResult<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> PtxResult<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn read_i32(&mut self) -> PtxResult<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> PtxResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_bytes(&mut self, n: usize) -> PtxResult<&'a [u8]> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Look at the next `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> PtxResult<&'a [u8]> {
        self.need(n)?;
        Ok(&self.buf[..n])
    }
}
