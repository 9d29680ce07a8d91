//! Fixed-size records stored in table rows.

use crate::comm::buffer::{BufferReader, BufferWriter};
use crate::error::PtxResult;

/// A fixed-size, trivially copyable record.
///
/// `encode` must write exactly `SIZE` bytes; the image travels in
/// `TupleGetRes` and write-mode `TuplePutReq` messages.
pub trait Tuple: Copy + Default + Send + Sync + 'static {
    const SIZE: usize;

    fn encode(&self, w: &mut BufferWriter<'_>) -> PtxResult<()>;

    fn decode(r: &mut BufferReader<'_>) -> PtxResult<Self>;

    /// Wire image as an owned buffer.
    fn to_bytes(&self) -> PtxResult<Vec<u8>> {
        let mut buf = bytes::BytesMut::with_capacity(Self::SIZE);
        self.encode(&mut BufferWriter::new(&mut buf, Self::SIZE))?;
        Ok(buf.to_vec())
    }

    fn from_bytes(data: &[u8]) -> PtxResult<Self> {
        Self::decode(&mut BufferReader::new(data))
    }
}

impl Tuple for u64 {
    const SIZE: usize = 8;

    fn encode(&self, w: &mut BufferWriter<'_>) -> PtxResult<()> {
        w.write_u64(*self)
    }

    fn decode(r: &mut BufferReader<'_>) -> PtxResult<Self> {
        r.read_u64()
    }
}

impl Tuple for i64 {
    const SIZE: usize = 8;

    fn encode(&self, w: &mut BufferWriter<'_>) -> PtxResult<()> {
        w.write_i64(*self)
    }

    fn decode(r: &mut BufferReader<'_>) -> PtxResult<Self> {
        r.read_i64()
    }
}
