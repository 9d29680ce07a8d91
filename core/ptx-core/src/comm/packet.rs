//! Wire messages.
//!
//! Every message starts with a 16-byte header:
//!
//! ```text
//! offset  size  field
//!      0     4  type
//!      4     4  sender   (worker << 8 | node)
//!      8     8  msg_id
//! ```
//!
//! The four tuple messages continue with a 28-byte [`TupleMsgHeader`] and,
//! for `TupleGetRes` and write-mode `TuplePutReq`, the tuple image. A
//! `SwitchTxn` continues with opaque program bytes. All integers are
//! big-endian.

use super::buffer::{BufferReader, BufferWriter};
use crate::error::{PtxError, PtxResult};
use crate::types::{AccessMode, Key, MsgId, NodeAddr, TableId, Timestamp};
use bytes::{BufMut, BytesMut};
use std::fmt;

/// Largest packet the transport carries.
pub const MTU: usize = 1500;

pub const HEADER_SIZE: usize = 16;
pub const TUPLE_HEADER_SIZE: usize = 28;
pub const TUPLE_PAYLOAD_OFFSET: usize = HEADER_SIZE + TUPLE_HEADER_SIZE;

const TYPE_OFFSET: usize = 0;
const SENDER_OFFSET: usize = 4;
const MSG_ID_OFFSET: usize = 8;
const MODE_OFFSET: usize = HEADER_SIZE + 24;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Init = 0x0001_0001,
    Barrier = 0x0001_0002,
    TupleGetReq = 0x0000_0001,
    TupleGetRes = 0x0000_0002,
    TuplePutReq = 0x0000_0003,
    TuplePutRes = 0x0000_0004,
    SwitchTxn = 0x0000_0005,
}

impl MsgType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0x0001_0001 => MsgType::Init,
            0x0001_0002 => MsgType::Barrier,
            0x0000_0001 => MsgType::TupleGetReq,
            0x0000_0002 => MsgType::TupleGetRes,
            0x0000_0003 => MsgType::TuplePutReq,
            0x0000_0004 => MsgType::TuplePutRes,
            0x0000_0005 => MsgType::SwitchTxn,
            _ => return None,
        })
    }

    pub fn is_tuple_msg(self) -> bool {
        matches!(
            self,
            MsgType::TupleGetReq | MsgType::TupleGetRes | MsgType::TuplePutReq | MsgType::TuplePutRes
        )
    }
}

/// Fields shared by all four tuple messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleMsgHeader {
    pub ts: Timestamp,
    pub table: TableId,
    pub key: Key,
    pub mode: AccessMode,
}

impl TupleMsgHeader {
    fn encode(&self, w: &mut BufferWriter<'_>) -> PtxResult<()> {
        w.write_u64(self.ts.0)?;
        w.write_u64(self.table.0)?;
        w.write_u64(self.key.0)?;
        w.write_u32(self.mode.raw())
    }

    fn decode(r: &mut BufferReader<'_>) -> PtxResult<Self> {
        Ok(Self {
            ts: Timestamp(r.read_u64()?),
            table: TableId(r.read_u64()?),
            key: Key(r.read_u64()?),
            mode: AccessMode::from_raw(r.read_u32()?),
        })
    }
}

/// One message buffer, never larger than [`MTU`].
///
/// Requests are turned into their responses in place with
/// [`convert`](Packet::convert), which keeps the header and tuple fields.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    buf: BytesMut,
}

impl Packet {
    /// Empty buffer with room for one MTU.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MTU),
        }
    }

    /// Wrap received bytes.
    pub fn from_bytes(data: &[u8]) -> PtxResult<Self> {
        if data.len() > MTU {
            return Err(PtxError::PacketTooSmall {
                requested: data.len(),
                max: MTU,
            });
        }
        if data.len() < HEADER_SIZE {
            return Err(PtxError::BufferUnderflow {
                needed: HEADER_SIZE,
                remaining: data.len(),
            });
        }
        let mut buf = BytesMut::with_capacity(MTU);
        buf.put_slice(data);
        Ok(Self { buf })
    }

    fn with_header(ty: MsgType, sender: NodeAddr) -> Self {
        let mut pkt = Self::new();
        pkt.buf.put_u32(ty as u32);
        pkt.buf.put_u32(sender.raw());
        pkt.buf.put_u64(0);
        pkt
    }

    pub fn init(sender: NodeAddr) -> Self {
        Self::with_header(MsgType::Init, sender)
    }

    pub fn barrier(sender: NodeAddr) -> Self {
        Self::with_header(MsgType::Barrier, sender)
    }

    pub fn tuple_get_req(sender: NodeAddr, header: TupleMsgHeader) -> PtxResult<Self> {
        let mut pkt = Self::with_header(MsgType::TupleGetReq, sender);
        header.encode(&mut pkt.writer())?;
        Ok(pkt)
    }

    /// Switch transaction whose body is produced by `fill`.
    pub fn switch_txn<F>(sender: NodeAddr, fill: F) -> PtxResult<Self>
    where
        F: FnOnce(&mut BufferWriter<'_>) -> PtxResult<()>,
    {
        let mut pkt = Self::with_header(MsgType::SwitchTxn, sender);
        fill(&mut pkt.writer())?;
        Ok(pkt)
    }

    /// Writer appending at the end of the packet.
    pub fn writer(&mut self) -> BufferWriter<'_> {
        BufferWriter::new(&mut self.buf, MTU)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Truncate or zero-extend to `len` bytes.
    pub fn resize(&mut self, len: usize) -> PtxResult<()> {
        if len > MTU {
            return Err(PtxError::PacketTooSmall {
                requested: len,
                max: MTU,
            });
        }
        self.buf.resize(len, 0);
        Ok(())
    }

    fn read_u32_at(&self, offset: usize) -> PtxResult<u32> {
        let mut r = BufferReader::new(self.buf.get(offset..).unwrap_or_default());
        r.read_u32()
    }

    fn read_u64_at(&self, offset: usize) -> PtxResult<u64> {
        let mut r = BufferReader::new(self.buf.get(offset..).unwrap_or_default());
        r.read_u64()
    }

    fn write_at(&mut self, offset: usize, bytes: &[u8]) -> PtxResult<()> {
        let end = offset + bytes.len();
        match self.buf.get_mut(offset..end) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                Ok(())
            }
            None => Err(PtxError::BufferUnderflow {
                needed: end,
                remaining: self.buf.len(),
            }),
        }
    }

    pub fn raw_type(&self) -> PtxResult<u32> {
        self.read_u32_at(TYPE_OFFSET)
    }

    pub fn msg_type(&self) -> PtxResult<MsgType> {
        let raw = self.raw_type()?;
        MsgType::from_raw(raw)
            .ok_or_else(|| PtxError::ProtocolViolation(format!("unknown message type {:#010x}", raw)))
    }

    pub fn sender(&self) -> PtxResult<NodeAddr> {
        Ok(NodeAddr::from_raw(self.read_u32_at(SENDER_OFFSET)?))
    }

    pub fn set_sender(&mut self, sender: NodeAddr) -> PtxResult<()> {
        self.write_at(SENDER_OFFSET, &sender.raw().to_be_bytes())
    }

    pub fn msg_id(&self) -> PtxResult<MsgId> {
        Ok(MsgId(self.read_u64_at(MSG_ID_OFFSET)?))
    }

    pub fn set_msg_id(&mut self, id: MsgId) -> PtxResult<()> {
        self.write_at(MSG_ID_OFFSET, &id.0.to_be_bytes())
    }

    /// Retype the message in place, keeping every other field.
    pub fn convert(&mut self, ty: MsgType) -> PtxResult<()> {
        self.write_at(TYPE_OFFSET, &(ty as u32).to_be_bytes())
    }

    pub fn tuple_header(&self) -> PtxResult<TupleMsgHeader> {
        let body = self.buf.get(HEADER_SIZE..).unwrap_or_default();
        TupleMsgHeader::decode(&mut BufferReader::new(body))
    }

    pub fn set_tuple_mode(&mut self, mode: AccessMode) -> PtxResult<()> {
        self.write_at(MODE_OFFSET, &mode.raw().to_be_bytes())
    }

    /// Tuple image following the tuple header; empty if none is attached.
    pub fn tuple_payload(&self) -> &[u8] {
        self.buf.get(TUPLE_PAYLOAD_OFFSET..).unwrap_or_default()
    }

    /// Replace the tuple image.
    pub fn set_tuple_payload(&mut self, payload: &[u8]) -> PtxResult<()> {
        self.resize(TUPLE_PAYLOAD_OFFSET)?;
        self.writer().write_bytes(payload)
    }

    /// Drop any tuple image, leaving header and tuple header.
    pub fn strip_tuple_payload(&mut self) -> PtxResult<()> {
        self.resize(TUPLE_PAYLOAD_OFFSET)
    }

    /// Body of a `SwitchTxn`.
    pub fn switch_data(&self) -> &[u8] {
        self.buf.get(HEADER_SIZE..).unwrap_or_default()
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Packet");
        match self.msg_type() {
            Ok(ty) => s.field("type", &ty),
            Err(_) => s.field("type", &self.raw_type().ok()),
        };
        s.field("sender", &self.sender().ok())
            .field("msg_id", &self.msg_id().ok().map(|id| id.0))
            .field("len", &self.len())
            .finish()
    }
}
