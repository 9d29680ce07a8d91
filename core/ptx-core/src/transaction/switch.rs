//! Switch offload: one `SwitchTxn` packet out, one back.
//!
//! The payload is opaque to the core. A [`SwitchProgram`] encodes the
//! instruction program for an argument and decodes the switch's answer.

use super::future::SwitchFuture;
use crate::comm::{BufferReader, BufferWriter};
use crate::error::PtxResult;
use std::sync::Arc;

/// Encoder/decoder of a switch transaction for arguments of type `A`.
pub trait SwitchProgram<A>: Send + Sync {
    type Output;

    /// Write the instruction program for `arg` after the packet header.
    fn make_txn(&self, arg: &A, w: &mut BufferWriter<'_>) -> PtxResult<()>;

    /// Decode the switch's reply body.
    fn parse_txn(&self, arg: &A, r: &mut BufferReader<'_>) -> PtxResult<Self::Output>;
}

/// Pending switch transaction returned by
/// [`Transaction::atomic`](super::Transaction::atomic).
pub struct SwitchHandle<'p, A, S: SwitchProgram<A>> {
    future: Arc<SwitchFuture>,
    program: &'p S,
    arg: &'p A,
}

impl<'p, A, S: SwitchProgram<A>> SwitchHandle<'p, A, S> {
    pub(crate) fn new(future: Arc<SwitchFuture>, program: &'p S, arg: &'p A) -> Self {
        Self {
            future,
            program,
            arg,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.future.is_resolved()
    }

    /// Spin until the switch answered and decode its reply.
    pub fn get(self) -> PtxResult<S::Output> {
        let pkt = self.future.wait_pkt()?;
        let mut reader = BufferReader::new(pkt.switch_data());
        self.program.parse_txn(self.arg, &mut reader)
    }
}

impl<A, S: SwitchProgram<A>> std::fmt::Debug for SwitchHandle<'_, A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}
