//! One table slot: a tuple plus its lock.

use super::tuple::Tuple;
use crate::cc::{Acquire, RowLock};
use crate::comm::{Communicator, MsgType, Packet};
use crate::error::{ErrorCode, PtxError, PtxResult};
use crate::types::{AccessMode, CcScheme, Timestamp};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace};

/// Completion hook of a local lock request that may be queued.
pub trait LockGrant: Send + Sync {
    fn grant(&self);
    fn deny(&self);
}

/// Who is waiting for a row.
pub enum Waiter {
    /// A worker on this node, spinning on its future.
    Local(Arc<dyn LockGrant>),
    /// A remote `TupleGetReq`, answered once the lock is decided.
    Remote(Packet),
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Waiter::Local(_) => f.write_str("Waiter::Local"),
            Waiter::Remote(pkt) => f.debug_tuple("Waiter::Remote").field(pkt).finish(),
        }
    }
}

/// Turn a `TupleGetReq` into a failed `TupleGetRes` and send it back.
pub(crate) fn reject_remote(mut pkt: Packet, comm: &dyn Communicator) -> PtxResult<()> {
    let header = pkt.tuple_header()?;
    pkt.convert(MsgType::TupleGetRes)?;
    pkt.set_tuple_mode(header.mode.with_mode(AccessMode::INVALID))?;
    pkt.strip_tuple_payload()?;
    let target = pkt.sender()?.node();
    comm.send(target, pkt)
}

fn decode_image<T: Tuple>(payload: &[u8]) -> PtxResult<T> {
    if payload.len() != T::SIZE {
        return Err(PtxError::ProtocolViolation(format!(
            "put request carries {} bytes, tuple has {}",
            payload.len(),
            T::SIZE
        )));
    }
    T::from_bytes(payload)
}

pub struct Row<T: Tuple> {
    tuple: RwLock<T>,
    lock: RowLock<Waiter>,
}

impl<T: Tuple> Row<T> {
    pub fn new(scheme: CcScheme) -> Self {
        Self {
            tuple: RwLock::new(T::default()),
            lock: RowLock::new(scheme),
        }
    }

    /// Copy of the current tuple.
    pub fn read(&self) -> T {
        *self.tuple.read()
    }

    pub fn store(&self, value: T) {
        *self.tuple.write() = value;
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.tuple.write())
    }

    pub fn mode(&self) -> AccessMode {
        self.lock.mode()
    }

    /// Lock on behalf of a worker of this node.
    ///
    /// `Success` means granted or queued; `grant` is notified either way.
    pub fn local_lock(&self, mode: AccessMode, ts: Timestamp, grant: Arc<dyn LockGrant>) -> ErrorCode {
        match self.lock.lock(ts, mode, Waiter::Local(grant)) {
            Acquire::Granted(waiter) => {
                if let Waiter::Local(grant) = waiter {
                    grant.grant();
                }
                ErrorCode::Success
            }
            Acquire::Queued => ErrorCode::Success,
            Acquire::Denied(_, code) => {
                debug!(%ts, %mode, ?code, "local lock failed");
                code
            }
        }
    }

    /// Lock on behalf of a remote `TupleGetReq`; the response is sent now
    /// or, if the request is queued, by the unlock that grants it.
    pub fn remote_lock(&self, pkt: Packet, comm: &dyn Communicator) -> PtxResult<()> {
        let header = pkt.tuple_header()?;
        match self.lock.lock(header.ts, header.mode, Waiter::Remote(pkt)) {
            Acquire::Granted(waiter) => self.resolve(waiter, true, comm),
            Acquire::Queued => Ok(()),
            Acquire::Denied(waiter, code) => {
                debug!(ts = %header.ts, mode = %header.mode, ?code, "remote lock failed");
                self.resolve(waiter, false, comm)
            }
        }
    }

    /// Release a lock and hand the row to whoever was queued.
    pub fn local_unlock(
        &self,
        mode: AccessMode,
        ts: Timestamp,
        comm: &dyn Communicator,
    ) -> PtxResult<ErrorCode> {
        let release = self.lock.unlock(ts, mode);

        let mut first_err = None;
        for request in release.granted {
            trace!(ts = %request.ts, mode = %request.mode, "queued request granted");
            if let Err(e) = self.resolve(request.waiter, true, comm) {
                first_err.get_or_insert(e);
            }
        }
        for request in release.killed {
            debug!(ts = %request.ts, mode = %request.mode, "queued request dies");
            if let Err(e) = self.resolve(request.waiter, false, comm) {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(release.code),
        }
    }

    /// Apply a `TuplePutReq`: write-mode requests carry the new image.
    ///
    /// The lock is released even when the image is broken; the broken image
    /// is not applied and comes back as the error.
    pub fn remote_unlock(&self, pkt: &Packet, comm: &dyn Communicator) -> PtxResult<ErrorCode> {
        let header = pkt.tuple_header()?;
        let image = header
            .mode
            .is_write()
            .then(|| decode_image::<T>(pkt.tuple_payload()));
        if let Some(Ok(value)) = &image {
            self.store(*value);
        }
        let released = self.local_unlock(header.mode, header.ts, comm);
        match image {
            Some(Err(e)) => Err(e),
            _ => released,
        }
    }

    /// True iff nobody holds or waits for the row.
    pub fn check(&self) -> bool {
        self.lock.check()
    }

    pub fn invariant(&self) -> bool {
        self.lock.invariant()
    }

    fn resolve(&self, waiter: Waiter, granted: bool, comm: &dyn Communicator) -> PtxResult<()> {
        match waiter {
            Waiter::Local(grant) => {
                if granted {
                    grant.grant();
                } else {
                    grant.deny();
                }
                Ok(())
            }
            Waiter::Remote(pkt) if !granted => reject_remote(pkt, comm),
            Waiter::Remote(mut pkt) => {
                pkt.convert(MsgType::TupleGetRes)?;
                pkt.set_tuple_payload(&self.read().to_bytes()?)?;
                let target = pkt.sender()?.node();
                comm.send(target, pkt)
            }
        }
    }
}

impl<T: Tuple> std::fmt::Debug for Row<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Row")
            .field("scheme", &self.lock.scheme())
            .field("mode", &self.lock.mode())
            .finish()
    }
}
