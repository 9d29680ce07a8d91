//! In-process transport.
//!
//! One unbounded mailbox per node plus one for the switch. Each mailbox is
//! drained by a dedicated dispatch thread that feeds a [`PacketSink`]. The
//! first error returned by the sink stops the thread; it is handed to
//! [`PacketSink::fail`] and returned by [`DispatchThread::shutdown`].

use super::packet::Packet;
use super::{Communicator, PacketSink};
use crate::error::{PtxError, PtxResult};
use crate::types::NodeId;
use crossbeam_channel::{Receiver, Sender, select, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, trace};

pub struct LocalNetwork {
    num_nodes: u32,
    mailboxes: Vec<Sender<Packet>>,
    inboxes: Mutex<Vec<Option<Receiver<Packet>>>>,
}

impl LocalNetwork {
    /// Network of `num_nodes` nodes; the switch is addressed as `num_nodes`.
    pub fn new(num_nodes: u32) -> Arc<Self> {
        let (mailboxes, inboxes): (Vec<_>, Vec<_>) = (0..=num_nodes)
            .map(|_| {
                let (tx, rx) = unbounded();
                (tx, Some(rx))
            })
            .unzip();
        Arc::new(Self {
            num_nodes,
            mailboxes,
            inboxes: Mutex::new(inboxes),
        })
    }

    pub fn num_nodes(&self) -> u32 {
        self.num_nodes
    }

    pub fn switch_id(&self) -> NodeId {
        NodeId(self.num_nodes)
    }

    /// Sending side for `node`.
    pub fn endpoint(self: &Arc<Self>, node: NodeId) -> Arc<LocalEndpoint> {
        Arc::new(LocalEndpoint {
            node,
            net: Arc::clone(self),
        })
    }

    fn deliver(&self, target: NodeId, pkt: Packet) -> PtxResult<()> {
        let mailbox = self
            .mailboxes
            .get(target.0 as usize)
            .ok_or_else(|| PtxError::Transport(format!("no mailbox for node {}", target)))?;
        mailbox
            .send(pkt)
            .map_err(|_| PtxError::Transport(format!("node {} is gone", target)))
    }

    /// Start the dispatch thread of `node`. Each mailbox can be attached once.
    pub fn attach(&self, node: NodeId, sink: Arc<dyn PacketSink>) -> PtxResult<DispatchThread> {
        let inbox = self
            .inboxes
            .lock()
            .get_mut(node.0 as usize)
            .and_then(Option::take)
            .ok_or_else(|| {
                PtxError::Transport(format!("mailbox of node {} missing or already attached", node))
            })?;

        let (shutdown_tx, shutdown_rx) = unbounded::<()>();
        let handle = std::thread::Builder::new()
            .name(format!("ptx-dispatch-{}", node))
            .spawn(move || dispatch_loop(node, inbox, shutdown_rx, sink))?;

        info!(%node, "dispatch thread started");
        Ok(DispatchThread {
            node,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("num_nodes", &self.num_nodes)
            .finish()
    }
}

fn dispatch_loop(
    node: NodeId,
    inbox: Receiver<Packet>,
    shutdown: Receiver<()>,
    sink: Arc<dyn PacketSink>,
) -> PtxResult<()> {
    let _span = crate::logging::dispatch_span(node).entered();
    loop {
        select! {
            recv(inbox) -> msg => match msg {
                Ok(pkt) => {
                    trace!(%node, ?pkt, "dispatch");
                    if let Err(e) = sink.handle(pkt) {
                        error!(%node, error = %e, "packet handling failed, stopping dispatch");
                        sink.fail(&e);
                        return Err(e);
                    }
                }
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    info!(%node, "dispatch thread stopped");
    Ok(())
}

/// [`Communicator`] of one node on a [`LocalNetwork`].
#[derive(Debug)]
pub struct LocalEndpoint {
    node: NodeId,
    net: Arc<LocalNetwork>,
}

impl Communicator for LocalEndpoint {
    fn send(&self, target: NodeId, pkt: Packet) -> PtxResult<()> {
        self.net.deliver(target, pkt)
    }

    fn node_id(&self) -> NodeId {
        self.node
    }

    fn num_nodes(&self) -> u32 {
        self.net.num_nodes
    }

    fn switch_id(&self) -> NodeId {
        self.net.switch_id()
    }
}

/// Running dispatch thread; stopped on [`shutdown`](Self::shutdown) or drop.
#[derive(Debug)]
pub struct DispatchThread {
    node: NodeId,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<PtxResult<()>>>,
}

impl DispatchThread {
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Stop the thread; returns the error that stopped it earlier, if any.
    pub fn shutdown(mut self) -> PtxResult<()> {
        self.stop()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn stop(&mut self) -> PtxResult<()> {
        // disconnecting the channel wakes the select
        self.shutdown.take();
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                PtxError::Transport(format!("dispatch thread of node {} panicked", self.node))
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for DispatchThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "dispatch thread shutdown failed");
        }
    }
}
