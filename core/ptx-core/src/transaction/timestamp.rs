//! Transaction timestamps.
//!
//! A timestamp carries a monotonically increasing counter in its high bits
//! and the issuing `(node << 8) | worker` identity in its low 16 bits, so two
//! workers never hand out the same value even when their counters collide.

use crate::types::{Timestamp, WorkerContext};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const IDENTITY_BITS: u32 = 16;

/// Process-wide reference point for clock timestamps.
fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// 여러 워커가 공유하는 논리 시계
///
/// Only the counter half of a [`Timestamp`] comes from here; each factory
/// still ORs in its own identity, so the layout matches clock timestamps.
#[derive(Debug, Default)]
pub struct SharedClock {
    counter: AtomicU64,
}

impl SharedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next counter value, starting at 1.
    fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Counter of the most recent tick, 0 before the first.
    pub fn last(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Counter half of a timestamp issued through this clock.
    pub fn counter_of(ts: Timestamp) -> u64 {
        ts.0 >> IDENTITY_BITS
    }
}

/// Where a worker draws its transaction timestamps from.
#[derive(Debug, Clone)]
pub enum TimestampSource {
    /// Nanoseconds since the process epoch (48 bits, about 3.2 days).
    Clock,
    /// Logical counter shared by several workers; total order across them.
    Shared(std::sync::Arc<SharedClock>),
}

/// Per-worker timestamp factory.
#[derive(Debug, Clone)]
pub struct TimestampFactory {
    source: TimestampSource,
    identity: u64,
    last: u64,
}

impl TimestampFactory {
    pub fn new(source: TimestampSource, ctx: WorkerContext) -> Self {
        // Touch the epoch now so the first transaction does not pay for it.
        let _ = epoch();
        Self {
            source,
            identity: u64::from(((ctx.node.0 & 0xff) << 8) | (ctx.worker & 0xff)),
            last: 0,
        }
    }

    pub fn clock(ctx: WorkerContext) -> Self {
        Self::new(TimestampSource::Clock, ctx)
    }

    /// Fresh timestamp, strictly greater than every one this factory issued.
    pub fn next(&mut self) -> Timestamp {
        let raw = match &self.source {
            TimestampSource::Clock => epoch().elapsed().as_nanos() as u64,
            TimestampSource::Shared(clock) => clock.tick(),
        };
        // Two reads inside the same clock tick must still differ.
        let counter = raw.max(self.last + 1);
        self.last = counter;
        Timestamp((counter << IDENTITY_BITS) | self.identity)
    }
}
