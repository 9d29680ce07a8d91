//! Transaction layer: timestamps, futures, undo log, switch bridge and the
//! per-worker orchestrator.

pub mod executor;
pub mod future;
pub mod orchestrator;
pub mod switch;
pub mod timestamp;
pub mod undo;

// Public exports
pub use executor::ExecutorStats;
pub use future::{FutureArena, HeldLock, SwitchFuture, TupleFuture};
pub use orchestrator::{PhaseLatency, Transaction, TxnOutcome, TxnState, Workload};
pub use switch::{SwitchHandle, SwitchProgram};
pub use timestamp::{TimestampFactory, SharedClock, TimestampSource};
pub use undo::{UndoAction, UndoLog};
