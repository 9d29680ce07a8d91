//! Logging utilities for PTX
//!
//! `tracing` 구독자 초기화와 노드/워커 스팬. 필터는 `PTX_LOG`를 먼저 보고,
//! 없으면 `RUST_LOG`, 둘 다 없으면 인자로 받은 레벨을 씁니다.

use crate::types::NodeId;
use tracing::Span;

#[cfg(feature = "logging")]
use tracing_subscriber::{EnvFilter, fmt};

/// Filter variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "PTX_LOG";

/// Span of one application worker; its fields show up on every event inside.
pub fn node_span(node: NodeId, worker: u32) -> Span {
    tracing::info_span!("ptx", %node, worker)
}

/// Span of a node's dispatch thread.
pub fn dispatch_span(node: NodeId) -> Span {
    tracing::info_span!("ptx-dispatch", %node)
}

#[cfg(feature = "logging")]
fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,ptx_core={default_level}")))
}

/// Initialize logging at `info` for this crate.
///
/// ```rust
/// ptx_core::logging::init();
/// ```
#[cfg(feature = "logging")]
pub fn init() {
    init_with_level("info")
}

/// Initialize logging with a specific level for `ptx_core` targets.
/// Other crates stay at `warn` unless an env filter says otherwise.
#[cfg(feature = "logging")]
pub fn init_with_level(level: &str) {
    let _ = fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .try_init();
}

/// Initialize logging for tests. Lock contention logs at `debug`.
#[cfg(feature = "logging")]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(filter("debug"))
        .with_thread_names(true)
        .with_test_writer()
        .try_init();
}

// Stub implementations when logging feature is disabled
#[cfg(not(feature = "logging"))]
pub fn init() {}

#[cfg(not(feature = "logging"))]
pub fn init_with_level(_level: &str) {}

#[cfg(not(feature = "logging"))]
pub fn init_test() {}
