//! Batch executor: runs a sequence of arguments on one worker's transaction.

use super::orchestrator::{Transaction, TxnOutcome, Workload};
use crate::error::PtxResult;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::info;

/// 실행 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub commits: u64,
    pub rollbacks: u64,
    pub num_txns: u64,
    /// Wall time of the batch; the mean over workers after `accumulate`
    pub duration: Duration,
    /// Arguments the workload executes on the switch
    pub on_switch: u64,
}

impl ExecutorStats {
    /// Sum the counters of several workers and average their durations.
    pub fn accumulate<'a, I>(stats: I) -> Self
    where
        I: IntoIterator<Item = &'a ExecutorStats>,
    {
        let mut total = ExecutorStats::default();
        let mut workers = 0u32;
        for s in stats {
            total.commits += s.commits;
            total.rollbacks += s.rollbacks;
            total.num_txns += s.num_txns;
            total.duration += s.duration;
            total.on_switch += s.on_switch;
            workers += 1;
        }
        if workers > 0 {
            total.duration /= workers;
        }
        total
    }

    fn per_sec(&self, count: u64) -> f64 {
        let secs = self.duration.as_secs_f64();
        if count == 0 || secs == 0.0 {
            return 0.0;
        }
        count as f64 / secs
    }

    pub fn txns_per_sec(&self) -> f64 {
        self.per_sec(self.num_txns)
    }

    pub fn commits_per_sec(&self) -> f64 {
        self.per_sec(self.commits)
    }

    pub fn log_summary(&self) {
        info!(
            txns_per_sec = self.txns_per_sec() as u64,
            commits_per_sec = self.commits_per_sec() as u64,
            commits = self.commits,
            aborts = self.rollbacks,
            txns = self.num_txns,
            on_switch = self.on_switch,
            avg_duration_us = self.duration.as_micros() as u64,
            "executor summary"
        );
    }
}

impl Transaction {
    /// Execute every argument in order and count the outcomes.
    ///
    /// Fatal errors stop the batch.
    pub fn execute_batch<W: Workload>(
        &mut self,
        workload: &W,
        args: &[W::Arg],
    ) -> PtxResult<ExecutorStats> {
        let mut stats = ExecutorStats {
            on_switch: args.iter().filter(|arg| workload.on_switch(arg)).count() as u64,
            ..ExecutorStats::default()
        };

        let _span = crate::logging::node_span(self.ctx().node, self.ctx().worker).entered();
        let started = Instant::now();
        for arg in args {
            match self.execute(workload, arg)? {
                TxnOutcome::Committed => stats.commits += 1,
                TxnOutcome::RolledBack => stats.rollbacks += 1,
            }
        }
        stats.duration = started.elapsed();
        stats.num_txns = args.len() as u64;

        info!(
            worker = self.ctx().worker,
            duration_us = stats.duration.as_micros() as u64,
            txns_per_sec = stats.txns_per_sec() as u64,
            commits = stats.commits,
            aborts = stats.rollbacks,
            "worker finished"
        );
        Ok(stats)
    }
}
