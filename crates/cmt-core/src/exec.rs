//! Worker-pool execution of per-trace jobs.
//!
//! Trace processing and window selection are embarrassingly parallel
//! across traces. A configured pool width of zero or one runs serially;
//! anything larger fans out over a dedicated rayon pool of that width.
//! Results come back in input order either way.

use cmt_types::error::{CmtError, CmtResult};
use rayon::prelude::*;

/// How per-trace jobs are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Serial,
    /// Pool of exactly this many worker threads.
    Parallel(usize),
}

impl ExecMode {
    /// Map a configured pool width onto an execution mode.
    pub fn from_width(multiprocesses: usize) -> Self {
        if multiprocesses > 1 {
            ExecMode::Parallel(multiprocesses)
        } else {
            ExecMode::Serial
        }
    }
}

/// Apply a fallible job to every item, preserving input order.
///
/// The first error aborts the batch. In parallel mode the jobs run on
/// a pool sized to the mode, so a wide batch cannot oversubscribe a
/// node shared with the forward solver.
pub fn map_ordered<T, U, F>(mode: ExecMode, items: Vec<T>, job: F) -> CmtResult<Vec<U>>
where
    T: Send,
    U: Send,
    F: Fn(T) -> CmtResult<U> + Send + Sync,
{
    match mode {
        ExecMode::Serial => items.into_iter().map(job).collect(),
        ExecMode::Parallel(width) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(width)
                .build()
                .map_err(|e| CmtError::Interrupted(format!("worker pool: {e}")))?;
            pool.install(|| items.into_par_iter().map(job).collect())
        }
    }
}
