// SPDX-License-Identifier: AGPL-3.0-or-later
// ExprDB - Sparse Expression Similarity Engine
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Cooperative cancellation, progress reporting and the worker pool
//!
//! Long passes call [`SearchControl::checkpoint`] once per processed
//! observation. A checkpoint fails with `Cancelled` after [`cancel`] was
//! called from any thread, and every `progress_interval` it logs how far the
//! pass has come.
//!
//! [`cancel`]: SearchControl::cancel

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

use exprdb_core::{ExprError, Result, SearchConfig};

#[derive(Debug)]
struct ProgressClock {
    label: String,
    total: u64,
    started: Instant,
    last_report: Instant,
}

/// Shared between all workers of one pass and whoever may want to cancel it
#[derive(Debug)]
pub struct SearchControl {
    cancelled: AtomicBool,
    processed: AtomicU64,
    interval: Duration,
    clock: Mutex<ProgressClock>,
}

impl Default for SearchControl {
    fn default() -> Self {
        Self::new(&SearchConfig::default())
    }
}

impl SearchControl {
    pub fn new(config: &SearchConfig) -> Self {
        let now = Instant::now();
        Self {
            cancelled: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            interval: Duration::from_millis(config.progress_interval_ms),
            clock: Mutex::new(ProgressClock {
                label: String::new(),
                total: 0,
                started: now,
                last_report: now,
            }),
        }
    }

    /// Reset the counters for a new pass over `total` items
    pub fn begin(&self, label: &str, total: usize) {
        self.processed.store(0, Ordering::Relaxed);
        let now = Instant::now();
        let mut clock = self.clock.lock();
        clock.label = label.to_string();
        clock.total = total as u64;
        clock.started = now;
        clock.last_report = now;
    }

    /// Request cancellation. Running passes stop at their next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Clear a previous cancellation so that new passes can run
    pub fn resume(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Called between processed items
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ExprError::Cancelled);
        }
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;

        // Only one worker reports; the others skip instead of waiting.
        if let Some(mut clock) = self.clock.try_lock() {
            let now = Instant::now();
            if now.duration_since(clock.last_report) >= self.interval {
                clock.last_report = now;
                let elapsed = now.duration_since(clock.started).as_secs_f64();
                info!(
                    pass = %clock.label,
                    processed,
                    total = clock.total,
                    elapsed_s = elapsed,
                    "progress"
                );
            }
        }
        Ok(())
    }

    /// Items processed since the last `begin`
    pub fn progress(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

/// Fixed-size worker pool for the search passes
pub fn build_thread_pool(config: &SearchConfig) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .thread_name(|i| format!("exprdb-search-{}", i))
        .build()
        .map_err(|e| ExprError::Internal(format!("failed to build worker pool: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_checkpoint_counts() {
        let control = SearchControl::default();
        control.begin("test", 3);
        for _ in 0..3 {
            control.checkpoint().unwrap();
        }
        assert_eq!(control.progress(), 3);

        control.begin("again", 1);
        assert_eq!(control.progress(), 0);
    }

    #[test]
    fn test_cancel_from_other_thread() {
        let control = Arc::new(SearchControl::default());
        let remote = Arc::clone(&control);
        std::thread::spawn(move || remote.cancel()).join().unwrap();

        assert!(control.is_cancelled());
        assert!(matches!(control.checkpoint(), Err(ExprError::Cancelled)));

        control.resume();
        assert!(control.checkpoint().is_ok());
    }

    #[test]
    fn test_progress_logging_with_zero_interval() {
        let control = SearchControl::new(&SearchConfig {
            threads: 1,
            progress_interval_ms: 0,
        });
        control.begin("pass", 2);
        control.checkpoint().unwrap();
        control.checkpoint().unwrap();
        assert_eq!(control.progress(), 2);
    }

    #[test]
    fn test_thread_pool() {
        let pool = build_thread_pool(&SearchConfig {
            threads: 2,
            progress_interval_ms: 1000,
        })
        .unwrap();
        assert_eq!(pool.current_num_threads(), 2);
    }
}
