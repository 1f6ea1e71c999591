//! Resource accounting
//!
//! Snapshots cumulative usage of reaped child processes before and after a
//! job and reports the difference.

use nix::sys::resource::{getrusage, UsageWho};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Cumulative child resource usage at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub user_time_secs: f64,
    pub system_time_secs: f64,
    pub max_rss_kb: i64,
    pub minor_faults: i64,
    pub major_faults: i64,
    pub block_reads: i64,
    pub block_writes: i64,
}

/// Difference between two samples, never negative
pub type UsageDelta = UsageSample;

/// Sample `getrusage(RUSAGE_CHILDREN)`; zeros on failure.
///
/// Counters cover every reaped child of this process, so concurrent jobs show
/// up in each other's deltas.
pub fn snapshot() -> UsageSample {
    match getrusage(UsageWho::RUSAGE_CHILDREN) {
        Ok(usage) => {
            let user = usage.user_time();
            let system = usage.system_time();
            UsageSample {
                user_time_secs: user.tv_sec() as f64 + user.tv_usec() as f64 / 1e6,
                system_time_secs: system.tv_sec() as f64 + system.tv_usec() as f64 / 1e6,
                max_rss_kb: usage.max_rss() as i64,
                minor_faults: usage.minor_page_faults() as i64,
                major_faults: usage.major_page_faults() as i64,
                block_reads: usage.block_reads() as i64,
                block_writes: usage.block_writes() as i64,
            }
        }
        Err(e) => {
            warn!("getrusage failed: {}", e);
            UsageSample::default()
        }
    }
}

/// Field-wise `after - before`, floored at zero
pub fn delta(before: &UsageSample, after: &UsageSample) -> UsageDelta {
    UsageDelta {
        user_time_secs: round_micros((after.user_time_secs - before.user_time_secs).max(0.0)),
        system_time_secs: round_micros(
            (after.system_time_secs - before.system_time_secs).max(0.0),
        ),
        max_rss_kb: (after.max_rss_kb - before.max_rss_kb).max(0),
        minor_faults: (after.minor_faults - before.minor_faults).max(0),
        major_faults: (after.major_faults - before.major_faults).max(0),
        block_reads: (after.block_reads - before.block_reads).max(0),
        block_writes: (after.block_writes - before.block_writes).max(0),
    }
}

fn round_micros(secs: f64) -> f64 {
    (secs * 1e6).round() / 1e6
}
