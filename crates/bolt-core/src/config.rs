//! Engine constants and per-download configuration.

use std::time::Duration;

/// Smallest range a segment may hold.
pub const MIN_SEGMENT_SIZE: u64 = 256 * 1024; // 256 KiB
/// Largest range a single segment is planned with.
pub const MAX_SEGMENT_SIZE: u64 = 50 * 1024 * 1024; // 50 MiB

/// Hard bounds on the planned segment count for ranged downloads.
pub const MIN_SEGMENTS: u32 = 2;
pub const MAX_SEGMENTS: u32 = 32;

/// Transient transfer errors are retried this many times per worker.
pub const RETRY_COUNT: u32 = 3;

/// A downloading segment with no progress for this long is stalled.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Supervisor tick; also the minimum speed-sample window.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Resume metadata is rewritten on this interval while downloading.
pub const META_SAVE_INTERVAL: Duration = Duration::from_secs(5);

/// Segments slower than this ask for work to be rebalanced.
pub const STEAL_THRESHOLD_BPS: u64 = 100 * 1024; // 100 KiB/s

/// Stolen amounts are aligned down to this boundary.
pub const STEAL_ALIGN: u64 = 4096;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_REDIRECTS: usize = 10;

/// Per-download knobs. `Default` mirrors the engine constants.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on concurrently live segments, including ones added
    /// by work stealing and dynamic splits.
    pub max_segments: u32,
    /// Caller-pinned segment count; `None` lets the planner decide.
    pub segment_count: Option<u32>,
    pub stall_timeout: Duration,
    pub retry_count: u32,
    pub work_stealing: bool,
    pub dynamic_split: bool,
    /// Bytes per second across all workers of this engine; `None` is
    /// unlimited.
    pub speed_limit: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_segments: MAX_SEGMENTS,
            segment_count: None,
            stall_timeout: STALL_TIMEOUT,
            retry_count: RETRY_COUNT,
            work_stealing: true,
            dynamic_split: true,
            speed_limit: None,
        }
    }
}
