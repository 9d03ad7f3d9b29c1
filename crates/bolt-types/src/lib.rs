//! Shared types for bolt
//!
//! This crate contains the plain data structures exchanged between the
//! download engine and its front-ends: engine and segment states,
//! progress snapshots, and the facts learned from the initial server
//! probe. Everything here is serde-serializable so front-ends can ship
//! snapshots over whatever wire they like.

use serde::{Deserialize, Serialize};

// ============================================================================
// States
// ============================================================================

/// Overall state of one download engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum EngineState {
    /// Not started.
    Idle = 0,
    /// Probing the server and setting up segments.
    Preparing = 1,
    /// Workers are transferring.
    Downloading = 2,
    /// Paused by the caller; workers are joined.
    Paused = 3,
    /// All segments finished.
    Completed = 4,
    /// At least one segment failed and none are still running.
    Failed = 5,
    /// Cancelled by the caller.
    Cancelled = 6,
}

impl EngineState {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EngineState::Completed | EngineState::Failed | EngineState::Cancelled
        )
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => EngineState::Preparing,
            2 => EngineState::Downloading,
            3 => EngineState::Paused,
            4 => EngineState::Completed,
            5 => EngineState::Failed,
            6 => EngineState::Cancelled,
            _ => EngineState::Idle,
        }
    }
}

/// State machine of a single segment.
///
/// `pending → connecting → downloading → {completed | failed | stalled |
/// cancelled}`; `stalled` re-enters `connecting` on restart, `cancelled`
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SegmentState {
    Pending = 0,
    Connecting = 1,
    Downloading = 2,
    Stalled = 3,
    Completed = 4,
    Failed = 5,
    Cancelled = 6,
}

impl SegmentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SegmentState::Completed | SegmentState::Failed | SegmentState::Cancelled
        )
    }

    /// A live segment either has a worker or is waiting for one.
    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => SegmentState::Connecting,
            2 => SegmentState::Downloading,
            3 => SegmentState::Stalled,
            4 => SegmentState::Completed,
            5 => SegmentState::Failed,
            6 => SegmentState::Cancelled,
            _ => SegmentState::Pending,
        }
    }
}

// ============================================================================
// Server facts
// ============================================================================

/// What the initial HEAD probe told us about the resource.
///
/// Immutable for the lifetime of one download.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerFacts {
    /// HTTP status of the probe response.
    pub status: u16,
    /// Total size in bytes; 0 when the server did not say.
    pub content_length: u64,
    /// Whether the server advertised `Accept-Ranges: bytes`.
    pub accepts_ranges: bool,
    /// `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// Filename hinted via `Content-Disposition`, if any.
    pub filename: Option<String>,
    /// URL after redirects, when it differs from the requested one.
    pub final_url: Option<String>,
}

// ============================================================================
// Progress snapshots
// ============================================================================

/// Aggregate progress of one engine, recomputed every supervisor tick.
///
/// Observers receive a copy; values may drift by up to one tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// Sum of per-segment instantaneous speeds, bytes/sec.
    pub speed_bps: u64,
    /// Bytes fetched this session divided by elapsed time.
    pub average_speed_bps: u64,
    /// Estimated seconds remaining at the current speed; 0 when unknown.
    pub eta_seconds: u64,
    pub percent: f64,
    pub active_segments: u32,
    pub completed_segments: u32,
    pub failed_segments: u32,
    /// Seconds since the engine started this session.
    pub elapsed_seconds: f64,
}

impl ProgressSnapshot {
    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.downloaded_bytes)
    }
}

/// Per-segment view for front-ends that render individual ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSnapshot {
    pub id: u32,
    pub state: SegmentState,
    /// First byte of the HTTP range.
    pub offset: u64,
    /// Current length of the range (work stealing may shrink or grow it).
    pub size: u64,
    /// Where this segment writes in the output file.
    pub file_offset: u64,
    pub downloaded: u64,
    pub speed_bps: u64,
}

impl SegmentSnapshot {
    pub fn percent(&self) -> f64 {
        if self.size == 0 {
            if self.state == SegmentState::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            self.downloaded as f64 * 100.0 / self.size as f64
        }
    }

    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.downloaded)
    }
}
