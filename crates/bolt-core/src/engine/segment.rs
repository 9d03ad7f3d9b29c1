//! A single download segment.
//!
//! Shared between exactly one worker task and the supervisor through an
//! `Arc`. All mutable fields are atomics: the worker bumps counters per
//! chunk, the supervisor reads them without taking any lock, and state
//! transitions publish with release/acquire ordering so an observer
//! that sees `completed` also sees the final counter values.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::STEAL_ALIGN;
use crate::error::BoltError;
use crate::meta::SegmentMeta;
use bolt_types::{SegmentSnapshot, SegmentState};

pub struct Segment {
    id: u32,
    /// First byte of the HTTP range. Fixed for the segment's lifetime.
    offset: u64,
    /// Write position in the output file. Fixed for the segment's
    /// lifetime.
    file_offset: u64,
    /// Current length of the range. Only the supervisor mutates this
    /// (work stealing, dynamic splits); 0 is the unknown-length
    /// sentinel for single-segment streaming downloads.
    size: AtomicU64,
    downloaded: AtomicU64,
    /// Bytes committed to the file by this worker. Always advanced
    /// together with `downloaded`, after a successful write.
    write_offset: AtomicU64,
    /// Window accumulator drained by the supervisor each tick to
    /// compute the instantaneous speed.
    speed_accum: AtomicU64,
    /// Last speed the supervisor computed, bytes/sec.
    speed_bps: AtomicU64,
    state: AtomicU8,
    /// Bumped by the supervisor when it replaces this segment's worker;
    /// a worker holding a stale generation must not touch the segment.
    generation: AtomicU32,
    /// Cooperative cancel flag polled by the worker between chunks.
    cancelled: AtomicBool,
    /// Milliseconds since `epoch` at the last observed progress.
    last_progress_ms: AtomicU64,
    /// Engine-wide time base for the progress timestamps.
    epoch: Instant,
    error: Mutex<Option<BoltError>>,
}

impl Segment {
    pub fn new(id: u32, offset: u64, size: u64, file_offset: u64, epoch: Instant) -> Self {
        Self {
            id,
            offset,
            file_offset,
            size: AtomicU64::new(size),
            downloaded: AtomicU64::new(0),
            write_offset: AtomicU64::new(0),
            speed_accum: AtomicU64::new(0),
            speed_bps: AtomicU64::new(0),
            state: AtomicU8::new(SegmentState::Pending as u8),
            generation: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            last_progress_ms: AtomicU64::new(epoch.elapsed().as_millis() as u64),
            epoch,
            error: Mutex::new(None),
        }
    }

    /// Rebuild a segment from resume metadata. Fully fetched ranges
    /// come back `completed`, everything else `pending` with its
    /// counters restored.
    pub fn restore(meta: &SegmentMeta, epoch: Instant) -> Self {
        let seg = Self::new(meta.id, meta.offset, meta.size, meta.file_offset, epoch);
        seg.downloaded.store(meta.downloaded, Ordering::Relaxed);
        seg.write_offset.store(meta.downloaded, Ordering::Relaxed);
        if meta.size > 0 && meta.downloaded >= meta.size {
            seg.state
                .store(SegmentState::Completed as u8, Ordering::Release);
        }
        seg
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset.load(Ordering::Acquire)
    }

    /// Unknown-length segments report 0 until the stream ends.
    pub fn remaining(&self) -> u64 {
        self.size().saturating_sub(self.downloaded())
    }

    pub fn is_unknown_size(&self) -> bool {
        self.size.load(Ordering::Acquire) == 0
    }

    pub fn state(&self) -> SegmentState {
        SegmentState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: SegmentState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// `pending → connecting`; fails when any other state is observed,
    /// which keeps two workers from claiming the same segment.
    pub fn try_begin(&self) -> bool {
        self.state
            .compare_exchange(
                SegmentState::Pending as u8,
                SegmentState::Connecting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Park a live segment back to `pending`, keeping its counters.
    /// Used at pause boundaries and when replacing a stalled worker.
    pub fn park(&self) {
        let s = self.state();
        if !s.is_terminal() {
            self.set_state(SegmentState::Pending);
        }
    }

    /// Record bytes that were accepted by the output file.
    pub fn record_bytes(&self, n: u64) {
        self.downloaded.fetch_add(n, Ordering::AcqRel);
        self.write_offset.fetch_add(n, Ordering::AcqRel);
        self.speed_accum.fetch_add(n, Ordering::Relaxed);
        self.touch();
    }

    /// Commit bytes written at segment-relative position `expected`.
    /// Fails when another worker got there first, which tells a
    /// superseded worker to bow out without corrupting the counters.
    pub fn commit_bytes(&self, expected: u64, n: u64) -> bool {
        if self
            .downloaded
            .compare_exchange(expected, expected + n, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.write_offset.store(expected + n, Ordering::Release);
        self.speed_accum.fetch_add(n, Ordering::Relaxed);
        self.touch();
        true
    }

    /// Drop all progress. Only used when an unknown-length stream has
    /// to start over (it cannot resume mid-stream).
    pub fn reset_progress(&self) {
        self.downloaded.store(0, Ordering::Release);
        self.write_offset.store(0, Ordering::Release);
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate the current worker before handing the segment to a
    /// new one.
    pub fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Refresh the progress timestamp without moving counters.
    pub fn touch(&self) {
        self.last_progress_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Drain the window accumulator and publish the speed it implies
    /// over `window`. Called once per supervisor tick.
    pub fn sample_speed(&self, window: Duration) -> u64 {
        let bytes = self.speed_accum.swap(0, Ordering::Relaxed);
        let ms = window.as_millis().max(100) as u64;
        let bps = bytes * 1000 / ms;
        self.speed_bps.store(bps, Ordering::Relaxed);
        bps
    }

    pub fn speed_bps(&self) -> u64 {
        self.speed_bps.load(Ordering::Relaxed)
    }

    /// No progress for longer than `timeout` while downloading.
    pub fn is_stalled(&self, timeout: Duration, now: Instant) -> bool {
        if self.state() != SegmentState::Downloading {
            return false;
        }
        let last_ms = self.last_progress_ms.load(Ordering::Relaxed);
        let now_ms = now.duration_since(self.epoch).as_millis() as u64;
        now_ms.saturating_sub(last_ms) >= timeout.as_millis() as u64
    }

    /// How much of this segment's tail another worker could take:
    /// half the remaining bytes, aligned down to 4 KiB, or 0 when the
    /// segment is not downloading or too little is left to be worth
    /// splitting.
    pub fn can_steal(&self, min_steal: u64) -> u64 {
        if self.state() != SegmentState::Downloading {
            return 0;
        }
        let remaining = self.remaining();
        if remaining <= min_steal * 2 {
            return 0;
        }
        (remaining / 2) & !(STEAL_ALIGN - 1)
    }

    /// Give up up to `n` tail bytes: the worker will stop that much
    /// earlier. Returns the amount actually released, clamped so the
    /// range never shrinks below what is already downloaded.
    pub fn steal_bytes(&self, n: u64) -> u64 {
        let mut stolen = 0;
        let _ = self
            .size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                let floor = self.downloaded.load(Ordering::Acquire);
                let available = size.saturating_sub(floor);
                stolen = n.min(available);
                Some(size - stolen)
            });
        stolen
    }

    /// Grow the range by `n` bytes. Only meaningful for freshly
    /// allocated tail segments whose worker has not started, and for
    /// adopting the final length of an unknown-size stream.
    pub fn add_bytes(&self, n: u64) {
        self.size.fetch_add(n, Ordering::AcqRel);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn set_error(&self, err: BoltError) {
        *self.error.lock().expect("segment error lock") = Some(err);
    }

    pub fn error(&self) -> Option<BoltError> {
        self.error.lock().expect("segment error lock").clone()
    }

    pub fn snapshot(&self) -> SegmentSnapshot {
        SegmentSnapshot {
            id: self.id,
            state: self.state(),
            offset: self.offset,
            size: self.size(),
            file_offset: self.file_offset,
            downloaded: self.downloaded(),
            speed_bps: self.speed_bps(),
        }
    }

    pub fn to_meta(&self) -> SegmentMeta {
        SegmentMeta {
            id: self.id,
            offset: self.offset,
            size: self.size(),
            file_offset: self.file_offset,
            downloaded: self.downloaded(),
        }
    }
}

/// Pick the donor with the most stealable bytes, skipping the
/// requester. Ties go to the lower id.
pub fn find_steal_donor(
    segments: &[std::sync::Arc<Segment>],
    requester_id: u32,
    min_steal: u64,
) -> Option<(u32, u64)> {
    let mut best: Option<(u32, u64)> = None;
    for seg in segments {
        if seg.id() == requester_id {
            continue;
        }
        let removable = seg.can_steal(min_steal);
        if removable == 0 {
            continue;
        }
        match best {
            Some((_, most)) if removable <= most => {}
            _ => best = Some((seg.id(), removable)),
        }
    }
    best
}
