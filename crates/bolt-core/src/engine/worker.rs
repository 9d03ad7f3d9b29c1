//! Segment worker - drives one byte range to completion.
//!
//! A worker claims its segment (`pending → connecting`), issues a
//! ranged GET for whatever the segment still lacks, and streams chunks
//! into the output file at explicit offsets. Pause and cancel flags are
//! polled between chunks; transient transport errors are retried from
//! the current counters with a short backoff.
//!
//! The worker keeps its own stream position and publishes it through a
//! compare-and-swap commit. When the supervisor replaces a stalled
//! worker, the stale one loses the first commit race (or notices the
//! bumped generation) and exits without touching the segment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::disk::OutputFile;
use crate::engine::segment::Segment;
use crate::error::{BoltError, Result};
use crate::http::HttpClient;
use crate::limiter::RateLimiter;
use bolt_types::SegmentState;

/// The worker's own view of how a transfer attempt ended.
enum Outcome {
    /// Range fully fetched.
    Done,
    /// Another worker owns this segment now; leave everything alone.
    Superseded,
}

pub(crate) struct SegmentWorker {
    pub segment: Arc<Segment>,
    pub url: String,
    pub client: HttpClient,
    pub file: Arc<OutputFile>,
    pub limiter: RateLimiter,
    /// Engine-level pause flag; pausing parks the segment.
    pub paused: Arc<AtomicBool>,
    /// Whether the server honors byte ranges. Without them the whole
    /// resource streams through one segment, restarting from zero on
    /// retry.
    pub ranged: bool,
    pub retry_count: u32,
}

impl SegmentWorker {
    /// Run the segment to a terminal state (or park it on pause).
    pub async fn run(self) {
        if !self.segment.try_begin() {
            // Someone else owns this segment, or it is already done.
            return;
        }

        let id = self.segment.id();
        let generation = self.segment.generation();
        let mut attempt = 0u32;

        loop {
            let result = self.transfer().await;

            // A replaced worker must not publish anything.
            if self.segment.generation() != generation {
                return;
            }

            match result {
                Ok(Outcome::Done) => {
                    self.segment.set_state(SegmentState::Completed);
                    debug!(segment = id, bytes = self.segment.downloaded(), "segment complete");
                    return;
                }
                Ok(Outcome::Superseded) => return,
                Err(BoltError::Paused) => {
                    self.segment.park();
                    debug!(segment = id, "segment parked for pause");
                    return;
                }
                Err(BoltError::Cancelled) => {
                    self.segment.set_state(SegmentState::Cancelled);
                    debug!(segment = id, "segment cancelled");
                    return;
                }
                Err(err) if err.is_transient() && attempt < self.retry_count => {
                    attempt += 1;
                    warn!(segment = id, %err, attempt, "transient error, retrying");
                    tokio::time::sleep(backoff(attempt)).await;
                    // Re-enter connecting; counters keep their values so
                    // the retry only asks for what is missing.
                    self.segment.set_state(SegmentState::Connecting);
                }
                Err(err) => {
                    info!(segment = id, %err, "segment failed");
                    self.segment.set_error(err);
                    self.segment.set_state(SegmentState::Failed);
                    return;
                }
            }
        }
    }

    /// One transfer attempt from the current counters.
    async fn transfer(&self) -> Result<Outcome> {
        let seg = &self.segment;

        if !self.ranged || seg.is_unknown_size() {
            return self.transfer_unbounded().await;
        }

        // Segment-relative stream position; resumed workers only ask
        // for what they lack.
        let mut pos = seg.downloaded();
        if pos >= seg.size() {
            return Ok(Outcome::Done);
        }

        let start = seg.offset() + pos;
        let end = seg.offset() + seg.size() - 1;
        let response = self.client.get_range(&self.url, start, end).await?;

        seg.set_state(SegmentState::Downloading);
        seg.touch();

        let mut stream = response.bytes_stream();
        while let Some(next) = stream.next().await {
            self.check_flags()?;

            let chunk = next.map_err(|e| BoltError::from_reqwest(&e))?;

            // The supervisor may have shrunk this range mid-flight;
            // clamp so we never write past our (new) end.
            let allowed = seg.size().saturating_sub(pos);
            if allowed == 0 {
                break;
            }
            let take = (allowed as usize).min(chunk.len());

            self.limiter.acquire(take as u64).await;
            if !self.write_chunk(pos, &chunk[..take])? {
                return Ok(Outcome::Superseded);
            }
            pos += take as u64;

            if (take as u64) == allowed {
                break; // reached the (possibly shrunken) end
            }
        }

        if pos >= seg.size() {
            Ok(Outcome::Done)
        } else {
            // The server closed the stream early; retryable.
            Err(BoltError::ConnectionLost)
        }
    }

    /// Stream the whole resource without a Range header: either the
    /// length is unknown or the server ignores ranges. Such a stream
    /// cannot resume mid-way, so a retry starts over from zero.
    async fn transfer_unbounded(&self) -> Result<Outcome> {
        let seg = &self.segment;
        if seg.downloaded() > 0 {
            seg.reset_progress();
        }
        let mut pos = 0u64;
        let known_size = seg.size();

        let response = self.client.get_full(&self.url).await?;

        seg.set_state(SegmentState::Downloading);
        seg.touch();

        let mut stream = response.bytes_stream();
        while let Some(next) = stream.next().await {
            self.check_flags()?;
            let chunk = next.map_err(|e| BoltError::from_reqwest(&e))?;

            // With a known size, never write past the planned file end.
            let take = if known_size > 0 {
                let allowed = known_size.saturating_sub(pos);
                if allowed == 0 {
                    break;
                }
                (allowed as usize).min(chunk.len())
            } else {
                chunk.len()
            };

            self.limiter.acquire(take as u64).await;
            if !self.write_chunk(pos, &chunk[..take])? {
                return Ok(Outcome::Superseded);
            }
            pos += take as u64;
        }

        if known_size == 0 {
            // Adopt the observed length.
            seg.add_bytes(pos);
            Ok(Outcome::Done)
        } else if pos >= known_size {
            Ok(Outcome::Done)
        } else {
            Err(BoltError::ConnectionLost)
        }
    }

    fn check_flags(&self) -> Result<()> {
        if self.segment.is_cancel_requested() {
            return Err(BoltError::Cancelled);
        }
        if self.paused.load(Ordering::Acquire) {
            return Err(BoltError::Paused);
        }
        Ok(())
    }

    /// Write at the segment's file position for `pos` and commit the
    /// counters. `Ok(false)` means another worker took over. A failed
    /// write is terminal for this worker.
    fn write_chunk(&self, pos: u64, data: &[u8]) -> Result<bool> {
        let seg = &self.segment;
        self.file.write_at(seg.file_offset() + pos, data)?;
        Ok(seg.commit_bytes(pos, data.len() as u64))
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * u64::from(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_with_attempts() {
        assert_eq!(backoff(1), Duration::from_millis(500));
        assert_eq!(backoff(2), Duration::from_millis(1000));
        assert_eq!(backoff(3), Duration::from_millis(1500));
    }

    #[test]
    fn range_request_bounds() {
        // offset 1000, size 500 → "1000-1499" on the wire.
        let offset = 1000u64;
        let size = 500u64;
        let start = offset;
        let end = offset + size - 1;
        assert_eq!(format!("{start}-{end}"), "1000-1499");
    }
}
