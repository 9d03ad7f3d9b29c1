//! Download engine: owns the segment table and the output file, runs
//! the supervisor loop.
//!
//! One engine drives one URL. `start()` probes the server, restores or
//! plans segments, opens the output and spawns one worker per range,
//! then a supervisor task ticks every 100 ms: aggregate progress,
//! restart stalled workers, rebalance work, split large tails, persist
//! resume metadata, detect termination.
//!
//! Teardown order is a hard invariant: stop and join the supervisor,
//! then cancel and join every worker, then flush and close the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{
    EngineConfig, META_SAVE_INTERVAL, MIN_SEGMENT_SIZE, STEAL_THRESHOLD_BPS, TICK_INTERVAL,
};
use crate::disk::OutputFile;
use crate::engine::segment::{find_steal_donor, Segment};
use crate::engine::worker::SegmentWorker;
use crate::error::{BoltError, Result};
use crate::http::HttpClient;
use crate::limiter::RateLimiter;
use crate::meta::DownloadMeta;
use crate::url::RemoteUrl;
use bolt_types::{EngineState, ProgressSnapshot, SegmentSnapshot, SegmentState};

/// Invoked with a fresh snapshot on every supervisor tick and on
/// terminal transitions. Callers must not block inside it.
pub type ProgressCallback = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// How long joins wait before aborting a worker blocked in the
/// transport.
const JOIN_GRACE: Duration = Duration::from_secs(5);

pub struct DownloadEngine {
    client: HttpClient,
    config: EngineConfig,
    limiter: RateLimiter,
    /// Time base for all segment progress timestamps.
    epoch: Instant,

    state: AtomicU8,
    /// Engine-level pause flag shared with every worker.
    paused: Arc<AtomicBool>,

    url: Mutex<Option<RemoteUrl>>,
    output_path: Mutex<PathBuf>,
    /// URL after redirects; what the workers actually fetch.
    final_url: Mutex<String>,
    filename: Mutex<String>,
    content_type: Mutex<Option<String>>,
    file_size: AtomicU64,
    supports_ranges: AtomicBool,

    file: Mutex<Option<Arc<OutputFile>>>,
    segments: Mutex<Vec<Arc<Segment>>>,
    next_segment_id: AtomicU32,

    workers: Mutex<HashMap<u32, JoinHandle<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,

    progress: Mutex<ProgressSnapshot>,
    callback: Mutex<Option<ProgressCallback>>,
    first_error: Mutex<Option<BoltError>>,

    session_started: Mutex<Option<Instant>>,
    /// Bytes already present when this session started; average speed
    /// only counts what this session fetched.
    session_base: AtomicU64,
}

impl DownloadEngine {
    pub fn new(client: HttpClient, config: EngineConfig) -> Arc<Self> {
        let limiter = RateLimiter::from_limit(config.speed_limit);
        Arc::new(Self {
            client,
            config,
            limiter,
            epoch: Instant::now(),
            state: AtomicU8::new(EngineState::Idle as u8),
            paused: Arc::new(AtomicBool::new(false)),
            url: Mutex::new(None),
            output_path: Mutex::new(PathBuf::new()),
            final_url: Mutex::new(String::new()),
            filename: Mutex::new(String::new()),
            content_type: Mutex::new(None),
            file_size: AtomicU64::new(0),
            supports_ranges: AtomicBool::new(false),
            file: Mutex::new(None),
            segments: Mutex::new(Vec::new()),
            next_segment_id: AtomicU32::new(0),
            workers: Mutex::new(HashMap::new()),
            supervisor: Mutex::new(None),
            progress: Mutex::new(ProgressSnapshot::default()),
            callback: Mutex::new(None),
            first_error: Mutex::new(None),
            session_started: Mutex::new(None),
            session_base: AtomicU64::new(0),
        })
    }

    // ========================================================================
    // Public surface
    // ========================================================================

    /// Set the URL to download. Rejected while running.
    pub fn set_url(&self, url: &str) -> Result<()> {
        if matches!(
            self.state(),
            EngineState::Preparing | EngineState::Downloading
        ) {
            return Err(BoltError::AlreadyRunning);
        }
        let parsed = RemoteUrl::parse(url)?;
        *self.url.lock().expect("url lock") = Some(parsed);
        Ok(())
    }

    /// Set the output path. An empty path is derived from the server
    /// hint or the URL during preparation.
    pub fn set_output_path(&self, path: impl Into<PathBuf>) {
        *self.output_path.lock().expect("path lock") = path.into();
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_path.lock().expect("path lock").clone()
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Filename as resolved during preparation.
    pub fn filename(&self) -> String {
        self.filename.lock().expect("filename lock").clone()
    }

    pub fn content_type(&self) -> Option<String> {
        self.content_type.lock().expect("content type lock").clone()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size.load(Ordering::Acquire)
    }

    /// First worker error observed on a failed download.
    pub fn error(&self) -> Option<BoltError> {
        self.first_error.lock().expect("error lock").clone()
    }

    /// Latest aggregate snapshot.
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.lock().expect("progress lock").clone()
    }

    /// Per-segment snapshots, in table order.
    pub fn segment_progress(&self) -> Vec<SegmentSnapshot> {
        self.segment_table().iter().map(|s| s.snapshot()).collect()
    }

    pub fn on_progress(&self, callback: ProgressCallback) {
        *self.callback.lock().expect("callback lock") = Some(callback);
    }

    /// Start (or restart after failure) the download.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        match self.state() {
            EngineState::Preparing | EngineState::Downloading => {
                return Err(BoltError::AlreadyRunning)
            }
            EngineState::Completed | EngineState::Cancelled => return Err(BoltError::WrongState),
            EngineState::Paused => return Err(BoltError::WrongState),
            EngineState::Idle | EngineState::Failed => {}
        }

        if let Err(err) = self.prepare().await {
            self.set_state(EngineState::Failed);
            *self.first_error.lock().expect("error lock") = Some(err.clone());
            return Err(err);
        }

        self.begin_session();
        self.set_state(EngineState::Downloading);

        for seg in self.segment_table() {
            if seg.state().is_live() {
                self.spawn_worker(&seg);
            }
        }
        self.spawn_supervisor();

        info!(
            url = %self.final_url.lock().expect("url lock"),
            size = self.file_size(),
            segments = self.segment_table().len(),
            "download started"
        );
        Ok(())
    }

    /// Pause a running download. Workers are joined; their segments
    /// park back to `pending` with counters intact.
    pub async fn pause(self: &Arc<Self>) -> Result<()> {
        if self
            .state
            .compare_exchange(
                EngineState::Downloading as u8,
                EngineState::Paused as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(BoltError::WrongState);
        }

        self.paused.store(true, Ordering::Release);
        self.join_supervisor().await;
        self.join_workers().await;

        // Anything a worker left mid-flight parks with its counters.
        for seg in self.segment_table() {
            seg.park();
        }

        if let Err(err) = self.save_meta().await {
            warn!(%err, "failed to save resume metadata on pause");
        }
        info!("download paused");
        Ok(())
    }

    /// Resume a paused download: respawn workers from their counters
    /// and restart the supervisor.
    pub async fn resume(self: &Arc<Self>) -> Result<()> {
        if self
            .state
            .compare_exchange(
                EngineState::Paused as u8,
                EngineState::Downloading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(BoltError::WrongState);
        }

        self.paused.store(false, Ordering::Release);
        self.begin_session();

        for seg in self.segment_table() {
            if seg.state() == SegmentState::Stalled {
                seg.park();
            }
            if seg.state().is_live() {
                self.spawn_worker(&seg);
            }
        }
        self.spawn_supervisor();
        info!("download resumed");
        Ok(())
    }

    /// Cancel the download. Idempotent. The partial file and the resume
    /// metadata are retained; a front-end wanting a clean cancel
    /// deletes both.
    pub async fn cancel(self: &Arc<Self>) {
        let previous = self.state();
        self.set_state(EngineState::Cancelled);

        // 1. Stop and join the supervisor so nothing touches the
        //    segment table during teardown.
        self.join_supervisor().await;

        // 2. Cancel and join every worker.
        for seg in self.segment_table() {
            seg.cancel();
        }
        self.join_workers().await;
        for seg in self.segment_table() {
            if !seg.state().is_terminal() {
                seg.set_state(SegmentState::Cancelled);
            }
        }

        // 3. All tasks are done; flush and close the file.
        self.close_file();

        if previous != EngineState::Cancelled {
            info!("download cancelled");
        }
        self.publish_progress();
    }

    /// Block until the engine reaches a terminal state.
    pub async fn wait(&self) -> EngineState {
        loop {
            let state = self.state();
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(TICK_INTERVAL).await;
        }
    }

    // ========================================================================
    // Preparation
    // ========================================================================

    async fn prepare(self: &Arc<Self>) -> Result<()> {
        self.set_state(EngineState::Preparing);

        let url = self
            .url
            .lock()
            .expect("url lock")
            .clone()
            .ok_or_else(|| BoltError::InvalidUrl("no URL set".to_string()))?;

        let facts = self.client.head(&url).await?;

        let file_size = facts.content_length;
        // Unknown length rules out ranged transfers entirely.
        let supports_ranges = facts.accepts_ranges && file_size > 0;

        let filename = facts
            .filename
            .clone()
            .unwrap_or_else(|| url.filename());

        let output_path = {
            let mut path = self.output_path.lock().expect("path lock");
            if path.as_os_str().is_empty() {
                *path = PathBuf::from(&filename);
            }
            path.clone()
        };

        self.file_size.store(file_size, Ordering::Release);
        self.supports_ranges.store(supports_ranges, Ordering::Release);
        *self.filename.lock().expect("filename lock") = filename;
        *self.content_type.lock().expect("content type lock") = facts.content_type.clone();
        *self.final_url.lock().expect("url lock") =
            facts.final_url.clone().unwrap_or_else(|| url.as_str().to_string());

        let restored = self.restore_segments(&url, &output_path, file_size).await;
        if !restored {
            self.plan_segments(file_size, supports_ranges);
        }

        let file = Arc::new(OutputFile::create(&output_path, file_size)?);
        *self.file.lock().expect("file lock") = Some(file);

        Ok(())
    }

    /// Restore the segment table from a matching `.boltmeta` sidecar.
    /// A record for a different URL or size is discarded.
    async fn restore_segments(&self, url: &RemoteUrl, output_path: &Path, file_size: u64) -> bool {
        let meta_path = DownloadMeta::meta_path(output_path);
        let meta = match DownloadMeta::load(&meta_path).await {
            Ok(meta) => meta,
            Err(_) => return false,
        };

        if !meta.matches(url.as_str(), file_size) {
            info!("resume metadata does not match the live resource, replanning");
            DownloadMeta::remove(output_path).await;
            return false;
        }

        let segments: Vec<Arc<Segment>> = meta
            .segments
            .iter()
            .map(|m| Arc::new(Segment::restore(m, self.epoch)))
            .collect();
        let next_id = segments.iter().map(|s| s.id() + 1).max().unwrap_or(0);

        info!(
            segments = segments.len(),
            downloaded = meta.total_downloaded,
            "restored segments from resume metadata"
        );
        self.next_segment_id.store(next_id, Ordering::Release);
        *self.segments.lock().expect("segment lock") = segments;
        true
    }

    fn plan_segments(&self, file_size: u64, supports_ranges: bool) {
        let count = crate::planner::initial_segment_count(
            file_size,
            supports_ranges,
            self.config.segment_count,
        );
        let ranges = crate::planner::split_ranges(file_size, count);

        let segments: Vec<Arc<Segment>> = ranges
            .iter()
            .enumerate()
            .map(|(i, (offset, size))| {
                Arc::new(Segment::new(i as u32, *offset, *size, *offset, self.epoch))
            })
            .collect();

        debug!(count = segments.len(), file_size, "planned segments");
        self.next_segment_id
            .store(segments.len() as u32, Ordering::Release);
        *self.segments.lock().expect("segment lock") = segments;
    }

    // ========================================================================
    // Supervisor loop
    // ========================================================================

    fn spawn_supervisor(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            engine.supervise().await;
        });
        *self.supervisor.lock().expect("supervisor lock") = Some(handle);
    }

    async fn supervise(self: Arc<Self>) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await; // first tick is immediate

        let mut last_sample = Instant::now();
        let mut last_meta_save = Instant::now();

        loop {
            tick.tick().await;
            if self.state() != EngineState::Downloading {
                break;
            }

            let now = Instant::now();
            self.sample_speeds(now.duration_since(last_sample));
            last_sample = now;

            self.publish_progress();
            self.restart_stalled(now);

            // Splitting only makes sense when the server honors ranges.
            let ranged = self.supports_ranges.load(Ordering::Acquire);
            if ranged && self.config.work_stealing {
                self.rebalance();
            }
            if ranged && self.config.dynamic_split {
                self.split_largest_tail();
            }

            if last_meta_save.elapsed() >= META_SAVE_INTERVAL {
                if let Err(err) = self.save_meta().await {
                    warn!(%err, "periodic meta save failed");
                }
                last_meta_save = Instant::now();
            }

            if self.check_termination().await {
                break;
            }
        }
    }

    fn sample_speeds(&self, window: Duration) {
        for seg in self.segment_table() {
            seg.sample_speed(window);
        }
    }

    /// Aggregate the table into a snapshot and hand it to the observer
    /// outside any lock.
    fn publish_progress(&self) {
        let segments = self.segment_table();

        let mut downloaded = 0u64;
        let mut speed = 0u64;
        let mut active = 0u32;
        let mut completed = 0u32;
        let mut failed = 0u32;
        for seg in &segments {
            downloaded += seg.downloaded();
            speed += seg.speed_bps();
            match seg.state() {
                SegmentState::Connecting | SegmentState::Downloading => active += 1,
                SegmentState::Completed => completed += 1,
                SegmentState::Failed => failed += 1,
                _ => {}
            }
        }

        let total = self.file_size();
        let state = self.state();
        let percent = if total > 0 {
            downloaded as f64 * 100.0 / total as f64
        } else if state == EngineState::Completed {
            100.0
        } else {
            0.0
        };

        let (elapsed, session_bytes) = {
            let started = self.session_started.lock().expect("session lock");
            let elapsed = started.map(|t| t.elapsed()).unwrap_or_default();
            let base = self.session_base.load(Ordering::Acquire);
            (elapsed, downloaded.saturating_sub(base))
        };
        let average = if elapsed.as_secs_f64() > 0.5 {
            (session_bytes as f64 / elapsed.as_secs_f64()) as u64
        } else {
            speed
        };

        let eta = if speed > 0 && total > downloaded {
            (total - downloaded) / speed
        } else {
            0
        };

        let snapshot = ProgressSnapshot {
            total_bytes: total,
            downloaded_bytes: downloaded,
            speed_bps: speed,
            average_speed_bps: average,
            eta_seconds: eta,
            percent,
            active_segments: active,
            completed_segments: completed,
            failed_segments: failed,
            elapsed_seconds: elapsed.as_secs_f64(),
        };

        *self.progress.lock().expect("progress lock") = snapshot.clone();

        let callback = self.callback.lock().expect("callback lock").clone();
        if let Some(cb) = callback {
            cb(&snapshot);
        }
    }

    /// Restart workers whose segments made no progress for the stall
    /// timeout. The old task may be wedged in a socket read, so it is
    /// aborted at an await point before the segment is re-parked.
    fn restart_stalled(self: &Arc<Self>, now: Instant) {
        for seg in self.segment_table() {
            if !seg.is_stalled(self.config.stall_timeout, now) {
                continue;
            }
            warn!(segment = seg.id(), "segment stalled, restarting worker");
            seg.set_state(SegmentState::Stalled);

            // Invalidate the wedged worker before aborting it so a
            // final in-flight poll cannot touch the segment.
            seg.bump_generation();
            if let Some(handle) = self.workers.lock().expect("worker lock").remove(&seg.id()) {
                handle.abort();
            }
            seg.park();
            self.spawn_worker(&seg);
        }
    }

    /// Work stealing: a slow downloading segment asks for the table to
    /// be rebalanced. The donor with the most stealable bytes gives up
    /// half of its remaining tail; a fresh segment carries the released
    /// range so live ranges stay disjoint.
    fn rebalance(self: &Arc<Self>) {
        let segments = self.segment_table();
        if segments.len() < 2 || self.live_count(&segments) >= self.config.max_segments {
            return;
        }

        for requester in &segments {
            if requester.state() != SegmentState::Downloading {
                continue;
            }
            // A segment that has not produced bytes yet is still
            // warming up, not slow.
            if requester.downloaded() == 0 || requester.speed_bps() >= STEAL_THRESHOLD_BPS {
                continue;
            }

            let Some((donor_id, amount)) =
                find_steal_donor(&segments, requester.id(), MIN_SEGMENT_SIZE)
            else {
                continue;
            };
            let Some(donor) = segments.iter().find(|s| s.id() == donor_id) else {
                continue;
            };

            debug!(
                requester = requester.id(),
                donor = donor_id,
                amount,
                "work stealing"
            );
            self.split_tail(donor, amount);
            // One table mutation per tick keeps rebalancing gentle.
            return;
        }
    }

    /// Dynamic segmentation: while there is headroom, split the largest
    /// remaining tail in half and put a new worker on it.
    fn split_largest_tail(self: &Arc<Self>) {
        let segments = self.segment_table();
        if self.live_count(&segments) >= self.config.max_segments {
            return;
        }

        let candidate = segments
            .iter()
            .filter(|s| s.state() == SegmentState::Downloading)
            .filter(|s| s.remaining() > 2 * MIN_SEGMENT_SIZE)
            .max_by_key(|s| s.remaining());

        if let Some(donor) = candidate {
            let amount = donor.can_steal(MIN_SEGMENT_SIZE);
            if amount > 0 {
                debug!(donor = donor.id(), amount, "dynamic split");
                self.split_tail(donor, amount);
            }
        }
    }

    /// Shrink `donor` by up to `amount` and start a fresh segment over
    /// the released tail. Preserves both range disjointness and the
    /// sum-of-sizes invariant.
    fn split_tail(self: &Arc<Self>, donor: &Arc<Segment>, amount: u64) {
        let stolen = donor.steal_bytes(amount);
        if stolen == 0 {
            return;
        }

        let new_offset = donor.offset() + donor.size();
        let id = self.next_segment_id.fetch_add(1, Ordering::AcqRel);
        let seg = Arc::new(Segment::new(id, new_offset, 0, new_offset, self.epoch));
        seg.add_bytes(stolen);

        self.segments.lock().expect("segment lock").push(seg.clone());
        self.spawn_worker(&seg);
    }

    async fn check_termination(self: &Arc<Self>) -> bool {
        let segments = self.segment_table();
        let mut completed = 0usize;
        let mut failed = 0usize;
        for seg in &segments {
            match seg.state() {
                SegmentState::Completed => completed += 1,
                SegmentState::Failed => failed += 1,
                _ => {}
            }
        }

        if completed == segments.len() {
            self.finish_completed().await;
            return true;
        }

        if failed > 0 && completed + failed == segments.len() {
            self.finish_failed().await;
            return true;
        }

        false
    }

    async fn finish_completed(self: &Arc<Self>) {
        // An unknown-length download learns its size from the stream.
        if self.file_size() == 0 {
            let total: u64 = self.segment_table().iter().map(|s| s.downloaded()).sum();
            self.file_size.store(total, Ordering::Release);
        }

        self.close_file();
        DownloadMeta::remove(&self.output_path()).await;
        self.set_state(EngineState::Completed);
        self.publish_progress();
        info!(bytes = self.file_size(), "download completed");
    }

    async fn finish_failed(self: &Arc<Self>) {
        // Surface the first failed segment's error, by id.
        let mut segments = self.segment_table();
        segments.sort_by_key(|s| s.id());
        let error = segments
            .iter()
            .filter(|s| s.state() == SegmentState::Failed)
            .find_map(|s| s.error());
        if let Some(err) = error {
            *self.first_error.lock().expect("error lock") = Some(err);
        }

        if let Err(err) = self.save_meta().await {
            warn!(%err, "failed to save resume metadata on failure");
        }
        self.close_file();
        self.set_state(EngineState::Failed);
        self.publish_progress();
        info!(error = ?self.error(), "download failed");
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn begin_session(&self) {
        let downloaded: u64 = self.segment_table().iter().map(|s| s.downloaded()).sum();
        self.session_base.store(downloaded, Ordering::Release);
        *self.session_started.lock().expect("session lock") = Some(Instant::now());
        for seg in self.segment_table() {
            seg.touch();
        }
    }

    fn segment_table(&self) -> Vec<Arc<Segment>> {
        self.segments.lock().expect("segment lock").clone()
    }

    fn live_count(&self, segments: &[Arc<Segment>]) -> u32 {
        segments.iter().filter(|s| s.state().is_live()).count() as u32
    }

    fn spawn_worker(self: &Arc<Self>, segment: &Arc<Segment>) {
        let Some(file) = self.file.lock().expect("file lock").clone() else {
            warn!(segment = segment.id(), "no output file, worker not spawned");
            return;
        };

        let worker = SegmentWorker {
            segment: segment.clone(),
            url: self.final_url.lock().expect("url lock").clone(),
            client: self.client.clone(),
            file,
            limiter: self.limiter.clone(),
            paused: self.paused.clone(),
            ranged: self.supports_ranges.load(Ordering::Acquire),
            retry_count: self.config.retry_count,
        };

        let handle = tokio::spawn(worker.run());
        self.workers
            .lock()
            .expect("worker lock")
            .insert(segment.id(), handle);
    }

    async fn join_supervisor(&self) {
        let handle = self.supervisor.lock().expect("supervisor lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Join every worker, aborting any that out-waits the grace period
    /// (e.g. blocked in connect).
    async fn join_workers(&self) {
        let handles: Vec<(u32, JoinHandle<()>)> = {
            let mut workers = self.workers.lock().expect("worker lock");
            workers.drain().collect()
        };

        for (id, mut handle) in handles {
            match tokio::time::timeout(JOIN_GRACE, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    debug!(segment = id, "worker did not stop in time, aborting");
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }
    }

    fn close_file(&self) {
        if let Some(file) = self.file.lock().expect("file lock").clone() {
            if let Err(err) = file.flush() {
                if !file.is_closed() {
                    warn!(%err, "flush on close failed");
                }
            }
            file.close();
        }
    }

    async fn save_meta(&self) -> Result<()> {
        let output_path = self.output_path();
        if output_path.as_os_str().is_empty() {
            return Ok(());
        }

        let url = self
            .url
            .lock()
            .expect("url lock")
            .as_ref()
            .map(|u| u.as_str().to_string())
            .unwrap_or_default();

        let segments = self.segment_table();
        let meta = DownloadMeta {
            url,
            output_path: output_path.display().to_string(),
            file_size: self.file_size(),
            total_downloaded: segments.iter().map(|s| s.downloaded()).sum(),
            segments: segments.iter().map(|s| s.to_meta()).collect(),
        };
        meta.save(&DownloadMeta::meta_path(&output_path)).await
    }
}

impl Drop for DownloadEngine {
    fn drop(&mut self) {
        // Tasks hold an Arc to the engine, so by the time this runs the
        // supervisor and workers are gone; just make sure the file is
        // flushed out.
        self.close_file();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Arc<DownloadEngine> {
        DownloadEngine::new(HttpClient::new().unwrap(), EngineConfig::default())
    }

    #[test]
    fn new_engine_is_idle() {
        let e = engine();
        assert_eq!(e.state(), EngineState::Idle);
        assert_eq!(e.progress().downloaded_bytes, 0);
        assert!(e.segment_progress().is_empty());
    }

    #[test]
    fn set_url_validates() {
        let e = engine();
        assert!(e.set_url("https://example.com/file.bin").is_ok());
        assert!(matches!(
            e.set_url("not a url"),
            Err(BoltError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn pause_requires_downloading() {
        let e = engine();
        assert!(matches!(e.pause().await, Err(BoltError::WrongState)));
    }

    #[tokio::test]
    async fn resume_requires_paused() {
        let e = engine();
        assert!(matches!(e.resume().await, Err(BoltError::WrongState)));
    }

    #[tokio::test]
    async fn start_without_url_fails() {
        let e = engine();
        let err = e.start().await.unwrap_err();
        assert!(matches!(err, BoltError::InvalidUrl(_)));
        assert_eq!(e.state(), EngineState::Failed);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let e = engine();
        e.cancel().await;
        e.cancel().await;
        assert_eq!(e.state(), EngineState::Cancelled);
    }

    #[tokio::test]
    async fn stalled_segment_is_replaced_without_losing_progress() {
        let e = engine();
        let dir = tempfile::tempdir().unwrap();
        let file = OutputFile::create(&dir.path().join("x.bin"), 1024 * 1024).unwrap();
        *e.file.lock().unwrap() = Some(Arc::new(file));
        // A port from the discard range: the replacement worker will
        // fail fast, which is fine - we only watch the handover.
        *e.final_url.lock().unwrap() = "http://127.0.0.1:9/x.bin".to_string();

        let seg = Arc::new(Segment::new(0, 0, 1024 * 1024, 0, e.epoch));
        seg.set_state(SegmentState::Downloading);
        seg.record_bytes(4096);
        e.segments.lock().unwrap().push(seg.clone());

        let generation = seg.generation();

        // Within the timeout nothing happens.
        e.restart_stalled(Instant::now());
        assert_eq!(seg.generation(), generation);

        // Past the stall timeout the worker is replaced.
        e.restart_stalled(Instant::now() + Duration::from_secs(20));
        assert_ne!(seg.generation(), generation);

        // Progress survived the restart; the replacement resumes from
        // the same counters.
        assert_eq!(seg.downloaded(), 4096);
        assert!(e.workers.lock().unwrap().contains_key(&0));
    }

    #[test]
    fn split_tail_keeps_invariants() {
        let e = engine();
        // Seed a table by hand: one fat downloading segment.
        let donor = Arc::new(Segment::new(0, 0, 10 * 1024 * 1024, 0, e.epoch));
        donor.set_state(SegmentState::Downloading);
        e.segments.lock().unwrap().push(donor.clone());
        e.next_segment_id.store(1, Ordering::Release);
        e.file_size.store(10 * 1024 * 1024, Ordering::Release);

        let amount = donor.can_steal(MIN_SEGMENT_SIZE);
        assert!(amount > 0);
        e.split_tail(&donor, amount);

        let table = e.segment_table();
        assert_eq!(table.len(), 2);
        let tail = &table[1];
        assert_eq!(tail.id(), 1);
        // Ranges are adjacent and disjoint.
        assert_eq!(tail.offset(), donor.offset() + donor.size());
        assert_eq!(tail.file_offset(), tail.offset());
        // Sizes still sum to the total.
        assert_eq!(donor.size() + tail.size(), 10 * 1024 * 1024);
    }
}
