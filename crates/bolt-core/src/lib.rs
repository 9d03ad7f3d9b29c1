//! bolt-core - multi-connection download engine
//!
//! Fetches a single remote resource over many concurrent byte-range
//! requests, writing them into one pre-allocated file:
//! - one supervisor task per download, one worker task per segment
//! - work stealing and dynamic splits keep all connections busy
//! - positional writes, no shared file cursor
//! - crash-safe resume via a `.boltmeta` sidecar next to the output
//! - cooperative pause/resume/cancel with a strict teardown order
//!
//! The typical entry point is [`DownloadManager`]:
//!
//! ```no_run
//! use bolt_core::{DownloadManager, EngineConfig};
//!
//! # async fn run() -> Result<(), bolt_core::BoltError> {
//! let manager = DownloadManager::new()?;
//! let id = manager
//!     .create("https://example.com/big.iso", None, EngineConfig::default())
//!     .await?;
//! manager.start(id).await?;
//! manager.engine(id).await?.wait().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod disk;
mod engine;
mod error;
mod http;
mod limiter;
mod meta;
mod planner;
mod url;

pub use config::{
    EngineConfig, MAX_SEGMENTS, MAX_SEGMENT_SIZE, MIN_SEGMENTS, MIN_SEGMENT_SIZE, RETRY_COUNT,
    STALL_TIMEOUT,
};
pub use disk::OutputFile;
pub use engine::{DownloadEngine, DownloadManager, ProgressCallback};
pub use error::{BoltError, Result};
pub use http::HttpClient;
pub use limiter::RateLimiter;
pub use meta::{DownloadMeta, SegmentMeta};
pub use planner::{initial_segment_count, segment_size_for, split_ranges};
pub use url::RemoteUrl;

// Re-export the shared types so most callers only need this crate.
pub use bolt_types::{
    EngineState, ProgressSnapshot, SegmentSnapshot, SegmentState, ServerFacts,
};
