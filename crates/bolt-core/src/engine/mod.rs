//! Download engine internals.
//!
//! - [`segment`] - the unit of work and its atomic counters
//! - [`worker`] - one task per segment, streaming into the file
//! - [`supervisor`] - the engine that owns the table and the file
//! - [`manager`] - keyed registry of engines for front-ends

mod manager;
mod segment;
mod supervisor;
mod worker;

pub use manager::DownloadManager;
pub use segment::{find_steal_donor, Segment};
pub use supervisor::{DownloadEngine, ProgressCallback};
