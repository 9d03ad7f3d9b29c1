//! Download manager - keyed registry of engines.
//!
//! Front-ends talk to the manager: create an engine for a URL, then
//! route start/pause/resume/cancel/remove calls by id. The registry
//! mutex is held only for the lookup; the engine's own thread-safe
//! methods do the work after it is released.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::supervisor::DownloadEngine;
use crate::error::{BoltError, Result};
use crate::http::HttpClient;
use bolt_types::{EngineState, ProgressSnapshot, SegmentSnapshot};

pub struct DownloadManager {
    /// One shared transport for every engine; its pool is the
    /// connection cache workers reuse across segments and downloads.
    client: HttpClient,
    downloads: Mutex<HashMap<u32, Arc<DownloadEngine>>>,
    /// Ids are monotonically assigned and never reused.
    next_id: AtomicU32,
}

impl DownloadManager {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: HttpClient::new()?,
            downloads: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        })
    }

    /// Create an engine for `url` and return its id.
    pub async fn create(
        &self,
        url: &str,
        output_path: Option<PathBuf>,
        config: EngineConfig,
    ) -> Result<u32> {
        let engine = DownloadEngine::new(self.client.clone(), config);
        engine.set_url(url)?;
        if let Some(path) = output_path {
            engine.set_output_path(path);
        }

        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.downloads.lock().await.insert(id, engine);
        info!(id, url, "download created");
        Ok(id)
    }

    pub async fn start(&self, id: u32) -> Result<()> {
        self.engine(id).await?.start().await
    }

    pub async fn pause(&self, id: u32) -> Result<()> {
        self.engine(id).await?.pause().await
    }

    pub async fn resume(&self, id: u32) -> Result<()> {
        self.engine(id).await?.resume().await
    }

    pub async fn cancel(&self, id: u32) -> Result<()> {
        self.engine(id).await?.cancel().await;
        Ok(())
    }

    /// Remove an engine from the registry. Only allowed once it is in a
    /// terminal state.
    pub async fn remove(&self, id: u32) -> Result<()> {
        let mut downloads = self.downloads.lock().await;
        let engine = downloads.get(&id).ok_or(BoltError::WrongState)?;
        if !engine.state().is_terminal() {
            return Err(BoltError::WrongState);
        }
        downloads.remove(&id);
        info!(id, "download removed");
        Ok(())
    }

    pub async fn progress(&self, id: u32) -> Result<ProgressSnapshot> {
        Ok(self.engine(id).await?.progress())
    }

    pub async fn segment_progress(&self, id: u32) -> Result<Vec<SegmentSnapshot>> {
        Ok(self.engine(id).await?.segment_progress())
    }

    pub async fn state(&self, id: u32) -> Result<EngineState> {
        Ok(self.engine(id).await?.state())
    }

    /// All registered ids, ascending.
    pub async fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.downloads.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Direct handle to an engine for callers that need the full
    /// surface (observer callbacks, waiting).
    pub async fn engine(&self, id: u32) -> Result<Arc<DownloadEngine>> {
        self.downloads
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(BoltError::WrongState)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_monotonic_and_never_reused() {
        let mgr = DownloadManager::new().unwrap();
        let a = mgr
            .create("https://example.com/a.bin", None, EngineConfig::default())
            .await
            .unwrap();
        let b = mgr
            .create("https://example.com/b.bin", None, EngineConfig::default())
            .await
            .unwrap();
        assert!(b > a);

        // Removing a cancelled download frees the slot but not the id.
        mgr.cancel(a).await.unwrap();
        mgr.remove(a).await.unwrap();
        let c = mgr
            .create("https://example.com/c.bin", None, EngineConfig::default())
            .await
            .unwrap();
        assert!(c > b);
    }

    #[tokio::test]
    async fn create_rejects_bad_urls() {
        let mgr = DownloadManager::new().unwrap();
        assert!(matches!(
            mgr.create("no scheme", None, EngineConfig::default()).await,
            Err(BoltError::InvalidUrl(_))
        ));
        assert!(mgr.ids().await.is_empty());
    }

    #[tokio::test]
    async fn remove_requires_terminal_state() {
        let mgr = DownloadManager::new().unwrap();
        let id = mgr
            .create("https://example.com/a.bin", None, EngineConfig::default())
            .await
            .unwrap();

        // Idle engines are not removable.
        assert!(matches!(mgr.remove(id).await, Err(BoltError::WrongState)));

        mgr.cancel(id).await.unwrap();
        assert_eq!(mgr.state(id).await.unwrap(), EngineState::Cancelled);
        mgr.remove(id).await.unwrap();

        // Operations on a removed id fail.
        assert!(mgr.state(id).await.is_err());
        assert!(matches!(mgr.start(id).await, Err(BoltError::WrongState)));
    }

    #[tokio::test]
    async fn unknown_ids_are_rejected() {
        let mgr = DownloadManager::new().unwrap();
        assert!(mgr.progress(99).await.is_err());
        assert!(mgr.pause(99).await.is_err());
        assert!(mgr.resume(99).await.is_err());
    }
}
