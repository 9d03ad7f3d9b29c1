//! Resume metadata sidecar.
//!
//! A small line-oriented record written next to the output file as
//! `<output>.boltmeta`. Format, in order, LF-terminated:
//!
//! ```text
//! <url>
//! <output_path>
//! <file_size>
//! <total_downloaded>
//! <segment_count>
//! <id> <offset> <size> <file_offset> <downloaded>   # segment_count times
//! ```
//!
//! Saves go through a temp file and a rename so a crash mid-save never
//! leaves a torn record. The sidecar is deleted on clean completion.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{BoltError, Result};

/// Persisted progress of one segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentMeta {
    pub id: u32,
    pub offset: u64,
    pub size: u64,
    pub file_offset: u64,
    pub downloaded: u64,
}

/// Persisted state of one download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadMeta {
    pub url: String,
    pub output_path: String,
    pub file_size: u64,
    pub total_downloaded: u64,
    pub segments: Vec<SegmentMeta>,
}

impl DownloadMeta {
    /// Sidecar path for a given output path.
    pub fn meta_path(output_path: &Path) -> PathBuf {
        let mut os: OsString = output_path.as_os_str().to_os_string();
        os.push(".boltmeta");
        PathBuf::from(os)
    }

    /// A stored record is only honored when it still describes the same
    /// resource.
    pub fn matches(&self, url: &str, file_size: u64) -> bool {
        self.url == url && self.file_size == file_size
    }

    /// Serialize to the sidecar format.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(128 + self.segments.len() * 48);
        out.push_str(&self.url);
        out.push('\n');
        out.push_str(&self.output_path);
        out.push('\n');
        out.push_str(&self.file_size.to_string());
        out.push('\n');
        out.push_str(&self.total_downloaded.to_string());
        out.push('\n');
        out.push_str(&self.segments.len().to_string());
        out.push('\n');
        for seg in &self.segments {
            out.push_str(&format!(
                "{} {} {} {} {}\n",
                seg.id, seg.offset, seg.size, seg.file_offset, seg.downloaded
            ));
        }
        out
    }

    /// Parse the sidecar format.
    pub fn from_text(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let mut next = |what: &str| {
            lines
                .next()
                .ok_or_else(|| BoltError::ResumeFailed(format!("missing {what}")))
        };

        let url = next("url")?.to_string();
        let output_path = next("output path")?.to_string();
        let file_size = parse_u64(next("file size")?, "file size")?;
        let total_downloaded = parse_u64(next("downloaded total")?, "downloaded total")?;
        let segment_count = parse_u64(next("segment count")?, "segment count")? as usize;

        let mut segments = Vec::with_capacity(segment_count);
        for i in 0..segment_count {
            let line = next("segment line")?;
            let mut fields = line.split_whitespace();
            let mut field = |what: &str| {
                fields
                    .next()
                    .ok_or_else(|| BoltError::ResumeFailed(format!("segment {i}: missing {what}")))
            };
            segments.push(SegmentMeta {
                id: parse_u64(field("id")?, "segment id")? as u32,
                offset: parse_u64(field("offset")?, "segment offset")?,
                size: parse_u64(field("size")?, "segment size")?,
                file_offset: parse_u64(field("file offset")?, "segment file offset")?,
                downloaded: parse_u64(field("downloaded")?, "segment downloaded")?,
            });
        }

        Ok(Self {
            url,
            output_path,
            file_size,
            total_downloaded,
            segments,
        })
    }

    /// Atomically write the record to `path` (temp file + rename),
    /// creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp: OsString = path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, self.to_text()).await?;
        fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), segments = self.segments.len(), "meta saved");
        Ok(())
    }

    /// Load a record from `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .map_err(|e| BoltError::ResumeFailed(e.to_string()))?;
        Self::from_text(&text)
    }

    pub async fn exists(output_path: &Path) -> bool {
        fs::try_exists(Self::meta_path(output_path))
            .await
            .unwrap_or(false)
    }

    /// Best-effort delete of the sidecar.
    pub async fn remove(output_path: &Path) {
        let _ = fs::remove_file(Self::meta_path(output_path)).await;
    }
}

fn parse_u64(s: &str, what: &str) -> Result<u64> {
    s.trim()
        .parse()
        .map_err(|_| BoltError::ResumeFailed(format!("bad {what}: {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DownloadMeta {
        DownloadMeta {
            url: "https://example.com/large_file.zip".to_string(),
            output_path: "large_file.zip".to_string(),
            file_size: 100_000_000,
            total_downloaded: 45_000_000,
            segments: vec![
                SegmentMeta { id: 0, offset: 0, size: 25_000_000, file_offset: 0, downloaded: 12_000_000 },
                SegmentMeta { id: 1, offset: 25_000_000, size: 25_000_000, file_offset: 25_000_000, downloaded: 11_000_000 },
                SegmentMeta { id: 2, offset: 50_000_000, size: 25_000_000, file_offset: 50_000_000, downloaded: 11_000_000 },
                SegmentMeta { id: 3, offset: 75_000_000, size: 25_000_000, file_offset: 75_000_000, downloaded: 11_000_000 },
            ],
        }
    }

    #[test]
    fn meta_path_appends_extension() {
        assert_eq!(
            DownloadMeta::meta_path(Path::new("test.bin")),
            PathBuf::from("test.bin.boltmeta")
        );
        assert_eq!(
            DownloadMeta::meta_path(Path::new("/path/to/file.zip")),
            PathBuf::from("/path/to/file.zip.boltmeta")
        );
        assert_eq!(
            DownloadMeta::meta_path(Path::new("/path/with spaces/file.bin")),
            PathBuf::from("/path/with spaces/file.bin.boltmeta")
        );
    }

    #[test]
    fn text_format_is_exact() {
        let meta = DownloadMeta {
            url: "https://example.com/f.bin".to_string(),
            output_path: "f.bin".to_string(),
            file_size: 1000,
            total_downloaded: 600,
            segments: vec![SegmentMeta { id: 0, offset: 0, size: 1000, file_offset: 0, downloaded: 600 }],
        };
        assert_eq!(
            meta.to_text(),
            "https://example.com/f.bin\nf.bin\n1000\n600\n1\n0 0 1000 0 600\n"
        );
    }

    #[test]
    fn text_round_trip() {
        let meta = sample();
        let parsed = DownloadMeta::from_text(&meta.to_text()).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn rejects_truncated_records() {
        assert!(DownloadMeta::from_text("").is_err());
        assert!(DownloadMeta::from_text("https://x\nout\n100\n").is_err());
        // Header claims one segment but none follow.
        assert!(DownloadMeta::from_text("https://x\nout\n100\n0\n1\n").is_err());
        // Segment line missing fields.
        assert!(DownloadMeta::from_text("https://x\nout\n100\n0\n1\n0 0 100\n").is_err());
    }

    #[test]
    fn rejects_non_numeric_fields() {
        assert!(DownloadMeta::from_text("https://x\nout\nabc\n0\n0\n").is_err());
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin.boltmeta");

        let meta = sample();
        meta.save(&path).await.unwrap();

        let loaded = DownloadMeta::load(&path).await.unwrap();
        assert_eq!(loaded, meta);

        // No temp file left behind.
        assert!(!dir.path().join("file.bin.boltmeta.tmp").exists());
    }

    #[tokio::test]
    async fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/file.bin.boltmeta");
        sample().save(&path).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = DownloadMeta::load(&dir.path().join("nope.boltmeta")).await;
        assert!(matches!(result, Err(BoltError::ResumeFailed(_))));
    }

    #[tokio::test]
    async fn exists_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("file.bin");

        assert!(!DownloadMeta::exists(&output).await);
        sample().save(&DownloadMeta::meta_path(&output)).await.unwrap();
        assert!(DownloadMeta::exists(&output).await);

        DownloadMeta::remove(&output).await;
        assert!(!DownloadMeta::exists(&output).await);

        // Removing again is harmless.
        DownloadMeta::remove(&output).await;
    }

    #[test]
    fn matches_requires_url_and_size() {
        let meta = sample();
        assert!(meta.matches("https://example.com/large_file.zip", 100_000_000));
        assert!(!meta.matches("https://example.com/other.zip", 100_000_000));
        assert!(!meta.matches("https://example.com/large_file.zip", 999));
    }
}
