//! Progress bar rendering for downloads.

use std::path::Path;
use std::sync::Arc;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use bolt_core::ProgressCallback;
use bolt_types::ProgressSnapshot;

/// One progress bar per download, fed by the engine's observer
/// callback.
pub struct ProgressRenderer {
    bar: ProgressBar,
}

impl ProgressRenderer {
    pub fn new(label: &str) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta}) {msg}")
                .expect("valid progress template")
                .progress_chars("█▓▒░  "),
        );
        bar.set_message(label.to_string());
        Self { bar }
    }

    /// Observer callback for the engine. Snapshots arrive on every
    /// supervisor tick; the bar update is cheap and non-blocking.
    pub fn observer(&self) -> ProgressCallback {
        let bar = self.bar.clone();
        Arc::new(move |snap: &ProgressSnapshot| {
            if snap.total_bytes > 0 && bar.length() != Some(snap.total_bytes) {
                bar.set_length(snap.total_bytes);
            }
            bar.set_position(snap.downloaded_bytes);
        })
    }

    pub fn finish_ok(&self, output: &Path) {
        self.bar.finish_with_message(format!(
            "{} {}",
            style("✓").green().bold(),
            output.display()
        ));
    }

    pub fn finish_err(&self, reason: &str) {
        self.bar
            .abandon_with_message(format!("{} {reason}", style("✗").red().bold()));
    }
}
