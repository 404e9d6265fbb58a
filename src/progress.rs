//! Transfer progress bars for uploads and archive downloads
//!
//! Bars draw to stderr and are hidden entirely when progress is disabled, so
//! callers never need to branch on the setting.

use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Clone, Copy)]
pub struct TransferProgress {
    enabled: bool,
}

impl TransferProgress {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// A byte-count bar for one transfer of `len` bytes.
    pub fn bar(&self, len: u64, verb: &str, name: &str) -> ProgressBar {
        if !self.enabled || len == 0 {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        pb.set_message(format!("{} {}", verb.with(Color::Green).bold(), name));
        pb
    }
}
