use std::{
    io::Write,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{types::DataType, util};

/// Progress counters shared by all workers.
#[derive(Default)]
pub struct DownloadStatistics {
    bytes_downloaded: AtomicU64,
    fragments: [AtomicU64; 2],
}

impl DownloadStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fragment(&self, data_type: DataType, bytes: u64) {
        self.fragments[data_type.index()].fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn fragments(&self, data_type: DataType) -> u64 {
        self.fragments[data_type.index()].load(Ordering::Relaxed)
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::Relaxed)
    }

    pub fn status_line(&self) -> String {
        format!(
            "Video Fragments: {}; Audio Fragments: {}; Total Downloaded: {}",
            self.fragments(DataType::Video),
            self.fragments(DataType::Audio),
            util::format_bytes(self.bytes_downloaded())
        )
    }

    pub fn print(&self) {
        print!("\x1b[2K\r{}", self.status_line());
        let _ = std::io::stdout().lock().flush();
    }
}
