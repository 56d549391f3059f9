use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

/// Video itags for live streams, best first.
pub const DEFAULT_VIDEO_ITAGS: [i64; 8] = [299, 137, 298, 136, 135, 134, 133, 160];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Attempts per fragment before the continuation check escalates.
    pub frag_max_tries: u32,
    /// Extra attempt cycles granted to fragments trailing the known end.
    pub full_retries: u32,
    pub connect_timeout_secs: u64,
    pub header_timeout_secs: u64,
    pub retry_delay_ms: u64,
    /// With direct links, how long without any new fragment before a
    /// refresh decides the stream has ended.
    pub ddl_idle_timeout_secs: u64,
    /// Preferred video itags, first available wins.
    pub video_itags: Vec<i64>,
    pub output_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            frag_max_tries: 10,
            full_retries: 3,
            connect_timeout_secs: 10,
            header_timeout_secs: 10,
            retry_delay_ms: 1000,
            ddl_idle_timeout_secs: 30,
            video_itags: DEFAULT_VIDEO_ITAGS.to_vec(),
            output_dir: PathBuf::from("."),
        }
    }
}

impl DownloadConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn header_timeout(&self) -> Duration {
        Duration::from_secs(self.header_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn ddl_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.ddl_idle_timeout_secs)
    }
}
