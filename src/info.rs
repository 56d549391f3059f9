//! Video-level status shared by the fragment workers.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use url::Url;

use crate::{
    config::DownloadConfig,
    gvideo::GvideoUrl,
    player_response::{InitialPlayerResponse, PlayerResponseError},
    stats::DownloadStatistics,
    types::{DataType, UrlTemplate, AUDIO_ITAG},
    util::{DownloadError, HttpClient},
};

/// Everything a worker needs to know about its stream, read in one go.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStatus {
    pub live: bool,
    pub unavailable: bool,
    pub finished: bool,
    pub url: UrlTemplate,
}

/// Status source the fragment workers consult and refresh.
///
/// Implementations are shared between workers and must synchronize
/// internally.
#[async_trait]
pub trait VideoInfo: Send + Sync {
    fn status(&self, data_type: DataType) -> StreamStatus;

    /// Once set, stays set.
    fn set_finished(&self, data_type: DataType);

    /// Direct links are fixed for the session and never refreshed.
    fn is_gvideo_ddl(&self) -> bool;

    /// Re-reads live state and download URLs from the network.
    async fn refresh(&self);

    fn print_status(&self);

    fn record_fragment(&self, _data_type: DataType, _bytes: u64) {}

    fn is_live(&self) -> bool {
        self.status(DataType::Video).live
    }

    fn is_unavailable(&self) -> bool {
        self.status(DataType::Video).unavailable
    }

    fn is_finished(&self, data_type: DataType) -> bool {
        self.status(data_type).finished
    }

    fn download_url(&self, data_type: DataType) -> UrlTemplate {
        self.status(data_type).url
    }
}

#[derive(Debug, Default)]
struct VideoState {
    live: bool,
    unavailable: bool,
    finished: [bool; 2],
    urls: [UrlTemplate; 2],
    itags: [i64; 2],
    title: String,
    channel: String,
    scheduled_start: Option<DateTime<Utc>>,
    /// When either worker last got a fragment.
    last_fragment: Option<Instant>,
}

/// Status of a YouTube video, refreshed from its watch page.
pub struct DownloadInfo {
    client: Arc<HttpClient>,
    video_id: String,
    video_itags: Vec<i64>,
    gvideo_ddl: bool,
    ddl_idle_timeout: Duration,
    state: Mutex<VideoState>,
    refresh_lock: tokio::sync::Mutex<()>,
    stats: DownloadStatistics,
}

/// Extracts the video id from a watch, live or short link, or a bare id.
pub fn parse_video_id(input: &str) -> Option<String> {
    let input = input.trim();
    let is_id = |s: &str| {
        s.len() == 11
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    };

    if is_id(input) {
        return Some(input.to_string());
    }

    let url = Url::parse(input).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");

    let id = match host {
        "youtu.be" => url.path_segments()?.next()?.to_string(),
        "youtube.com" => match url.path_segments()?.collect::<Vec<_>>().as_slice() {
            ["watch"] => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned())?,
            ["live", id] | ["shorts", id] | ["embed", id] => id.to_string(),
            _ => return None,
        },
        _ => return None,
    };

    is_id(&id).then_some(id)
}

impl DownloadInfo {
    pub fn new(client: Arc<HttpClient>, video_id: &str, config: &DownloadConfig) -> Self {
        Self {
            client,
            video_id: video_id.to_string(),
            video_itags: config.video_itags.clone(),
            gvideo_ddl: false,
            ddl_idle_timeout: config.ddl_idle_timeout(),
            state: Mutex::new(VideoState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
            stats: DownloadStatistics::new(),
        }
    }

    /// Works directly off googlevideo.com links. There is no page to poll,
    /// so the stream counts as live for as long as fragments keep arriving.
    pub fn from_gvideo(
        client: Arc<HttpClient>,
        audio: GvideoUrl,
        video: GvideoUrl,
        config: &DownloadConfig,
    ) -> Self {
        let state = VideoState {
            live: true,
            urls: [audio.template, video.template],
            itags: [audio.itag, video.itag],
            last_fragment: Some(Instant::now()),
            ..Default::default()
        };

        Self {
            client,
            video_id: String::new(),
            video_itags: vec![video.itag],
            gvideo_ddl: true,
            ddl_idle_timeout: config.ddl_idle_timeout(),
            state: Mutex::new(state),
            refresh_lock: tokio::sync::Mutex::new(()),
            stats: DownloadStatistics::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, VideoState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn title(&self) -> String {
        self.state().title.clone()
    }

    pub fn channel(&self) -> String {
        self.state().channel.clone()
    }

    /// Start time announced by a stream that has not begun yet.
    pub fn scheduled_start(&self) -> Option<DateTime<Utc>> {
        self.state().scheduled_start
    }

    pub fn itag(&self, data_type: DataType) -> i64 {
        self.state().itags[data_type.index()]
    }

    pub fn stats(&self) -> &DownloadStatistics {
        &self.stats
    }

    /// Both streams have a download URL.
    pub fn has_urls(&self) -> bool {
        self.state().urls.iter().all(|u| !u.is_empty())
    }

    async fn fetch_player_response(&self) -> Result<InitialPlayerResponse, PlayerResponseError> {
        let url = format!("https://www.youtube.com/watch?v={}", self.video_id);
        let html = self.fetch_page(&url).await?;
        InitialPlayerResponse::from_html(&html)
    }

    /// Fetches a page, starting over when an attempt fails or stalls.
    async fn fetch_page(&self, url: &str) -> Result<String, DownloadError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(250)
            .map(jitter)
            .take(3);

        Retry::start(strategy, || self.client.fetch_text(url)).await
    }

    async fn collect_urls(&self, ipr: &InitialPlayerResponse) -> HashMap<i64, UrlTemplate> {
        let mut urls = ipr.fragment_urls();

        let have_video = self.video_itags.iter().any(|itag| urls.contains_key(itag));
        if urls.contains_key(&AUDIO_ITAG) && have_video {
            return urls;
        }

        match ipr.get_dash_urls(&self.client).await {
            Ok(dash_urls) => {
                for (itag, url) in dash_urls {
                    urls.entry(itag).or_insert(url);
                }
            }
            Err(PlayerResponseError::NoDashManifestURL) => (),
            Err(e) => warn!("Could not retrieve DASH manifest: {}", e),
        }

        urls
    }

    fn apply(&self, ipr: &InitialPlayerResponse, urls: HashMap<i64, UrlTemplate>) {
        let mut state = self.state();

        state.live = ipr.is_live();
        state.unavailable = ipr.is_unavailable();
        state.scheduled_start = ipr.scheduled_start_time();
        if let Some(title) = ipr.title() {
            state.title = title.to_string();
        }
        if let Some(channel) = ipr.channel() {
            state.channel = channel.to_string();
        }

        // Ended streams stop advertising URLs; keep the last ones around.
        if let Some(url) = urls.get(&AUDIO_ITAG) {
            state.urls[DataType::Audio.index()] = url.clone();
            state.itags[DataType::Audio.index()] = AUDIO_ITAG;
        }

        if let Some((itag, url)) = self
            .video_itags
            .iter()
            .find_map(|itag| urls.get(itag).map(|u| (*itag, u)))
        {
            state.urls[DataType::Video.index()] = url.clone();
            state.itags[DataType::Video.index()] = itag;
        }
    }
}

#[async_trait]
impl VideoInfo for DownloadInfo {
    fn status(&self, data_type: DataType) -> StreamStatus {
        let state = self.state();

        StreamStatus {
            live: state.live,
            unavailable: state.unavailable,
            finished: state.finished[data_type.index()],
            url: state.urls[data_type.index()].clone(),
        }
    }

    fn set_finished(&self, data_type: DataType) {
        self.state().finished[data_type.index()] = true;
    }

    fn is_gvideo_ddl(&self) -> bool {
        self.gvideo_ddl
    }

    async fn refresh(&self) {
        let _guard = self.refresh_lock.lock().await;

        if self.gvideo_ddl {
            let mut state = self.state();
            let idle = state
                .last_fragment
                .map_or(true, |t| t.elapsed() >= self.ddl_idle_timeout);
            if state.live && idle {
                debug!(
                    "No new fragments for {} seconds on direct links, assuming the stream has ended",
                    self.ddl_idle_timeout.as_secs()
                );
                state.live = false;
            }
            return;
        }

        let ipr = match self.fetch_player_response().await {
            Ok(ipr) => ipr,
            Err(e) => {
                warn!("Could not refresh video info for {}: {}", self.video_id, e);
                return;
            }
        };

        let urls = self.collect_urls(&ipr).await;
        self.apply(&ipr, urls);

        let state = self.state();
        debug!(
            "{}: live={}, unavailable={}",
            self.video_id, state.live, state.unavailable
        );
    }

    fn print_status(&self) {
        if log_enabled!(log::Level::Debug) {
            debug!("{}", self.stats.status_line());
        } else {
            self.stats.print();
        }
    }

    fn record_fragment(&self, data_type: DataType, bytes: u64) {
        self.stats.add_fragment(data_type, bytes);
        self.state().last_fragment = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> DownloadInfo {
        let client = Arc::new(HttpClient::new().expect("Could not create HttpClient"));
        DownloadInfo::new(client, "dQw4w9WgXcQ", &DownloadConfig::default())
    }

    fn live_ipr(formats: &str) -> InitialPlayerResponse {
        let json = format!(
            r#"{{
                "playabilityStatus": {{"status": "OK"}},
                "streamingData": {{"adaptiveFormats": [{}]}},
                "videoDetails": {{"videoId": "dQw4w9WgXcQ", "title": "Stream", "channelId": "UC1", "author": "Someone"}},
                "microformat": {{"playerMicroformatRenderer": {{"liveBroadcastDetails": {{"isLiveNow": true}}}}}}
            }}"#,
            formats
        );
        serde_json::from_str(&json).expect("Could not parse IPR")
    }

    #[test]
    fn video_ids() {
        assert_eq!(parse_video_id("dQw4w9WgXcQ").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(
            parse_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=1").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            parse_video_id("https://youtu.be/dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            parse_video_id("https://www.youtube.com/live/dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(parse_video_id("https://example.com/watch?v=dQw4w9WgXcQ"), None);
        assert_eq!(parse_video_id("short"), None);
    }

    #[tokio::test]
    async fn apply_prefers_configured_itags() {
        let info = info();
        let ipr = live_ipr(
            r#"{"itag": 140, "url": "https://a.googlevideo.com/v?itag=140&noclen=1", "mimeType": "audio/mp4"},
               {"itag": 136, "url": "https://a.googlevideo.com/v?itag=136&noclen=1", "mimeType": "video/mp4"},
               {"itag": 299, "url": "https://a.googlevideo.com/v?itag=299&noclen=1", "mimeType": "video/mp4"}"#,
        );

        let urls = info.collect_urls(&ipr).await;
        info.apply(&ipr, urls);

        let status = info.status(DataType::Video);
        assert!(status.live);
        assert!(!status.unavailable);
        assert!(!status.finished);
        assert_eq!(status.url.fill(1), "https://a.googlevideo.com/v?itag=299&noclen=1&sq=1");
        assert_eq!(info.itag(DataType::Video), 299);
        assert_eq!(info.itag(DataType::Audio), AUDIO_ITAG);
        assert_eq!(info.title(), "Stream");
        assert!(info.has_urls());
    }

    #[tokio::test]
    async fn ended_stream_keeps_urls() {
        let info = info();
        let ipr = live_ipr(
            r#"{"itag": 140, "url": "https://a.googlevideo.com/v?itag=140&noclen=1", "mimeType": "audio/mp4"}"#,
        );
        info.apply(&ipr, ipr.fragment_urls());

        let ended: InitialPlayerResponse = serde_json::from_str(
            r#"{"playabilityStatus": {"status": "LOGIN_REQUIRED", "reason": "private"}}"#,
        )
        .expect("Could not parse IPR");
        info.apply(&ended, HashMap::new());

        let status = info.status(DataType::Audio);
        assert!(!status.live);
        assert!(status.unavailable);
        assert!(!status.url.is_empty());
        assert!(info.download_url(DataType::Video).is_empty());
    }

    #[tokio::test]
    async fn stalled_page_fetch_is_retried() {
        use tokio::{io::AsyncWriteExt, net::TcpListener};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // The first connection never gets an answer
            let Ok((stalled, _)) = listener.accept().await else {
                return;
            };
            while let Ok((mut sock, _)) = listener.accept().await {
                let _ = sock
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\npage")
                    .await;
                let _ = sock.shutdown().await;
            }
            drop(stalled);
        });

        let config = DownloadConfig {
            header_timeout_secs: 1,
            ..Default::default()
        };
        let client = HttpClient::with_builder(reqwest::Client::builder().no_proxy(), &config)
            .expect("Could not create HttpClient");
        let info = DownloadInfo::new(Arc::new(client), "dQw4w9WgXcQ", &config);

        let page = info
            .fetch_page(&format!("http://{}/watch", addr))
            .await
            .expect("Retry did not recover from the stalled attempt");
        assert_eq!(page, "page");
    }

    #[test]
    fn scheduled_stream_has_no_urls() {
        let info = info();
        let ipr: InitialPlayerResponse = serde_json::from_str(
            r#"{"playabilityStatus": {"status": "LIVE_STREAM_OFFLINE", "liveStreamability": {"liveStreamabilityRenderer": {"videoId": "dQw4w9WgXcQ",
                "offlineSlate": {"liveStreamOfflineSlateRenderer": {"scheduledStartTime": "1707984900"}}}}}}"#,
        )
        .expect("Could not parse IPR");
        info.apply(&ipr, ipr.fragment_urls());

        assert!(!info.is_live());
        assert!(!info.is_unavailable());
        assert!(!info.has_urls());
        assert_eq!(
            info.scheduled_start().map(|t| t.timestamp()),
            Some(1707984900)
        );
    }

    #[test]
    fn finished_is_per_data_type() {
        let info = info();
        info.set_finished(DataType::Audio);

        assert!(info.is_finished(DataType::Audio));
        assert!(!info.is_finished(DataType::Video));
    }

    fn gvideo_info(idle_secs: u64) -> (DownloadInfo, GvideoUrl) {
        let client = Arc::new(HttpClient::new().expect("Could not create HttpClient"));
        let audio = GvideoUrl {
            template: UrlTemplate::new("https://a.googlevideo.com/v?itag=140&noclen=1&sq=%d"),
            itag: AUDIO_ITAG,
        };
        let video = GvideoUrl {
            template: UrlTemplate::new("https://a.googlevideo.com/v?itag=299&noclen=1&sq=%d"),
            itag: 299,
        };
        let config = DownloadConfig {
            ddl_idle_timeout_secs: idle_secs,
            ..Default::default()
        };

        (DownloadInfo::from_gvideo(client, audio.clone(), video, &config), audio)
    }

    #[tokio::test]
    async fn gvideo_refresh_ends_live_once_idle() {
        let (info, audio) = gvideo_info(0);

        assert!(info.is_gvideo_ddl());
        assert!(info.is_live());

        info.refresh().await;
        assert!(!info.is_live());
        assert_eq!(info.download_url(DataType::Audio), audio.template);
    }

    #[tokio::test]
    async fn gvideo_refresh_stays_live_while_fragments_arrive() {
        let (info, _) = gvideo_info(30);

        // A transient stall at the live edge must not end the stream
        info.refresh().await;
        assert!(info.is_live());

        info.record_fragment(DataType::Video, 1024);
        info.refresh().await;
        assert!(info.is_live());
        assert_eq!(info.stats().fragments(DataType::Video), 1);
    }
}
