use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_aux::prelude::*;

use crate::{dash, gvideo, types::UrlTemplate, util};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialPlayerResponse {
    pub playability_status: PlayabilityStatus,
    pub streaming_data: Option<StreamingData>,
    pub video_details: Option<VideoDetails>,
    pub microformat: Option<Microformat>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayabilityStatus {
    pub status: Status,
    pub reason: Option<String>,
    pub live_streamability: Option<LiveStreamability>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    LiveStreamOffline,
    Unplayable,
    LoginRequired,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamability {
    pub live_streamability_renderer: LiveStreamabilityRenderer,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamabilityRenderer {
    pub video_id: String,
    pub offline_slate: Option<OfflineSlate>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSlate {
    pub live_stream_offline_slate_renderer: LiveStreamOfflineSlateRenderer,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamOfflineSlateRenderer {
    #[serde(deserialize_with = "deserialize_datetime_utc_from_seconds")]
    pub scheduled_start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingData {
    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    pub expires_in_seconds: i64,
    #[serde(default)]
    pub adaptive_formats: Vec<AdaptiveFormat>,
    pub dash_manifest_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveFormat {
    pub itag: i64,
    #[serde(default)]
    pub url: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    pub video_id: String,
    pub title: String,
    #[serde(default)]
    pub is_live: bool,
    pub channel_id: String,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Microformat {
    pub player_microformat_renderer: PlayerMicroformatRenderer,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMicroformatRenderer {
    pub live_broadcast_details: Option<LiveBroadcastDetails>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveBroadcastDetails {
    pub is_live_now: bool,
    pub start_timestamp: Option<String>,
    pub end_timestamp: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum PlayerResponseError {
    #[error("Could not find initial player response")]
    NoInitialPlayerResponse,
    #[error("Could not parse initial player response")]
    ParseInitialPlayerResponse(#[from] serde_json::Error),
    #[error("No DASH manifest URL found")]
    NoDashManifestURL,
    #[error("Could not download page")]
    DownloadError(#[from] util::DownloadError),
}

const IPR_STR: &str = "var ytInitialPlayerResponse =";

fn get_ipr_str(html: &str) -> Option<&str> {
    // Find the start of the initial player response
    let idx_ipr = html.find(IPR_STR)? + IPR_STR.len();

    // Find the start and end of the JSON object
    let idx_start = html[idx_ipr..].find('{')? + idx_ipr;
    let idx_end = html[idx_start..].find("};")? + idx_start + 1;

    // Bounds check
    if idx_start >= idx_end || idx_start >= html.len() || idx_end >= html.len() {
        return None;
    }

    Some(&html[idx_start..idx_end])
}

impl InitialPlayerResponse {
    pub fn from_html(html: &str) -> Result<Self, PlayerResponseError> {
        let ipr_str = get_ipr_str(html).ok_or(PlayerResponseError::NoInitialPlayerResponse)?;

        serde_json::from_str(ipr_str).map_err(PlayerResponseError::ParseInitialPlayerResponse)
    }

    /// True while the broadcast is running.
    pub fn is_live(&self) -> bool {
        self.playability_status.status == Status::Ok
            && self
                .microformat
                .as_ref()
                .and_then(|mf| mf.player_microformat_renderer.live_broadcast_details.as_ref())
                .map(|lbd| lbd.is_live_now)
                .unwrap_or(false)
    }

    /// Privated, removed or members-only: the page no longer serves the video.
    pub fn is_unavailable(&self) -> bool {
        !matches!(
            self.playability_status.status,
            Status::Ok | Status::LiveStreamOffline
        )
    }

    pub fn scheduled_start_time(&self) -> Option<DateTime<Utc>> {
        self.playability_status
            .live_streamability
            .as_ref()?
            .live_streamability_renderer
            .offline_slate
            .as_ref()
            .map(|s| s.live_stream_offline_slate_renderer.scheduled_start_time)
    }

    pub fn title(&self) -> Option<&str> {
        self.video_details.as_ref().map(|v| v.title.as_str())
    }

    pub fn channel(&self) -> Option<&str> {
        self.video_details.as_ref().map(|v| v.author.as_str())
    }

    /// Templates for adaptive formats served in fragments, keyed by itag.
    pub fn fragment_urls(&self) -> HashMap<i64, UrlTemplate> {
        self.streaming_data
            .iter()
            .flat_map(|sd| sd.adaptive_formats.iter())
            .filter(|af| gvideo::is_fragmented(&af.url))
            .map(|af| (af.itag, UrlTemplate::from_base(&af.url, gvideo::SEQ_MARKER)))
            .collect()
    }

    pub fn dash_manifest_url(&self) -> Option<&str> {
        self.streaming_data.as_ref()?.dash_manifest_url.as_deref()
    }

    pub async fn get_dash_urls(
        &self,
        client: &util::HttpClient,
    ) -> Result<HashMap<i64, UrlTemplate>, PlayerResponseError> {
        let dash_url = self
            .dash_manifest_url()
            .ok_or(PlayerResponseError::NoDashManifestURL)?;

        let manifest = client.fetch_text(dash_url).await?;
        Ok(dash::get_urls_from_manifest(&manifest))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn ipr_str() {
        let test_str = r#"<script>var ytInitialPlayerResponse = {"response": "test"};</script>"#;
        let result = get_ipr_str(test_str).expect("Could not find IPR");
        assert_eq!(result, r#"{"response": "test"}"#);

        let test_str = r#"<script>var ytInitialPlayerResponse = {"#;
        assert!(get_ipr_str(test_str).is_none());

        let test_str = r#"<script>var ytInitialPlayerResponse ="#;
        assert!(get_ipr_str(test_str).is_none());
    }

    fn watch_page(json: &str) -> String {
        format!("<html><script>var ytInitialPlayerResponse = {};</script></html>", json)
    }

    #[test]
    fn ipr_live() {
        let html = watch_page(
            r#"{
                "playabilityStatus": {"status": "OK", "liveStreamability": {"liveStreamabilityRenderer": {"videoId": "abc"}}},
                "streamingData": {
                    "expiresInSeconds": "21540",
                    "adaptiveFormats": [
                        {"itag": 140, "url": "https://rr1.googlevideo.com/videoplayback?itag=140&noclen=1&x=%2F", "mimeType": "audio/mp4"},
                        {"itag": 299, "url": "https://rr1.googlevideo.com/videoplayback?itag=299&noclen=1", "mimeType": "video/mp4"},
                        {"itag": 22, "url": "https://rr1.googlevideo.com/videoplayback?itag=22&clen=100", "mimeType": "video/mp4"}
                    ],
                    "dashManifestUrl": "https://manifest.googlevideo.com/api/manifest/dash/id/abc"
                },
                "videoDetails": {"videoId": "abc", "title": "Stream", "isLive": true, "channelId": "UC1", "author": "Someone"},
                "microformat": {"playerMicroformatRenderer": {"liveBroadcastDetails": {"isLiveNow": true, "startTimestamp": "2024-02-15T08:15:00+00:00"}}}
            }"#,
        );
        let ipr = InitialPlayerResponse::from_html(&html).expect("Could not parse IPR");

        assert!(ipr.is_live());
        assert!(!ipr.is_unavailable());
        assert_eq!(ipr.title(), Some("Stream"));
        assert_eq!(ipr.channel(), Some("Someone"));

        let urls = ipr.fragment_urls();
        assert_eq!(urls.len(), 2);
        assert_eq!(
            urls[&140].fill(5),
            "https://rr1.googlevideo.com/videoplayback?itag=140&noclen=1&x=%2F&sq=5"
        );
        assert!(ipr.dash_manifest_url().is_some());
    }

    #[test]
    fn ipr_scheduled() {
        let html = watch_page(
            r#"{
                "playabilityStatus": {"status": "LIVE_STREAM_OFFLINE", "liveStreamability": {"liveStreamabilityRenderer": {"videoId": "abc",
                    "offlineSlate": {"liveStreamOfflineSlateRenderer": {"scheduledStartTime": "1707984900"}}}}},
                "videoDetails": {"videoId": "abc", "title": "Soon", "channelId": "UC1", "author": "Someone"}
            }"#,
        );
        let ipr = InitialPlayerResponse::from_html(&html).expect("Could not parse IPR");

        assert!(!ipr.is_live());
        assert!(!ipr.is_unavailable());
        assert_eq!(
            ipr.scheduled_start_time(),
            Some(DateTime::<Utc>::from_str("2024-02-15T08:15:00Z").unwrap()),
        );
        assert!(ipr.fragment_urls().is_empty());
    }

    #[test]
    fn ipr_privated() {
        let html = watch_page(
            r#"{"playabilityStatus": {"status": "LOGIN_REQUIRED", "reason": "This video is private"}}"#,
        );
        let ipr = InitialPlayerResponse::from_html(&html).expect("Could not parse IPR");

        assert!(!ipr.is_live());
        assert!(ipr.is_unavailable());
        assert_eq!(ipr.title(), None);
    }
}
