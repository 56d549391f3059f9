//! Direct googlevideo.com fragment links.

use url::Url;

use crate::types::{DataType, UrlTemplate, AUDIO_ITAG, GVIDEO_HOST_SUFFIX};

pub(crate) const SEQ_MARKER: &str = "&sq=";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum GvideoUrlError {
    #[error("Could not parse Google Video URL: {0}")]
    Malformed(#[from] url::ParseError),
    #[error("Given URL is not a Google Video URL")]
    WrongHost,
    #[error("Given Google Video URL is not for a fragmented stream")]
    NotFragmented,
    #[error("Could not parse itag in Google Video URL")]
    BadItag,
    #[error("Given audio URL does not have the audio itag. Make sure you set the correct URL(s)")]
    NotAudioItag,
    #[error("Given video URL has the audio itag set. Make sure you set the correct URL(s)")]
    AudioItagForVideo,
    #[error("Given Google Video URL did not have a sequence parameter")]
    MissingSequence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GvideoUrl {
    pub template: UrlTemplate,
    pub itag: i64,
}

/// Fragmented links carry `noclen`; whole-file links carry `clen` instead.
pub fn is_fragmented(url: &str) -> bool {
    url.to_lowercase().contains("noclen")
}

/// Validates a direct fragment link for `data_type` and turns it into a
/// template with the `&sq=` parameter (and everything after it) replaced.
pub fn parse_gvideo_url(gv_url: &str, data_type: DataType) -> Result<GvideoUrl, GvideoUrlError> {
    let parsed = Url::parse(gv_url)?;

    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    if !host.ends_with(GVIDEO_HOST_SUFFIX) {
        return Err(GvideoUrlError::WrongHost);
    }

    if !parsed.query_pairs().any(|(k, _)| k == "noclen") {
        return Err(GvideoUrlError::NotFragmented);
    }

    let itag = parsed
        .query_pairs()
        .find(|(k, _)| k == "itag")
        .and_then(|(_, v)| v.parse::<i64>().ok())
        .ok_or(GvideoUrlError::BadItag)?;

    match data_type {
        DataType::Audio if itag != AUDIO_ITAG => return Err(GvideoUrlError::NotAudioItag),
        DataType::Video if itag == AUDIO_ITAG => return Err(GvideoUrlError::AudioItagForVideo),
        _ => (),
    }

    let sq_index = gv_url
        .find(SEQ_MARKER)
        .ok_or(GvideoUrlError::MissingSequence)?;

    Ok(GvideoUrl {
        template: UrlTemplate::from_base(&gv_url[..sq_index], SEQ_MARKER),
        itag,
    })
}
