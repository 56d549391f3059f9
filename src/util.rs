use std::{
    collections::HashMap,
    io::ErrorKind,
    path::Path,
    sync::{Arc, OnceLock},
    time::Duration,
};

use regex::Regex;
use reqwest_cookie_store::CookieStoreMutex;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use tokio_util::sync::CancellationToken;

use crate::config::DownloadConfig;

/// Response header carrying the newest fragment number of a live stream.
pub const HEAD_SEQNUM_HEADER: &str = "x-head-seqnum";

pub struct HttpClient {
    /// Retries transient failures, for pages and manifests.
    pub client: ClientWithMiddleware,
    /// Fragment fetches go here; the fragment worker owns their retries.
    pub raw: reqwest::Client,
    pub cookies: Arc<CookieStoreMutex>,
    header_timeout: Duration,
}

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("reqwest middleware error: {0}")]
    ReqwestMiddlewareError(#[from] reqwest_middleware::Error),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("timed out waiting for the server")]
    Timeout,
}

#[derive(thiserror::Error, Debug)]
pub enum FragmentError {
    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("timed out waiting for the server")]
    Timeout,
    #[error("download cancelled")]
    Cancelled,
}

#[derive(Debug)]
pub struct Fragment {
    pub data: Vec<u8>,
    pub head_seq: Option<i64>,
}

impl HttpClient {
    pub fn new() -> reqwest::Result<HttpClient> {
        Self::with_config(&DownloadConfig::default())
    }

    pub fn with_config(config: &DownloadConfig) -> reqwest::Result<HttpClient> {
        Self::with_builder(reqwest::Client::builder(), config)
    }

    pub fn with_builder(
        builder: reqwest::ClientBuilder,
        config: &DownloadConfig,
    ) -> reqwest::Result<HttpClient> {
        let cookies = Arc::new(CookieStoreMutex::default());
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let raw = builder
            .cookie_provider(cookies.clone())
            .connect_timeout(config.connect_timeout())
            .build()?;

        let client = reqwest_middleware::ClientBuilder::new(raw.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(HttpClient {
            client,
            raw,
            cookies,
            header_timeout: config.header_timeout(),
        })
    }

    /// Fetches a page or manifest. Sending (retries included) and reading the
    /// body are each bounded by the header timeout.
    pub async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
        let resp = tokio::time::timeout(self.header_timeout, self.client.get(url).send())
            .await
            .map_err(|_| DownloadError::Timeout)??;

        tokio::time::timeout(self.header_timeout, resp.text())
            .await
            .map_err(|_| DownloadError::Timeout)?
            .map_err(|e| e.into())
    }

    /// Fetches one whole fragment. Nothing is returned unless the body was
    /// read completely, so a cancelled fetch leaves no partial data behind.
    pub async fn fetch_fragment(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Fragment, FragmentError> {
        let send = tokio::time::timeout(self.header_timeout, self.raw.get(url).send());
        let mut resp = tokio::select! {
            _ = cancel.cancelled() => return Err(FragmentError::Cancelled),
            res = send => res.map_err(|_| FragmentError::Timeout)??,
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(FragmentError::Status(status));
        }

        let head_seq = resp
            .headers()
            .get(HEAD_SEQNUM_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());

        let mut data = Vec::new();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(FragmentError::Cancelled),
                chunk = tokio::time::timeout(self.header_timeout, resp.chunk()) => {
                    chunk.map_err(|_| FragmentError::Timeout)??
                }
            };

            match chunk {
                Some(chunk) => data.extend_from_slice(&chunk),
                None => break,
            }
        }

        Ok(Fragment { data, head_seq })
    }
}

pub fn format_bytes(bytes: u64) -> String {
    let mut bytes = bytes as f64;
    let mut suffix = "B";

    for s in ["KiB", "MiB", "GiB", "TiB"] {
        if bytes < 1024.0 {
            break;
        }
        bytes /= 1024.0;
        suffix = s;
    }

    format!("{:.2} {}", bytes, suffix)
}

/// Replaces characters that are not allowed in file names.
pub fn sterilize_filename(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            _ => c,
        })
        .collect()
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum FormatError {
    #[error("unknown output format key: '{0}'")]
    UnknownKey(String),
}

fn python_map_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%\((\w+)\)s").expect("should never happen"))
}

/// Substitutes `%(key)s` placeholders. Keys are matched case-insensitively
/// against the lowercase keys of `vals`; any other key is an error.
pub fn format_python_map_string(
    format: &str,
    vals: &HashMap<&str, String>,
) -> Result<String, FormatError> {
    let re = python_map_key();

    if let Some(unknown) = re
        .captures_iter(format)
        .map(|c| c[1].to_lowercase())
        .find(|k| !vals.contains_key(k.as_str()))
    {
        return Err(FormatError::UnknownKey(unknown));
    }

    Ok(re
        .replace_all(format, |c: &regex::Captures| {
            vals[c[1].to_lowercase().as_str()].clone()
        })
        .into_owned())
}

pub fn format_filename(
    format: &str,
    vals: &HashMap<&str, String>,
) -> Result<String, FormatError> {
    let sterilized: HashMap<&str, String> = vals
        .iter()
        .map(|(k, v)| (*k, sterilize_filename(v)))
        .collect();

    format_python_map_string(format, &sterilized)
}

pub async fn try_delete(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Deleted file {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => (),
        Err(e) => warn!("Error deleting file {}: {}", path.display(), e),
    }
}
