//! Sequential fragment download for one stream, with the retry and
//! end-of-stream policy that decides when a fragment is never coming.

use std::{fmt::Display, path::Path};

use futures::join;
use reqwest::StatusCode;
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::{
    atom,
    config::DownloadConfig,
    info::VideoInfo,
    types::{DataType, UrlTemplate},
    util::{FragmentError, HttpClient},
};

#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error("I/O error")]
    IoError(#[from] std::io::Error),
}

/// Per-worker download progress. Never shared between workers.
#[derive(Debug, Clone, PartialEq)]
pub struct FragThreadState {
    pub name: String,
    pub data_type: DataType,
    pub seq_num: i64,
    pub tries: u32,
    pub full_retries: u32,
    pub max_seq: Option<i64>,
    pub is_403: bool,
}

impl FragThreadState {
    pub fn new(data_type: DataType, full_retries: u32) -> Self {
        Self {
            name: format!("{}-download", data_type),
            data_type,
            seq_num: 0,
            tries: 0,
            full_retries,
            max_seq: None,
            is_403: false,
        }
    }

    /// Within two fragments of the highest one known to exist.
    fn near_known_end(&self) -> bool {
        self.max_seq.map_or(false, |max| self.seq_num >= max.saturating_sub(2))
    }

    /// More than two fragments behind the highest one known to exist.
    fn trails_known_end(&self) -> bool {
        self.max_seq.map_or(false, |max| self.seq_num < max.saturating_sub(2))
    }

    fn update_max_seq(&mut self, head_seq: i64) {
        if self.max_seq.map_or(true, |max| head_seq > max) {
            self.max_seq = Some(head_seq);
        }
    }
}

/// Asks for new download URLs, unless someone already rotated the one
/// that just failed. Direct links are never refreshed.
pub async fn refresh_url(info: &dyn VideoInfo, data_type: DataType, current_url: &UrlTemplate) {
    if info.is_gvideo_ddl() {
        return;
    }

    let new_url = info.download_url(data_type);
    if current_url.is_empty() || new_url == *current_url {
        debug!("{}: Attempting to retrieve a new download URL", data_type);
        info.print_status();

        info.refresh().await;
    }
}

/// Decides whether to keep trying after a failed attempt at `state.seq_num`.
pub async fn continue_fragment_download(
    info: &dyn VideoInfo,
    state: &mut FragThreadState,
    max_tries: u32,
) -> bool {
    if info.is_finished(state.data_type) {
        return false;
    }

    if state.tries < max_tries {
        return true;
    }

    state.full_retries = state.full_retries.saturating_sub(1);

    debug!(
        "{}: Fragment {}: {}/{} retries",
        state.name, state.seq_num, state.tries, max_tries
    );
    info.print_status();

    // A stale 403 or a misdetected end looks the same from here
    if info.is_live() {
        info.refresh().await;
    }

    let status = info.status(state.data_type);
    if status.live {
        debug!(
            "{}: Fragment {}: Stream still live, continuing download attempt",
            state.name, state.seq_num
        );
        info.print_status();
        state.tries = 0;
        return true;
    }

    if status.unavailable && state.is_403 {
        warn!(
            "{}: Download link likely expired and stream is privated or members only, cannot continue download",
            state.name
        );
        info.print_status();
        info.set_finished(state.data_type);
        return false;
    }

    if state.trails_known_end() && state.full_retries > 0 {
        debug!(
            "{}: More than two fragments away from the highest known fragment",
            state.name
        );
        debug!(
            "{}: Will try grabbing fragment {} {} more times",
            state.name, state.seq_num, state.full_retries
        );
        info.print_status();
        return true;
    }

    info.set_finished(state.data_type);
    false
}

pub async fn handle_frag_http_error(
    info: &dyn VideoInfo,
    state: &mut FragThreadState,
    status_code: StatusCode,
    url: &UrlTemplate,
) {
    debug!(
        "{}: HTTP Error for fragment {}: {}",
        state.name, state.seq_num, status_code
    );
    info.print_status();

    match status_code {
        StatusCode::FORBIDDEN => {
            state.is_403 = true;
            refresh_url(info, state.data_type, url).await;
        }
        StatusCode::NOT_FOUND if state.near_known_end() && !info.is_live() => {
            debug!(
                "{}: Stream has ended and fragment within the last two not found, probably not actually created",
                state.name
            );
            info.print_status();
            info.set_finished(state.data_type);
        }
        _ => (),
    }
}

pub fn handle_frag_download_error(info: &dyn VideoInfo, state: &FragThreadState, err: &dyn Display) {
    debug!(
        "{}: Error with fragment {}: {}",
        state.name, state.seq_num, err
    );
    info.print_status();

    if state.near_known_end() && !info.is_live() {
        debug!(
            "{}: Stream has ended and fragment number is within two of the known max, probably not actually created",
            state.name
        );
        info.set_finished(state.data_type);
        info.print_status();
    }
}

/// Downloads fragments of `data_type` in order and appends them to `path`
/// until the stream is finished or `cancel` fires. Returns the number of
/// fragments written.
pub async fn download_stream(
    client: &HttpClient,
    info: &dyn VideoInfo,
    data_type: DataType,
    path: &Path,
    config: &DownloadConfig,
    cancel: &CancellationToken,
) -> Result<u64, WorkerError> {
    let mut file = match File::create(path).await {
        Ok(f) => f,
        Err(e) => {
            info.set_finished(data_type);
            return Err(e.into());
        }
    };

    let mut state = FragThreadState::new(data_type, config.full_retries);
    let mut written = 0;

    loop {
        if cancel.is_cancelled() {
            info!("{}: Download cancelled", state.name);
            break;
        }

        let status = info.status(data_type);
        if status.finished {
            break;
        }

        if !status.live && state.max_seq.map_or(false, |max| state.seq_num > max) {
            info!("{}: Reached the last fragment of the stream", state.name);
            info.set_finished(data_type);
            break;
        }

        let template = status.url;
        if template.is_empty() {
            debug!("{}: No download URL available", state.name);
            let refresh = refresh_url(info, data_type, &template);
            if cancel.run_until_cancelled(refresh).await.is_none() {
                info!("{}: Download cancelled", state.name);
                break;
            }
        } else {
            match client
                .fetch_fragment(&template.fill(state.seq_num), cancel)
                .await
            {
                Ok(frag) => {
                    if let Some(head_seq) = frag.head_seq {
                        state.update_max_seq(head_seq);
                    }

                    let data = atom::remove_sidx(frag.data);
                    if let Err(e) = file.write_all(&data).await {
                        info.set_finished(data_type);
                        return Err(e.into());
                    }

                    info.record_fragment(data_type, data.len() as u64);
                    info.print_status();

                    written += 1;
                    state.seq_num += 1;
                    state.tries = 0;
                    state.is_403 = false;
                    continue;
                }
                Err(FragmentError::Cancelled) => {
                    info!("{}: Download cancelled", state.name);
                    break;
                }
                Err(FragmentError::Status(code)) => {
                    let handled = handle_frag_http_error(info, &mut state, code, &template);
                    if cancel.run_until_cancelled(handled).await.is_none() {
                        info!("{}: Download cancelled", state.name);
                        break;
                    }
                }
                Err(e) => handle_frag_download_error(info, &state, &e),
            }
        }

        state.tries += 1;

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("{}: Download cancelled", state.name);
                break;
            }
            _ = tokio::time::sleep(config.retry_delay()) => (),
        }

        // Refreshing waits on the network, so it races the cancel token too
        let decision = continue_fragment_download(info, &mut state, config.frag_max_tries);
        match cancel.run_until_cancelled(decision).await {
            Some(true) => (),
            Some(false) => break,
            None => {
                info!("{}: Download cancelled", state.name);
                break;
            }
        }
    }

    file.flush().await?;
    info!(
        "{}: Finished with {} fragments written to {}",
        state.name,
        written,
        path.display()
    );

    Ok(written)
}

/// Runs the audio and video workers side by side. Either one stopping,
/// even with an error, leaves the other running to completion.
pub async fn start(
    client: &HttpClient,
    info: &dyn VideoInfo,
    audio_path: &Path,
    video_path: &Path,
    config: &DownloadConfig,
    cancel: &CancellationToken,
) -> Result<(), WorkerError> {
    let (audio, video) = join!(
        download_stream(client, info, DataType::Audio, audio_path, config, cancel),
        download_stream(client, info, DataType::Video, video_path, config, cancel),
    );

    for (data_type, res) in [(DataType::Audio, &audio), (DataType::Video, &video)] {
        if let Err(e) = res {
            error!("{} download failed: {}", data_type, e);
        }
    }

    audio.and(video).map(|_| ())
}
