use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum FfmpegError {
    #[error("I/O error")]
    IoError(#[from] std::io::Error),
    #[error("ffmpeg exited with status {0}")]
    ExitStatus(std::process::ExitStatus),
}

/// Copies the audio and video streams into a single container.
pub async fn mux(audio: &Path, video: &Path, output: &Path) -> Result<(), FfmpegError> {
    let mut child = tokio::process::Command::new("ffmpeg");

    child
        .arg("-hide_banner")
        .arg("-nostdin")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-i")
        .arg(video)
        .arg("-i")
        .arg(audio)
        .arg("-c")
        .arg("copy")
        .arg("-movflags")
        .arg("faststart")
        .arg(output);

    debug!("Executing command: {:?}", child.as_std());

    let status = child.spawn()?.wait().await?;
    if !status.success() {
        return Err(FfmpegError::ExitStatus(status));
    }

    Ok(())
}
