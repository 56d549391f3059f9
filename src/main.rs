use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;
use yta_archive::{
    config::DownloadConfig,
    ffmpeg, gvideo,
    info::{self as video_info, DownloadInfo, VideoInfo},
    types::DataType,
    util, worker,
};

/// Archive a YouTube live stream, fragment by fragment
#[derive(Parser, Debug)]
struct Args {
    /// Video URL or id
    url: Option<String>,

    /// Direct googlevideo.com audio link, used together with --video-url
    #[clap(long, requires = "video_url")]
    audio_url: Option<String>,

    /// Direct googlevideo.com video link, used together with --audio-url
    #[clap(long, requires = "audio_url")]
    video_url: Option<String>,

    /// Output file name; %(id)s, %(title)s and %(channel)s are replaced
    #[clap(short, long, default_value = "%(title)s-%(id)s")]
    output: String,

    /// Output directory
    #[clap(short, long)]
    directory: Option<PathBuf>,

    /// JSON file with download settings
    #[clap(long)]
    config: Option<PathBuf>,

    /// Attempts per fragment before checking whether the stream ended
    #[clap(long)]
    retries: Option<u32>,

    /// Keep audio and video as separate files
    #[clap(long)]
    no_merge: bool,

    /// Keep the fragment files after merging
    #[clap(long)]
    keep_ts: bool,

    /// More output, repeat for debug logs
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

async fn load_config(args: &Args) -> anyhow::Result<DownloadConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Could not read config {}", path.display()))?;
            serde_json::from_str(&text).context("Could not parse config")?
        }
        None => DownloadConfig::default(),
    };

    if let Some(retries) = args.retries {
        config.frag_max_tries = retries;
    }
    if let Some(dir) = &args.directory {
        config.output_dir = dir.clone();
    }

    Ok(config)
}

async fn get_info(
    args: &Args,
    client: Arc<util::HttpClient>,
    config: &DownloadConfig,
) -> anyhow::Result<DownloadInfo> {
    if let (Some(audio_url), Some(video_url)) = (&args.audio_url, &args.video_url) {
        let audio = gvideo::parse_gvideo_url(audio_url, DataType::Audio)?;
        let video = gvideo::parse_gvideo_url(video_url, DataType::Video)?;
        return Ok(DownloadInfo::from_gvideo(client, audio, video, config));
    }

    let url = args.url.as_deref().context("No video URL provided")?;
    let video_id = video_info::parse_video_id(url).context("Could not find a video id")?;

    info!("Fetching video info for {}", video_id);
    let info = DownloadInfo::new(client, &video_id, config);
    info.refresh().await;

    if !info.has_urls() {
        if info.is_unavailable() {
            bail!("Video is unavailable");
        }
        if let Some(start) = info.scheduled_start() {
            bail!("Stream has not started yet, scheduled for {}", start);
        }
        bail!("Video is not live or has no fragmented download URLs");
    }

    Ok(info)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args).await?;
    let client = Arc::new(util::HttpClient::with_config(&config)?);
    let info = get_info(&args, client.clone(), &config).await?;

    let id = match info.video_id() {
        "" => format!("gvideo-{}", info.itag(DataType::Video)),
        id => id.to_string(),
    };
    let vals = HashMap::from([
        ("id", id.clone()),
        ("title", info.title()),
        ("channel", info.channel()),
    ]);
    let fname = util::format_filename(&args.output, &vals)?;

    tokio::fs::create_dir_all(&config.output_dir).await?;
    let base = config.output_dir.join(fname);
    let with_suffix = |suffix: String| {
        let mut p = base.clone().into_os_string();
        p.push(suffix);
        PathBuf::from(p)
    };
    let audio_path = with_suffix(format!(".f{}.mp4", info.itag(DataType::Audio)));
    let video_path = with_suffix(format!(".f{}.mp4", info.itag(DataType::Video)));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping downloads");
                cancel.cancel();
            }
        }
    });

    info!("Starting download of {}", id);
    worker::start(&client, &info, &audio_path, &video_path, &config, &cancel).await?;
    println!();

    if cancel.is_cancelled() {
        info!(
            "Download cancelled, fragments kept in {} and {}",
            audio_path.display(),
            video_path.display()
        );
        return Ok(());
    }

    if args.no_merge {
        return Ok(());
    }

    let output = with_suffix(".mp4".to_string());
    info!("Muxing into {}", output.display());
    match ffmpeg::mux(&audio_path, &video_path, &output).await {
        Ok(()) => {
            if !args.keep_ts {
                util::try_delete(&audio_path).await;
                util::try_delete(&video_path).await;
            }
            println!("Final file: {}", output.display());
        }
        Err(e) => warn!("Could not mux files, keeping them as they are: {}", e),
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
