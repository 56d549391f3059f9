//! # yta-archive
//!
//! This crate archives YouTube live streams, including ones that just ended or
//! are about to go private. Audio and video are downloaded fragment by
//! fragment, each by its own worker, and appended to local files; the
//! segment index box is stripped from every fragment on the way.
//!
//! ## Usage
//!
//! ```no_run
//! use std::{path::Path, sync::Arc};
//!
//! use tokio_util::sync::CancellationToken;
//! use yta_archive::{config::DownloadConfig, info::{DownloadInfo, VideoInfo}, util, worker};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DownloadConfig::default();
//!     let client = Arc::new(util::HttpClient::with_config(&config).unwrap());
//!
//!     // Status and download URLs of the stream, shared by both workers
//!     let info = DownloadInfo::new(client.clone(), "dQw4w9WgXcQ", &config);
//!     info.refresh().await;
//!
//!     if !info.has_urls() {
//!         println!("No download URLs found");
//!         return;
//!     }
//!
//!     worker::start(
//!         &client,
//!         &info,
//!         Path::new("stream.f140.mp4"),
//!         Path::new("stream.video.mp4"),
//!         &config,
//!         &CancellationToken::new(),
//!     )
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! Direct googlevideo.com links can be used instead of a video page, see
//! [`gvideo::parse_gvideo_url`] and [`info::DownloadInfo::from_gvideo`].

#![forbid(unsafe_code)]
#[macro_use]
extern crate log;

pub mod atom;
pub mod config;
pub mod dash;
pub mod ffmpeg;
pub mod gvideo;
pub mod info;
pub mod player_response;
pub mod stats;
pub mod types;
pub mod util;
pub mod worker;
