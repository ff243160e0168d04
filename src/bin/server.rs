//! Media Server Application
//!
//! Serves a WAV file on the audio channel and an image sequence on the video
//! channel. Each channel runs as its own task and fails independently.

use anyhow::Result;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_media_streamer::{
    audio::AudioTrack,
    config::AppConfig,
    media::MediaKind,
    network::{AudioChannelServer, VideoChannelServer},
    video::{FrameDumpSink, ImageSequence},
};

#[derive(Parser, Debug)]
#[command(name = "server", about = "Stream pre-recorded audio and video over UDP")]
struct Args {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 16-bit PCM WAV file for the audio channel
    #[arg(short, long)]
    audio: Option<PathBuf>,

    /// Directory of frame images for the video channel
    #[arg(short, long)]
    video: Option<PathBuf>,

    /// Source frame rate of the image sequence
    #[arg(long)]
    fps: Option<f64>,

    /// Address both channels bind to
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Write every sent frame to this directory
    #[arg(long)]
    preview_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LAN Media Server");

    let args = Args::parse();
    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.audio.bind_address = bind;
        config.video.bind_address = bind;
    }
    if let Some(fps) = args.fps {
        config.video.source_frame_rate = fps;
    }
    config.validate()?;

    if args.audio.is_none() && args.video.is_none() {
        anyhow::bail!("nothing to serve: pass --audio and/or --video");
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutting down");
                cancel.cancel();
            }
        });
    }

    let marker = config.heartbeat.marker.clone().into_bytes();
    let mut tasks = Vec::new();

    if let Some(path) = &args.audio {
        let track = AudioTrack::open_wav(path, config.audio.chunk_frames)?;
        let server = AudioChannelServer::bind(&config.audio, Arc::new(track))
            .await?
            .with_ignored_marker(marker.clone());
        tasks.push((MediaKind::Audio, tokio::spawn(server.run(cancel.clone()))));
    }

    if let Some(dir) = &args.video {
        let source = ImageSequence::open(dir, config.video.source_frame_rate)?;
        let mut server = VideoChannelServer::bind(&config.video, source)
            .await?
            .with_ignored_marker(marker);
        if let Some(preview) = &args.preview_dir {
            server = server.with_preview(Box::new(FrameDumpSink::new(preview)?));
        }
        tasks.push((MediaKind::Video, tokio::spawn(server.run(cancel.clone()))));
    }

    tracing::info!("Waiting for viewers - press Ctrl+C to stop");

    for (kind, task) in tasks {
        match task.await {
            Ok(Ok(())) => tracing::info!("{} channel finished", kind),
            Ok(Err(e)) => tracing::error!("{} channel failed: {}", kind, e),
            Err(e) => tracing::error!("{} channel task aborted: {}", kind, e),
        }
    }

    Ok(())
}
