//! Media Client Application
//!
//! Handshakes with both channels of a media server, plays the audio through
//! the default output device and hands decoded video frames to a sink.

use anyhow::Result;
use clap::Parser;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_media_streamer::{
    audio::{AudioOutput, AudioPlayback, PacedNullOutput, PlaybackReport},
    config::{AppConfig, ClientConfig, PlaybackConfig},
    diagnostics::TimestampLog,
    media::MediaKind,
    network::{AudioChannelClient, HeartbeatBroadcaster, VideoChannelClient, VideoReport},
    video::{FrameDumpSink, FrameSink, LogDisplay},
};

#[derive(Parser, Debug)]
#[command(name = "client", about = "Receive and play an audio/video stream over UDP")]
struct Args {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address
    #[arg(long)]
    host: Option<IpAddr>,

    /// Skip the audio channel
    #[arg(long)]
    no_audio: bool,

    /// Skip the video channel
    #[arg(long)]
    no_video: bool,

    /// Discard audio at real-time rate instead of opening a sound device
    #[arg(long)]
    no_audio_device: bool,

    /// Output device name (default device if omitted)
    #[arg(long)]
    device: Option<String>,

    /// Write every received frame to this directory
    #[arg(long)]
    dump_frames: Option<PathBuf>,

    /// Write per-unit timestamp files to this directory
    #[arg(long)]
    timestamps: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn open_timestamps(dir: Option<&Path>, kind: MediaKind) -> Option<TimestampLog> {
    let dir = dir?;
    match TimestampLog::open_in(dir, kind) {
        Ok(log) => Some(log),
        Err(e) => {
            tracing::warn!("No {} timestamp log in {}: {}", kind, dir.display(), e);
            None
        }
    }
}

fn play<O: AudioOutput>(
    output: O,
    client: &ClientConfig,
    format: PlaybackConfig,
    timestamps: Option<TimestampLog>,
    cancel: &CancellationToken,
) -> lan_media_streamer::Result<PlaybackReport> {
    let mut playback = AudioPlayback::new(output, format)
        .with_stall_timeout(client.stall_timeout(), client.stop_poll())
        .with_timestamps(timestamps);
    AudioChannelClient::connect(client)?.play(&mut playback, cancel)
}

fn run_audio(
    config: &AppConfig,
    use_device: bool,
    timestamps: Option<TimestampLog>,
    cancel: &CancellationToken,
) -> lan_media_streamer::Result<PlaybackReport> {
    let format = config.playback.clone();

    #[cfg(feature = "device")]
    if use_device {
        let output = lan_media_streamer::audio::CpalOutput::open(&format)?;
        return play(output, &config.client, format, timestamps, cancel);
    }

    #[cfg(not(feature = "device"))]
    if use_device {
        tracing::warn!("Built without sound device support, discarding audio");
    }

    play(
        PacedNullOutput::new(format.clone()),
        &config.client,
        format,
        timestamps,
        cancel,
    )
}

fn run_video(
    config: &ClientConfig,
    dump_dir: Option<&Path>,
    timestamps: Option<TimestampLog>,
    cancel: &CancellationToken,
) -> lan_media_streamer::Result<VideoReport> {
    let mut sink: Box<dyn FrameSink> = match dump_dir {
        Some(dir) => Box::new(FrameDumpSink::new(dir)?),
        None => Box::new(LogDisplay::default()),
    };

    let client = VideoChannelClient::connect(config)?.with_timestamps(timestamps);
    client.handshake()?;
    client.run(sink.as_mut(), cancel)
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

    let args = Args::parse();

    #[cfg(feature = "device")]
    if args.list_devices {
        println!("\n=== Available Output Devices ===");
        for device in lan_media_streamer::audio::device::list_output_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}:", device.name, default_marker);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
        println!();
        return Ok(());
    }

    #[cfg(not(feature = "device"))]
    if args.list_devices {
        anyhow::bail!("built without sound device support");
    }

    tracing::info!("Starting LAN Media Client");

    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.client.server_host = host;
    }
    if args.device.is_some() {
        config.playback.device = args.device.clone();
    }
    config.validate()?;

    let timestamp_dir = args
        .timestamps
        .clone()
        .or_else(|| config.diagnostics.timestamp_dir.clone());

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

    let heartbeat = if config.heartbeat.enabled {
        let targets = vec![config.client.audio_server(), config.client.video_server()];
        let broadcaster = HeartbeatBroadcaster::bind(&config.heartbeat, targets).await?;
        Some(tokio::spawn(broadcaster.run(cancel.clone())))
    } else {
        None
    };

    let video = (!args.no_video).then(|| {
        let client = config.client.clone();
        let dump_dir = args.dump_frames.clone();
        let timestamps = open_timestamps(timestamp_dir.as_deref(), MediaKind::Video);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            run_video(&client, dump_dir.as_deref(), timestamps, &cancel)
        })
    });

    let audio = (!args.no_audio).then(|| {
        let config = config.clone();
        let use_device = !args.no_audio_device;
        let timestamps = open_timestamps(timestamp_dir.as_deref(), MediaKind::Audio);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || run_audio(&config, use_device, timestamps, &cancel))
    });

    if let Some(audio) = audio {
        match audio.await {
            Ok(Ok(report)) => tracing::info!(
                "Audio finished ({:?}): {} units, {} bytes, {} underruns",
                report.end,
                report.units_played,
                report.bytes_played,
                report.underruns
            ),
            Ok(Err(e)) => tracing::error!("Audio channel failed: {}", e),
            Err(e) => tracing::error!("Audio task aborted: {}", e),
        }
    }

    if let Some(video) = video {
        match video.await {
            Ok(Ok(report)) => tracing::info!(
                "Video finished: {} frames rendered, {} dropped",
                report.frames_rendered,
                report.frames_dropped
            ),
            Ok(Err(e)) => tracing::error!("Video channel failed: {}", e),
            Err(e) => tracing::error!("Video task aborted: {}", e),
        }
    }

    cancel.cancel();
    if let Some(heartbeat) = heartbeat {
        match heartbeat.await {
            Ok(Ok(beats)) => tracing::debug!("{} heartbeats sent", beats),
            Ok(Err(e)) => tracing::error!("Heartbeat failed: {}", e),
            Err(e) => tracing::error!("Heartbeat task aborted: {}", e),
        }
    }

    Ok(())
}
