//! Drives a huddle session against the loopback SDK backend and logs the
//! event stream. Handy for eyeballing listener wiring without a real SDK.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use huddle_core::sdk::loopback::LoopbackEngine;
use huddle_core::{
    MediaKind, SessionConfig, SessionError, SessionEvent, SessionEventListener, SessionSlot,
    SubscriptionPolicy,
};

#[derive(Parser, Debug)]
#[command(name = "huddle-demo", about = "Run a session against the loopback SDK")]
struct Args {
    /// Session config file (JSON). Overrides --app-id and --channel.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "demo-app")]
    app_id: String,

    #[arg(long, default_value = "lobby")]
    channel: String,

    /// Number of simulated remote participants.
    #[arg(long, default_value_t = 2)]
    peers: usize,

    /// Do not subscribe to video from these uids.
    #[arg(long = "skip-video")]
    skip_video: Vec<String>,

    /// How long to stay in the channel.
    #[arg(long, default_value_t = 1000)]
    duration_ms: u64,
}

/// Logs every event; playback positions only at trace level.
struct LogListener;

impl SessionEventListener for LogListener {
    fn on_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::AudioPosition { uid, frames } => {
                tracing::trace!("position {uid}: {frames}");
            }
            SessionEvent::VolumeIndicator(samples) => {
                let levels: Vec<String> = samples
                    .iter()
                    .map(|s| format!("{}={:.2}", s.uid, s.level))
                    .collect();
                tracing::info!("volume [{}]", levels.join(", "));
            }
            SessionEvent::Error(msg) => tracing::warn!("session error: {msg}"),
            other => tracing::info!("event: {other:?}"),
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("huddle_core=debug,huddle_demo=info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), SessionError> {
    init_logging();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::new(&args.app_id, &args.channel),
    };
    let skip_video = args.skip_video.clone();
    let policy = SubscriptionPolicy::allow_all()
        .with_video(move |user| !skip_video.iter().any(|uid| uid == &user.uid));

    let engine = Arc::new(LoopbackEngine::new());
    let slot = SessionSlot::new(engine.clone());
    let session = slot.get().await;
    session.add_listener(Arc::new(LogListener));

    session.initialize(config, policy).await?;
    session.create_local_audio_track().await?;
    session.create_local_video_track().await?;
    session.join().await?;
    session.publish_local_audio().await?;
    session.publish_local_video().await?;

    let Some(client) = engine.last_client() else {
        return Err(SessionError::NotInitialized);
    };
    if let Some(mic) = engine.last_audio_track() {
        mic.set_level(0.3);
    }

    for n in 0..args.peers {
        let uid = format!("peer-{n}");
        client.add_remote_user(&uid);
        client.publish_remote(&uid, MediaKind::Audio);
        client.publish_remote(&uid, MediaKind::Video);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    for (n, participant) in session.remote_participants().await.iter().enumerate() {
        if let Some(track) = client.remote_audio_track(&participant.uid) {
            track.set_level(0.1 * (n + 1) as f32);
            track.advance_frames(25);
        }
    }

    session.mute_audio().await?;
    session.unmute_audio().await?;
    session.send_stream_message("hello from the demo").await?;
    client.connection_change("RECONNECTING", "CONNECTED", Some("NETWORK_ERROR"));
    client.connection_change("CONNECTED", "RECONNECTING", None);

    tokio::time::sleep(Duration::from_millis(args.duration_ms)).await;

    if let Some(first) = session.remote_participants().await.first() {
        client.remove_remote_user(&first.uid, "Quit");
    }
    session.unpublish_local_audio().await?;
    session.leave().await?;
    slot.destroy().await;

    tracing::info!("sent {} stream message(s)", client.sent_messages().len());
    Ok(())
}
