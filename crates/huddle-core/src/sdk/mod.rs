//! Boundary to the real-time media SDK.
//!
//! The SDK owns transport, codecs and media capture. The session facade only
//! talks to it through these traits, and receives its raw callbacks as
//! [`SdkEvent`]s over an unbounded channel.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::events::MediaKind;

pub mod loopback;

/// Error reported by the SDK. `code` is the SDK's own error code string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct SdkError {
    pub code: String,
    pub message: String,
}

impl SdkError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    #[default]
    Rtc,
    Live,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    Vp8,
    H264,
}

/// Options passed to the SDK when the client is created.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default)]
    pub mode: ChannelMode,
    #[serde(default)]
    pub codec: VideoCodec,
}

/// Cumulative receive statistics of a remote audio track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioTrackStats {
    pub received_frames: u64,
}

/// Microphone track owned by the local participant.
#[async_trait]
pub trait LocalAudioTrack: fmt::Debug + Send + Sync {
    fn track_id(&self) -> &str;
    /// Instantaneous level in `0.0..=1.0`.
    fn volume_level(&self) -> f32;
    async fn set_muted(&self, muted: bool) -> Result<(), SdkError>;
    fn is_muted(&self) -> bool;
    /// Stop capture. The track can no longer be published afterwards.
    fn stop(&self);
    /// Release the underlying device.
    fn close(&self);
}

/// Camera track owned by the local participant.
#[async_trait]
pub trait LocalVideoTrack: fmt::Debug + Send + Sync {
    fn track_id(&self) -> &str;
    async fn set_enabled(&self, enabled: bool) -> Result<(), SdkError>;
    fn is_enabled(&self) -> bool;
    fn stop(&self);
    fn close(&self);
}

pub trait RemoteAudioTrack: fmt::Debug + Send + Sync {
    fn track_id(&self) -> &str;
    fn volume_level(&self) -> f32;
    fn stats(&self) -> AudioTrackStats;
    fn play(&self);
    fn stop(&self);
}

pub trait RemoteVideoTrack: fmt::Debug + Send + Sync {
    fn track_id(&self) -> &str;
    fn stop(&self);
}

#[derive(Debug, Clone)]
pub enum LocalTrack {
    Audio(Arc<dyn LocalAudioTrack>),
    Video(Arc<dyn LocalVideoTrack>),
}

impl LocalTrack {
    pub fn kind(&self) -> MediaKind {
        match self {
            LocalTrack::Audio(_) => MediaKind::Audio,
            LocalTrack::Video(_) => MediaKind::Video,
        }
    }

    pub fn track_id(&self) -> &str {
        match self {
            LocalTrack::Audio(t) => t.track_id(),
            LocalTrack::Video(t) => t.track_id(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RemoteTrack {
    Audio(Arc<dyn RemoteAudioTrack>),
    Video(Arc<dyn RemoteVideoTrack>),
}

impl RemoteTrack {
    pub fn stop(&self) {
        match self {
            RemoteTrack::Audio(t) => t.stop(),
            RemoteTrack::Video(t) => t.stop(),
        }
    }
}

/// A remote channel member as the SDK currently sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUser {
    pub uid: String,
    pub has_audio: bool,
    pub has_video: bool,
}

impl RemoteUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            has_audio: false,
            has_video: false,
        }
    }
}

/// Raw SDK callbacks, before translation.
///
/// Connection states arrive as the SDK's strings and network quality as its
/// 0..=6 integer scale.
#[derive(Debug, Clone)]
pub enum SdkEvent {
    UserPublished { user: RemoteUser, media: MediaKind },
    UserUnpublished { user: RemoteUser, media: MediaKind },
    UserJoined { user: RemoteUser },
    UserLeft { user: RemoteUser, reason: String },
    ConnectionStateChange {
        current: String,
        previous: String,
        reason: Option<String>,
    },
    NetworkQuality { uplink: u8, downlink: u8 },
    StreamMessage { uid: String, payload: Vec<u8> },
    Exception {
        code: i32,
        message: String,
        uid: Option<String>,
    },
}

pub type SdkEventReceiver = mpsc::UnboundedReceiver<SdkEvent>;

/// A channel client. One client serves any number of join/leave cycles.
#[async_trait]
pub trait RtcClient: Send + Sync {
    async fn join(
        &self,
        app_id: &str,
        channel: &str,
        token: Option<&str>,
        uid: &str,
    ) -> Result<(), SdkError>;

    async fn leave(&self) -> Result<(), SdkError>;

    async fn publish(&self, tracks: Vec<LocalTrack>) -> Result<(), SdkError>;

    async fn unpublish(&self, tracks: Vec<LocalTrack>) -> Result<(), SdkError>;

    async fn subscribe(&self, uid: &str, media: MediaKind) -> Result<RemoteTrack, SdkError>;

    /// Live list of remote users in the channel.
    fn remote_users(&self) -> Vec<RemoteUser>;

    async fn send_stream_message(&self, payload: Vec<u8>) -> Result<(), SdkError>;
}

/// Entry point of the SDK: client and local track factories.
#[async_trait]
pub trait RtcEngine: Send + Sync {
    /// Create a client together with the receiving end of its callbacks.
    fn create_client(&self, config: &ClientConfig) -> (Arc<dyn RtcClient>, SdkEventReceiver);

    async fn create_microphone_audio_track(&self) -> Result<Arc<dyn LocalAudioTrack>, SdkError>;

    async fn create_camera_video_track(&self) -> Result<Arc<dyn LocalVideoTrack>, SdkError>;
}
