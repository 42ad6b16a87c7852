use thiserror::Error;

use crate::sdk::SdkError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not initialized")]
    NotInitialized,
    #[error("session already initialized")]
    AlreadyInitialized,
    #[error("no local audio track, call create_local_audio_track first")]
    NoLocalAudioTrack,
    #[error("no local video track, call create_local_video_track first")]
    NoLocalVideoTrack,
    #[error("join failed: {0}")]
    Join(SdkError),
    #[error("sdk error: {0}")]
    Sdk(#[from] SdkError),
    #[error("invalid config: {0}")]
    Config(String),
}
