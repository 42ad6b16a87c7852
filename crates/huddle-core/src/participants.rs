use std::collections::HashMap;
use std::sync::Arc;

use crate::events::ParticipantInfo;
use crate::sdk::{RemoteAudioTrack, RemoteUser, RemoteVideoTrack};

impl From<&RemoteUser> for ParticipantInfo {
    fn from(user: &RemoteUser) -> Self {
        Self {
            uid: user.uid.clone(),
            has_audio: user.has_audio,
            has_video: user.has_video,
        }
    }
}

/// Remote tracks the session is currently subscribed to, keyed by uid.
///
/// Written by the event translation loop, read by the volume poller and UI.
#[derive(Debug, Default)]
pub struct RemoteTracks {
    audio: HashMap<String, Arc<dyn RemoteAudioTrack>>,
    video: HashMap<String, Arc<dyn RemoteVideoTrack>>,
}

impl RemoteTracks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previously subscribed track for `uid`, if any.
    pub fn insert_audio(
        &mut self,
        uid: &str,
        track: Arc<dyn RemoteAudioTrack>,
    ) -> Option<Arc<dyn RemoteAudioTrack>> {
        self.audio.insert(uid.to_string(), track)
    }

    pub fn insert_video(
        &mut self,
        uid: &str,
        track: Arc<dyn RemoteVideoTrack>,
    ) -> Option<Arc<dyn RemoteVideoTrack>> {
        self.video.insert(uid.to_string(), track)
    }

    pub fn remove_audio(&mut self, uid: &str) -> Option<Arc<dyn RemoteAudioTrack>> {
        self.audio.remove(uid)
    }

    pub fn remove_video(&mut self, uid: &str) -> Option<Arc<dyn RemoteVideoTrack>> {
        self.video.remove(uid)
    }

    pub fn audio(&self, uid: &str) -> Option<Arc<dyn RemoteAudioTrack>> {
        self.audio.get(uid).cloned()
    }

    pub fn video(&self, uid: &str) -> Option<Arc<dyn RemoteVideoTrack>> {
        self.video.get(uid).cloned()
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = (&str, &Arc<dyn RemoteAudioTrack>)> {
        self.audio.iter().map(|(uid, track)| (uid.as_str(), track))
    }

    pub fn len(&self) -> usize {
        self.audio.len() + self.video.len()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_empty() && self.video.is_empty()
    }

    /// Stop and drop every track.
    pub fn clear(&mut self) {
        for (_, track) in self.audio.drain() {
            track.stop();
        }
        for (_, track) in self.video.drain() {
            track.stop();
        }
    }
}
