//! In-process SDK backend.
//!
//! Keeps channel membership in memory and lets the host play the remote side:
//! add users, publish their tracks, drive their levels and frame counters,
//! inject arbitrary callbacks. Calls made by the session are recorded so they
//! can be inspected afterwards.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    AudioTrackStats, ClientConfig, LocalAudioTrack, LocalTrack, LocalVideoTrack, RemoteAudioTrack,
    RemoteTrack, RemoteUser, RemoteVideoTrack, RtcClient, RtcEngine, SdkError, SdkEvent,
    SdkEventReceiver,
};
use crate::events::MediaKind;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn track_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// f32 stored as bits so levels can be changed through a shared reference.
#[derive(Debug, Default)]
struct Level(AtomicU32);

impl Level {
    fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, level: f32) {
        self.0.store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct LoopbackAudioTrack {
    id: String,
    level: Level,
    muted: AtomicBool,
    stopped: AtomicBool,
    closed: AtomicBool,
}

impl LoopbackAudioTrack {
    fn new() -> Self {
        Self {
            id: track_id("mic"),
            level: Level::default(),
            muted: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_level(&self, level: f32) {
        self.level.set(level);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalAudioTrack for LoopbackAudioTrack {
    fn track_id(&self) -> &str {
        &self.id
    }

    fn volume_level(&self) -> f32 {
        if self.is_muted() { 0.0 } else { self.level.get() }
    }

    async fn set_muted(&self, muted: bool) -> Result<(), SdkError> {
        if self.is_closed() {
            return Err(SdkError::new("TRACK_IS_DISABLED", "audio track is closed"));
        }
        self.muted.store(muted, Ordering::SeqCst);
        Ok(())
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct LoopbackVideoTrack {
    id: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
    closed: AtomicBool,
}

impl LoopbackVideoTrack {
    fn new() -> Self {
        Self {
            id: track_id("camera"),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalVideoTrack for LoopbackVideoTrack {
    fn track_id(&self) -> &str {
        &self.id
    }

    async fn set_enabled(&self, enabled: bool) -> Result<(), SdkError> {
        if self.is_closed() {
            return Err(SdkError::new("TRACK_IS_DISABLED", "video track is closed"));
        }
        self.enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct LoopbackRemoteAudioTrack {
    id: String,
    level: Level,
    received_frames: AtomicU64,
    playing: AtomicBool,
}

impl LoopbackRemoteAudioTrack {
    fn new() -> Self {
        Self {
            id: track_id("remote-audio"),
            level: Level::default(),
            received_frames: AtomicU64::new(0),
            playing: AtomicBool::new(false),
        }
    }

    pub fn set_level(&self, level: f32) {
        self.level.set(level);
    }

    /// Pretend `frames` more frames arrived from the network.
    pub fn advance_frames(&self, frames: u64) {
        self.received_frames.fetch_add(frames, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl RemoteAudioTrack for LoopbackRemoteAudioTrack {
    fn track_id(&self) -> &str {
        &self.id
    }

    fn volume_level(&self) -> f32 {
        self.level.get()
    }

    fn stats(&self) -> AudioTrackStats {
        AudioTrackStats {
            received_frames: self.received_frames.load(Ordering::SeqCst),
        }
    }

    fn play(&self) {
        self.playing.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct LoopbackRemoteVideoTrack {
    id: String,
    stopped: AtomicBool,
}

impl LoopbackRemoteVideoTrack {
    fn new() -> Self {
        Self {
            id: track_id("remote-video"),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl RemoteVideoTrack for LoopbackRemoteVideoTrack {
    fn track_id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct RemotePeer {
    has_audio: bool,
    has_video: bool,
    audio: Option<Arc<LoopbackRemoteAudioTrack>>,
    video: Option<Arc<LoopbackRemoteVideoTrack>>,
}

#[derive(Debug, Default)]
struct ClientState {
    joined: Option<(String, String)>,
    peers: BTreeMap<String, RemotePeer>,
    published: Vec<String>,
    publish_calls: usize,
    subscribe_calls: Vec<(String, MediaKind)>,
    sent_messages: Vec<Vec<u8>>,
    fail_next_join: Option<SdkError>,
    fail_next_leave: Option<SdkError>,
}

/// Loopback channel client.
pub struct LoopbackClient {
    config: ClientConfig,
    events: mpsc::UnboundedSender<SdkEvent>,
    state: Mutex<ClientState>,
}

impl LoopbackClient {
    fn new(config: ClientConfig, events: mpsc::UnboundedSender<SdkEvent>) -> Self {
        Self {
            config,
            events,
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Deliver a raw callback to the session, as the SDK would.
    pub fn inject(&self, event: SdkEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("loopback: event receiver dropped");
        }
    }

    fn remote_user(uid: &str, peer: &RemotePeer) -> RemoteUser {
        RemoteUser {
            uid: uid.to_string(),
            has_audio: peer.has_audio,
            has_video: peer.has_video,
        }
    }

    pub fn add_remote_user(&self, uid: &str) {
        let user = {
            let mut state = lock(&self.state);
            let peer = state.peers.entry(uid.to_string()).or_default();
            Self::remote_user(uid, peer)
        };
        self.inject(SdkEvent::UserJoined { user });
    }

    pub fn remove_remote_user(&self, uid: &str, reason: &str) {
        let removed = lock(&self.state).peers.remove(uid);
        if removed.is_some() {
            self.inject(SdkEvent::UserLeft {
                user: RemoteUser::new(uid),
                reason: reason.to_string(),
            });
        }
    }

    /// Publish a media track on behalf of a remote user, adding the user if
    /// needed.
    pub fn publish_remote(&self, uid: &str, media: MediaKind) {
        let user = {
            let mut state = lock(&self.state);
            let peer = state.peers.entry(uid.to_string()).or_default();
            match media {
                MediaKind::Audio => {
                    peer.has_audio = true;
                    peer.audio = Some(Arc::new(LoopbackRemoteAudioTrack::new()));
                }
                MediaKind::Video => {
                    peer.has_video = true;
                    peer.video = Some(Arc::new(LoopbackRemoteVideoTrack::new()));
                }
            }
            Self::remote_user(uid, peer)
        };
        self.inject(SdkEvent::UserPublished { user, media });
    }

    pub fn unpublish_remote(&self, uid: &str, media: MediaKind) {
        let user = {
            let mut state = lock(&self.state);
            let Some(peer) = state.peers.get_mut(uid) else {
                return;
            };
            match media {
                MediaKind::Audio => {
                    peer.has_audio = false;
                    peer.audio = None;
                }
                MediaKind::Video => {
                    peer.has_video = false;
                    peer.video = None;
                }
            }
            Self::remote_user(uid, peer)
        };
        self.inject(SdkEvent::UserUnpublished { user, media });
    }

    pub fn remote_audio_track(&self, uid: &str) -> Option<Arc<LoopbackRemoteAudioTrack>> {
        lock(&self.state).peers.get(uid).and_then(|p| p.audio.clone())
    }

    pub fn remote_video_track(&self, uid: &str) -> Option<Arc<LoopbackRemoteVideoTrack>> {
        lock(&self.state).peers.get(uid).and_then(|p| p.video.clone())
    }

    pub fn fail_next_join(&self, error: SdkError) {
        lock(&self.state).fail_next_join = Some(error);
    }

    pub fn fail_next_leave(&self, error: SdkError) {
        lock(&self.state).fail_next_leave = Some(error);
    }

    pub fn is_joined(&self) -> bool {
        lock(&self.state).joined.is_some()
    }

    /// `(channel, uid)` of the current membership.
    pub fn membership(&self) -> Option<(String, String)> {
        lock(&self.state).joined.clone()
    }

    pub fn published_track_ids(&self) -> Vec<String> {
        lock(&self.state).published.clone()
    }

    pub fn publish_calls(&self) -> usize {
        lock(&self.state).publish_calls
    }

    pub fn subscribe_calls(&self) -> Vec<(String, MediaKind)> {
        lock(&self.state).subscribe_calls.clone()
    }

    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent_messages.clone()
    }

    /// Report a connection change the SDK noticed on its own, such as a
    /// network drop. Join and leave do not report anything through here.
    pub fn connection_change(&self, current: &str, previous: &str, reason: Option<&str>) {
        self.inject(SdkEvent::ConnectionStateChange {
            current: current.to_string(),
            previous: previous.to_string(),
            reason: reason.map(str::to_string),
        });
    }

    fn ensure_joined(state: &ClientState) -> Result<(), SdkError> {
        if state.joined.is_none() {
            return Err(SdkError::new("INVALID_OPERATION", "not in a channel"));
        }
        Ok(())
    }
}

#[async_trait]
impl RtcClient for LoopbackClient {
    async fn join(
        &self,
        app_id: &str,
        channel: &str,
        _token: Option<&str>,
        uid: &str,
    ) -> Result<(), SdkError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.fail_next_join.take() {
            return Err(err);
        }
        if app_id.is_empty() {
            return Err(SdkError::new("INVALID_PARAMS", "app id is empty"));
        }
        tracing::debug!(
            mode = ?self.config.mode,
            codec = ?self.config.codec,
            "loopback: {uid} joined {channel}"
        );
        state.joined = Some((channel.to_string(), uid.to_string()));
        Ok(())
    }

    async fn leave(&self) -> Result<(), SdkError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.fail_next_leave.take() {
            return Err(err);
        }
        state.published.clear();
        state.peers.clear();
        state.joined = None;
        Ok(())
    }

    async fn publish(&self, tracks: Vec<LocalTrack>) -> Result<(), SdkError> {
        let mut state = lock(&self.state);
        Self::ensure_joined(&state)?;
        state.publish_calls += 1;
        for track in tracks {
            let id = track.track_id().to_string();
            tracing::debug!(kind = ?track.kind(), "loopback: publishing {id}");
            if !state.published.contains(&id) {
                state.published.push(id);
            }
        }
        Ok(())
    }

    async fn unpublish(&self, tracks: Vec<LocalTrack>) -> Result<(), SdkError> {
        let mut state = lock(&self.state);
        Self::ensure_joined(&state)?;
        for track in tracks {
            state.published.retain(|id| id != track.track_id());
        }
        Ok(())
    }

    async fn subscribe(&self, uid: &str, media: MediaKind) -> Result<RemoteTrack, SdkError> {
        let mut state = lock(&self.state);
        state.subscribe_calls.push((uid.to_string(), media));
        let peer = state
            .peers
            .get(uid)
            .ok_or_else(|| SdkError::new("INVALID_REMOTE_USER", format!("{uid} is not in the channel")))?;
        let track = match media {
            MediaKind::Audio => peer
                .audio
                .clone()
                .map(|t| RemoteTrack::Audio(t as Arc<dyn RemoteAudioTrack>)),
            MediaKind::Video => peer
                .video
                .clone()
                .map(|t| RemoteTrack::Video(t as Arc<dyn RemoteVideoTrack>)),
        };
        track.ok_or_else(|| {
            SdkError::new(
                "REMOTE_USER_IS_NOT_PUBLISHED",
                format!("{uid} has not published {media:?}"),
            )
        })
    }

    fn remote_users(&self) -> Vec<RemoteUser> {
        lock(&self.state)
            .peers
            .iter()
            .map(|(uid, peer)| Self::remote_user(uid, peer))
            .collect()
    }

    async fn send_stream_message(&self, payload: Vec<u8>) -> Result<(), SdkError> {
        let mut state = lock(&self.state);
        Self::ensure_joined(&state)?;
        state.sent_messages.push(payload);
        Ok(())
    }
}

/// Loopback engine. Hands out [`LoopbackClient`]s and loopback local tracks,
/// and keeps them around for inspection.
#[derive(Default)]
pub struct LoopbackEngine {
    clients: Mutex<Vec<Arc<LoopbackClient>>>,
    audio_tracks: Mutex<Vec<Arc<LoopbackAudioTrack>>>,
    video_tracks: Mutex<Vec<Arc<LoopbackVideoTrack>>>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_client(&self) -> Option<Arc<LoopbackClient>> {
        lock(&self.clients).last().cloned()
    }

    pub fn client_count(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn last_audio_track(&self) -> Option<Arc<LoopbackAudioTrack>> {
        lock(&self.audio_tracks).last().cloned()
    }

    pub fn last_video_track(&self) -> Option<Arc<LoopbackVideoTrack>> {
        lock(&self.video_tracks).last().cloned()
    }
}

#[async_trait]
impl RtcEngine for LoopbackEngine {
    fn create_client(&self, config: &ClientConfig) -> (Arc<dyn RtcClient>, SdkEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(LoopbackClient::new(*config, tx));
        lock(&self.clients).push(client.clone());
        tracing::debug!(mode = ?config.mode, codec = ?config.codec, "loopback client created");
        (client, rx)
    }

    async fn create_microphone_audio_track(&self) -> Result<Arc<dyn LocalAudioTrack>, SdkError> {
        let track = Arc::new(LoopbackAudioTrack::new());
        lock(&self.audio_tracks).push(track.clone());
        Ok(track)
    }

    async fn create_camera_video_track(&self) -> Result<Arc<dyn LocalVideoTrack>, SdkError> {
        let track = Arc::new(LoopbackVideoTrack::new());
        lock(&self.video_tracks).push(track.clone());
        Ok(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (LoopbackClient, SdkEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LoopbackClient::new(ClientConfig::default(), tx), rx)
    }

    #[tokio::test]
    async fn join_records_membership() {
        let (client, mut rx) = client();
        client.join("app", "room", None, "me").await.unwrap();

        assert_eq!(client.membership(), Some(("room".into(), "me".into())));
        assert!(rx.try_recv().is_err());

        client.leave().await.unwrap();
        assert!(!client.is_joined());
    }

    #[tokio::test]
    async fn connection_change_is_delivered_raw() {
        let (client, mut rx) = client();
        client.connection_change("RECONNECTING", "CONNECTED", Some("NETWORK_ERROR"));

        match rx.try_recv().unwrap() {
            SdkEvent::ConnectionStateChange { current, previous, reason } => {
                assert_eq!(current, "RECONNECTING");
                assert_eq!(previous, "CONNECTED");
                assert_eq!(reason.as_deref(), Some("NETWORK_ERROR"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn injected_join_failure_is_consumed_once() {
        let (client, _rx) = client();
        client.fail_next_join(SdkError::new("CAN_NOT_GET_GATEWAY_SERVER", "boom"));

        let err = client.join("app", "room", None, "me").await.unwrap_err();
        assert_eq!(err.code, "CAN_NOT_GET_GATEWAY_SERVER");
        assert!(!client.is_joined());

        client.join("app", "room", None, "me").await.unwrap();
        assert!(client.is_joined());
    }

    #[tokio::test]
    async fn publish_requires_membership() {
        let (client, _rx) = client();
        let track: Arc<dyn LocalAudioTrack> = Arc::new(LoopbackAudioTrack::new());
        let err = client
            .publish(vec![LocalTrack::Audio(track)])
            .await
            .unwrap_err();
        assert_eq!(err.code, "INVALID_OPERATION");
    }

    #[tokio::test]
    async fn subscribe_returns_published_track() {
        let (client, _rx) = client();
        client.publish_remote("bob", MediaKind::Audio);

        let track = client.subscribe("bob", MediaKind::Audio).await.unwrap();
        assert!(matches!(track, RemoteTrack::Audio(_)));

        let err = client.subscribe("bob", MediaKind::Video).await.unwrap_err();
        assert_eq!(err.code, "REMOTE_USER_IS_NOT_PUBLISHED");
        assert_eq!(client.subscribe_calls().len(), 2);
    }

    #[tokio::test]
    async fn leave_forgets_remote_users() {
        let (client, _rx) = client();
        client.join("app", "room", None, "me").await.unwrap();
        client.publish_remote("bob", MediaKind::Audio);
        client.add_remote_user("carol");
        assert_eq!(client.remote_users().len(), 2);

        client.leave().await.unwrap();

        assert!(client.remote_users().is_empty());
        assert!(client.remote_audio_track("bob").is_none());
    }

    #[test]
    fn muted_track_reports_silence() {
        let track = LoopbackAudioTrack::new();
        track.set_level(0.7);
        assert!((track.volume_level() - 0.7).abs() < f32::EPSILON);
        track.muted.store(true, Ordering::SeqCst);
        assert_eq!(track.volume_level(), 0.0);
    }

    #[test]
    fn remote_user_list_reflects_published_media() {
        let (client, _rx) = client();
        client.publish_remote("bob", MediaKind::Video);
        client.add_remote_user("carol");

        let users = client.remote_users();
        assert_eq!(users.len(), 2);
        assert!(users[0].has_video && !users[0].has_audio);
        assert_eq!(users[1], RemoteUser::new("carol"));
    }
}
