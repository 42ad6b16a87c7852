use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{SessionConfig, SubscriptionPolicy};
use crate::connection::ConnectionStateCell;
use crate::errors::SessionError;
use crate::events::{
    ConnectionState, EventEmitter, ParticipantInfo, SessionEvent, SessionEventListener,
};
use crate::participants::RemoteTracks;
use crate::position::PositionRelays;
use crate::sdk::{
    LocalAudioTrack, LocalTrack, LocalVideoTrack, RemoteAudioTrack, RemoteVideoTrack, RtcClient,
    RtcEngine,
};
use crate::translate::EventTranslator;
use crate::volume::{VolumePoller, VolumeSources};

/// One channel membership over an SDK client.
///
/// Call [`initialize`](Self::initialize) once, then create local tracks,
/// [`join`](Self::join), publish, and finally [`leave`](Self::leave). The
/// session can join again after leaving.
pub struct Session {
    engine: Arc<dyn RtcEngine>,
    config: OnceLock<SessionConfig>,
    client: Arc<Mutex<Option<Arc<dyn RtcClient>>>>,
    emitter: EventEmitter,
    state: ConnectionStateCell,
    local_audio: Arc<Mutex<Option<Arc<dyn LocalAudioTrack>>>>,
    local_video: Arc<Mutex<Option<Arc<dyn LocalVideoTrack>>>>,
    remote: Arc<Mutex<RemoteTracks>>,
    volume: VolumePoller,
    relays: Arc<PositionRelays>,
    /// Bumped on every leave; see `EventTranslator`.
    epoch: Arc<AtomicU64>,
    event_loop: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(engine: Arc<dyn RtcEngine>) -> Self {
        let emitter = EventEmitter::new();
        Self {
            engine,
            config: OnceLock::new(),
            client: Arc::new(Mutex::new(None)),
            state: ConnectionStateCell::new(emitter.clone()),
            local_audio: Arc::new(Mutex::new(None)),
            local_video: Arc::new(Mutex::new(None)),
            remote: Arc::new(Mutex::new(RemoteTracks::new())),
            volume: VolumePoller::new(emitter.clone()),
            relays: Arc::new(PositionRelays::new(emitter.clone())),
            epoch: Arc::new(AtomicU64::new(0)),
            event_loop: std::sync::Mutex::new(None),
            emitter,
        }
    }

    /// Register a listener for session events.
    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.emitter.add_listener(listener);
    }

    /// Store the config, create the SDK client and start translating its
    /// callbacks. Can only be called once per session.
    pub async fn initialize(
        &self,
        config: SessionConfig,
        policy: SubscriptionPolicy,
    ) -> Result<(), SessionError> {
        config.validate()?;
        let config = config.resolved();
        let client_config = config.client;
        self.config
            .set(config)
            .map_err(|_| SessionError::AlreadyInitialized)?;

        let (client, events) = self.engine.create_client(&client_config);
        let translator = EventTranslator {
            client: client.clone(),
            emitter: self.emitter.clone(),
            policy,
            state: self.state.clone(),
            remote: self.remote.clone(),
            relays: self.relays.clone(),
            epoch: self.epoch.clone(),
        };
        let handle = tokio::spawn(translator.run(events));
        *self.event_loop.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        *self.client.lock().await = Some(client);

        tracing::info!(
            "session initialized: channel={} uid={}",
            self.config().map(|c| c.channel.as_str()).unwrap_or_default(),
            self.local_uid().unwrap_or_default()
        );
        Ok(())
    }

    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.get()
    }

    /// Local participant uid, available once initialized.
    pub fn local_uid(&self) -> Option<&str> {
        self.config.get().and_then(|c| c.uid.as_deref())
    }

    pub fn is_initialized(&self) -> bool {
        self.config.get().is_some()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.get().await
    }

    async fn client(&self) -> Result<Arc<dyn RtcClient>, SessionError> {
        self.client
            .lock()
            .await
            .clone()
            .ok_or(SessionError::NotInitialized)
    }

    async fn audio_track(&self) -> Result<Arc<dyn LocalAudioTrack>, SessionError> {
        self.local_audio
            .lock()
            .await
            .clone()
            .ok_or(SessionError::NoLocalAudioTrack)
    }

    async fn video_track(&self) -> Result<Arc<dyn LocalVideoTrack>, SessionError> {
        self.local_video
            .lock()
            .await
            .clone()
            .ok_or(SessionError::NoLocalVideoTrack)
    }

    /// Create the microphone track unless one already exists.
    pub async fn create_local_audio_track(&self) -> Result<Arc<dyn LocalAudioTrack>, SessionError> {
        self.client().await?;
        let mut slot = self.local_audio.lock().await;
        if let Some(track) = slot.as_ref() {
            return Ok(track.clone());
        }
        let track = self.engine.create_microphone_audio_track().await?;
        tracing::info!("local audio track created: {}", track.track_id());
        *slot = Some(track.clone());
        Ok(track)
    }

    /// Create the camera track unless one already exists.
    pub async fn create_local_video_track(&self) -> Result<Arc<dyn LocalVideoTrack>, SessionError> {
        self.client().await?;
        let mut slot = self.local_video.lock().await;
        if let Some(track) = slot.as_ref() {
            return Ok(track.clone());
        }
        let track = self.engine.create_camera_video_track().await?;
        tracing::info!("local video track created: {}", track.track_id());
        *slot = Some(track.clone());
        Ok(track)
    }

    pub async fn local_audio_track(&self) -> Option<Arc<dyn LocalAudioTrack>> {
        self.local_audio.lock().await.clone()
    }

    pub async fn local_video_track(&self) -> Option<Arc<dyn LocalVideoTrack>> {
        self.local_video.lock().await.clone()
    }

    /// Join the configured channel.
    ///
    /// On failure the state becomes `Failed`, an `Error` event is emitted and
    /// the SDK error is returned.
    pub async fn join(&self) -> Result<(), SessionError> {
        let client = self.client().await?;
        let config = self.config().ok_or(SessionError::NotInitialized)?;
        let uid = config.uid.as_deref().unwrap_or_default();

        self.state.set(ConnectionState::Connecting).await;
        match client
            .join(&config.app_id, &config.channel, config.token.as_deref(), uid)
            .await
        {
            Ok(()) => {
                tracing::info!("joined channel {} as {uid}", config.channel);
                self.state.set(ConnectionState::Connected).await;
                Ok(())
            }
            Err(e) => {
                tracing::error!("failed to join channel {}: {e}", config.channel);
                self.state.set(ConnectionState::Failed).await;
                self.emitter
                    .emit(SessionEvent::Error(format!("join failed: {e}")));
                Err(SessionError::Join(e))
            }
        }
    }

    /// Publish the local audio track and start the volume indicator.
    pub async fn publish_local_audio(&self) -> Result<(), SessionError> {
        let client = self.client().await?;
        let track = self.audio_track().await?;
        client.publish(vec![LocalTrack::Audio(track)]).await?;
        tracing::info!("local audio published");
        self.volume.start(VolumeSources {
            local_uid: self.local_uid().unwrap_or_default().to_string(),
            local_audio: self.local_audio.clone(),
            remote: self.remote.clone(),
        });
        Ok(())
    }

    /// Stop the volume indicator and unpublish the local audio track.
    pub async fn unpublish_local_audio(&self) -> Result<(), SessionError> {
        let client = self.client().await?;
        let track = self.audio_track().await?;
        self.volume.stop();
        client.unpublish(vec![LocalTrack::Audio(track)]).await?;
        tracing::info!("local audio unpublished");
        Ok(())
    }

    pub async fn publish_local_video(&self) -> Result<(), SessionError> {
        let client = self.client().await?;
        let track = self.video_track().await?;
        client.publish(vec![LocalTrack::Video(track)]).await?;
        tracing::info!("local video published");
        Ok(())
    }

    pub async fn unpublish_local_video(&self) -> Result<(), SessionError> {
        let client = self.client().await?;
        let track = self.video_track().await?;
        client.unpublish(vec![LocalTrack::Video(track)]).await?;
        tracing::info!("local video unpublished");
        Ok(())
    }

    /// Leave the channel and release all local media.
    ///
    /// Local tracks are released and the state is reset to `Disconnected`
    /// whether or not the SDK leave succeeds; its error is returned after.
    /// Remote subscriptions still in flight are discarded when they complete.
    pub async fn leave(&self) -> Result<(), SessionError> {
        self.volume.stop();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        {
            let mut remote = self.remote.lock().await;
            self.relays.stop_all();
            remote.clear();
        }

        if let Some(track) = self.local_audio.lock().await.take() {
            track.stop();
            track.close();
        }
        if let Some(track) = self.local_video.lock().await.take() {
            track.stop();
            track.close();
        }

        let client = self.client.lock().await.clone();
        let result = match client {
            Some(client) => client.leave().await,
            None => Ok(()),
        };
        self.state.set(ConnectionState::Disconnected).await;

        match result {
            Ok(()) => {
                tracing::info!("left channel");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("sdk leave failed: {e}");
                Err(SessionError::Sdk(e))
            }
        }
    }

    pub async fn mute_audio(&self) -> Result<(), SessionError> {
        self.audio_track().await?.set_muted(true).await?;
        tracing::info!("local audio muted");
        Ok(())
    }

    pub async fn unmute_audio(&self) -> Result<(), SessionError> {
        self.audio_track().await?.set_muted(false).await?;
        tracing::info!("local audio unmuted");
        Ok(())
    }

    pub async fn enable_video(&self) -> Result<(), SessionError> {
        self.video_track().await?.set_enabled(true).await?;
        tracing::info!("local video enabled");
        Ok(())
    }

    pub async fn disable_video(&self) -> Result<(), SessionError> {
        self.video_track().await?.set_enabled(false).await?;
        tracing::info!("local video disabled");
        Ok(())
    }

    /// Snapshot of the remote users the SDK currently knows about.
    pub async fn remote_participants(&self) -> Vec<ParticipantInfo> {
        match self.client.lock().await.as_ref() {
            Some(client) => client
                .remote_users()
                .iter()
                .map(ParticipantInfo::from)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Subscribed remote audio track of `uid`, if any.
    pub async fn remote_audio_track(&self, uid: &str) -> Option<Arc<dyn RemoteAudioTrack>> {
        self.remote.lock().await.audio(uid)
    }

    /// Subscribed remote video track of `uid`, for rendering.
    pub async fn remote_video_track(&self, uid: &str) -> Option<Arc<dyn RemoteVideoTrack>> {
        self.remote.lock().await.video(uid)
    }

    /// Send a data-stream message to the channel.
    pub async fn send_stream_message(&self, payload: impl Into<Vec<u8>>) -> Result<(), SessionError> {
        let client = self.client().await?;
        client.send_stream_message(payload.into()).await?;
        Ok(())
    }

    pub fn is_volume_indicator_running(&self) -> bool {
        self.volume.is_running()
    }

    /// Leave (if initialized) and stop translating SDK callbacks.
    pub async fn shutdown(&self) {
        if self.is_initialized() {
            if let Err(e) = self.leave().await {
                tracing::warn!("leave during shutdown failed: {e}");
            }
        }
        let handle = self
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        tracing::info!("session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let handle = self
            .event_loop
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Caller-owned holder of the current session.
///
/// [`get`](Self::get) returns the same session until [`destroy`](Self::destroy)
/// is called; the next `get` then builds a fresh one.
pub struct SessionSlot {
    engine: Arc<dyn RtcEngine>,
    current: Mutex<Option<Arc<Session>>>,
}

impl SessionSlot {
    pub fn new(engine: Arc<dyn RtcEngine>) -> Self {
        Self {
            engine,
            current: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Arc<Session> {
        let mut current = self.current.lock().await;
        current
            .get_or_insert_with(|| Arc::new(Session::new(self.engine.clone())))
            .clone()
    }

    /// Shut down and forget the current session. Returns `false` if there was
    /// none.
    pub async fn destroy(&self) -> bool {
        let session = self.current.lock().await.take();
        match session {
            Some(session) => {
                session.shutdown().await;
                true
            }
            None => false,
        }
    }

    pub async fn is_live(&self) -> bool {
        self.current.lock().await.is_some()
    }
}
