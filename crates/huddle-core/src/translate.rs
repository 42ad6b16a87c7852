use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::config::SubscriptionPolicy;
use crate::connection::ConnectionStateCell;
use crate::events::{
    ConnectionState, EventEmitter, MediaKind, NetworkQuality, QualityLevel, SessionEvent,
};
use crate::participants::RemoteTracks;
use crate::position::PositionRelays;
use crate::sdk::{RemoteTrack, RemoteUser, RtcClient, SdkEvent, SdkEventReceiver};

/// Turns raw SDK callbacks into [`SessionEvent`]s.
///
/// Owns the remote side of the session: subscriptions, the subscribed track
/// registry and the playback-position relays of remote audio.
///
/// `epoch` is bumped by the session on every leave. A subscription that
/// completes under a different epoch than it started in is dropped.
pub(crate) struct EventTranslator {
    pub client: Arc<dyn RtcClient>,
    pub emitter: EventEmitter,
    pub policy: SubscriptionPolicy,
    pub state: ConnectionStateCell,
    pub remote: Arc<Mutex<RemoteTracks>>,
    pub relays: Arc<PositionRelays>,
    pub epoch: Arc<AtomicU64>,
}

impl EventTranslator {
    pub async fn run(self, mut events: SdkEventReceiver) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        tracing::info!("sdk event loop ended");
    }

    pub async fn handle(&self, event: SdkEvent) {
        match event {
            SdkEvent::UserPublished { user, media } => {
                self.on_user_published(user, media).await;
            }

            SdkEvent::UserUnpublished { user, media } => {
                if !self.detach(&user.uid, media).await {
                    tracing::debug!("{} unpublished {media:?} we never subscribed to", user.uid);
                    return;
                }
                self.emitter.emit(SessionEvent::UserUnpublished {
                    uid: user.uid,
                    media,
                });
            }

            SdkEvent::UserJoined { user } => {
                tracing::info!("user joined: {}", user.uid);
                self.emitter.emit(SessionEvent::UserJoined { uid: user.uid });
            }

            SdkEvent::UserLeft { user, reason } => {
                tracing::info!("user left: {} ({reason})", user.uid);
                self.detach(&user.uid, MediaKind::Audio).await;
                self.detach(&user.uid, MediaKind::Video).await;
                self.emitter.emit(SessionEvent::UserLeft {
                    uid: user.uid,
                    reason,
                });
            }

            SdkEvent::ConnectionStateChange {
                current,
                previous,
                reason,
            } => {
                tracing::debug!("sdk connection state {previous} -> {current} (reason: {reason:?})");
                self.state.set(ConnectionState::from_sdk(&current)).await;
            }

            SdkEvent::NetworkQuality { uplink, downlink } => {
                self.emitter.emit(SessionEvent::NetworkQuality(NetworkQuality {
                    uplink: QualityLevel::from_sdk(uplink),
                    downlink: QualityLevel::from_sdk(downlink),
                }));
            }

            SdkEvent::StreamMessage { uid, payload } => {
                tracing::debug!("stream message from {uid}: {} bytes", payload.len());
                self.emitter.emit(SessionEvent::StreamMessage { uid, payload });
            }

            SdkEvent::Exception { code, message, uid } => {
                tracing::warn!("sdk exception {code}: {message} (uid: {uid:?})");
                let text = match uid {
                    Some(uid) => format!("sdk exception {code} for {uid}: {message}"),
                    None => format!("sdk exception {code}: {message}"),
                };
                self.emitter.emit(SessionEvent::Error(text));
            }
        }
    }

    async fn on_user_published(&self, user: RemoteUser, media: MediaKind) {
        if !self.policy.allows(&user, media) {
            tracing::debug!("not subscribing to {} {media:?}: filtered by policy", user.uid);
            return;
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let track = match self.client.subscribe(&user.uid, media).await {
            Ok(track) => track,
            Err(e) => {
                tracing::warn!("subscribe to {} {media:?} failed: {e}", user.uid);
                self.emitter.emit(SessionEvent::Error(format!(
                    "subscribe to {} {media:?} failed: {e}",
                    user.uid
                )));
                return;
            }
        };

        // leave() bumps the epoch before it takes this lock to clear.
        let mut remote = self.remote.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!("dropping {} {media:?}: session left while subscribing", user.uid);
            track.stop();
            return;
        }
        match track {
            RemoteTrack::Audio(audio) => {
                audio.play();
                self.relays.start(&user.uid, audio.clone());
                if let Some(old) = remote.insert_audio(&user.uid, audio) {
                    old.stop();
                }
            }
            RemoteTrack::Video(video) => {
                if let Some(old) = remote.insert_video(&user.uid, video) {
                    old.stop();
                }
            }
        }
        drop(remote);

        tracing::info!("subscribed to {} {media:?}", user.uid);
        self.emitter.emit(SessionEvent::UserPublished {
            uid: user.uid,
            media,
        });
    }

    /// Drop the subscribed track of `uid`. Returns `false` if there was none.
    async fn detach(&self, uid: &str, media: MediaKind) -> bool {
        match media {
            MediaKind::Audio => {
                self.relays.stop(uid);
                let track = self.remote.lock().await.remove_audio(uid);
                track.inspect(|t| t.stop()).is_some()
            }
            MediaKind::Video => {
                let track = self.remote.lock().await.remove_video(uid);
                track.inspect(|t| t.stop()).is_some()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::EventCapture;
    use crate::sdk::loopback::LoopbackEngine;
    use crate::sdk::{ClientConfig, RtcEngine};
    use std::time::Duration;

    struct Harness {
        translator: EventTranslator,
        capture: Arc<EventCapture>,
        engine: LoopbackEngine,
        _events: SdkEventReceiver,
    }

    fn harness(policy: SubscriptionPolicy) -> Harness {
        let engine = LoopbackEngine::new();
        let (client, events) = engine.create_client(&ClientConfig::default());
        let emitter = EventEmitter::new();
        let capture = Arc::new(EventCapture::default());
        emitter.add_listener(capture.clone());
        let translator = EventTranslator {
            client,
            emitter: emitter.clone(),
            policy,
            state: ConnectionStateCell::new(emitter.clone()),
            remote: Arc::new(Mutex::new(RemoteTracks::new())),
            relays: Arc::new(PositionRelays::new(emitter)),
            epoch: Arc::new(AtomicU64::new(0)),
        };
        Harness {
            translator,
            capture,
            engine,
            _events: events,
        }
    }

    fn published(user: &str, media: MediaKind) -> SdkEvent {
        SdkEvent::UserPublished {
            user: RemoteUser {
                uid: user.into(),
                has_audio: media == MediaKind::Audio,
                has_video: media == MediaKind::Video,
            },
            media,
        }
    }

    #[tokio::test]
    async fn published_audio_is_subscribed_and_played() {
        let h = harness(SubscriptionPolicy::allow_all());
        let client = h.engine.last_client().unwrap();
        client.publish_remote("bob", MediaKind::Audio);

        h.translator.handle(published("bob", MediaKind::Audio)).await;

        assert_eq!(client.subscribe_calls(), vec![("bob".to_string(), MediaKind::Audio)]);
        assert!(client.remote_audio_track("bob").unwrap().is_playing());
        assert!(h.translator.remote.lock().await.audio("bob").is_some());
        assert!(h.translator.relays.is_active("bob"));
        assert_eq!(
            h.capture.events(),
            vec![SessionEvent::UserPublished {
                uid: "bob".into(),
                media: MediaKind::Audio
            }]
        );
    }

    #[tokio::test]
    async fn filtered_publication_is_ignored() {
        let h = harness(SubscriptionPolicy::allow_all().with_audio(|u| u.uid != "bob"));
        let client = h.engine.last_client().unwrap();
        client.publish_remote("bob", MediaKind::Audio);
        client.publish_remote("bob", MediaKind::Video);

        h.translator.handle(published("bob", MediaKind::Audio)).await;
        h.translator.handle(published("bob", MediaKind::Video)).await;
        h.translator
            .handle(SdkEvent::UserUnpublished {
                user: RemoteUser::new("bob"),
                media: MediaKind::Audio,
            })
            .await;

        assert_eq!(client.subscribe_calls(), vec![("bob".to_string(), MediaKind::Video)]);
        assert_eq!(
            h.capture.events(),
            vec![SessionEvent::UserPublished {
                uid: "bob".into(),
                media: MediaKind::Video
            }]
        );
    }

    #[tokio::test]
    async fn failed_subscription_emits_error_only() {
        let h = harness(SubscriptionPolicy::allow_all());

        // nobody published anything on the loopback side
        h.translator.handle(published("ghost", MediaKind::Video)).await;

        let events = h.capture.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SessionEvent::Error(msg) if msg.contains("ghost")));
    }

    #[tokio::test(start_paused = true)]
    async fn unpublish_stops_position_relay() {
        let h = harness(SubscriptionPolicy::allow_all());
        let client = h.engine.last_client().unwrap();
        client.publish_remote("bob", MediaKind::Audio);
        h.translator.handle(published("bob", MediaKind::Audio)).await;

        h.translator
            .handle(SdkEvent::UserUnpublished {
                user: RemoteUser::new("bob"),
                media: MediaKind::Audio,
            })
            .await;

        assert!(!h.translator.relays.is_active("bob"));
        assert!(!client.remote_audio_track("bob").is_some_and(|t| t.is_playing()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        let positions = h
            .capture
            .count(|e| matches!(e, SessionEvent::AudioPosition { .. }));
        assert_eq!(positions, 0);
    }

    #[tokio::test]
    async fn user_left_drops_all_tracks() {
        let h = harness(SubscriptionPolicy::allow_all());
        let client = h.engine.last_client().unwrap();
        client.publish_remote("bob", MediaKind::Audio);
        client.publish_remote("bob", MediaKind::Video);
        h.translator.handle(published("bob", MediaKind::Audio)).await;
        h.translator.handle(published("bob", MediaKind::Video)).await;
        let video = client.remote_video_track("bob").unwrap();

        h.translator
            .handle(SdkEvent::UserLeft {
                user: RemoteUser::new("bob"),
                reason: "Quit".into(),
            })
            .await;

        assert!(h.translator.remote.lock().await.is_empty());
        assert!(video.is_stopped());
        assert!(matches!(
            h.capture.events().last(),
            Some(SessionEvent::UserLeft { uid, reason }) if uid == "bob" && reason == "Quit"
        ));
    }

    #[tokio::test]
    async fn connection_strings_are_mapped_and_deduplicated() {
        let h = harness(SubscriptionPolicy::allow_all());
        for current in ["CONNECTING", "CONNECTED", "CONNECTED", "SOMETHING_NEW"] {
            h.translator
                .handle(SdkEvent::ConnectionStateChange {
                    current: current.into(),
                    previous: String::new(),
                    reason: None,
                })
                .await;
        }

        let currents: Vec<ConnectionState> = h
            .capture
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::ConnectionStateChanged { current, .. } => Some(current),
                _ => None,
            })
            .collect();
        assert_eq!(
            currents,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected,
            ]
        );
    }

    #[tokio::test]
    async fn passthrough_events_are_reshaped() {
        let h = harness(SubscriptionPolicy::allow_all());
        h.translator
            .handle(SdkEvent::NetworkQuality { uplink: 1, downlink: 4 })
            .await;
        h.translator
            .handle(SdkEvent::StreamMessage {
                uid: "bob".into(),
                payload: b"hi".to_vec(),
            })
            .await;
        h.translator
            .handle(SdkEvent::Exception {
                code: 2001,
                message: "AUDIO_INPUT_LEVEL_TOO_LOW".into(),
                uid: None,
            })
            .await;
        h.translator
            .handle(SdkEvent::UserJoined {
                user: RemoteUser::new("carol"),
            })
            .await;

        assert_eq!(
            h.capture.events(),
            vec![
                SessionEvent::NetworkQuality(NetworkQuality {
                    uplink: QualityLevel::Excellent,
                    downlink: QualityLevel::Bad,
                }),
                SessionEvent::StreamMessage {
                    uid: "bob".into(),
                    payload: b"hi".to_vec(),
                },
                SessionEvent::Error("sdk exception 2001: AUDIO_INPUT_LEVEL_TOO_LOW".into()),
                SessionEvent::UserJoined { uid: "carol".into() },
            ]
        );
    }

    #[tokio::test]
    async fn run_ends_when_sdk_drops_sender() {
        let h = harness(SubscriptionPolicy::allow_all());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(SdkEvent::UserJoined {
            user: RemoteUser::new("dave"),
        })
        .unwrap();
        drop(tx);

        h.translator.run(rx).await;
        assert_eq!(
            h.capture.events(),
            vec![SessionEvent::UserJoined { uid: "dave".into() }]
        );
    }
}
