use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::events::{EventEmitter, SessionEvent, VolumeSample};
use crate::participants::RemoteTracks;
use crate::sdk::LocalAudioTrack;
use crate::ticker::Ticker;

/// Sampling period of the volume indicator.
pub const VOLUME_INTERVAL: Duration = Duration::from_millis(200);

/// Tracks the poller reads levels from.
#[derive(Clone)]
pub(crate) struct VolumeSources {
    pub local_uid: String,
    pub local_audio: Arc<tokio::sync::Mutex<Option<Arc<dyn LocalAudioTrack>>>>,
    pub remote: Arc<tokio::sync::Mutex<RemoteTracks>>,
}

impl VolumeSources {
    async fn sample(&self) -> Vec<VolumeSample> {
        let mut samples = Vec::new();
        if let Some(track) = self.local_audio.lock().await.as_ref() {
            samples.push(VolumeSample {
                uid: self.local_uid.clone(),
                level: track.volume_level().clamp(0.0, 1.0),
            });
        }
        let remote = self.remote.lock().await;
        let mut remote_samples: Vec<VolumeSample> = remote
            .audio_tracks()
            .map(|(uid, track)| VolumeSample {
                uid: uid.to_string(),
                level: track.volume_level().clamp(0.0, 1.0),
            })
            .collect();
        remote_samples.sort_by(|a, b| a.uid.cmp(&b.uid));
        samples.extend(remote_samples);
        samples
    }
}

/// Emits a `VolumeIndicator` batch every [`VOLUME_INTERVAL`] while running.
pub struct VolumePoller {
    emitter: EventEmitter,
    ticker: Mutex<Option<Ticker>>,
}

impl VolumePoller {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            emitter,
            ticker: Mutex::new(None),
        }
    }

    /// Start polling. Returns `false` if a poller is already running.
    pub(crate) fn start(&self, sources: VolumeSources) -> bool {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_some() {
            return false;
        }
        *ticker = Some(Ticker::spawn(VOLUME_INTERVAL, self.emitter.clone(), move || {
            let sources = sources.clone();
            async move {
                let samples = sources.sample().await;
                if samples.is_empty() {
                    None
                } else {
                    Some(SessionEvent::VolumeIndicator(samples))
                }
            }
        }));
        tracing::debug!("volume poller started");
        true
    }

    /// Stop polling. Returns `false` if nothing was running.
    pub fn stop(&self) -> bool {
        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match ticker {
            Some(ticker) => {
                ticker.stop();
                tracing::debug!("volume poller stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::EventCapture;
    use crate::sdk::{AudioTrackStats, RemoteAudioTrack};

    #[derive(Debug)]
    struct FixedRemote(f32);

    impl RemoteAudioTrack for FixedRemote {
        fn track_id(&self) -> &str {
            "remote"
        }
        fn volume_level(&self) -> f32 {
            self.0
        }
        fn stats(&self) -> AudioTrackStats {
            AudioTrackStats::default()
        }
        fn play(&self) {}
        fn stop(&self) {}
    }

    fn sources(remote: RemoteTracks) -> VolumeSources {
        VolumeSources {
            local_uid: "me".into(),
            local_audio: Arc::new(tokio::sync::Mutex::new(None)),
            remote: Arc::new(tokio::sync::Mutex::new(remote)),
        }
    }

    fn is_volume(event: &SessionEvent) -> bool {
        matches!(event, SessionEvent::VolumeIndicator(_))
    }

    #[tokio::test]
    async fn samples_are_clamped_and_ordered() {
        let mut remote = RemoteTracks::new();
        remote.insert_audio("b", Arc::new(FixedRemote(3.0)));
        remote.insert_audio("a", Arc::new(FixedRemote(0.25)));

        let samples = sources(remote).sample().await;
        assert_eq!(
            samples,
            vec![
                VolumeSample { uid: "a".into(), level: 0.25 },
                VolumeSample { uid: "b".into(), level: 1.0 },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let emitter = EventEmitter::new();
        let capture = Arc::new(EventCapture::default());
        emitter.add_listener(capture.clone());
        let mut remote = RemoteTracks::new();
        remote.insert_audio("a", Arc::new(FixedRemote(0.5)));
        let sources = sources(remote);

        let poller = VolumePoller::new(emitter);
        assert!(poller.start(sources.clone()));
        assert!(!poller.start(sources));
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(capture.count(is_volume), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_emitted_without_tracks() {
        let emitter = EventEmitter::new();
        let capture = Arc::new(EventCapture::default());
        emitter.add_listener(capture.clone());

        let poller = VolumePoller::new(emitter);
        poller.start(sources(RemoteTracks::new()));
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert!(capture.events().is_empty());
        assert!(poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_poller() {
        let emitter = EventEmitter::new();
        let capture = Arc::new(EventCapture::default());
        emitter.add_listener(capture.clone());
        let mut remote = RemoteTracks::new();
        remote.insert_audio("a", Arc::new(FixedRemote(0.5)));

        let poller = VolumePoller::new(emitter);
        poller.start(sources(remote));
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert!(poller.stop());
        let seen = capture.count(is_volume);
        assert_eq!(seen, 2);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(capture.count(is_volume), seen);
        assert!(!poller.stop());
    }
}
