use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::events::{EventEmitter, SessionEvent};
use crate::sdk::RemoteAudioTrack;
use crate::ticker::Ticker;

/// One rendering frame at 60 fps.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Per-track playback-position relays.
///
/// Each subscribed remote audio track gets a relay that reports the track's
/// received-frame counter as `AudioPosition` once per frame. A relay lives
/// exactly as long as the subscription: it is stopped when the track is
/// unpublished, its user leaves, or the session leaves.
pub struct PositionRelays {
    emitter: EventEmitter,
    relays: Mutex<HashMap<String, Ticker>>,
}

impl PositionRelays {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            emitter,
            relays: Mutex::new(HashMap::new()),
        }
    }

    /// Start relaying `track` for `uid`, replacing any previous relay.
    pub fn start(&self, uid: &str, track: Arc<dyn RemoteAudioTrack>) {
        let relay_uid = uid.to_string();
        let ticker = Ticker::spawn(FRAME_INTERVAL, self.emitter.clone(), move || {
            let event = SessionEvent::AudioPosition {
                uid: relay_uid.clone(),
                frames: track.stats().received_frames,
            };
            async move { Some(event) }
        });
        let previous = self
            .relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uid.to_string(), ticker);
        if let Some(previous) = previous {
            previous.stop();
        }
        tracing::debug!("position relay started for {uid}");
    }

    pub fn stop(&self, uid: &str) -> bool {
        let relay = self
            .relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uid);
        match relay {
            Some(relay) => {
                relay.stop();
                tracing::debug!("position relay stopped for {uid}");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let relays: Vec<_> = self
            .relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, relay) in relays {
            relay.stop();
        }
    }

    pub fn is_active(&self, uid: &str) -> bool {
        self.relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(uid)
    }

    pub fn active_count(&self) -> usize {
        self.relays.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
