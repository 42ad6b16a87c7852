use std::sync::{Arc, PoisonError, RwLock};

/// Events emitted by the session to UI listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A remote track was published and, policy permitting, subscribed.
    UserPublished { uid: String, media: MediaKind },
    UserUnpublished { uid: String, media: MediaKind },
    UserJoined { uid: String },
    UserLeft { uid: String, reason: String },
    ConnectionStateChanged {
        previous: ConnectionState,
        current: ConnectionState,
    },
    NetworkQuality(NetworkQuality),
    StreamMessage { uid: String, payload: Vec<u8> },
    VolumeIndicator(Vec<VolumeSample>),
    /// Cumulative received-frame count of a remote audio track.
    AudioPosition { uid: String, frames: u64 },
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityLevel {
    Unknown,
    Excellent,
    Good,
    Poor,
    Bad,
    VeryBad,
    Down,
}

impl QualityLevel {
    /// Map the SDK's 0..=6 scale. Anything out of range is `Unknown`.
    pub fn from_sdk(value: u8) -> Self {
        match value {
            1 => Self::Excellent,
            2 => Self::Good,
            3 => Self::Poor,
            4 => Self::Bad,
            5 => Self::VeryBad,
            6 => Self::Down,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkQuality {
    pub uplink: QualityLevel,
    pub downlink: QualityLevel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSample {
    pub uid: String,
    pub level: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub uid: String,
    pub has_audio: bool,
    pub has_video: bool,
}

/// Trait for receiving events from the session.
/// Implementations must be Send + Sync (called from tokio tasks).
///
/// `on_event` runs synchronously on a runtime worker, and periodic events
/// are delivered while their timer's stop lock is held. It must not block:
/// hand the event off to a channel or the UI thread instead.
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
