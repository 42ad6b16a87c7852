use std::sync::Arc;
use tokio::sync::Mutex;

use crate::events::{ConnectionState, EventEmitter, SessionEvent};

impl ConnectionState {
    /// Map an SDK connection-state string. Unknown strings are `Disconnected`.
    pub fn from_sdk(state: &str) -> Self {
        match state {
            "CONNECTING" => Self::Connecting,
            "CONNECTED" => Self::Connected,
            "RECONNECTING" => Self::Reconnecting,
            "FAILED" => Self::Failed,
            "DISCONNECTED" | "DISCONNECTING" => Self::Disconnected,
            other => {
                tracing::debug!("unknown sdk connection state {other:?}, treating as disconnected");
                Self::Disconnected
            }
        }
    }
}

/// The session's connection state and the only way to change it.
///
/// Every effective change emits `ConnectionStateChanged`; setting the current
/// value again is a no-op.
#[derive(Clone)]
pub struct ConnectionStateCell {
    state: Arc<Mutex<ConnectionState>>,
    emitter: EventEmitter,
}

impl ConnectionStateCell {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            emitter,
        }
    }

    pub async fn get(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// Returns `true` if the state actually changed.
    pub async fn set(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock().await;
        if *state == next {
            return false;
        }
        let previous = std::mem::replace(&mut *state, next);
        tracing::info!("connection state {previous:?} -> {next:?}");
        // Emit under the lock so listeners observe transitions in order.
        self.emitter.emit(SessionEvent::ConnectionStateChanged {
            previous,
            current: next,
        });
        true
    }
}
