//! Huddle core session logic.
//!
//! Wraps a real-time audio/video SDK behind a caller-owned [`Session`]:
//! channel membership, local tracks, remote subscriptions, and a typed
//! [`SessionEvent`] stream for UI listeners.

pub mod config;
pub mod connection;
pub mod errors;
pub mod events;
pub mod participants;
pub mod position;
pub mod sdk;
pub mod session;
mod ticker;
mod translate;
pub mod volume;

pub use config::{SessionConfig, SubscriptionPolicy};
pub use connection::ConnectionStateCell;
pub use errors::SessionError;
pub use events::{
    ConnectionState, MediaKind, NetworkQuality, ParticipantInfo, QualityLevel, SessionEvent,
    SessionEventListener, VolumeSample,
};
pub use session::{Session, SessionSlot};
