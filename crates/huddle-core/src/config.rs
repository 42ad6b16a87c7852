use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::events::MediaKind;
use crate::sdk::{ClientConfig, RemoteUser};

/// Channel identity and join credentials. Fixed once the session is
/// initialized.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub app_id: String,
    pub channel: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Local participant uid. Generated at initialize when absent.
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub client: ClientConfig,
}

impl SessionConfig {
    pub fn new(app_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            channel: channel.into(),
            token: None,
            uid: None,
            client: ClientConfig::default(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, SessionError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.app_id.trim().is_empty() {
            return Err(SessionError::Config("app_id must not be empty".into()));
        }
        if self.channel.trim().is_empty() {
            return Err(SessionError::Config("channel must not be empty".into()));
        }
        if self.uid.as_deref().is_some_and(|uid| uid.trim().is_empty()) {
            return Err(SessionError::Config("uid must not be blank".into()));
        }
        Ok(())
    }

    /// Copy of this config with a uid, generating one if needed.
    pub(crate) fn resolved(mut self) -> Self {
        if self.uid.is_none() {
            self.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        self
    }
}

pub type SubscribePredicate = Arc<dyn Fn(&RemoteUser) -> bool + Send + Sync>;

/// Decides which published remote tracks get subscribed.
///
/// Each media kind has an optional predicate; a missing predicate allows.
#[derive(Clone, Default)]
pub struct SubscriptionPolicy {
    audio: Option<SubscribePredicate>,
    video: Option<SubscribePredicate>,
}

impl SubscriptionPolicy {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn with_audio(mut self, predicate: impl Fn(&RemoteUser) -> bool + Send + Sync + 'static) -> Self {
        self.audio = Some(Arc::new(predicate));
        self
    }

    pub fn with_video(mut self, predicate: impl Fn(&RemoteUser) -> bool + Send + Sync + 'static) -> Self {
        self.video = Some(Arc::new(predicate));
        self
    }

    pub fn allows(&self, user: &RemoteUser, media: MediaKind) -> bool {
        let predicate = match media {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        };
        predicate.as_ref().is_none_or(|allow| allow(user))
    }
}

impl fmt::Debug for SubscriptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionPolicy")
            .field("audio", &self.audio.is_some())
            .field("video", &self.video.is_some())
            .finish()
    }
}
