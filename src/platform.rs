use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::PushSubscription;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("{0} unavailable")]
    Unavailable(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsNotification {
    pub title: String,
    pub body: String,
    pub require_interaction: bool,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn request_permission(&self) -> Permission;
    async fn show(&self, notification: &OsNotification) -> Result<(), ChannelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Chime,
    UrgentLoop,
}

impl Tone {
    pub fn asset(&self) -> &'static str {
        match self {
            Tone::Chime => "/assets/correct-answer-tone.wav",
            Tone::UrgentLoop => "/assets/urgent-simple-tone-loop.wav",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    Once,
    Looped,
}

pub trait TonePlayer: Send + Sync {
    /// Starts playback and returns the asset's natural length when known.
    fn play(&self, tone: Tone, playback: Playback) -> Result<Option<Duration>, ChannelError>;
    fn stop(&self);
}

pub trait Haptics: Send + Sync {
    fn is_supported(&self) -> bool;
    /// Alternating on/off durations in milliseconds.
    fn vibrate(&self, pattern: &[u64]) -> Result<(), ChannelError>;
    fn cancel(&self);
}

/// A modal the user acknowledges. Resolves `true` on OK, `false` on cancel.
#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

pub trait Microphone: Send + Sync {
    fn is_available(&self) -> bool;
}

/// The host's push manager, which hands out this installation's
/// subscription for a relay's application server key.
#[async_trait]
pub trait PushManager: Send + Sync {
    fn is_supported(&self) -> bool;
    async fn subscribe(&self, application_server_key: &str) -> Option<PushSubscription>;
}

#[derive(Clone)]
pub struct Platform {
    pub notifier: Arc<dyn Notifier>,
    pub tone: Arc<dyn TonePlayer>,
    pub haptics: Arc<dyn Haptics>,
    pub confirmation: Arc<dyn Confirmation>,
    pub microphone: Arc<dyn Microphone>,
    pub push: Arc<dyn PushManager>,
}
