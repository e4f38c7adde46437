use log::info;

use crate::platform::{Permission, Platform};
use crate::scheduler::RelayApi;

/// What the host can do, decided once at start-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub notifications: bool,
    pub vibration: bool,
    pub microphone: bool,
    pub push: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            notifications: true,
            vibration: true,
            microphone: true,
            push: true,
        }
    }

    /// Asks for notification permission and checks each channel. Push is
    /// only usable when the host has a push manager and the relay answers.
    pub async fn probe(platform: &Platform, relay: Option<&dyn RelayApi>) -> Self {
        let notifications = platform.notifier.request_permission().await == Permission::Granted;
        let push = match relay {
            Some(relay) if platform.push.is_supported() => relay.vapid_public_key().await.is_ok(),
            _ => false,
        };
        let capabilities = Self {
            notifications,
            vibration: platform.haptics.is_supported(),
            microphone: platform.microphone.is_available(),
            push,
        };
        info!("capability:: probed {:?}", capabilities);
        capabilities
    }
}
