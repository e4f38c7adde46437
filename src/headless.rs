use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::models::PushSubscription;
use crate::platform::{
    ChannelError, Confirmation, Haptics, Microphone, Notifier, OsNotification, Permission,
    Platform, Playback, PushManager, Tone, TonePlayer,
};
use crate::worker::{ClientInfo, Clients, NotificationCenter, NotificationId, PushNotification, WorkerMessage};

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    async fn show(&self, notification: &OsNotification) -> Result<(), ChannelError> {
        info!("notify:: {}: {}", notification.title, notification.body);
        Ok(())
    }
}

pub struct SilentTone;

impl TonePlayer for SilentTone {
    fn play(&self, tone: Tone, _playback: Playback) -> Result<Option<Duration>, ChannelError> {
        debug!("notify:: no audio output for {}", tone.asset());
        Err(ChannelError::Unavailable("audio"))
    }

    fn stop(&self) {}
}

pub struct NoHaptics;

impl Haptics for NoHaptics {
    fn is_supported(&self) -> bool {
        false
    }

    fn vibrate(&self, _pattern: &[u64]) -> Result<(), ChannelError> {
        Err(ChannelError::Unavailable("vibration"))
    }

    fn cancel(&self) {}
}

/// Nobody is there to press OK.
pub struct PendingConfirmation;

#[async_trait]
impl Confirmation for PendingConfirmation {
    async fn confirm(&self, _message: &str) -> bool {
        future::pending().await
    }
}

pub struct NoMicrophone;

impl Microphone for NoMicrophone {
    fn is_available(&self) -> bool {
        false
    }
}

/// Pushes reach the in-process worker through the relay's taps, so there is
/// no push service subscription to hand out.
pub struct LocalPushManager;

#[async_trait]
impl PushManager for LocalPushManager {
    fn is_supported(&self) -> bool {
        true
    }

    async fn subscribe(&self, _application_server_key: &str) -> Option<PushSubscription> {
        None
    }
}

pub fn platform() -> Platform {
    Platform {
        notifier: Arc::new(LogNotifier),
        tone: Arc::new(SilentTone),
        haptics: Arc::new(NoHaptics),
        confirmation: Arc::new(PendingConfirmation),
        microphone: Arc::new(NoMicrophone),
        push: Arc::new(LocalPushManager),
    }
}

struct Page {
    info: ClientInfo,
    inbox: mpsc::UnboundedSender<WorkerMessage>,
}

/// In-process pages the worker can message and focus.
#[derive(Default)]
pub struct PageClients {
    pages: Mutex<Vec<Page>>,
    next_id: AtomicU64,
}

impl PageClients {
    pub fn register(
        &self,
        url: &str,
        visible: bool,
    ) -> (String, mpsc::UnboundedReceiver<WorkerMessage>) {
        let id = format!("page-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let (inbox, rx) = mpsc::unbounded_channel();
        self.pages.lock().push(Page {
            info: ClientInfo {
                id: id.clone(),
                url: url.to_string(),
                focused: false,
                visible,
            },
            inbox,
        });
        (id, rx)
    }
}

#[async_trait]
impl Clients for PageClients {
    async fn match_all(&self) -> Vec<ClientInfo> {
        let mut pages = self.pages.lock();
        // A page whose receiver is gone has been closed.
        pages.retain(|p| !p.inbox.is_closed());
        pages.iter().map(|p| p.info.clone()).collect()
    }

    async fn post_message(&self, client: &str, message: &WorkerMessage) {
        if let Some(page) = self.pages.lock().iter().find(|p| p.info.id == client) {
            page.inbox.send(message.clone()).ok();
        }
    }

    async fn focus(&self, client: &str) -> bool {
        let mut pages = self.pages.lock();
        if !pages.iter().any(|p| p.info.id == client) {
            return false;
        }
        for page in pages.iter_mut() {
            page.info.focused = page.info.id == client;
        }
        true
    }

    async fn open_window(&self, url: &str) -> Option<String> {
        info!("worker:: no window system to open {}", url);
        None
    }

    async fn claim(&self) {
        debug!("worker:: claimed {} pages", self.pages.lock().len());
    }
}

#[derive(Default)]
pub struct LogNotificationCenter {
    next_id: AtomicU64,
}

impl NotificationCenter for LogNotificationCenter {
    fn show(&self, notification: &PushNotification) -> NotificationId {
        let id = NotificationId(self.next_id.fetch_add(1, Ordering::SeqCst));
        info!(
            "notify:: [{}] {}: {}",
            id.0, notification.title, notification.body
        );
        id
    }

    fn close(&self, id: NotificationId) {
        debug!("notify:: [{}] closed", id.0);
    }
}
