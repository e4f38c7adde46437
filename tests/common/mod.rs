#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use reqwest::Url;

use planner_alerts::headless;
use planner_alerts::models::{AlertPayload, NotifyReport, PushSubscription, SubscriptionKeys};
use planner_alerts::platform::{
    ChannelError, Notifier, OsNotification, Permission, Platform, Playback, PushManager, Tone,
    TonePlayer,
};
use planner_alerts::relay_client::RelayError;
use planner_alerts::schedule::Clock;
use planner_alerts::worker::{
    ClientInfo, Clients, Network, NetworkError, NotificationCenter, NotificationId,
    PushNotification, Request, Response, WorkerMessage,
};
use planner_alerts::RelayApi;

/// Wall clock that moves with tokio's (paused) time.
pub struct PausedClock {
    base: DateTime<Local>,
    start: tokio::time::Instant,
}

impl PausedClock {
    pub fn at(base: DateTime<Local>) -> Arc<Self> {
        Arc::new(Self {
            base,
            start: tokio::time::Instant::now(),
        })
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Local> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.base + elapsed
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub shown: Mutex<Vec<OsNotification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    async fn show(&self, notification: &OsNotification) -> Result<(), ChannelError> {
        self.shown.lock().push(notification.clone());
        Ok(())
    }
}

pub struct RecordingTone {
    pub length: Option<Duration>,
    pub played: Mutex<Vec<Tone>>,
    pub stops: AtomicU64,
}

impl RecordingTone {
    pub fn new(length: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            length,
            played: Mutex::new(Vec::new()),
            stops: AtomicU64::new(0),
        })
    }
}

impl TonePlayer for RecordingTone {
    fn play(&self, tone: Tone, _playback: Playback) -> Result<Option<Duration>, ChannelError> {
        self.played.lock().push(tone);
        Ok(self.length)
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one fixed subscription.
pub struct FixedPushManager(pub PushSubscription);

#[async_trait]
impl PushManager for FixedPushManager {
    fn is_supported(&self) -> bool {
        true
    }

    async fn subscribe(&self, _application_server_key: &str) -> Option<PushSubscription> {
        Some(self.0.clone())
    }
}

pub struct TestHost {
    pub platform: Platform,
    pub notifier: Arc<RecordingNotifier>,
    pub tone: Arc<RecordingTone>,
}

pub fn host(tone_length: Option<Duration>) -> TestHost {
    let notifier = Arc::new(RecordingNotifier::default());
    let tone = RecordingTone::new(tone_length);
    let mut platform = headless::platform();
    platform.notifier = notifier.clone();
    platform.tone = tone.clone();
    TestHost {
        platform,
        notifier,
        tone,
    }
}

pub fn subscription(endpoint: &str) -> PushSubscription {
    PushSubscription {
        endpoint: endpoint.to_string(),
        expiration_time: None,
        keys: SubscriptionKeys {
            p256dh: "BPub".into(),
            auth: "auth".into(),
        },
    }
}

/// Records registrations and broadcasts. `key_unavailable` makes the key
/// route answer 503, as a relay that is still starting would.
#[derive(Default)]
pub struct FakeRelay {
    pub registered: Mutex<Vec<PushSubscription>>,
    pub broadcasts: Mutex<Vec<AlertPayload>>,
    pub key_unavailable: AtomicBool,
}

#[async_trait]
impl RelayApi for FakeRelay {
    async fn vapid_public_key(&self) -> Result<String, RelayError> {
        if self.key_unavailable.load(Ordering::SeqCst) {
            return Err(RelayError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        }
        Ok("BPublicKey".into())
    }

    async fn register(&self, subscription: &PushSubscription) -> Result<(), RelayError> {
        self.registered.lock().push(subscription.clone());
        Ok(())
    }

    async fn broadcast(&self, payload: &AlertPayload) -> Result<NotifyReport, RelayError> {
        self.broadcasts.lock().push(payload.clone());
        Ok(NotifyReport { sent: 1, total: 1 })
    }
}

pub fn origin() -> Url {
    Url::parse("http://localhost:5173").unwrap()
}

pub fn url(path: &str) -> Url {
    origin().join(path).unwrap()
}

/// Answers every path with a body naming it, except the `missing` ones which
/// get a 404 and the `stalled` ones which never answer. Can be switched
/// offline.
#[derive(Default)]
pub struct FakeNetwork {
    pub offline: AtomicBool,
    pub requests: Mutex<Vec<String>>,
    pub missing: Mutex<Vec<String>>,
    pub stalled: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn body_for(path: &str) -> Vec<u8> {
        format!("content of {path}").into_bytes()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        self.requests.lock().push(request.url.to_string());
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Offline);
        }
        let path = request.url.path().to_string();
        let stalled = self.stalled.lock().contains(&path);
        if stalled {
            std::future::pending::<()>().await;
        }
        if self.missing.lock().contains(&path) {
            return Ok(Response::not_found());
        }
        Ok(Response::ok(FakeNetwork::body_for(&path)))
    }
}

#[derive(Default)]
pub struct FakeClients {
    pub pages: Mutex<Vec<ClientInfo>>,
    pub messages: Mutex<Vec<(String, WorkerMessage)>>,
    pub focused: Mutex<Vec<String>>,
    pub opened: Mutex<Vec<String>>,
    pub claims: AtomicU64,
}

impl FakeClients {
    pub fn with_page(self, id: &str, focused: bool, visible: bool) -> Self {
        self.pages.lock().push(ClientInfo {
            id: id.to_string(),
            url: "http://localhost:5173/".into(),
            focused,
            visible,
        });
        self
    }
}

#[async_trait]
impl Clients for FakeClients {
    async fn match_all(&self) -> Vec<ClientInfo> {
        self.pages.lock().clone()
    }

    async fn post_message(&self, client: &str, message: &WorkerMessage) {
        self.messages.lock().push((client.to_string(), message.clone()));
    }

    async fn focus(&self, client: &str) -> bool {
        self.focused.lock().push(client.to_string());
        true
    }

    async fn open_window(&self, url: &str) -> Option<String> {
        self.opened.lock().push(url.to_string());
        Some("new-window".into())
    }

    async fn claim(&self) {
        self.claims.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingCenter {
    pub shown: Mutex<Vec<PushNotification>>,
    pub closed: Mutex<Vec<NotificationId>>,
}

impl NotificationCenter for RecordingCenter {
    fn show(&self, notification: &PushNotification) -> NotificationId {
        let mut shown = self.shown.lock();
        shown.push(notification.clone());
        NotificationId(shown.len() as u64)
    }

    fn close(&self, id: NotificationId) {
        self.closed.lock().push(id);
    }
}
