// The offline agent runs in its own task, driven through `WorkerHandle`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub const CACHE_PREFIX: &str = "planner-cache-v";
pub const CACHE_VERSION: u32 = 1;
pub const SHELL_DOCUMENT: &str = "/index.html";
pub const SHELL_ASSETS: [&str; 6] = [
    "/",
    "/index.html",
    "/manifest.json",
    "/icons/planner-192.png",
    "/assets/correct-answer-tone.wav",
    "/assets/urgent-simple-tone-loop.wav",
];
pub const NOTIFICATION_ICON: &str = "/icons/planner-192.png";
pub const NOTIFICATION_BADGE: &str = "/icons/planner-192.png";
pub const PUSH_VIBRATION: [u64; 5] = [200, 100, 200, 100, 200];
pub const DEFAULT_PUSH_TITLE: &str = "Planner Reminder";

const COMMAND_BUFFER: usize = 32;

pub fn cache_name(version: u32) -> String {
    format!("{CACHE_PREFIX}{version}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Navigate,
    Subresource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
}

impl Request {
    pub fn new(method: Method, url: Url, mode: RequestMode) -> Self {
        Self { method, url, mode }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, RequestMode::Subresource)
    }

    pub fn navigate(url: Url) -> Self {
        Self::new(Method::GET, url, RequestMode::Navigate)
    }

    pub fn is_read_only(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// Same-origin.
    Basic,
    Cors,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub kind: ResponseType,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            kind: ResponseType::Basic,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Explicit placeholder for a request that could be served neither from
    /// cache nor from the network.
    pub fn not_found() -> Self {
        Self {
            status: 404,
            kind: ResponseType::Basic,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.kind == ResponseType::Basic
    }

    fn without_body(mut self) -> Self {
        self.body.clear();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Cache(Response),
    Network(Response),
    /// Network failed; the shell document or the 404 placeholder.
    Fallback(Response),
    /// Not intercepted, the request goes to the network as issued.
    Passthrough,
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Cache(r) | FetchOutcome::Network(r) | FetchOutcome::Fallback(r) => Some(r),
            FetchOutcome::Passthrough => None,
        }
    }
}

/// Named caches of url -> response, kept in creation order. Clones share the
/// same storage so a new worker generation sees what the previous one left
/// behind.
#[derive(Clone, Default)]
pub struct CacheStorage {
    caches: Arc<Mutex<Vec<(String, HashMap<String, Response>)>>>,
}

impl CacheStorage {
    pub fn keys(&self) -> Vec<String> {
        self.caches.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn put_all(&self, name: &str, entries: Vec<(String, Response)>) {
        let mut caches = self.caches.lock();
        match caches.iter_mut().find(|(n, _)| n == name) {
            Some((_, cache)) => cache.extend(entries),
            None => caches.push((name.to_string(), entries.into_iter().collect())),
        }
    }

    pub fn put(&self, name: &str, url: &str, response: Response) {
        self.put_all(name, vec![(url.to_string(), response)]);
    }

    /// Looks through every cache, oldest first.
    pub fn match_url(&self, url: &str) -> Option<Response> {
        self.caches
            .lock()
            .iter()
            .find_map(|(_, cache)| cache.get(url).cloned())
    }

    pub fn delete(&self, name: &str) -> bool {
        let mut caches = self.caches.lock();
        let before = caches.len();
        caches.retain(|(n, _)| n != name);
        caches.len() != before
    }

    pub fn len(&self, name: &str) -> usize {
        self.caches
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map_or(0, |(_, cache)| cache.len())
    }
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network unavailable")]
    Offline,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: String,
    pub url: String,
    pub focused: bool,
    pub visible: bool,
}

/// The open pages of this app, uncontrolled ones included.
#[async_trait]
pub trait Clients: Send + Sync {
    async fn match_all(&self) -> Vec<ClientInfo>;
    async fn post_message(&self, client: &str, message: &WorkerMessage);
    async fn focus(&self, client: &str) -> bool;
    async fn open_window(&self, url: &str) -> Option<String>;
    async fn claim(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    pub action: &'static str,
    pub title: &'static str,
}

pub const PUSH_ACTIONS: [NotificationAction; 2] = [
    NotificationAction {
        action: "open",
        title: "Open Planner",
    },
    NotificationAction {
        action: "dismiss",
        title: "Dismiss",
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub data: Value,
    pub icon: &'static str,
    pub badge: &'static str,
    pub vibrate: Vec<u64>,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
}

pub trait NotificationCenter: Send + Sync {
    fn show(&self, notification: &PushNotification) -> NotificationId;
    fn close(&self, id: NotificationId);
}

/// Worker to page messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    AlertFired { title: String, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub notification: NotificationId,
    pub relayed_to: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Focused(String),
    Opened(String),
    Nothing,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("install failed, {url} unreachable: {source}")]
    Install { url: String, source: NetworkError },
    #[error("install failed, {url} answered {status}")]
    InstallStatus { url: String, status: u16 },
    #[error("bad asset path {0}")]
    BadAsset(String),
    #[error("worker stopped")]
    Stopped,
}

enum Command {
    Install {
        reply: oneshot::Sender<Result<(), WorkerError>>,
    },
    Activate {
        reply: oneshot::Sender<usize>,
    },
    Fetch {
        request: Request,
        reply: oneshot::Sender<FetchOutcome>,
    },
    Push {
        payload: Option<Vec<u8>>,
        reply: oneshot::Sender<PushOutcome>,
    },
    NotificationClick {
        id: NotificationId,
        reply: oneshot::Sender<ClickOutcome>,
    },
}

#[derive(Clone)]
pub struct WorkerHandle {
    commands: mpsc::Sender<Command>,
}

impl WorkerHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, WorkerError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| WorkerError::Stopped)?;
        answer.await.map_err(|_| WorkerError::Stopped)
    }

    pub async fn install(&self) -> Result<(), WorkerError> {
        self.request(|reply| Command::Install { reply }).await?
    }

    /// Returns the number of stale cache generations removed.
    pub async fn activate(&self) -> Result<usize, WorkerError> {
        self.request(|reply| Command::Activate { reply }).await
    }

    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome, WorkerError> {
        self.request(|reply| Command::Fetch { request, reply }).await
    }

    pub async fn push(&self, payload: Option<Vec<u8>>) -> Result<PushOutcome, WorkerError> {
        self.request(|reply| Command::Push { payload, reply }).await
    }

    pub async fn notification_click(&self, id: NotificationId) -> Result<ClickOutcome, WorkerError> {
        self.request(|reply| Command::NotificationClick { id, reply })
            .await
    }
}

pub struct OfflineWorker {
    origin: Url,
    version: u32,
    caches: CacheStorage,
    network: Arc<dyn Network>,
    clients: Arc<dyn Clients>,
    notifications: Arc<dyn NotificationCenter>,
}

impl OfflineWorker {
    pub fn new(
        origin: Url,
        caches: CacheStorage,
        network: Arc<dyn Network>,
        clients: Arc<dyn Clients>,
        notifications: Arc<dyn NotificationCenter>,
    ) -> Self {
        Self {
            origin,
            version: CACHE_VERSION,
            caches,
            network,
            clients,
            notifications,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn spawn(self) -> WorkerHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(self.run(rx));
        WorkerHandle { commands: tx }
    }

    async fn run(self, mut commands: mpsc::Receiver<Command>) {
        info!("worker:: {} running for {}", self.cache_name(), self.origin);
        let this = Arc::new(self);
        while let Some(command) = commands.recv().await {
            match command {
                // Network-bound work runs beside the loop so a slow origin
                // never holds up pushes and clicks.
                Command::Install { reply } => {
                    let this = Arc::clone(&this);
                    tokio::spawn(async move {
                        reply.send(this.install().await).ok();
                    });
                }
                Command::Fetch { request, reply } => {
                    let this = Arc::clone(&this);
                    tokio::spawn(async move {
                        reply.send(this.fetch(request).await).ok();
                    });
                }
                Command::Activate { reply } => {
                    reply.send(this.activate().await).ok();
                }
                Command::Push { payload, reply } => {
                    reply.send(this.push(payload.as_deref()).await).ok();
                }
                Command::NotificationClick { id, reply } => {
                    reply.send(this.notification_click(id).await).ok();
                }
            }
        }
        debug!("worker:: all handles dropped, stopping");
    }

    fn cache_name(&self) -> String {
        cache_name(self.version)
    }

    /// All shell assets or nothing.
    async fn install(&self) -> Result<(), WorkerError> {
        let mut entries = Vec::with_capacity(SHELL_ASSETS.len());
        for asset in SHELL_ASSETS {
            let url = self
                .origin
                .join(asset)
                .map_err(|_| WorkerError::BadAsset(asset.to_string()))?;
            let response = self
                .network
                .fetch(&Request::get(url.clone()))
                .await
                .map_err(|source| WorkerError::Install {
                    url: url.to_string(),
                    source,
                })?;
            if response.status != 200 {
                return Err(WorkerError::InstallStatus {
                    url: url.to_string(),
                    status: response.status,
                });
            }
            entries.push((url.to_string(), response));
        }
        let name = self.cache_name();
        self.caches.put_all(&name, entries);
        // Skip waiting: the new generation takes over as soon as it is installed.
        info!("worker:: installed {} ({} assets)", name, SHELL_ASSETS.len());
        Ok(())
    }

    async fn activate(&self) -> usize {
        let current = self.cache_name();
        let mut removed = 0;
        for name in self.caches.keys() {
            if name != current && self.caches.delete(&name) {
                debug!("worker:: deleted stale cache {}", name);
                removed += 1;
            }
        }
        self.clients.claim().await;
        info!("worker:: activated {}, removed {} stale caches", current, removed);
        removed
    }

    async fn fetch(&self, request: Request) -> FetchOutcome {
        if !request.is_read_only() {
            return FetchOutcome::Passthrough;
        }
        let head = request.method == Method::HEAD;

        if let Some(hit) = self.caches.match_url(request.url.as_str()) {
            debug!("worker:: cache hit {}", request.url);
            return FetchOutcome::Cache(if head { hit.without_body() } else { hit });
        }

        match self.network.fetch(&request).await {
            Ok(response) => {
                if !head && response.is_cacheable() && self.is_same_origin(&request.url) {
                    self.caches
                        .put(&self.cache_name(), request.url.as_str(), response.clone());
                }
                FetchOutcome::Network(response)
            }
            Err(e) => {
                debug!("worker:: {} {} failed: {}", request.method, request.url, e);
                if request.mode == RequestMode::Navigate {
                    if let Some(shell) = self.shell_document() {
                        return FetchOutcome::Fallback(shell);
                    }
                    warn!("worker:: offline navigation and no cached shell");
                }
                FetchOutcome::Fallback(Response::not_found())
            }
        }
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    fn shell_document(&self) -> Option<Response> {
        let url = self.origin.join(SHELL_DOCUMENT).ok()?;
        self.caches.match_url(url.as_str())
    }

    async fn push(&self, payload: Option<&[u8]>) -> PushOutcome {
        let notification = push_notification(payload);
        let id = self.notifications.show(&notification);
        info!("worker:: push shown as {:?}: {}", id, notification.title);

        let message = WorkerMessage::AlertFired {
            title: notification.title,
            body: notification.body,
        };
        let mut relayed_to = 0;
        for client in self.clients.match_all().await {
            if client.focused || client.visible {
                self.clients.post_message(&client.id, &message).await;
                relayed_to += 1;
            }
        }
        debug!("worker:: alert relayed to {} pages", relayed_to);
        PushOutcome {
            notification: id,
            relayed_to,
        }
    }

    async fn notification_click(&self, id: NotificationId) -> ClickOutcome {
        self.notifications.close(id);
        for client in self.clients.match_all().await {
            if self.clients.focus(&client.id).await {
                debug!("worker:: focused page {}", client.id);
                return ClickOutcome::Focused(client.id);
            }
        }
        match self.clients.open_window("/").await {
            Some(opened) => ClickOutcome::Opened(opened),
            None => {
                error!("worker:: no page to focus and none could be opened");
                ClickOutcome::Nothing
            }
        }
    }
}

/// Builds the notification for a push payload. Missing fields take their
/// defaults and a payload that is not JSON becomes the body text.
pub fn push_notification(payload: Option<&[u8]>) -> PushNotification {
    let mut title = String::new();
    let mut body = String::new();
    let mut data = Value::Object(Default::default());

    if let Some(bytes) = payload {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(mut fields)) => {
                if let Some(Value::String(t)) = fields.remove("title") {
                    title = t;
                }
                if let Some(Value::String(b)) = fields.remove("body") {
                    body = b;
                }
                if let Some(d) = fields.remove("data").filter(|d| !d.is_null()) {
                    data = d;
                }
            }
            Ok(Value::String(text)) => body = text,
            Ok(_) => {}
            Err(_) => body = String::from_utf8_lossy(bytes).into_owned(),
        }
    }
    if title.is_empty() {
        title = DEFAULT_PUSH_TITLE.to_string();
    }

    PushNotification {
        title,
        body,
        data,
        icon: NOTIFICATION_ICON,
        badge: NOTIFICATION_BADGE,
        vibrate: PUSH_VIBRATION.to_vec(),
        require_interaction: true,
        actions: PUSH_ACTIONS.to_vec(),
    }
}

/// Network access through reqwest, for the app origin and anything else.
pub struct HttpNetwork {
    origin: Url,
    client: reqwest::Client,
}

impl HttpNetwork {
    pub fn new(origin: Url, client: reqwest::Client) -> Self {
        Self { origin, client }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let res = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    NetworkError::Offline
                } else {
                    NetworkError::Http(e)
                }
            })?;

        let kind = if request.url.origin() == self.origin.origin() {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        };
        let status = res.status().as_u16();
        let headers = res
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = res.bytes().await?.to_vec();
        Ok(Response {
            status,
            kind,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_payload_fields_and_defaults() {
        let full = push_notification(Some(
            br#"{"title":"Task Reminder","body":"Gym (07:00)","data":{"key":"daily/0#1"}}"#,
        ));
        assert_eq!(full.title, "Task Reminder");
        assert_eq!(full.body, "Gym (07:00)");
        assert_eq!(full.data, json!({"key": "daily/0#1"}));
        assert!(full.require_interaction);
        assert_eq!(full.vibrate, vec![200, 100, 200, 100, 200]);
        assert_eq!(full.actions[0].action, "open");
        assert_eq!(full.actions[1].action, "dismiss");

        let empty = push_notification(None);
        assert_eq!(empty.title, DEFAULT_PUSH_TITLE);
        assert_eq!(empty.body, "");
        assert_eq!(empty.data, json!({}));

        let blank_title = push_notification(Some(br#"{"title":"","body":"x"}"#));
        assert_eq!(blank_title.title, DEFAULT_PUSH_TITLE);
    }

    #[test]
    fn non_json_payload_becomes_body() {
        let n = push_notification(Some(b"Water the plants"));
        assert_eq!(n.title, DEFAULT_PUSH_TITLE);
        assert_eq!(n.body, "Water the plants");
    }

    #[test]
    fn worker_message_wire_shape() {
        let message = WorkerMessage::AlertFired {
            title: "Reminder".into(),
            body: "Call Sam".into(),
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "alert-fired", "title": "Reminder", "body": "Call Sam"})
        );
    }

    #[test]
    fn only_same_origin_ok_responses_are_cacheable() {
        assert!(Response::ok("x").is_cacheable());
        assert!(!Response::not_found().is_cacheable());
        let mut cors = Response::ok("x");
        cors.kind = ResponseType::Cors;
        assert!(!cors.is_cacheable());
    }

    #[test]
    fn caches_are_searched_in_creation_order() {
        let storage = CacheStorage::default();
        storage.put(&cache_name(2), "http://a/app.js", Response::ok("v2"));
        storage.put(&cache_name(10), "http://a/app.js", Response::ok("v10"));
        assert_eq!(storage.keys(), vec![cache_name(2), cache_name(10)]);
        assert_eq!(storage.match_url("http://a/app.js"), Some(Response::ok("v2")));
    }

    #[test]
    fn read_only_methods() {
        let url = Url::parse("http://localhost:5173/").unwrap();
        assert!(Request::get(url.clone()).is_read_only());
        assert!(Request::new(Method::HEAD, url.clone(), RequestMode::Subresource).is_read_only());
        assert!(!Request::new(Method::POST, url, RequestMode::Subresource).is_read_only());
    }

    #[test]
    fn cache_storage_is_shared_between_clones() {
        let storage = CacheStorage::default();
        let other = storage.clone();
        storage.put("planner-cache-v1", "http://a/x", Response::ok("x"));
        assert_eq!(other.match_url("http://a/x"), Some(Response::ok("x")));
        assert!(other.delete("planner-cache-v1"));
        assert!(storage.keys().is_empty());
    }
}
