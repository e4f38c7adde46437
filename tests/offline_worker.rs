mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;

use common::{origin, url, FakeClients, FakeNetwork, RecordingCenter};
use planner_alerts::worker::{
    cache_name, CacheStorage, ClickOutcome, FetchOutcome, OfflineWorker, Request, RequestMode,
    Response, WorkerError, WorkerHandle, WorkerMessage, DEFAULT_PUSH_TITLE, SHELL_ASSETS,
};

struct Harness {
    worker: WorkerHandle,
    caches: CacheStorage,
    network: Arc<FakeNetwork>,
    clients: Arc<FakeClients>,
    center: Arc<RecordingCenter>,
}

fn harness(clients: FakeClients) -> Harness {
    let caches = CacheStorage::default();
    let network = Arc::new(FakeNetwork::default());
    let clients = Arc::new(clients);
    let center = Arc::new(RecordingCenter::default());
    let worker = OfflineWorker::new(
        origin(),
        caches.clone(),
        network.clone(),
        clients.clone(),
        center.clone(),
    )
    .spawn();
    Harness {
        worker,
        caches,
        network,
        clients,
        center,
    }
}

async fn installed(clients: FakeClients) -> Harness {
    let h = harness(clients);
    h.worker.install().await.unwrap();
    h.worker.activate().await.unwrap();
    h
}

#[tokio::test]
async fn install_caches_the_shell_and_activate_drops_old_generations() {
    let caches = CacheStorage::default();
    caches.put("planner-cache-v0", "http://localhost:5173/old.js", Response::ok("old"));

    let clients = Arc::new(FakeClients::default());
    let worker = OfflineWorker::new(
        origin(),
        caches.clone(),
        Arc::new(FakeNetwork::default()),
        clients.clone(),
        Arc::new(RecordingCenter::default()),
    )
    .spawn();

    worker.install().await.unwrap();
    assert_eq!(caches.len(&cache_name(1)), SHELL_ASSETS.len());
    assert_eq!(worker.activate().await.unwrap(), 1);
    assert_eq!(caches.keys(), vec![cache_name(1)]);
    assert_eq!(clients.claims.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn new_generation_replaces_the_previous_cache() {
    let caches = CacheStorage::default();
    let network = Arc::new(FakeNetwork::default());
    let spawn = |version| {
        OfflineWorker::new(
            origin(),
            caches.clone(),
            network.clone(),
            Arc::new(FakeClients::default()),
            Arc::new(RecordingCenter::default()),
        )
        .with_version(version)
        .spawn()
    };

    let old = spawn(1);
    old.install().await.unwrap();
    old.activate().await.unwrap();

    let new = spawn(2);
    new.install().await.unwrap();
    // Both generations exist until the new one activates.
    assert_eq!(caches.keys(), vec![cache_name(1), cache_name(2)]);
    assert_eq!(new.activate().await.unwrap(), 1);
    assert_eq!(caches.keys(), vec![cache_name(2)]);
}

#[tokio::test]
async fn failed_install_leaves_cache_unpopulated() {
    let h = harness(FakeClients::default());
    h.network.missing.lock().push("/manifest.json".into());

    let err = h.worker.install().await.unwrap_err();
    assert!(matches!(err, WorkerError::InstallStatus { status: 404, .. }));
    assert!(h.caches.keys().is_empty());
}

#[tokio::test]
async fn stalled_install_does_not_hold_up_pushes() {
    let h = harness(FakeClients::default().with_page("page-1", false, true));
    h.network.stalled.lock().push("/manifest.json".into());

    let installer = h.worker.clone();
    let install = tokio::spawn(async move { installer.install().await });

    let outcome = tokio::time::timeout(Duration::from_secs(1), h.worker.push(None))
        .await
        .expect("push waited on the install")
        .unwrap();
    assert_eq!(outcome.relayed_to, 1);
    let fetched = tokio::time::timeout(
        Duration::from_secs(1),
        h.worker.fetch(Request::get(url("/assets/app.js"))),
    )
    .await
    .expect("fetch waited on the install")
    .unwrap();
    assert!(matches!(fetched, FetchOutcome::Network(_)));
    assert!(!install.is_finished());
    install.abort();
}

#[tokio::test]
async fn offline_cache_hit_is_byte_identical() {
    let h = installed(FakeClients::default()).await;
    // Cached on first online request.
    let online = h.worker.fetch(Request::get(url("/assets/app.js"))).await.unwrap();
    assert!(matches!(online, FetchOutcome::Network(_)));

    h.network.go_offline();
    let offline = h.worker.fetch(Request::get(url("/assets/app.js"))).await.unwrap();
    match offline {
        FetchOutcome::Cache(response) => {
            assert_eq!(response.body, FakeNetwork::body_for("/assets/app.js"));
            assert_eq!(Some(&response), online.response());
        }
        other => panic!("expected cache hit, got {other:?}"),
    }
}

#[tokio::test]
async fn offline_navigation_gets_the_shell() {
    let h = installed(FakeClients::default()).await;
    h.network.go_offline();

    let outcome = h.worker.fetch(Request::navigate(url("/calendar"))).await.unwrap();
    match outcome {
        FetchOutcome::Fallback(response) => {
            assert_eq!(response.status, 200);
            assert_eq!(response.body, FakeNetwork::body_for("/index.html"));
        }
        other => panic!("expected shell fallback, got {other:?}"),
    }

    let image = h.worker.fetch(Request::get(url("/img/missing.png"))).await.unwrap();
    assert_eq!(image, FetchOutcome::Fallback(Response::not_found()));
}

#[tokio::test]
async fn offline_navigation_without_shell_is_not_found() {
    let h = harness(FakeClients::default());
    h.network.go_offline();
    let outcome = h.worker.fetch(Request::navigate(url("/"))).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Fallback(Response::not_found()));
}

#[tokio::test]
async fn writes_pass_through_and_head_is_not_cached() {
    let h = installed(FakeClients::default()).await;
    let before = h.network.requests.lock().len();

    let post = Request::new(Method::POST, url("/api/sync"), RequestMode::Subresource);
    assert_eq!(h.worker.fetch(post).await.unwrap(), FetchOutcome::Passthrough);
    assert_eq!(h.network.requests.lock().len(), before);

    let head = Request::new(Method::HEAD, url("/data.json"), RequestMode::Subresource);
    assert!(matches!(h.worker.fetch(head).await.unwrap(), FetchOutcome::Network(_)));
    h.network.go_offline();
    let again = Request::new(Method::HEAD, url("/data.json"), RequestMode::Subresource);
    assert_eq!(
        h.worker.fetch(again).await.unwrap(),
        FetchOutcome::Fallback(Response::not_found())
    );
}

#[tokio::test]
async fn push_with_a_visible_page_is_relayed() {
    let h = harness(
        FakeClients::default()
            .with_page("hidden", false, false)
            .with_page("visible", false, true),
    );
    let payload = br#"{"title":"Reminder","body":"Call Sam","data":{}}"#.to_vec();
    let outcome = h.worker.push(Some(payload)).await.unwrap();
    assert_eq!(outcome.relayed_to, 1);

    let shown = h.center.shown.lock().clone();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "Reminder");
    assert!(shown[0].require_interaction);

    let messages = h.clients.messages.lock().clone();
    assert_eq!(
        messages,
        vec![(
            "visible".to_string(),
            WorkerMessage::AlertFired {
                title: "Reminder".into(),
                body: "Call Sam".into()
            }
        )]
    );
}

#[tokio::test]
async fn push_without_a_visible_page_only_shows() {
    let h = harness(FakeClients::default().with_page("background", false, false));
    let outcome = h.worker.push(None).await.unwrap();
    assert_eq!(outcome.relayed_to, 0);
    assert_eq!(h.center.shown.lock()[0].title, DEFAULT_PUSH_TITLE);
    assert!(h.clients.messages.lock().is_empty());
}

#[tokio::test]
async fn click_focuses_an_open_page_or_opens_one() {
    let h = harness(FakeClients::default().with_page("page-1", false, false));
    let shown = h.worker.push(None).await.unwrap();
    let outcome = h.worker.notification_click(shown.notification).await.unwrap();
    assert_eq!(outcome, ClickOutcome::Focused("page-1".into()));
    assert_eq!(h.center.closed.lock().as_slice(), &[shown.notification]);

    let empty = harness(FakeClients::default());
    let shown = empty.worker.push(None).await.unwrap();
    let outcome = empty.worker.notification_click(shown.notification).await.unwrap();
    assert_eq!(outcome, ClickOutcome::Opened("new-window".into()));
    assert_eq!(empty.clients.opened.lock().as_slice(), &["/".to_string()]);
}
