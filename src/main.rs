// Push relay for the planner. The same process runs the offline worker against
// the app origin and, when a data directory is configured, a headless planner
// page over that directory.
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use actix_web::{web::Data, App, HttpServer};
use dotenv::dotenv;
use log::{error, info, warn};
use reqwest::Url;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Duration;

use planner_alerts::config::{self, Config, REQUIRED_VARS};
use planner_alerts::headless::{self, LogNotificationCenter, PageClients};
use planner_alerts::logging::init_logging;
use planner_alerts::relay::Relay;
use planner_alerts::relay_client::RelayClient;
use planner_alerts::routes;
use planner_alerts::schedule::SystemClock;
use planner_alerts::store::{FileBackend, LogWarnings, Store};
use planner_alerts::vapid::VapidKey;
use planner_alerts::webpush::WebPushDelivery;
use planner_alerts::worker::{CacheStorage, HttpNetwork, OfflineWorker, WorkerHandle};
use planner_alerts::{Planner, RelayApi};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("Required environment variables: {}", REQUIRED_VARS.join(" "));
            exit(1)
        }
    };
    if let Err(e) = init_logging(config.log_level.as_deref()) {
        eprintln!("{e}");
        exit(1)
    }

    let vapid = match VapidKey::from_pem_file(&config.vapid_private_key_path, &config.vapid_subject) {
        Ok(key) => Arc::new(key),
        Err(e) => {
            error!("VAPID key error: {}", e);
            exit(1)
        }
    };
    info!("VAPID public key: {}", vapid.public_key());

    let origin = match Url::parse(&config.app_origin) {
        Ok(origin) => origin,
        Err(e) => {
            error!("APP_ORIGIN is not a url: {}", e);
            exit(1)
        }
    };

    let client = match config::http_client(config.http_timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("HTTP client error: {}", e);
            exit(1)
        }
    };

    let relay = Data::new(Relay::new(
        vapid.public_key(),
        Arc::new(WebPushDelivery::new(Arc::clone(&vapid), client.clone())),
    ));
    let pushes = relay.tap();

    let pages = Arc::new(PageClients::default());
    let worker = OfflineWorker::new(
        origin.clone(),
        CacheStorage::default(),
        Arc::new(HttpNetwork::new(origin, client.clone())),
        pages.clone(),
        Arc::new(LogNotificationCenter::default()),
    )
    .spawn();

    let server_handle = HttpServer::new(move || {
        App::new()
            .wrap(routes::cors())
            .app_data(Data::clone(&relay))
            .configure(routes::configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run();
    info!("Relay listening on {}:{}", config.host, config.port);

    tokio::spawn(install_worker(worker.clone()));
    let worker_handle = tokio::spawn(worker_push_loop(worker, pushes));
    if let Some(dir) = config.data_dir.clone() {
        tokio::spawn(headless_page(config, dir, pages, client));
    }

    tokio::select! {
        res = server_handle => res?,
        _ = worker_handle => {},
    }
    Ok(())
}

// Without a reachable app origin the worker still handles pushes.
async fn install_worker(worker: WorkerHandle) {
    if let Err(e) = worker.install().await {
        warn!("worker:: {}", e);
    }
    if let Err(e) = worker.activate().await {
        error!("worker:: activate failed: {}", e);
    }
}

async fn worker_push_loop(worker: WorkerHandle, mut pushes: UnboundedReceiver<Vec<u8>>) {
    while let Some(payload) = pushes.recv().await {
        if let Err(e) = worker.push(Some(payload)).await {
            error!("worker:: push not handled: {}", e);
            break;
        }
    }
}

async fn headless_page(
    config: Config,
    dir: PathBuf,
    pages: Arc<PageClients>,
    client: reqwest::Client,
) {
    let backend = match FileBackend::open(&dir, config.store_quota_bytes) {
        Ok(backend) => backend,
        Err(e) => {
            error!("planner:: cannot open {}: {}", dir.display(), e);
            return;
        }
    };
    let store = Arc::new(Store::new(Arc::new(backend), Arc::new(LogWarnings)));
    let relay: Arc<dyn RelayApi> = Arc::new(RelayClient::new(config.relay_url.as_str(), client));
    let planner = Planner::start(
        Arc::clone(&store),
        headless::platform(),
        Some(relay),
        Arc::new(SystemClock),
    )
    .await;

    let (page_id, mut inbox) = pages.register("/", true);
    info!("planner:: page {} serving {}", page_id, dir.display());

    let mut rescan = tokio::time::interval(Duration::from_secs(config.store_rescan_secs.max(1)));
    loop {
        tokio::select! {
            message = inbox.recv() => match message {
                Some(message) => {
                    planner.handle_worker_message(message);
                }
                None => break,
            },
            _ = rescan.tick() => {
                store.refresh();
            }
        }
    }
}
