use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{Duration, Instant};

use crate::models::{AlertPayload, AutoDelete, NotifyReport, PushSubscription, Reminder};
use crate::presenter::{Alert, Presenter};
use crate::registration::PushRegistrar;
use crate::relay_client::RelayError;
use crate::schedule::{plan_alerts, sweep_expired, AlertKey, Clock, PlannedAlert};
use crate::store::Store;
use crate::types::{ArmedMap, FiredMap};

/// How long a fired alert is remembered. Covers the relay's round trip back
/// to this page and a wall clock running behind tokio's timers.
pub const FIRED_MEMORY: Duration = Duration::from_secs(5 * 60);

/// The two relay contracts the page relies on, plus the key lookup used to
/// probe whether push is reachable at all.
#[async_trait]
pub trait RelayApi: Send + Sync {
    async fn vapid_public_key(&self) -> Result<String, RelayError>;
    async fn register(&self, subscription: &PushSubscription) -> Result<(), RelayError>;
    async fn broadcast(&self, payload: &AlertPayload) -> Result<NotifyReport, RelayError>;
}

pub struct ArmedTimer {
    pub alert: PlannedAlert,
    serial: u64,
    cancel: mpsc::Sender<()>,
}

pub struct FiredAlert {
    pub at: DateTime<Local>,
    pub title: String,
    pub body: String,
    fired: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recompute {
    pub armed: usize,
    pub cancelled: usize,
    pub kept: usize,
}

/// Owns every armed alert timer of this page, keyed by [`AlertKey`].
///
/// Recomputation diffs the freshly planned alerts against the armed map, so
/// running it any number of times never arms a key twice and a removed or
/// changed record never keeps a live timer.
pub struct Scheduler {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    presenter: Arc<Presenter>,
    relay: Option<Arc<dyn RelayApi>>,
    registrar: Option<Arc<PushRegistrar>>,
    armed: Arc<RwLock<ArmedMap>>,
    fired: Arc<Mutex<FiredMap>>,
    serial: AtomicU64,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        clock: Arc<dyn Clock>,
        presenter: Arc<Presenter>,
        relay: Option<Arc<dyn RelayApi>>,
        registrar: Option<Arc<PushRegistrar>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            clock,
            presenter,
            relay,
            registrar,
            armed: Arc::new(RwLock::new(HashMap::new())),
            fired: Arc::new(Mutex::new(HashMap::new())),
            serial: AtomicU64::new(0),
        })
    }

    /// Diffs planned alerts against the armed timers, then retries a pending
    /// push registration in the background.
    pub async fn recompute(&self) -> Recompute {
        let report = self.rearm().await;
        if let Some(registrar) = &self.registrar {
            let registrar = Arc::clone(registrar);
            tokio::spawn(async move { registrar.ensure().await });
        }
        report
    }

    /// Whether an alert with this text fired here within [`FIRED_MEMORY`].
    pub fn fired_recently(&self, title: &str, body: &str) -> bool {
        self.fired
            .lock()
            .values()
            .any(|f| f.fired.elapsed() <= FIRED_MEMORY && f.title == title && f.body == body)
    }

    async fn rearm(&self) -> Recompute {
        let now = self.clock.now();
        let planned: HashMap<AlertKey, PlannedAlert> = {
            let mut fired = self.fired.lock();
            fired.retain(|_, f| f.fired.elapsed() <= FIRED_MEMORY || f.at > now);
            plan_alerts(&self.store.snapshot(), now)
                .into_iter()
                // An instant that already fired stays fired even if the wall
                // clock has not caught up with the timer yet.
                .filter(|alert| fired.get(&alert.key).map_or(true, |f| f.at != alert.at))
                .map(|alert| (alert.key.clone(), alert))
                .collect()
        };

        let mut report = Recompute::default();
        let mut armed = self.armed.write().await;

        let stale: Vec<AlertKey> = armed
            .iter()
            .filter(|(key, timer)| planned.get(*key) != Some(&timer.alert))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(timer) = armed.remove(&key) {
                timer.cancel.try_send(()).ok();
                report.cancelled += 1;
            }
        }

        for (key, alert) in planned {
            if armed.contains_key(&key) {
                report.kept += 1;
                continue;
            }
            let delay = (alert.at - now).to_std().unwrap_or(Duration::ZERO);
            let timer = self.arm(alert, delay);
            armed.insert(key, timer);
            report.armed += 1;
        }

        debug!(
            "scheduler:: recompute armed={} cancelled={} kept={} live={}",
            report.armed,
            report.cancelled,
            report.kept,
            armed.len()
        );
        report
    }

    pub async fn armed_keys(&self) -> Vec<AlertKey> {
        let mut keys: Vec<_> = self.armed.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn cancel_all(&self) {
        let mut armed = self.armed.write().await;
        for (_, timer) in armed.drain() {
            timer.cancel.try_send(()).ok();
        }
    }

    /// Deletes reminders already past due. Runs whenever auto-delete is
    /// switched on and at start-up while it is on.
    pub fn expire_reminders(&self) -> usize {
        if !self.store.load::<AutoDelete>().0 {
            return 0;
        }
        let mut reminders: Vec<Reminder> = self.store.load();
        let removed = sweep_expired(&mut reminders, self.clock.now());
        if removed > 0 {
            if let Err(e) = self.store.save(&reminders) {
                warn!("scheduler:: expired reminders kept in memory only: {}", e);
            }
            info!("scheduler:: auto-deleted {} past reminders", removed);
        }
        removed
    }

    /// Recomputes on start and after every store generation change until the
    /// store is dropped.
    pub async fn run(self: Arc<Self>, mut changes: watch::Receiver<u64>) {
        loop {
            self.recompute().await;
            if changes.changed().await.is_err() {
                break;
            }
        }
        self.cancel_all().await;
    }

    fn arm(&self, alert: PlannedAlert, delay: Duration) -> ArmedTimer {
        let serial = self.serial.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(start_alert_timer(
            alert.clone(),
            serial,
            delay,
            rx,
            Arc::clone(&self.presenter),
            self.relay.clone(),
            Arc::clone(&self.armed),
            Arc::clone(&self.fired),
        ));
        ArmedTimer {
            alert,
            serial,
            cancel: tx,
        }
    }
}

async fn start_alert_timer(
    alert: PlannedAlert,
    serial: u64,
    wait_time: Duration,
    mut cancel: mpsc::Receiver<()>,
    presenter: Arc<Presenter>,
    relay: Option<Arc<dyn RelayApi>>,
    armed: Arc<RwLock<ArmedMap>>,
    fired: Arc<Mutex<FiredMap>>,
) {
    debug!("scheduler:: {} waiting for {:?}", alert.key, wait_time);

    tokio::select! {
        _ = tokio::time::sleep(wait_time) => {}
        // A dropped sender means the timer left the armed map.
        _ = cancel.recv() => {
            debug!("scheduler:: {} cancelled", alert.key);
            return;
        }
    }

    {
        let mut armed = armed.write().await;
        match armed.get(&alert.key) {
            Some(timer) if timer.serial == serial => {
                armed.remove(&alert.key);
            }
            _ => {
                debug!("scheduler:: {} superseded before firing", alert.key);
                return;
            }
        }
    }

    fired.lock().insert(
        alert.key.clone(),
        FiredAlert {
            at: alert.at,
            title: alert.title.clone(),
            body: alert.body.clone(),
            fired: Instant::now(),
        },
    );
    info!("scheduler:: {} due: {}", alert.key, alert.body);
    if let Some(relay) = relay {
        let payload = AlertPayload {
            title: alert.title.clone(),
            body: alert.body.clone(),
            data: serde_json::json!({ "key": alert.key.to_string() }),
        };
        tokio::spawn(async move {
            match relay.broadcast(&payload).await {
                Ok(report) => debug!(
                    "scheduler:: relay sent {}/{} pushes",
                    report.sent, report.total
                ),
                Err(e) => warn!("scheduler:: relay broadcast failed: {}", e),
            }
        });
    }
    presenter.fire(Alert {
        title: alert.title,
        body: alert.body,
    });
}
