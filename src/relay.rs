use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, RwLock};

use crate::config::short_endpoint;
use crate::models::{AlertPayload, NotifyReport, PushSubscription};
use crate::types::SubscriptionMap;
use crate::webpush::{DeliveryError, PushDelivery};

pub struct Relay {
    vapid_public_key: String,
    subscriptions: RwLock<SubscriptionMap>,
    delivery: Arc<dyn PushDelivery>,
    taps: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl Relay {
    pub fn new(vapid_public_key: impl Into<String>, delivery: Arc<dyn PushDelivery>) -> Self {
        Self {
            vapid_public_key: vapid_public_key.into(),
            subscriptions: RwLock::new(SubscriptionMap::new()),
            delivery,
            taps: Mutex::new(Vec::new()),
        }
    }

    pub fn vapid_public_key(&self) -> &str {
        &self.vapid_public_key
    }

    /// A local receiver of every broadcast payload, as the push service
    /// would hand it to a worker in this process.
    pub fn tap(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.taps.lock().push(tx);
        rx
    }

    /// Returns false when the endpoint was already registered.
    pub async fn subscribe(&self, subscription: PushSubscription) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let endpoint = subscription.endpoint.clone();
        let added = !subscriptions.contains_key(&endpoint);
        subscriptions.entry(endpoint.clone()).or_insert(subscription);
        debug!(
            "relay:: subscribe {} (new={}, subscriptions={})",
            short_endpoint(&endpoint),
            added,
            subscriptions.len()
        );
        added
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn broadcast(&self, payload: &AlertPayload) -> NotifyReport {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                error!("relay:: payload not serializable: {}", e);
                return NotifyReport {
                    sent: 0,
                    total: self.subscription_count().await,
                };
            }
        };

        let targets: Vec<PushSubscription> =
            self.subscriptions.read().await.values().cloned().collect();
        let mut sent = 0;
        let mut gone = Vec::new();
        for subscription in &targets {
            match self.delivery.deliver(subscription, &body).await {
                Ok(()) => sent += 1,
                Err(DeliveryError::Gone(status)) => {
                    info!(
                        "relay:: pruning {} ({})",
                        short_endpoint(&subscription.endpoint),
                        status
                    );
                    gone.push(subscription.endpoint.clone());
                }
                Err(e) => warn!(
                    "relay:: delivery to {} failed: {}",
                    short_endpoint(&subscription.endpoint),
                    e
                ),
            }
        }

        self.taps
            .lock()
            .retain(|tap| tap.send(body.clone()).is_ok());

        let mut subscriptions = self.subscriptions.write().await;
        for endpoint in gone {
            subscriptions.remove(&endpoint);
        }
        let report = NotifyReport {
            sent,
            total: subscriptions.len(),
        };
        info!(
            "relay:: `{}` sent to {}/{} subscriptions",
            payload.title, report.sent, report.total
        );
        report
    }
}
