use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::models::PushRegistration;
use crate::platform::PushManager;
use crate::scheduler::RelayApi;
use crate::store::Store;

/// Forwards this installation's push subscription to the relay once. A relay
/// that is down leaves the registration pending, and the next attempt picks
/// it up again.
pub struct PushRegistrar {
    store: Arc<Store>,
    push: Arc<dyn PushManager>,
    relay: Arc<dyn RelayApi>,
    settled: Mutex<bool>,
}

impl PushRegistrar {
    pub fn new(store: Arc<Store>, push: Arc<dyn PushManager>, relay: Arc<dyn RelayApi>) -> Arc<Self> {
        Arc::new(Self {
            store,
            push,
            relay,
            settled: Mutex::new(false),
        })
    }

    pub async fn is_settled(&self) -> bool {
        *self.settled.lock().await
    }

    /// Returns whether nothing is left to register.
    pub async fn ensure(&self) -> bool {
        let mut settled = self.settled.lock().await;
        if !*settled {
            *settled = self.attempt().await;
        }
        *settled
    }

    async fn attempt(&self) -> bool {
        if !self.push.is_supported() {
            return true;
        }
        let key = match self.relay.vapid_public_key().await {
            Ok(key) => key,
            Err(e) => {
                warn!("registration:: push key unavailable, will retry: {}", e);
                return false;
            }
        };
        let Some(subscription) = self.push.subscribe(&key).await else {
            debug!("registration:: no push subscription issued");
            return true;
        };

        let registered: PushRegistration = self.store.load();
        if registered.endpoint.as_deref() == Some(subscription.endpoint.as_str()) {
            debug!("registration:: push subscription already registered");
            return true;
        }
        match self.relay.register(&subscription).await {
            Ok(()) => {
                let registration = PushRegistration {
                    endpoint: Some(subscription.endpoint),
                };
                if let Err(e) = self.store.save(&registration) {
                    debug!("registration:: kept in memory only: {}", e);
                }
                info!("registration:: push subscription registered");
                true
            }
            Err(e) => {
                warn!("registration:: relay refused subscription, will retry: {}", e);
                false
            }
        }
    }
}
