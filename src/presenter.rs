// Idle -> Active -> Idle. A fire while active is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::capability::Capabilities;
use crate::models::NotificationProfile;
use crate::platform::{OsNotification, Platform, Playback, Tone};
use crate::store::Store;

/// Aggressive alerts always last this long.
pub const AGGRESSIVE_BUDGET: Duration = Duration::from_secs(9);
/// Standard alerts last as long as their tone, or this long when unknown.
pub const FALLBACK_BUDGET: Duration = Duration::from_secs(9);
pub const VIBRATION_PATTERN: [u64; 2] = [50, 100];
pub const HAPTIC_PERIOD: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterState {
    Idle,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    BudgetElapsed,
    ForceStopped,
    Acknowledged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Presented,
    Dropped,
}

struct ActiveAlert {
    session: u64,
    stop: Option<oneshot::Sender<()>>,
}

pub struct Presenter {
    platform: Platform,
    capabilities: Capabilities,
    store: Arc<Store>,
    active: Mutex<Option<ActiveAlert>>,
    last_exit: Mutex<Option<ExitReason>>,
    sessions: AtomicU64,
    activations: AtomicU64,
}

impl Presenter {
    pub fn new(platform: Platform, capabilities: Capabilities, store: Arc<Store>) -> Arc<Self> {
        Arc::new(Self {
            platform,
            capabilities,
            store,
            active: Mutex::new(None),
            last_exit: Mutex::new(None),
            sessions: AtomicU64::new(0),
            activations: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> PresenterState {
        if self.active.lock().is_some() {
            PresenterState::Active
        } else {
            PresenterState::Idle
        }
    }

    /// Number of alerts that reached `Active` since start.
    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn last_exit(&self) -> Option<ExitReason> {
        *self.last_exit.lock()
    }

    pub fn fire(self: &Arc<Self>, alert: Alert) -> FireOutcome {
        let (stop_tx, stop_rx) = oneshot::channel();
        let session = {
            let mut active = self.active.lock();
            if active.is_some() {
                debug!("presenter:: alert `{}` dropped, another alert is active", alert.title);
                return FireOutcome::Dropped;
            }
            let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
            *active = Some(ActiveAlert {
                session,
                stop: Some(stop_tx),
            });
            session
        };
        self.activations.fetch_add(1, Ordering::SeqCst);

        let profile: NotificationProfile = self.store.load();
        let budget = self.start_tone(profile);
        info!(
            "presenter:: alert `{}` active ({:?}, budget {:?})",
            alert.title, profile, budget
        );

        if self.capabilities.notifications {
            let notifier = Arc::clone(&self.platform.notifier);
            let notification = OsNotification {
                title: alert.title.clone(),
                body: alert.body.clone(),
                require_interaction: true,
            };
            tokio::spawn(async move {
                if let Err(e) = notifier.show(&notification).await {
                    warn!("presenter:: notification not shown: {}", e);
                }
            });
        }

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_session(session, alert, budget, stop_rx).await });
        FireOutcome::Presented
    }

    /// Ends the active alert now. Safe to call while idle. Returns whether an
    /// alert was stopped.
    pub fn force_stop(&self) -> bool {
        let Some(mut active) = self.active.lock().take() else {
            debug!("presenter:: force stop while idle");
            return false;
        };
        if let Some(stop) = active.stop.take() {
            stop.send(()).ok();
        }
        self.silence();
        *self.last_exit.lock() = Some(ExitReason::ForceStopped);
        info!("presenter:: alert force stopped");
        true
    }

    fn start_tone(&self, profile: NotificationProfile) -> Duration {
        let tone = &self.platform.tone;
        match profile {
            NotificationProfile::Aggressive => {
                if let Err(e) = tone.play(Tone::UrgentLoop, Playback::Looped) {
                    debug!("presenter:: tone unavailable: {}", e);
                }
                AGGRESSIVE_BUDGET
            }
            NotificationProfile::Standard => match tone.play(Tone::Chime, Playback::Once) {
                Ok(Some(length)) if !length.is_zero() => length,
                Ok(_) => FALLBACK_BUDGET,
                Err(e) => {
                    debug!("presenter:: tone unavailable: {}", e);
                    FALLBACK_BUDGET
                }
            },
        }
    }

    async fn run_session(
        self: Arc<Self>,
        session: u64,
        alert: Alert,
        budget: Duration,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        let message = format!(
            "{}: {}\nClick OK to dismiss, or use Force Stop.",
            alert.title, alert.body
        );
        let confirmation = Arc::clone(&self.platform.confirmation);
        let acknowledged = confirmation.confirm(&message);
        tokio::pin!(acknowledged);
        let deadline = tokio::time::sleep(budget);
        tokio::pin!(deadline);
        let mut pulses = tokio::time::interval(HAPTIC_PERIOD);
        let mut awaiting_ack = true;

        let reason = loop {
            tokio::select! {
                _ = &mut deadline => break ExitReason::BudgetElapsed,
                _ = &mut stop_rx => break ExitReason::ForceStopped,
                ok = &mut acknowledged, if awaiting_ack => {
                    if ok {
                        break ExitReason::Acknowledged;
                    }
                    awaiting_ack = false;
                }
                _ = pulses.tick(), if self.capabilities.vibration => {
                    if let Err(e) = self.platform.haptics.vibrate(&VIBRATION_PATTERN) {
                        debug!("presenter:: vibration failed: {}", e);
                    }
                }
            }
        };
        self.finish(session, reason);
    }

    fn finish(&self, session: u64, reason: ExitReason) {
        {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(current) if current.session == session => *active = None,
                // Already ended by force stop.
                _ => return,
            }
        }
        self.silence();
        *self.last_exit.lock() = Some(reason);
        info!("presenter:: alert ended ({:?})", reason);
    }

    fn silence(&self) {
        self.platform.tone.stop();
        if self.capabilities.vibration {
            self.platform.haptics.cancel();
        }
    }
}
