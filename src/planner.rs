// Every edit saves and then recomputes the armed timers.

use std::sync::Arc;

use chrono::NaiveDate;
use log::{debug, info};

use crate::capability::Capabilities;
use crate::models::{
    AutoDelete, CalendarBook, CalendarEvent, DailyEntry, DayKey, NotificationProfile, Reminder,
    WeeklyEntry, WeeklySchedule,
};
use crate::platform::Platform;
use crate::presenter::{Alert, FireOutcome, Presenter};
use crate::registration::PushRegistrar;
use crate::schedule::Clock;
use crate::scheduler::{RelayApi, Scheduler};
use crate::store::{Collection, Store};
use crate::worker::WorkerMessage;

pub struct Planner {
    store: Arc<Store>,
    scheduler: Arc<Scheduler>,
    presenter: Arc<Presenter>,
    capabilities: Capabilities,
}

impl Planner {
    /// Probes the host, sweeps expired reminders when auto-delete is on,
    /// registers for push and arms every pending alert. A relay that is down
    /// right now is still kept: broadcasts go out once it answers again and
    /// registration is retried on every recompute.
    pub async fn start(
        store: Arc<Store>,
        platform: Platform,
        relay: Option<Arc<dyn RelayApi>>,
        clock: Arc<dyn Clock>,
    ) -> Planner {
        let capabilities = Capabilities::probe(&platform, relay.as_deref()).await;
        let presenter = Presenter::new(platform.clone(), capabilities, Arc::clone(&store));
        let registrar = relay.as_ref().map(|relay| {
            PushRegistrar::new(Arc::clone(&store), Arc::clone(&platform.push), Arc::clone(relay))
        });
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            clock,
            Arc::clone(&presenter),
            relay,
            registrar.clone(),
        );

        scheduler.expire_reminders();
        if let Some(registrar) = &registrar {
            registrar.ensure().await;
        }

        let changes = store.subscribe();
        scheduler.recompute().await;
        tokio::spawn(Arc::clone(&scheduler).run(changes));
        info!("planner:: started with {:?}", capabilities);

        Planner {
            store,
            scheduler,
            presenter,
            capabilities,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn presenter(&self) -> &Arc<Presenter> {
        &self.presenter
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn commit<T: Collection>(&self, value: &T) {
        if let Err(e) = self.store.save(value) {
            debug!("planner:: {} kept in memory only: {}", T::KEY, e);
        }
        self.scheduler.recompute().await;
    }

    /// Newest first.
    pub async fn add_reminder(&self, reminder: Reminder) {
        let mut reminders: Vec<Reminder> = self.store.load();
        reminders.insert(0, reminder);
        self.commit(&reminders).await;
    }

    pub async fn edit_reminder(&self, index: usize, reminder: Reminder) -> bool {
        let mut reminders: Vec<Reminder> = self.store.load();
        let Some(slot) = reminders.get_mut(index) else {
            return false;
        };
        *slot = reminder;
        self.commit(&reminders).await;
        true
    }

    pub async fn delete_reminder(&self, index: usize) -> bool {
        let mut reminders: Vec<Reminder> = self.store.load();
        if index >= reminders.len() {
            return false;
        }
        reminders.remove(index);
        self.commit(&reminders).await;
        true
    }

    pub async fn add_daily(&self, entry: DailyEntry) {
        let mut daily: Vec<DailyEntry> = self.store.load();
        daily.push(entry);
        self.commit(&daily).await;
    }

    pub async fn edit_daily(&self, index: usize, entry: DailyEntry) -> bool {
        let mut daily: Vec<DailyEntry> = self.store.load();
        let Some(slot) = daily.get_mut(index) else {
            return false;
        };
        *slot = entry;
        self.commit(&daily).await;
        true
    }

    pub async fn delete_daily(&self, index: usize) -> bool {
        let mut daily: Vec<DailyEntry> = self.store.load();
        if index >= daily.len() {
            return false;
        }
        daily.remove(index);
        self.commit(&daily).await;
        true
    }

    pub async fn add_weekly(&self, day: DayKey, entry: WeeklyEntry) {
        let mut weekly: WeeklySchedule = self.store.load();
        weekly.day_mut(day).push(entry);
        self.commit(&weekly).await;
    }

    pub async fn edit_weekly(&self, day: DayKey, index: usize, entry: WeeklyEntry) -> bool {
        let mut weekly: WeeklySchedule = self.store.load();
        let Some(slot) = weekly.day_mut(day).get_mut(index) else {
            return false;
        };
        *slot = entry;
        self.commit(&weekly).await;
        true
    }

    pub async fn delete_weekly(&self, day: DayKey, index: usize) -> bool {
        let mut weekly: WeeklySchedule = self.store.load();
        let entries = weekly.day_mut(day);
        if index >= entries.len() {
            return false;
        }
        entries.remove(index);
        self.commit(&weekly).await;
        true
    }

    pub async fn add_event(&self, date: NaiveDate, event: CalendarEvent) {
        let mut book: CalendarBook = self.store.load();
        book.0.entry(date).or_default().push(event);
        self.commit(&book).await;
    }

    /// A date left without events is dropped from the book.
    pub async fn delete_event(&self, date: NaiveDate, index: usize) -> bool {
        let mut book: CalendarBook = self.store.load();
        let Some(events) = book.0.get_mut(&date) else {
            return false;
        };
        if index >= events.len() {
            return false;
        }
        events.remove(index);
        if events.is_empty() {
            book.0.remove(&date);
        }
        self.commit(&book).await;
        true
    }

    pub fn profile(&self) -> NotificationProfile {
        self.store.load()
    }

    pub fn set_profile(&self, profile: NotificationProfile) {
        if let Err(e) = self.store.save(&profile) {
            debug!("planner:: profile kept in memory only: {}", e);
        }
    }

    /// Returns the number of reminders swept when turning it on.
    pub async fn set_auto_delete(&self, enabled: bool) -> usize {
        self.commit(&AutoDelete(enabled)).await;
        if !enabled {
            return 0;
        }
        let removed = self.scheduler.expire_reminders();
        if removed > 0 {
            self.scheduler.recompute().await;
        }
        removed
    }

    pub fn force_stop(&self) -> bool {
        self.presenter.force_stop()
    }

    /// The worker relays pushes to visible pages, including the echo of an
    /// alert this page fired itself. Those echoes are dropped.
    pub fn handle_worker_message(&self, message: WorkerMessage) -> FireOutcome {
        match message {
            WorkerMessage::AlertFired { title, body } => {
                if self.scheduler.fired_recently(&title, &body) {
                    debug!("planner:: `{}` already sounded here", title);
                    return FireOutcome::Dropped;
                }
                self.presenter.fire(Alert { title, body })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless;
    use crate::schedule::SystemClock;
    use chrono::{Duration, Local};

    async fn planner() -> Planner {
        Planner::start(
            Arc::new(Store::in_memory()),
            headless::platform(),
            None,
            Arc::new(SystemClock),
        )
        .await
    }

    #[tokio::test]
    async fn edits_rearm_the_scheduler() {
        let planner = planner().await;
        let due = (Local::now() + Duration::hours(1)).naive_local();
        planner.add_reminder(Reminder::due("Call Sam", due)).await;
        assert_eq!(planner.scheduler().armed_keys().await.len(), 1);

        planner.add_reminder(Reminder::new("no time")).await;
        // newest first, the timed reminder moved to index 1
        let keys = planner.scheduler().armed_keys().await;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].to_string(), "reminder/1#0");

        assert!(planner.delete_reminder(1).await);
        assert!(planner.scheduler().armed_keys().await.is_empty());
        assert!(!planner.delete_reminder(5).await);
    }

    #[tokio::test]
    async fn empty_calendar_dates_are_dropped() {
        let planner = planner().await;
        let date = NaiveDate::from_ymd_opt(2030, 1, 2).unwrap();
        planner
            .add_event(date, CalendarEvent { text: "Dentist".into(), reminder: true })
            .await;
        assert_eq!(planner.scheduler().armed_keys().await.len(), 1);

        assert!(planner.delete_event(date, 0).await);
        assert!(planner.store().load::<CalendarBook>().0.is_empty());
        assert!(planner.scheduler().armed_keys().await.is_empty());
    }

    #[tokio::test]
    async fn enabling_auto_delete_sweeps_past_reminders() {
        let planner = planner().await;
        let past = (Local::now() - Duration::hours(1)).naive_local();
        planner.add_reminder(Reminder::due("old", past)).await;
        planner.add_reminder(Reminder::new("undated")).await;

        assert_eq!(planner.set_auto_delete(true).await, 1);
        assert_eq!(planner.store().load::<Vec<Reminder>>(), vec![Reminder::new("undated")]);
        assert_eq!(planner.set_auto_delete(false).await, 0);
    }
}
