// Notification scheduling and delivery for a local-first planner: the page
// context in `planner`, the offline agent in `worker`, the push relay in `relay`.

pub mod capability;
pub mod config;
pub mod headless;
pub mod logging;
pub mod models;
pub mod planner;
pub mod platform;
pub mod presenter;
pub mod registration;
pub mod relay;
pub mod relay_client;
pub mod routes;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod vapid;
pub mod webpush;
pub mod worker;

pub use capability::Capabilities;
pub use models::{
    AlertPayload, AutoDelete, CalendarBook, CalendarEvent, DailyEntry, DayKey,
    NotificationProfile, PlannerData, PushSubscription, Reminder, WeeklyEntry, WeeklySchedule,
};
pub use planner::Planner;
pub use presenter::{ExitReason, FireOutcome, Presenter, PresenterState};
pub use scheduler::{RelayApi, Scheduler};
pub use store::{Store, StoreError};
