// Which instants each stored record alerts at. Pure functions of data and now.

use std::fmt;

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

use crate::models::{CalendarBook, DailyEntry, DayKey, PlannerData, Reminder, WeeklySchedule};

/// Daily entries alert 5h, 3h and 1h ahead and at the time itself.
pub const DAILY_LEAD_HOURS: [i64; 4] = [5, 3, 1, 0];
/// Weekly entries alert 7, 3 and 1 days ahead and at the time itself.
pub const WEEKLY_LEAD_DAYS: [i64; 4] = [7, 3, 1, 0];
/// Calendar events only carry a date; they alert at this local time.
pub const CALENDAR_ALERT_HOUR: u32 = 9;

pub const REMINDER_TITLE: &str = "Reminder";
pub const TASK_TITLE: &str = "Task Reminder";
pub const CALENDAR_TITLE: &str = "Calendar Event Reminder";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Positional identity of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    Reminder(usize),
    Daily(usize),
    Weekly(DayKey, usize),
    Calendar(NaiveDate, usize),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Reminder(idx) => write!(f, "reminder/{idx}"),
            RecordId::Daily(idx) => write!(f, "daily/{idx}"),
            RecordId::Weekly(day, idx) => write!(f, "weekly/{day}/{idx}"),
            RecordId::Calendar(date, idx) => write!(f, "calendar/{date}/{idx}"),
        }
    }
}

/// Idempotency key of one alert instant: a record and which of its lead
/// offsets the instant belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertKey {
    pub record: RecordId,
    pub lead_index: usize,
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.record, self.lead_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAlert {
    pub key: AlertKey,
    pub at: DateTime<Local>,
    pub title: String,
    pub body: String,
}

/// Every strictly-future alert instant derivable from `data` at `now`.
pub fn plan_alerts(data: &PlannerData, now: DateTime<Local>) -> Vec<PlannedAlert> {
    let mut plan = Vec::new();
    plan.extend(reminder_alerts(&data.reminders, now));
    plan.extend(daily_alerts(&data.daily, now));
    plan.extend(weekly_alerts(&data.weekly, now));
    plan.extend(calendar_alerts(&data.calendar, now));
    plan.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.key.cmp(&b.key)));
    plan
}

pub fn reminder_alerts(reminders: &[Reminder], now: DateTime<Local>) -> Vec<PlannedAlert> {
    reminders
        .iter()
        .enumerate()
        .filter_map(|(idx, reminder)| {
            let at = local_instant(reminder.due_at()?)?;
            (at > now).then(|| PlannedAlert {
                key: AlertKey {
                    record: RecordId::Reminder(idx),
                    lead_index: 0,
                },
                at,
                title: REMINDER_TITLE.to_string(),
                body: reminder.task.clone(),
            })
        })
        .collect()
}

/// Daily entries recur "today": only today's instants are ever planned.
pub fn daily_alerts(entries: &[DailyEntry], now: DateTime<Local>) -> Vec<PlannedAlert> {
    let today = now.date_naive();
    let mut plan = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        let Some(time) = entry.time.filter(|_| entry.reminder) else {
            continue;
        };
        let Some(due) = local_instant(today.and_time(time)) else {
            continue;
        };
        let body = format!("{} ({})", entry.task, time.format("%H:%M"));
        let leads = DAILY_LEAD_HOURS.iter().map(|h| Duration::hours(*h));
        plan.extend(lead_alerts(RecordId::Daily(idx), due, leads, now, TASK_TITLE, &body));
    }
    plan
}

pub fn weekly_alerts(schedule: &WeeklySchedule, now: DateTime<Local>) -> Vec<PlannedAlert> {
    let mut plan = Vec::new();
    for (day, entries) in schedule.iter() {
        for (idx, entry) in entries.iter().enumerate() {
            if !entry.reminder {
                continue;
            }
            // Rows without a date or time yet have nothing to alert on.
            let Some(naive) = entry.due_at() else {
                continue;
            };
            let Some(due) = local_instant(naive) else {
                continue;
            };
            let body = format!("{} ({})", entry.task, naive.format("%Y-%m-%d %H:%M"));
            let leads = WEEKLY_LEAD_DAYS.iter().map(|d| Duration::days(*d));
            plan.extend(lead_alerts(
                RecordId::Weekly(day, idx),
                due,
                leads,
                now,
                TASK_TITLE,
                &body,
            ));
        }
    }
    plan
}

pub fn calendar_alerts(book: &CalendarBook, now: DateTime<Local>) -> Vec<PlannedAlert> {
    let alert_time = NaiveTime::from_hms_opt(CALENDAR_ALERT_HOUR, 0, 0).unwrap_or(NaiveTime::MIN);
    let mut plan = Vec::new();
    for (date, events) in &book.0 {
        for (idx, event) in events.iter().enumerate() {
            if !event.reminder {
                continue;
            }
            let Some(at) = local_instant(date.and_time(alert_time)) else {
                continue;
            };
            if at > now {
                plan.push(PlannedAlert {
                    key: AlertKey {
                        record: RecordId::Calendar(*date, idx),
                        lead_index: 0,
                    },
                    at,
                    title: CALENDAR_TITLE.to_string(),
                    body: event.text.clone(),
                });
            }
        }
    }
    plan
}

/// Drops reminders whose due instant is strictly before `now`. Returns how
/// many were removed.
pub fn sweep_expired(reminders: &mut Vec<Reminder>, now: DateTime<Local>) -> usize {
    let before = reminders.len();
    reminders.retain(|reminder| match reminder.due_at().and_then(local_instant) {
        Some(at) => at >= now,
        None => true,
    });
    before - reminders.len()
}

fn lead_alerts(
    record: RecordId,
    due: DateTime<Local>,
    leads: impl Iterator<Item = Duration>,
    now: DateTime<Local>,
    title: &str,
    body: &str,
) -> Vec<PlannedAlert> {
    leads
        .enumerate()
        .filter_map(|(lead_index, lead)| {
            let at = due - lead;
            (at > now).then(|| PlannedAlert {
                key: AlertKey {
                    record: record.clone(),
                    lead_index,
                },
                at,
                title: title.to_string(),
                body: body.to_string(),
            })
        })
        .collect()
}

/// Local wall-clock times skipped by a DST transition have no instant.
fn local_instant(naive: NaiveDateTime) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&naive).earliest()
}
