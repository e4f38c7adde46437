use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A free-form reminder, optionally due at a local date and time.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Reminder {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_date")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_hhmm")]
    pub time: Option<NaiveTime>,
}

impl Reminder {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            date: None,
            time: None,
        }
    }

    pub fn due(task: impl Into<String>, due_at: NaiveDateTime) -> Self {
        Self {
            task: task.into(),
            date: Some(due_at.date()),
            time: Some(due_at.time()),
        }
    }

    /// Only a reminder carrying both a date and a time has a due instant.
    pub fn due_at(&self) -> Option<NaiveDateTime> {
        match (self.date, self.time) {
            (Some(date), Some(time)) => Some(date.and_time(time)),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DailyEntry {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_hhmm")]
    pub time: Option<NaiveTime>,
    #[serde(default)]
    pub reminder: bool,
}

/// The week editor saves half-filled rows, so both the time and the date may
/// be blank.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WeeklyEntry {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_hhmm")]
    pub time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_date")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub reminder: bool,
}

impl WeeklyEntry {
    pub fn due(task: impl Into<String>, due_at: NaiveDateTime) -> Self {
        Self {
            task: task.into(),
            time: Some(due_at.time()),
            date: Some(due_at.date()),
            reminder: true,
        }
    }

    pub fn due_at(&self) -> Option<NaiveDateTime> {
        Some(self.date?.and_time(self.time?))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DayKey {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayKey {
    pub const ALL: [DayKey; 7] = [
        DayKey::Monday,
        DayKey::Tuesday,
        DayKey::Wednesday,
        DayKey::Thursday,
        DayKey::Friday,
        DayKey::Saturday,
        DayKey::Sunday,
    ];

    pub fn from_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => DayKey::Monday,
            Weekday::Tue => DayKey::Tuesday,
            Weekday::Wed => DayKey::Wednesday,
            Weekday::Thu => DayKey::Thursday,
            Weekday::Fri => DayKey::Friday,
            Weekday::Sat => DayKey::Saturday,
            Weekday::Sun => DayKey::Sunday,
        }
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Weekly entries grouped into the seven day buckets. Every bucket is always
/// present, even when a stored value omits some of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeeklySchedule {
    buckets: BTreeMap<DayKey, Vec<WeeklyEntry>>,
}

impl WeeklySchedule {
    pub fn day(&self, day: DayKey) -> &[WeeklyEntry] {
        self.buckets.get(&day).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn day_mut(&mut self, day: DayKey) -> &mut Vec<WeeklyEntry> {
        self.buckets.entry(day).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DayKey, &[WeeklyEntry])> {
        self.buckets.iter().map(|(day, entries)| (*day, entries.as_slice()))
    }

    fn from_buckets(mut buckets: BTreeMap<DayKey, Vec<WeeklyEntry>>) -> Self {
        for day in DayKey::ALL {
            buckets.entry(day).or_default();
        }
        Self { buckets }
    }
}

impl Default for WeeklySchedule {
    fn default() -> Self {
        Self::from_buckets(BTreeMap::new())
    }
}

impl Serialize for WeeklySchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.buckets.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WeeklySchedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let buckets = BTreeMap::<DayKey, Vec<WeeklyEntry>>::deserialize(deserializer)?;
        Ok(Self::from_buckets(buckets))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "StoredEvent")]
pub struct CalendarEvent {
    pub text: String,
    pub reminder: bool,
}

/// Older calendars stored bare strings instead of event objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEvent {
    Text(String),
    Full {
        text: String,
        #[serde(default)]
        reminder: bool,
    },
}

impl From<StoredEvent> for CalendarEvent {
    fn from(stored: StoredEvent) -> Self {
        match stored {
            StoredEvent::Text(text) => CalendarEvent {
                text,
                reminder: false,
            },
            StoredEvent::Full { text, reminder } => CalendarEvent { text, reminder },
        }
    }
}

/// Calendar events keyed by ISO date.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct CalendarBook(pub BTreeMap<NaiveDate, Vec<CalendarEvent>>);

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationProfile {
    #[default]
    Standard,
    Aggressive,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct AutoDelete(pub bool);

/// Endpoint of the subscription last forwarded to the relay.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushRegistration {
    pub endpoint: Option<String>,
}

/// Everything the scheduler derives alert instants from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlannerData {
    pub reminders: Vec<Reminder>,
    pub daily: Vec<DailyEntry>,
    pub weekly: WeeklySchedule,
    pub calendar: CalendarBook,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    #[serde(default)]
    pub expiration_time: Option<f64>,
    pub keys: SubscriptionKeys,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotifyReport {
    pub sent: usize,
    pub total: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VapidKeyResponse {
    pub key: String,
}

pub(crate) fn parse_time(raw: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S%.f"))
}

/// `HH:MM` as time inputs produce it; seconds only when a time carries them.
pub(crate) fn format_time(time: &NaiveTime) -> String {
    use chrono::Timelike;
    if time.nanosecond() != 0 {
        time.format("%H:%M:%S%.f").to_string()
    } else if time.second() != 0 {
        time.format("%H:%M:%S").to_string()
    } else {
        time.format("%H:%M").to_string()
    }
}

/// Time inputs left blank are stored as `""`.
mod opt_hhmm {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        time: &Option<NaiveTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match time {
            Some(time) => serializer.serialize_str(&super::format_time(time)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) if !raw.trim().is_empty() => {
                super::parse_time(raw.trim()).map(Some).map_err(de::Error::custom)
            }
            _ => Ok(None),
        }
    }
}

mod opt_date {
    use chrono::NaiveDate;
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        date: &Option<NaiveDate>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        date.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDate>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) if !raw.trim().is_empty() => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map(Some)
                .map_err(de::Error::custom),
            _ => Ok(None),
        }
    }
}
