// One JSON document per key. Reads never fail: missing keys load the empty
// default and unparseable values are purged and reported once.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, warn};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::models::{
    AutoDelete, CalendarBook, DailyEntry, NotificationProfile, PlannerData, PushRegistration,
    Reminder, WeeklySchedule,
};

pub const KEY_REMINDERS: &str = "planner_reminders";
pub const KEY_DAILY: &str = "planner_daily";
pub const KEY_WEEKLY: &str = "planner_weekly";
pub const KEY_CALENDAR: &str = "planner_calendar_events";
pub const KEY_PROFILE: &str = "planner_notification_profile";
pub const KEY_AUTO_DELETE: &str = "planner_reminders_autodelete";
pub const KEY_PUSH_REGISTRATION: &str = "planner_push_registration";

pub const ALL_KEYS: [&str; 7] = [
    KEY_REMINDERS,
    KEY_DAILY,
    KEY_WEEKLY,
    KEY_CALENDAR,
    KEY_PROFILE,
    KEY_AUTO_DELETE,
    KEY_PUSH_REGISTRATION,
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] io::Error),
    #[error("storage quota exceeded ({needed} bytes needed, {quota} allowed)")]
    QuotaExceeded { needed: u64, quota: u64 },
    #[error("stored bytes are not UTF-8: {0}")]
    NotUtf8(#[from] std::string::FromUtf8Error),
    #[error("could not encode `{key}`: {source}")]
    Encode {
        key: &'static str,
        source: serde_json::Error,
    },
}

/// A value persisted under a fixed key.
pub trait Collection: Serialize + DeserializeOwned + Default {
    const KEY: &'static str;
}

impl Collection for Vec<Reminder> {
    const KEY: &'static str = KEY_REMINDERS;
}

impl Collection for Vec<DailyEntry> {
    const KEY: &'static str = KEY_DAILY;
}

impl Collection for WeeklySchedule {
    const KEY: &'static str = KEY_WEEKLY;
}

impl Collection for CalendarBook {
    const KEY: &'static str = KEY_CALENDAR;
}

impl Collection for NotificationProfile {
    const KEY: &'static str = KEY_PROFILE;
}

impl Collection for AutoDelete {
    const KEY: &'static str = KEY_AUTO_DELETE;
}

impl Collection for PushRegistration {
    const KEY: &'static str = KEY_PUSH_REGISTRATION;
}

pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWarning {
    Corrupted { key: &'static str },
    StorageUnavailable { reason: String },
}

impl fmt::Display for StoreWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreWarning::Corrupted { key } => write!(
                f,
                "Saved data under `{key}` was unreadable and has been reset. \
                 This can happen after clearing site data or in private browsing."
            ),
            StoreWarning::StorageUnavailable { reason } => write!(
                f,
                "Changes could not be saved ({reason}). They are kept until the planner is closed."
            ),
        }
    }
}

/// Receives user-visible, non-blocking storage warnings.
pub trait WarningSink: Send + Sync {
    fn warn(&self, warning: &StoreWarning);
}

pub struct LogWarnings;

impl WarningSink for LogWarnings {
    fn warn(&self, warning: &StoreWarning) {
        warn!("store:: {}", warning);
    }
}

#[derive(Hash, PartialEq, Eq)]
enum WarnOnce {
    Corrupted(&'static str),
    StorageFailure,
}

pub struct Store {
    backend: Arc<dyn StorageBackend>,
    sink: Arc<dyn WarningSink>,
    overlay: Mutex<HashMap<&'static str, String>>,
    last_seen: Mutex<HashMap<&'static str, Option<String>>>,
    warned: Mutex<HashSet<WarnOnce>>,
    generation: watch::Sender<u64>,
}

impl Store {
    pub fn new(backend: Arc<dyn StorageBackend>, sink: Arc<dyn WarningSink>) -> Self {
        let (generation, _) = watch::channel(0);
        let store = Self {
            backend,
            sink,
            overlay: Mutex::new(HashMap::new()),
            last_seen: Mutex::new(HashMap::new()),
            warned: Mutex::new(HashSet::new()),
            generation,
        };
        let snapshot = store.read_all_raw();
        *store.last_seen.lock() = snapshot;
        store
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()), Arc::new(LogWarnings))
    }

    pub fn load<T: Collection>(&self) -> T {
        if let Some(raw) = self.overlay.lock().get(T::KEY).cloned() {
            return serde_json::from_str(&raw).unwrap_or_default();
        }

        let raw = match self.backend.get(T::KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return T::default(),
            Err(StoreError::NotUtf8(e)) => {
                warn!("store:: `{}` is corrupted ({}), purging", T::KEY, e);
                self.purge(T::KEY);
                return T::default();
            }
            Err(e) => {
                error!("store:: failed to read `{}`: {}", T::KEY, e);
                self.warn_once(
                    WarnOnce::StorageFailure,
                    StoreWarning::StorageUnavailable {
                        reason: e.to_string(),
                    },
                );
                return T::default();
            }
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("store:: `{}` is corrupted ({}), purging", T::KEY, e);
                self.purge(T::KEY);
                T::default()
            }
        }
    }

    /// Writes the whole value. On failure the value stays visible to this
    /// process through the session overlay and the error is returned for
    /// logging; it never needs to be propagated further.
    pub fn save<T: Collection>(&self, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            key: T::KEY,
            source,
        })?;

        let result = self.backend.set(T::KEY, &raw);
        match &result {
            Ok(()) => {
                self.overlay.lock().remove(T::KEY);
                debug!("store:: saved `{}` ({} bytes)", T::KEY, raw.len());
            }
            Err(e) => {
                error!("store:: failed to save `{}`: {}", T::KEY, e);
                self.warn_once(
                    WarnOnce::StorageFailure,
                    StoreWarning::StorageUnavailable {
                        reason: e.to_string(),
                    },
                );
                self.overlay.lock().insert(T::KEY, raw.clone());
            }
        }
        self.last_seen.lock().insert(T::KEY, Some(raw));
        self.bump();
        result
    }

    pub fn snapshot(&self) -> PlannerData {
        PlannerData {
            reminders: self.load(),
            daily: self.load(),
            weekly: self.load(),
            calendar: self.load(),
        }
    }

    /// Generation counter bumped on every save and on every external change
    /// picked up by [`Store::refresh`].
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Re-reads every key and reports whether another writer changed any of
    /// them since this process last looked.
    pub fn refresh(&self) -> bool {
        let current = self.read_all_raw();
        let changed = {
            let mut last_seen = self.last_seen.lock();
            let changed = *last_seen != current;
            *last_seen = current;
            changed
        };
        if changed {
            debug!("store:: external change detected");
            self.bump();
        }
        changed
    }

    fn read_all_raw(&self) -> HashMap<&'static str, Option<String>> {
        ALL_KEYS
            .iter()
            .map(|key| (*key, self.backend.get(key).ok().flatten()))
            .collect()
    }

    fn purge(&self, key: &'static str) {
        if let Err(e) = self.backend.remove(key) {
            error!("store:: failed to purge `{}`: {}", key, e);
        }
        self.last_seen.lock().insert(key, None);
        self.warn_once(WarnOnce::Corrupted(key), StoreWarning::Corrupted { key });
    }

    fn warn_once(&self, once: WarnOnce, warning: StoreWarning) {
        if self.warned.lock().insert(once) {
            self.sink.warn(&warning);
        }
    }

    fn bump(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }
}

/// One `<key>.json` file per key inside a directory.
pub struct FileBackend {
    dir: PathBuf,
    quota: Option<u64>,
}

impl FileBackend {
    pub fn open(dir: impl AsRef<Path>, quota: Option<u64>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, quota })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn used_bytes_except(&self, key: &str) -> Result<u64, StoreError> {
        let skip = self.path(key);
        let mut total = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path == skip || path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            total += std::fs::metadata(&path)?.len();
        }
        Ok(total)
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match std::fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(String::from_utf8(bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(quota) = self.quota {
            let needed = self.used_bytes_except(key)? + value.len() as u64;
            if needed > quota {
                return Err(StoreError::QuotaExceeded { needed, quota });
            }
        }
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, self.path(key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
    quota: Option<u64>,
}

impl MemoryBackend {
    pub fn with_quota(quota: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota: Some(quota),
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if let Some(quota) = self.quota {
            let others: u64 = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len() as u64)
                .sum();
            let needed = others + value.len() as u64;
            if needed > quota {
                return Err(StoreError::QuotaExceeded { needed, quota });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
