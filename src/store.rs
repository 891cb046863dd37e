//! Flat JSON files holding registered users and their last seen week.
//!
//! Both files are a single JSON object keyed by chat id. Files are rewritten
//! in full on every change through a temp file and a rename, so a crash
//! mid-write leaves the previous version in place.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads a JSON object from `path`.
///
/// A missing file is an empty map. An unreadable or corrupt file is also an
/// empty map, but logged, since the next save will overwrite it.
fn read_map<V: DeserializeOwned>(path: &Path) -> BTreeMap<String, V> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read store file, starting empty");
            return BTreeMap::new();
        }
    };

    match serde_json::from_str(&data) {
        Ok(map) => map,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt store file, starting empty");
            BTreeMap::new()
        }
    }
}

fn write_map<V: Serialize>(path: &Path, map: &BTreeMap<String, V>) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(map).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, &bytes).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Registered users: chat id → birthdate.
#[derive(Debug, Default)]
pub struct UserStore {
    path: PathBuf,
    users: BTreeMap<String, NaiveDate>,
}

impl UserStore {
    /// Loads the store. Entries whose birthdate is not `YYYY-MM-DD` are
    /// skipped with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let raw: BTreeMap<String, String> = read_map(&path);

        let mut users = BTreeMap::new();
        for (user, birthdate) in raw {
            match NaiveDate::parse_from_str(&birthdate, DATE_FORMAT) {
                Ok(date) => {
                    users.insert(user, date);
                }
                Err(e) => {
                    warn!(user = %user, value = %birthdate, error = %e, "skipping stored user with invalid birthdate");
                }
            }
        }

        Self { path, users }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, user: &str) -> Option<NaiveDate> {
        self.users.get(user).copied()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NaiveDate)> {
        self.users.iter().map(|(user, date)| (user.as_str(), *date))
    }

    /// Stores `birthdate` and rewrites the file. On a write failure the
    /// previous value is restored and the error returned.
    pub fn set(&mut self, user: &str, birthdate: NaiveDate) -> Result<(), StoreError> {
        let previous = self.users.insert(user.to_string(), birthdate);
        if let Err(e) = self.save() {
            match previous {
                Some(date) => self.users.insert(user.to_string(), date),
                None => self.users.remove(user),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Removes the user and rewrites the file. Returns whether the user was
    /// registered; a write failure restores the entry.
    pub fn remove(&mut self, user: &str) -> Result<bool, StoreError> {
        let Some(previous) = self.users.remove(user) else {
            return Ok(false);
        };
        if let Err(e) = self.save() {
            self.users.insert(user.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    fn save(&self) -> Result<(), StoreError> {
        let raw: BTreeMap<String, String> = self
            .users
            .iter()
            .map(|(user, date)| (user.clone(), date.format(DATE_FORMAT).to_string()))
            .collect();
        write_map(&self.path, &raw)
    }
}

/// Last `weeks_lived` the daily job saw per user.
///
/// Without a backing file the watermarks only live as long as the process,
/// and a restart sends every user a fresh chart on the next run.
#[derive(Debug, Default)]
pub struct WatermarkStore {
    path: Option<PathBuf>,
    weeks: BTreeMap<String, u64>,
}

impl WatermarkStore {
    pub fn open(path: Option<PathBuf>) -> Self {
        let weeks = path.as_deref().map(read_map).unwrap_or_default();
        Self { path, weeks }
    }

    pub fn get(&self, user: &str) -> Option<u64> {
        self.weeks.get(user).copied()
    }

    pub fn set(&mut self, user: &str, weeks_lived: u64) {
        self.weeks.insert(user.to_string(), weeks_lived);
    }

    pub fn remove(&mut self, user: &str) -> bool {
        self.weeks.remove(user).is_some()
    }

    /// Drops watermarks of users not accepted by `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.weeks.retain(|user, _| keep(user));
    }

    pub fn save(&self) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => write_map(path, &self.weeks),
            None => Ok(()),
        }
    }
}

/// Both stores, owned together by the bot and the daily job.
#[derive(Debug, Default)]
pub struct Registry {
    pub users: UserStore,
    pub watermarks: WatermarkStore,
}

impl Registry {
    pub fn open(users_file: impl Into<PathBuf>, watermark_file: Option<PathBuf>) -> Self {
        let users = UserStore::open(users_file);
        let watermarks = WatermarkStore::open(watermark_file);
        Self { users, watermarks }
    }

    /// Forgets the user and their watermark, so a new registration starts
    /// with a fresh chart.
    pub fn unregister(&mut self, user: &str) -> Result<bool, StoreError> {
        let removed = self.users.remove(user)?;
        if removed && self.watermarks.remove(user) {
            if let Err(e) = self.watermarks.save() {
                warn!(user = %user, error = %e, "failed to persist watermarks after reset");
            }
        }
        Ok(removed)
    }
}
