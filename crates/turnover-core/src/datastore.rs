use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::datetime::{format_date_key, parse_date_key};

pub const SELECTED_DATE_KEY: &str = "@cleaner_app/selected_date";

const STATE_FILE_NAME: &str = "state.json";

/// String key-value persistence, the shape of app-local async storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// All keys in one JSON object on disk, rewritten atomically.
#[derive(Debug)]
pub struct FileKeyValueStore {
    pub data_dir: PathBuf,
    pub state_path: PathBuf,
}

impl FileKeyValueStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let state_path = data_dir.join(STATE_FILE_NAME);
        if !state_path.exists() {
            fs::write(&state_path, "{}")?;
        }

        info!(
            data_dir = %data_dir.display(),
            state = %state_path.display(),
            "opened key-value store"
        );

        Ok(Self {
            data_dir,
            state_path,
        })
    }

    fn load_map(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let raw = fs::read_to_string(&self.state_path)
            .with_context(|| format!("failed reading {}", self.state_path.display()))?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", self.state_path.display()))
    }

    #[tracing::instrument(skip(self, map))]
    fn save_map(&self, map: &BTreeMap<String, String>) -> anyhow::Result<()> {
        debug!(file = %self.state_path.display(), keys = map.len(), "saving state atomically");

        let dir = self.state_path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        let serialized = serde_json::to_string_pretty(map)?;
        writeln!(temp, "{serialized}")?;
        temp.flush()?;

        temp.persist(&self.state_path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.state_path.display(), err))?;

        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.load_map()?.remove(key))
    }

    #[tracing::instrument(skip(self, value))]
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut map = self.load_map()?;
        map.insert(key.to_string(), value.to_string());
        self.save_map(&map)
    }

    #[tracing::instrument(skip(self))]
    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut map = self.load_map()?;
        if map.remove(key).is_some() {
            self.save_map(&map)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_map<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> anyhow::Result<T> {
        let mut map = self
            .map
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(f(&mut map))
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.with_map(|map| map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.with_map(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.with_map(|map| {
            map.remove(key);
        })
    }
}

/// The last day the user looked at, if one was stored and still parses.
pub fn load_selected_date(store: &dyn KeyValueStore) -> anyhow::Result<Option<NaiveDate>> {
    let Some(raw) = store.get(SELECTED_DATE_KEY)? else {
        return Ok(None);
    };
    match parse_date_key(&raw) {
        Some(date) => Ok(Some(date)),
        None => {
            warn!(value = %raw, "ignoring unparseable stored selected date");
            Ok(None)
        }
    }
}

pub fn save_selected_date(store: &dyn KeyValueStore, date: NaiveDate) -> anyhow::Result<()> {
    let key = format_date_key(date);
    debug!(date = %key, "persisting selected date");
    store
        .set(SELECTED_DATE_KEY, &key)
        .context("failed to persist selected date")
}

pub fn clear_selected_date(store: &dyn KeyValueStore) -> anyhow::Result<()> {
    store.remove(SELECTED_DATE_KEY)
}
