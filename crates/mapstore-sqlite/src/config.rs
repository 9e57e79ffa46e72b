//! Store tuning options, read from a TOML file such as `mapstore.toml`.
//!
//! ```toml
//! in_memory = true
//! cache_size = 10000
//! journal_mode = 3   # 0 DELETE, 1 TRUNCATE, 2 PERSIST, 3 MEMORY, 4 OFF
//! synchronous = 0    # 0 OFF, 1 NORMAL, 2 FULL
//! temp_store = 2     # 0 DEFAULT, 1 FILE, 2 MEMORY
//! ```
//!
//! Enumerated options are kept as the integers users write in the file.  An
//! out-of-range value is rejected with an error log and the previous value
//! stays in effect.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Errors raised while reading or writing a config file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Pragma enums
// ─────────────────────────────────────────────────────────────────────────────

/// `PRAGMA journal_mode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Off,
}

impl JournalMode {
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::Delete),
            1 => Some(Self::Truncate),
            2 => Some(Self::Persist),
            3 => Some(Self::Memory),
            4 => Some(Self::Off),
            _ => None,
        }
    }

    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Persist => "PERSIST",
            Self::Memory => "MEMORY",
            Self::Off => "OFF",
        }
    }
}

/// `PRAGMA synchronous` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synchronous {
    Off,
    Normal,
    Full,
}

impl Synchronous {
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::Off),
            1 => Some(Self::Normal),
            2 => Some(Self::Full),
            _ => None,
        }
    }

    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// `PRAGMA temp_store` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempStore {
    Default,
    File,
    Memory,
}

impl TempStore {
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::Default),
            1 => Some(Self::File),
            2 => Some(Self::Memory),
            _ => None,
        }
    }

    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::File => "FILE",
            Self::Memory => "MEMORY",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StoreConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Connection options of a [`MapStore`][crate::MapStore].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Work on an in-memory copy mirrored to the file on connect/disconnect.
    #[serde(default)]
    pub in_memory: bool,

    /// Page cache size in pages.
    #[serde(default = "default_cache_size")]
    pub cache_size: u32,

    #[serde(default = "default_journal_mode")]
    pub journal_mode: i32,

    #[serde(default = "default_synchronous")]
    pub synchronous: i32,

    #[serde(default = "default_temp_store")]
    pub temp_store: i32,
}

fn default_cache_size() -> u32 {
    10000
}
fn default_journal_mode() -> i32 {
    3
}
fn default_synchronous() -> i32 {
    0
}
fn default_temp_store() -> i32 {
    2
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            in_memory: false,
            cache_size: default_cache_size(),
            journal_mode: default_journal_mode(),
            synchronous: default_synchronous(),
            temp_store: default_temp_store(),
        }
    }
}

impl StoreConfig {
    /// Set the journal mode; returns `false` and keeps the previous value
    /// when `value` is out of range.
    pub fn set_journal_mode(&mut self, value: i32) -> bool {
        if JournalMode::from_index(value).is_none() {
            error!(value, "wrong journal mode");
            return false;
        }
        self.journal_mode = value;
        true
    }

    pub fn set_synchronous(&mut self, value: i32) -> bool {
        if Synchronous::from_index(value).is_none() {
            error!(value, "wrong synchronous value");
            return false;
        }
        self.synchronous = value;
        true
    }

    pub fn set_temp_store(&mut self, value: i32) -> bool {
        if TempStore::from_index(value).is_none() {
            error!(value, "wrong temp_store value");
            return false;
        }
        self.temp_store = value;
        true
    }

    pub fn journal_mode(&self) -> JournalMode {
        JournalMode::from_index(self.journal_mode).unwrap_or(JournalMode::Memory)
    }

    pub fn synchronous(&self) -> Synchronous {
        Synchronous::from_index(self.synchronous).unwrap_or(Synchronous::Off)
    }

    pub fn temp_store(&self) -> TempStore {
        TempStore::from_index(self.temp_store).unwrap_or(TempStore::Memory)
    }

    /// Replace out-of-range values read from a file by the defaults.
    fn sanitize(&mut self) {
        let defaults = Self::default();
        let (journal, sync, temp) = (self.journal_mode, self.synchronous, self.temp_store);
        self.journal_mode = defaults.journal_mode;
        self.synchronous = defaults.synchronous;
        self.temp_store = defaults.temp_store;
        self.set_journal_mode(journal);
        self.set_synchronous(sync);
        self.set_temp_store(temp);
    }
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<StoreConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut cfg: StoreConfig = toml::from_str(&raw)?;
    apply_env_overrides(&mut cfg);
    cfg.sanitize();
    Ok(Some(cfg))
}

/// Apply `MAPSTORE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MAPSTORE_IN_MEMORY` | `in_memory` |
/// | `MAPSTORE_CACHE_SIZE` | `cache_size` |
/// | `MAPSTORE_JOURNAL_MODE` | `journal_mode` |
/// | `MAPSTORE_SYNCHRONOUS` | `synchronous` |
/// | `MAPSTORE_TEMP_STORE` | `temp_store` |
///
/// Unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut StoreConfig) {
    if let Some(flag) = env_parse::<bool>("MAPSTORE_IN_MEMORY") {
        cfg.in_memory = flag;
    }
    if let Some(size) = env_parse::<u32>("MAPSTORE_CACHE_SIZE") {
        cfg.cache_size = size;
    }
    if let Some(mode) = env_parse::<i32>("MAPSTORE_JOURNAL_MODE") {
        cfg.set_journal_mode(mode);
    }
    if let Some(mode) = env_parse::<i32>("MAPSTORE_SYNCHRONOUS") {
        cfg.set_synchronous(mode);
    }
    if let Some(mode) = env_parse::<i32>("MAPSTORE_TEMP_STORE") {
        cfg.set_temp_store(mode);
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

/// Save the config to `path`, creating parent directories as needed.
pub fn save_to(cfg: &StoreConfig, path: &Path) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let raw = toml::to_string_pretty(cfg)?;
    fs::write(path, raw).map_err(io_err)?;
    Ok(())
}
