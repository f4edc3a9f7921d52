#![forbid(unsafe_code)]

//! Column and order preference persistence.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   RegistryPreferenceStore                     │
//! │   - PreferenceStore impl used by the extensions               │
//! │   - Keys: "<namespace>::columns", "<namespace>::order"        │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    PreferenceRegistry                         │
//! │   - In-memory cache with dirty tracking                       │
//! │   - Flushes to a StorageBackend                               │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     StorageBackend                            │
//! │   - MemoryStorage: in-memory (testing, ephemeral)             │
//! │   - FileStorage: JSON file (requires state-persistence)       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Invariants
//!
//! 1. **Best effort**: the [`PreferenceStore`] surface never fails; storage
//!    errors are logged and the grid keeps its in-memory state.
//! 2. **Atomic writes**: file storage writes a temp file and renames it.
//! 3. **Partial load tolerance**: an undecodable entry is skipped, the rest
//!    still load.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | `StorageError::Io` | File I/O failure | Returns error, cache unaffected |
//! | `StorageError::Serialization` | JSON encode/decode | Entry skipped, logged |
//! | `StorageError::Corruption` | Invalid file format | Load returns partial data |
//! | Version mismatch | Stored by an incompatible build | Entry ignored |

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use dgrid_core::{Grid, PreferenceStore};
use serde_json::Value;

/// Errors from preference storage.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error during file operations.
    Io(std::io::Error),
    /// JSON encode/decode failure.
    Serialization(String),
    /// Stored data has an unexpected shape.
    Corruption(String),
    /// Backend cannot be used.
    Unavailable(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "I/O error: {e}"),
            StorageError::Serialization(msg) => write!(f, "serialization error: {msg}"),
            StorageError::Corruption(msg) => write!(f, "storage corruption: {msg}"),
            StorageError::Unavailable(msg) => write!(f, "storage unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            StorageError::Serialization(_)
            | StorageError::Corruption(_)
            | StorageError::Unavailable(_) => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// One stored preference value.
#[derive(Clone, Debug, PartialEq)]
pub struct PreferenceEntry {
    /// Canonical key (`<namespace>::columns`).
    pub key: String,
    /// Schema version of `value`.
    pub version: u32,
    /// The preference itself.
    pub value: Value,
}

/// Pluggable persistence for preference entries.
pub trait StorageBackend {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Load every stored entry.
    fn load_all(&self) -> StorageResult<HashMap<String, PreferenceEntry>>;

    /// Replace the stored entries.
    fn save_all(&self, entries: &HashMap<String, PreferenceEntry>) -> StorageResult<()>;

    /// Remove every stored entry.
    fn clear(&self) -> StorageResult<()>;

    /// Whether the backend can currently be used.
    fn is_available(&self) -> bool {
        true
    }
}

/// In-memory backend. Clones share the same entries.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Rc<RefCell<HashMap<String, PreferenceEntry>>>,
}

impl MemoryStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage pre-populated with entries.
    #[must_use]
    pub fn with_entries(entries: HashMap<String, PreferenceEntry>) -> Self {
        Self {
            data: Rc::new(RefCell::new(entries)),
        }
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }
}

impl StorageBackend for MemoryStorage {
    fn name(&self) -> &str {
        "MemoryStorage"
    }

    fn load_all(&self) -> StorageResult<HashMap<String, PreferenceEntry>> {
        Ok(self.data.borrow().clone())
    }

    fn save_all(&self, entries: &HashMap<String, PreferenceEntry>) -> StorageResult<()> {
        *self.data.borrow_mut() = entries.clone();
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.data.borrow_mut().clear();
        Ok(())
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(feature = "state-persistence")]
mod file_storage {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::fs::{self, File};
    use std::io::{BufReader, BufWriter, Write};
    use std::path::{Path, PathBuf};

    #[derive(Serialize, Deserialize)]
    struct PreferenceFile {
        format_version: u32,
        entries: HashMap<String, FileEntry>,
    }

    #[derive(Serialize, Deserialize)]
    struct FileEntry {
        version: u32,
        value: Value,
    }

    impl PreferenceFile {
        const FORMAT_VERSION: u32 = 1;
    }

    /// JSON file backend.
    ///
    /// ```json
    /// {
    ///   "format_version": 1,
    ///   "entries": {
    ///     "campaigns::columns": { "version": 1, "value": { "cpc": true } }
    ///   }
    /// }
    /// ```
    ///
    /// Writes go to `{path}.tmp` and are renamed over `{path}`.
    pub struct FileStorage {
        path: PathBuf,
    }

    impl FileStorage {
        /// Storage at `path`; the file is created on first save.
        #[must_use]
        pub fn new(path: impl AsRef<Path>) -> Self {
            Self {
                path: path.as_ref().to_path_buf(),
            }
        }

        /// Storage under `$XDG_STATE_HOME/dgrid/{app_name}/preferences.json`.
        #[must_use]
        pub fn default_for_app(app_name: &str) -> Self {
            let path = state_dir()
                .join("dgrid")
                .join(app_name)
                .join("preferences.json");
            Self { path }
        }

        /// Location of the preference file.
        #[must_use]
        pub fn path(&self) -> &Path {
            &self.path
        }

        fn temp_path(&self) -> PathBuf {
            let mut tmp = self.path.clone();
            tmp.set_extension("json.tmp");
            tmp
        }
    }

    fn state_dir() -> PathBuf {
        if let Ok(state_home) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(state_home);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("state");
        }
        PathBuf::from(".")
    }

    impl StorageBackend for FileStorage {
        fn name(&self) -> &str {
            "FileStorage"
        }

        fn load_all(&self) -> StorageResult<HashMap<String, PreferenceEntry>> {
            if !self.path.exists() {
                return Ok(HashMap::new());
            }

            let reader = BufReader::new(File::open(&self.path)?);
            let raw: Value = serde_json::from_reader(reader).map_err(|e| {
                StorageError::Serialization(format!("failed to parse preference file: {e}"))
            })?;

            let version = raw
                .get("format_version")
                .and_then(Value::as_u64)
                .ok_or_else(|| StorageError::Corruption("missing format_version".into()))?;
            if version != u64::from(PreferenceFile::FORMAT_VERSION) {
                tracing::warn!(
                    stored = version,
                    expected = PreferenceFile::FORMAT_VERSION,
                    "preference file format version mismatch, ignoring stored preferences"
                );
                return Ok(HashMap::new());
            }

            let Some(Value::Object(entries)) = raw.get("entries") else {
                return Err(StorageError::Corruption("entries is not an object".into()));
            };

            let mut result = HashMap::new();
            for (key, entry) in entries {
                match serde_json::from_value::<FileEntry>(entry.clone()) {
                    Ok(entry) => {
                        result.insert(
                            key.clone(),
                            PreferenceEntry {
                                key: key.clone(),
                                version: entry.version,
                                value: entry.value,
                            },
                        );
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "failed to decode preference entry, skipping");
                    }
                }
            }
            Ok(result)
        }

        fn save_all(&self, entries: &HashMap<String, PreferenceEntry>) -> StorageResult<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }

            let file = PreferenceFile {
                format_version: PreferenceFile::FORMAT_VERSION,
                entries: entries
                    .iter()
                    .map(|(key, entry)| {
                        (
                            key.clone(),
                            FileEntry {
                                version: entry.version,
                                value: entry.value.clone(),
                            },
                        )
                    })
                    .collect(),
            };

            let tmp_path = self.temp_path();
            {
                let mut writer = BufWriter::new(File::create(&tmp_path)?);
                serde_json::to_writer_pretty(&mut writer, &file)?;
                writer.flush()?;
                writer.get_ref().sync_all()?;
            }
            fs::rename(&tmp_path, &self.path)?;

            tracing::debug!(
                path = %self.path.display(),
                entries = entries.len(),
                "saved grid preferences"
            );
            Ok(())
        }

        fn clear(&self) -> StorageResult<()> {
            if self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            Ok(())
        }

        fn is_available(&self) -> bool {
            self.path
                .parent()
                .is_some_and(|parent| parent.exists() || fs::create_dir_all(parent).is_ok())
        }
    }

    impl fmt::Debug for FileStorage {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("FileStorage")
                .field("path", &self.path)
                .finish()
        }
    }
}

#[cfg(feature = "state-persistence")]
pub use file_storage::FileStorage;

/// Cache of preference entries in front of a [`StorageBackend`].
pub struct PreferenceRegistry {
    backend: Box<dyn StorageBackend>,
    cache: RefCell<HashMap<String, PreferenceEntry>>,
    dirty: Cell<bool>,
}

impl PreferenceRegistry {
    /// Registry over `backend`. Call [`load`](Self::load) to read stored state.
    #[must_use]
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend,
            cache: RefCell::new(HashMap::new()),
            dirty: Cell::new(false),
        }
    }

    /// Registry over a fresh [`MemoryStorage`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::new()))
    }

    /// Registry over a JSON file.
    #[cfg(feature = "state-persistence")]
    #[must_use]
    pub fn with_file(path: impl AsRef<std::path::Path>) -> Self {
        Self::new(Box::new(FileStorage::new(path)))
    }

    /// Replace the cache with the stored entries.
    pub fn load(&self) -> StorageResult<usize> {
        let entries = self.backend.load_all()?;
        let count = entries.len();
        *self.cache.borrow_mut() = entries;
        self.dirty.set(false);
        tracing::debug!(backend = %self.backend.name(), count, "loaded grid preferences");
        Ok(count)
    }

    /// Write the cache if it changed since the last load or flush.
    ///
    /// Returns `Ok(true)` if data was written.
    pub fn flush(&self) -> StorageResult<bool> {
        if !self.dirty.get() {
            return Ok(false);
        }
        self.backend.save_all(&self.cache.borrow())?;
        self.dirty.set(false);
        Ok(true)
    }

    /// Entry stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<PreferenceEntry> {
        self.cache.borrow().get(key).cloned()
    }

    /// Store `value` under `key`. Marks the registry dirty.
    pub fn set(&self, key: impl Into<String>, version: u32, value: Value) {
        let key = key.into();
        self.cache.borrow_mut().insert(
            key.clone(),
            PreferenceEntry {
                key,
                version,
                value,
            },
        );
        self.dirty.set(true);
    }

    /// Remove the entry under `key`.
    pub fn remove(&self, key: &str) -> Option<PreferenceEntry> {
        let removed = self.cache.borrow_mut().remove(key);
        if removed.is_some() {
            self.dirty.set(true);
        }
        removed
    }

    /// Clear both cache and backend.
    pub fn clear(&self) -> StorageResult<()> {
        self.backend.clear()?;
        self.cache.borrow_mut().clear();
        self.dirty.set(false);
        Ok(())
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether there are unflushed changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Cached keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.cache.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Wrap in `Rc` for sharing between grids.
    #[must_use]
    pub fn shared(self) -> Rc<Self> {
        Rc::new(self)
    }
}

impl fmt::Debug for PreferenceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreferenceRegistry")
            .field("backend", &self.backend.name())
            .field("entries", &self.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

/// Schema version of the stored column and order values.
pub const PREFERENCE_VERSION: u32 = 1;

/// [`PreferenceStore`] backed by a shared [`PreferenceRegistry`].
///
/// Columns are stored as `{field: visible}` for every non-permanent column;
/// the order as its signed string. Every save flushes.
#[derive(Debug, Clone)]
pub struct RegistryPreferenceStore {
    registry: Rc<PreferenceRegistry>,
}

impl RegistryPreferenceStore {
    #[must_use]
    pub fn new(registry: Rc<PreferenceRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Rc<PreferenceRegistry> {
        &self.registry
    }

    fn key(grid: &Grid, suffix: &str) -> String {
        format!("{}::{suffix}", grid.meta.options.namespace)
    }

    fn current(&self, key: &str) -> Option<Value> {
        let entry = self.registry.get(key)?;
        if entry.version != PREFERENCE_VERSION {
            tracing::debug!(key, version = entry.version, "ignoring preference with old version");
            return None;
        }
        Some(entry.value)
    }

    fn store(&self, key: String, value: Value) {
        tracing::debug!(key = %key, "saving grid preference");
        self.registry.set(key, PREFERENCE_VERSION, value);
        if let Err(e) = self.registry.flush() {
            tracing::warn!(error = %e, "failed to flush grid preferences");
        }
    }
}

impl PreferenceStore for RegistryPreferenceStore {
    fn load_columns(&self, grid: &mut Grid) -> bool {
        let key = Self::key(grid, "columns");
        let Some(value) = self.current(&key) else {
            return false;
        };
        let stored: BTreeMap<String, bool> = match serde_json::from_value(value) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to decode stored columns");
                return false;
            }
        };
        for column in &mut grid.header.columns {
            if column.data.permanent {
                continue;
            }
            if let Some(&visible) = stored.get(&column.field) {
                column.visible = visible;
            }
        }
        tracing::debug!(key = %key, columns = stored.len(), "loaded column preferences");
        true
    }

    fn save_columns(&self, grid: &Grid) {
        let stored: serde_json::Map<String, Value> = grid
            .header
            .columns
            .iter()
            .filter(|c| !c.data.permanent)
            .map(|c| (c.field.clone(), Value::Bool(c.visible)))
            .collect();
        self.store(Self::key(grid, "columns"), Value::Object(stored));
    }

    fn load_order(&self, grid: &Grid) -> Option<String> {
        let key = Self::key(grid, "order");
        match self.current(&key)? {
            Value::String(order) if !order.is_empty() => Some(order),
            Value::String(_) | Value::Null => None,
            other => {
                tracing::warn!(key = %key, value = %other, "stored order is not a string");
                None
            }
        }
    }

    fn save_order(&self, grid: &Grid) {
        let value = grid
            .header
            .active_order()
            .map_or(Value::Null, Value::String);
        self.store(Self::key(grid, "order"), value);
    }
}
