#![forbid(unsafe_code)]

//! JSON file storage.
//!
//! The file holds a small envelope so the layout can evolve:
//!
//! ```json
//! { "format_version": 1, "value": { "todos": [] } }
//! ```
//!
//! A missing `value` field means `None` was stored; `"value": null` is
//! [`Value::Null`]. Writes go to a sibling temp file that is then renamed
//! over the target, so readers never observe a half-written file.

use std::cell::RefCell;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rxtree_core::Value;
use serde::{Deserialize, Deserializer, Serialize};

use super::Storage;
use crate::error::{Result, StateError};
use crate::stream::{Stream, Subscription};

/// Envelope version written by this build.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    value: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Where and how a [`JsonFileStorage`] writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStorageConfig {
    pub path: PathBuf,
    /// Indent the JSON.
    pub pretty: bool,
    /// Create missing parent directories on write.
    pub create_dirs: bool,
}

impl FileStorageConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pretty: false,
            create_dirs: true,
        }
    }

    #[must_use]
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    #[must_use]
    pub fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }
}

/// [`Storage`] backed by one JSON file.
#[derive(Debug)]
pub struct JsonFileStorage {
    config: FileStorageConfig,
    last_error: RefCell<Option<StateError>>,
}

impl JsonFileStorage {
    pub fn new(config: FileStorageConfig) -> Self {
        Self {
            config,
            last_error: RefCell::new(None),
        }
    }

    /// Storage at `path` with default settings.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(FileStorageConfig::new(path))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Reads the file. `Ok(None)` when it does not exist; `Ok(Some(None))`
    /// when it holds `None`.
    pub fn read(&self) -> Result<Option<Option<Value>>> {
        let text = match fs::read_to_string(&self.config.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let envelope: Envelope = serde_json::from_str(&text)?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(StateError::UnsupportedFormat {
                found: envelope.format_version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(Some(envelope.value))
    }

    /// Atomically replaces the file's content with `value`.
    pub fn write(&self, value: Option<&Value>) -> Result<()> {
        let envelope = Envelope {
            format_version: FORMAT_VERSION,
            value: value.cloned(),
        };
        let bytes = if self.config.pretty {
            serde_json::to_vec_pretty(&envelope)?
        } else {
            serde_json::to_vec(&envelope)?
        };

        let path = &self.config.path;
        if self.config.create_dirs
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// The error of the most recent failed save, cleared by the next
    /// successful one.
    #[must_use]
    pub fn last_error(&self) -> Option<StateError> {
        self.last_error.borrow().clone()
    }
}

impl Storage for JsonFileStorage {
    fn load(&self) -> Option<Stream<Option<Value>>> {
        match self.read() {
            Ok(stored) => stored.map(Stream::of),
            Err(err) => {
                tracing::warn!(
                    message = "storage.read_failed",
                    path = %self.config.path.display(),
                    error = %err,
                );
                Some(Stream::new(move |sink| {
                    sink.error(&err);
                    Subscription::empty()
                }))
            }
        }
    }

    fn save(&self, value: Option<&Value>) {
        match self.write(value) {
            Ok(()) => {
                self.last_error.borrow_mut().take();
            }
            Err(err) => {
                tracing::warn!(
                    message = "storage.write_failed",
                    path = %self.config.path.display(),
                    error = %err,
                );
                *self.last_error.borrow_mut() = Some(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path().join("state.json"));
        assert!(storage.read().unwrap().is_none());
        assert!(storage.load().is_none());
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path().join("nested/state.json"));
        let value = Value::from(json!({"todos": [{"id": 1, "done": false}]}));
        storage.write(Some(&value)).unwrap();
        assert_eq!(storage.read().unwrap(), Some(Some(value)));
        assert!(!dir.path().join("nested/state.json.tmp").exists());
    }

    #[test]
    fn none_and_null_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path().join("state.json"));
        storage.write(None).unwrap();
        assert_eq!(storage.read().unwrap(), Some(None));
        storage.write(Some(&Value::Null)).unwrap();
        assert_eq!(storage.read().unwrap(), Some(Some(Value::Null)));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"format_version": 9, "value": 1}"#).unwrap();
        let err = JsonFileStorage::open(&path).read().unwrap_err();
        assert!(matches!(
            err,
            StateError::UnsupportedFormat {
                found: 9,
                expected: FORMAT_VERSION
            }
        ));
    }

    #[test]
    fn corrupt_file_loads_as_error_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let storage = JsonFileStorage::open(&path);
        let failed = std::rc::Rc::new(std::cell::Cell::new(false));
        let f = std::rc::Rc::clone(&failed);
        let _sub = storage.load().unwrap().subscribe_with(
            crate::stream::Callbacks::new(|_: &Option<Value>| {}).on_error(move |err| {
                assert!(matches!(err, StateError::Json(_)));
                f.set(true);
            }),
        );
        assert!(failed.get());
    }

    #[test]
    fn failed_save_is_remembered() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();
        let storage = JsonFileStorage::new(
            FileStorageConfig::new(blocker.join("state.json")).with_create_dirs(true),
        );
        storage.save(Some(&Value::Int(1)));
        assert!(matches!(storage.last_error(), Some(StateError::Io(_))));
    }

    #[test]
    fn pretty_output_is_indented() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let storage = JsonFileStorage::new(FileStorageConfig::new(&path).with_pretty(true));
        storage.write(Some(&Value::from(json!({"a": 1})))).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"format_version\": 1"));
    }
}
