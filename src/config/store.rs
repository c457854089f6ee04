use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{debug, info, warn};

use super::ConfigError;

/// Overlays `overlay` on top of `default`.
///
/// Objects are merged key by key and recursively, so every default key ends up
/// present while every key from the overlay is preserved. Any non-object overlay
/// value replaces the default outright; a `null` overlay keeps the default.
pub fn merge_defaults(default: Value, overlay: Value) -> Value {
    match (default, overlay) {
        (Value::Object(mut base), Value::Object(over)) => {
            for (key, value) in over {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_defaults(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (default, Value::Null) => default,
        (_, overlay) => overlay,
    }
}

/// A single JSON document on disk, always read and written whole.
#[derive(Debug, Clone)]
pub struct JsonConfigStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonConfigStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored document merged over `T::default()`.
    ///
    /// A missing file, unreadable file or malformed document all yield the
    /// compiled-in default; the failure is logged, never returned.
    pub fn load(&self) -> T {
        match self.try_load() {
            Ok(Some(config)) => config,
            Ok(None) => {
                debug!(path = ?self.path, "Config file absent, using defaults.");
                T::default()
            }
            Err(e) => {
                warn!(
                    path = ?self.path,
                    error = %e,
                    "Failed to load config, falling back to defaults."
                );
                T::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<T>, ConfigError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let stored: Value = serde_json::from_str(&contents)?;
        let defaults = serde_json::to_value(T::default())?;
        let merged = merge_defaults(defaults, stored);
        Ok(Some(serde_json::from_value(merged)?))
    }

    /// Writes the full document, keeping the previous file as `<name>.bak`.
    ///
    /// The new content goes to a temporary file in the same directory which is then
    /// renamed over the target, so readers see either the old or the new document.
    pub fn save(&self, config: &T) -> Result<(), ConfigError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };

        fs::create_dir_all(dir).map_err(io_err)?;

        if self.path.exists() {
            fs::copy(&self.path, self.backup_path()).map_err(io_err)?;
        }

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        serde_json::to_writer_pretty(&mut tmp, config)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.flush().map_err(io_err)?;
        tmp.persist(&self.path)
            .map_err(|source| ConfigError::Persist {
                path: self.path.clone(),
                source,
            })?;

        info!(path = ?self.path, "Saved configuration.");
        Ok(())
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".bak");
        self.path.with_file_name(name)
    }
}

impl<T> JsonConfigStore<T>
where
    T: Serialize + DeserializeOwned + Default + Send + 'static,
{
    /// [`load`](Self::load) on the blocking pool, for callers inside the runtime.
    pub async fn load_async(&self) -> T {
        let store = Self::new(self.path.clone());
        match task::spawn_blocking(move || store.load()).await {
            Ok(config) => config,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Config load task failed, using defaults.");
                T::default()
            }
        }
    }

    /// [`save`](Self::save) on the blocking pool.
    pub async fn save_async(&self, config: T) -> Result<(), ConfigError> {
        let store = Self::new(self.path.clone());
        task::spawn_blocking(move || store.save(&config))
            .await
            .map_err(|e| ConfigError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Sample {
        name: String,
        limit: u32,
        nested: Nested,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Nested {
        enabled: bool,
        ratio: f64,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                name: "default".to_string(),
                limit: 10,
                nested: Nested::default(),
            }
        }
    }

    impl Default for Nested {
        fn default() -> Self {
            Self {
                enabled: false,
                ratio: 0.5,
            }
        }
    }

    #[test]
    fn merge_fills_missing_keys_and_preserves_present_ones() {
        let default = json!({"a": 1, "b": {"x": true, "y": 2}, "c": [1, 2]});
        let partial = json!({"b": {"y": 5, "z": "new"}, "c": [], "extra": "kept"});

        let merged = merge_defaults(default, partial);
        assert_eq!(
            merged,
            json!({"a": 1, "b": {"x": true, "y": 5, "z": "new"}, "c": [], "extra": "kept"})
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let default = json!({"a": 1, "b": {"x": true}});
        let partial = json!({"b": {"x": false}});
        let once = merge_defaults(default.clone(), partial);
        let twice = merge_defaults(default, once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn null_overlay_keeps_default() {
        let merged = merge_defaults(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged, json!({"a": 1}));
    }

    #[test]
    fn load_of_partial_document_equals_merge_with_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let partial = json!({"limit": 99, "nested": {"enabled": true}});
        fs::write(&path, partial.to_string()).unwrap();

        let store: JsonConfigStore<Sample> = JsonConfigStore::new(&path);
        let loaded = store.load();

        let expected: Sample = serde_json::from_value(merge_defaults(
            serde_json::to_value(Sample::default()).unwrap(),
            partial,
        ))
        .unwrap();
        assert_eq!(loaded, expected);
        assert_eq!(loaded.name, "default");
        assert_eq!(loaded.limit, 99);
        assert!(loaded.nested.enabled);
        assert_eq!(loaded.nested.ratio, 0.5);
    }

    #[test]
    fn missing_and_corrupt_files_fall_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let store: JsonConfigStore<Sample> = JsonConfigStore::new(&path);
        assert_eq!(store.load(), Sample::default());

        fs::write(&path, "{ not json").unwrap();
        assert_eq!(store.load(), Sample::default());

        fs::write(&path, r#"{"limit": "not a number"}"#).unwrap();
        assert_eq!(store.load(), Sample::default());
    }

    #[test]
    fn save_writes_backup_of_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/sample.json");
        let store: JsonConfigStore<Sample> = JsonConfigStore::new(&path);

        let first = Sample {
            limit: 1,
            ..Sample::default()
        };
        store.save(&first).unwrap();
        assert!(!store.backup_path().exists());

        let second = Sample {
            limit: 2,
            ..Sample::default()
        };
        store.save(&second).unwrap();

        assert_eq!(store.load(), second);
        let backup: Sample =
            serde_json::from_str(&fs::read_to_string(store.backup_path()).unwrap()).unwrap();
        assert_eq!(backup, first);
    }

    #[tokio::test]
    async fn async_save_keeps_backup_and_async_load_merges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let store: JsonConfigStore<Sample> = JsonConfigStore::new(&path);
        assert_eq!(store.load_async().await, Sample::default());

        let first = Sample {
            limit: 7,
            ..Sample::default()
        };
        store.save_async(first.clone()).await.unwrap();
        store.save_async(Sample::default()).await.unwrap();
        assert_eq!(store.load_async().await, Sample::default());

        let backup: Sample =
            serde_json::from_str(&fs::read_to_string(store.backup_path()).unwrap()).unwrap();
        assert_eq!(backup, first);
    }
}
