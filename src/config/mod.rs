//! Configuration management for the RSTA service
//!
//! Configuration is a nested JSON document: built-in defaults overlaid with
//! the persisted `config.json`. The merged document is cached after the first
//! read; [`ConfigStore::save`] is the only way to change it and always
//! rewrites the whole file.

mod defaults;
mod settings;

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

pub use defaults::default_document;
pub use settings::{
    default_threads, LlmSettings, OcrSettings, PreloadEntry, ServiceSettings, StartupSettings, TranslateSettings,
};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Config update must be a JSON object")]
    NotAnObject,
}

/// Layered configuration store backed by a JSON file
pub struct ConfigStore {
    path: PathBuf,
    root: PathBuf,
    cache: RwLock<Option<Value>>,
}

impl ConfigStore {
    /// Create a store for the given config file
    ///
    /// Relative paths inside the configuration (such as `model_dir`) are
    /// resolved against the directory containing the file.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            path,
            root,
            cache: RwLock::new(None),
        }
    }

    /// Locate the config file from the environment
    ///
    /// `RSTA_CONFIG` names the file directly; otherwise `config.json` under
    /// `RSTA_HOME` or the working directory.
    pub fn from_env() -> Self {
        if let Ok(path) = std::env::var("RSTA_CONFIG") {
            return Self::new(path);
        }
        let home = std::env::var("RSTA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        Self::new(home.join("config.json"))
    }

    /// Path of the persisted layer
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that relative config paths resolve against
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Built-in defaults
    pub fn defaults(&self) -> Value {
        default_document()
    }

    /// Merged configuration, cached after the first read
    ///
    /// A missing file yields the defaults. A malformed file is logged and
    /// also yields the defaults; it is not overwritten until the next save.
    pub fn load(&self) -> Value {
        if let Some(cached) = self.cache.read().as_ref() {
            return cached.clone();
        }

        let mut cache = self.cache.write();
        if let Some(cached) = cache.as_ref() {
            return cached.clone();
        }

        let merged = self.read_merged();
        *cache = Some(merged.clone());
        merged
    }

    /// Merge a partial document into the current configuration and persist it
    ///
    /// Nested objects merge key by key; keys absent from `partial` keep their
    /// current values. Returns the new merged document.
    pub fn save(&self, partial: &Value) -> Result<Value, ConfigError> {
        if !partial.is_object() {
            return Err(ConfigError::NotAnObject);
        }

        let mut cache = self.cache.write();
        let mut current = match cache.as_ref() {
            Some(cached) => cached.clone(),
            None => self.read_merged(),
        };
        merge(&mut current, partial);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(&current)?;
        self.write_atomic(body.as_bytes())?;
        *cache = Some(current.clone());

        tracing::info!("Configuration saved to {}", self.path.display());
        Ok(current)
    }

    /// Typed view of the merged configuration with environment overrides
    pub fn settings(&self) -> ServiceSettings {
        ServiceSettings::from_document(&self.load(), &self.root)
    }

    /// Sibling file the new document is written to before the rename
    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "config.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Replace the file in one rename so readers never see a partial write
    fn write_atomic(&self, body: &[u8]) -> Result<(), ConfigError> {
        let staging = self.staging_path();
        let result = fs::write(&staging, body).and_then(|_| fs::rename(&staging, &self.path));
        if result.is_err() {
            let _ = fs::remove_file(&staging);
        }
        result.map_err(ConfigError::from)
    }

    fn read_merged(&self) -> Value {
        let mut merged = default_document();
        match self.read_persisted() {
            Ok(Some(persisted)) => merge(&mut merged, &persisted),
            Ok(None) => {
                tracing::debug!("No config file at {}, using defaults", self.path.display());
            }
            Err(e) => {
                tracing::warn!(
                    "Ignoring config file {}: {}. Using defaults",
                    self.path.display(),
                    e
                );
            }
        }
        merged
    }

    fn read_persisted(&self) -> Result<Option<Value>, ConfigError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let value: Value = serde_json::from_str(&raw)?;
        if !value.is_object() {
            return Err(ConfigError::NotAnObject);
        }
        Ok(Some(value))
    }
}

/// Deep-merge `overlay` into `base`
///
/// Objects merge recursively; every other value (including arrays) replaces
/// the base value.
pub fn merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge(existing, value)
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
