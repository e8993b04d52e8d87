//! Settings file read/write operations

use super::schema::{normalize, Settings};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default settings file, relative to the working directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Environment variable that overrides the settings file location
pub const SETTINGS_ENV: &str = "SOLOSIGHT_SETTINGS";

/// Settings persistence errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where loaded settings came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// Read and normalized from the file
    File,
    /// No file yet; defaults
    Missing,
    /// The file exists but could not be read or parsed; defaults. The file
    /// is left for the user to inspect and should not be overwritten
    /// implicitly.
    Unusable,
}

/// Loads and saves [`Settings`] as JSON
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$SOLOSIGHT_SETTINGS`, or `settings.json` in the working directory
    pub fn from_env() -> Self {
        match std::env::var_os(SETTINGS_ENV) {
            Some(path) if !path.is_empty() => Self::new(path),
            _ => Self::new(SETTINGS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read settings. A missing, unreadable or unparseable file yields the
    /// defaults and is left as it is.
    pub fn load(&self) -> Settings {
        self.load_with_source().0
    }

    /// Like [`load`](Self::load), but also says whether the defaults stand in
    /// for a file that is still on disk
    pub fn load_with_source(&self) -> (Settings, LoadSource) {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No settings at {:?}; using defaults", self.path);
                return (Settings::default(), LoadSource::Missing);
            }
            Err(e) => {
                tracing::warn!("Could not read settings {:?}: {}; using defaults", self.path, e);
                return (Settings::default(), LoadSource::Unusable);
            }
        };

        match serde_json::from_str(&content) {
            Ok(raw) => {
                let settings = normalize(&raw);
                tracing::info!("Loaded settings from {:?}", self.path);
                (settings, LoadSource::File)
            }
            Err(e) => {
                tracing::warn!("Settings {:?} are not valid JSON: {}; using defaults", self.path, e);
                (Settings::default(), LoadSource::Unusable)
            }
        }
    }

    /// Normalize and write. The file is replaced atomically, so a failed
    /// write leaves the previous contents in place.
    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let persisted = settings.normalized().to_persisted();
        let content = serde_json::to_string_pretty(&persisted)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        file.persist(&self.path).map_err(|e| e.error)?;

        tracing::debug!("Saved settings to {:?}", self.path);
        Ok(())
    }
}
