//! Persisted user settings
//!
//! Typed, versioned schema plus the JSON store. Older files (array-shaped
//! `enabled_cameras`/`camera_labels`, no version key) are migrated on load.

pub mod schema;
pub mod store;

pub use schema::{normalize, PersistedSettings, Settings, SETTINGS_VERSION};
pub use store::{LoadSource, SettingsError, SettingsStore, SETTINGS_ENV, SETTINGS_FILE};
