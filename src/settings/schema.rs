//! Settings schema
//!
//! [`Settings`] is the typed form used by the engine. On disk it is stored as
//! [`PersistedSettings`]; anything read back goes through [`normalize`], which
//! accepts older array-shaped fields and replaces malformed values with their
//! defaults one key at a time.

use crate::capture::default_camera_name;
use crate::recorder::RecordingFormat;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Version written by this build
pub const SETTINGS_VERSION: u32 = 2;

pub const DEFAULT_SAVE_PATH: &str = "recordings";
pub const DEFAULT_CHUNK_MINUTES: u32 = 5;
pub const DEFAULT_MAX_MINUTES: u32 = 60;

/// Upper bound for `max_record_minutes`
pub const MAX_RECORD_MINUTES_LIMIT: u32 = 60;

/// Length cap of the positional `camera_labels` copy. Labels at higher
/// indices are only written to `camera_labels_map`.
pub const LEGACY_LABEL_SLOTS: u32 = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub settings_version: u32,
    /// User labels keyed by device index. Never holds empty strings.
    pub label_map: BTreeMap<u32, String>,
    pub enabled_map: BTreeMap<u32, bool>,
    pub save_path: String,
    pub chunk_minutes: u32,
    pub max_minutes: u32,
    /// Opaque to the engine; stored for the UI
    pub window_geometry: Option<Value>,
    pub show_welcome: bool,
    /// Hide device 0 regardless of `enabled_map`
    pub disable_internal_cam: bool,
    pub recording_format: RecordingFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            settings_version: SETTINGS_VERSION,
            label_map: BTreeMap::new(),
            enabled_map: BTreeMap::new(),
            save_path: DEFAULT_SAVE_PATH.to_string(),
            chunk_minutes: DEFAULT_CHUNK_MINUTES,
            max_minutes: DEFAULT_MAX_MINUTES,
            window_geometry: None,
            show_welcome: true,
            disable_internal_cam: false,
            recording_format: RecordingFormat::default(),
        }
    }
}

impl Settings {
    /// Whether the feed for `index` should be shown and opened
    pub fn is_enabled(&self, index: u32) -> bool {
        if index == 0 && self.disable_internal_cam {
            return false;
        }
        self.enabled_map.get(&index).copied().unwrap_or(true)
    }

    /// Stored label, or the positional default
    pub fn label_for(&self, index: u32) -> String {
        self.label_map
            .get(&index)
            .cloned()
            .unwrap_or_else(|| default_camera_name(index))
    }

    /// Set a label. An empty label removes it.
    pub fn set_label(&mut self, index: u32, label: &str) {
        let label = label.trim();
        if label.is_empty() {
            self.label_map.remove(&index);
        } else {
            self.label_map.insert(index, label.to_string());
        }
    }

    /// Record a discovered device. Existing entries are left alone.
    pub fn remember_device(&mut self, index: u32) -> bool {
        if self.enabled_map.contains_key(&index) {
            return false;
        }
        self.enabled_map.insert(index, true);
        true
    }

    pub fn to_persisted(&self) -> PersistedSettings {
        let positional = self.label_map.range(..LEGACY_LABEL_SLOTS);
        let dense_len = positional
            .clone()
            .next_back()
            .map(|(last, _)| *last as usize + 1)
            .unwrap_or(0);
        let mut camera_labels = vec![String::new(); dense_len];
        for (index, label) in positional {
            camera_labels[*index as usize] = label.clone();
        }

        PersistedSettings {
            settings_version: SETTINGS_VERSION,
            camera_labels,
            camera_labels_map: self.label_map.clone(),
            enabled_cameras: self.enabled_map.clone(),
            save_path: self.save_path.clone(),
            record_chunk_minutes: self.chunk_minutes,
            max_record_minutes: self.max_minutes,
            window_geometry: self.window_geometry.clone(),
            show_welcome_dialog: self.show_welcome,
            disable_internal_cam: self.disable_internal_cam,
            recording_format: self.recording_format,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self.to_persisted()).unwrap_or(Value::Null)
    }

    /// The settings as they would read back after a save
    pub fn normalized(&self) -> Settings {
        normalize(&self.to_value())
    }
}

/// Canonical on-disk shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub settings_version: u32,
    /// Dense positional copy of `camera_labels_map` for older readers
    pub camera_labels: Vec<String>,
    pub camera_labels_map: BTreeMap<u32, String>,
    pub enabled_cameras: BTreeMap<u32, bool>,
    pub save_path: String,
    pub record_chunk_minutes: u32,
    pub max_record_minutes: u32,
    pub window_geometry: Option<Value>,
    pub show_welcome_dialog: bool,
    pub disable_internal_cam: bool,
    pub recording_format: RecordingFormat,
}

/// Build typed settings from whatever JSON was on disk
pub fn normalize(raw: &Value) -> Settings {
    let mut settings = Settings::default();
    let Some(obj) = raw.as_object() else {
        tracing::warn!("Settings root is not an object; using defaults");
        return settings;
    };

    match obj.get("settings_version").and_then(Value::as_u64) {
        Some(version) if version > SETTINGS_VERSION as u64 => {
            tracing::warn!("Settings version {} is newer than {}", version, SETTINGS_VERSION)
        }
        Some(_) => {}
        None => tracing::debug!("Migrating unversioned settings"),
    }

    if let Some(labels) = obj.get("camera_labels") {
        settings.label_map.extend(index_keyed(labels, label_value));
    }
    if let Some(labels) = obj.get("camera_labels_map") {
        settings.label_map.extend(index_keyed(labels, label_value));
    }

    if let Some(enabled) = obj.get("enabled_cameras") {
        settings.enabled_map = index_keyed(enabled, Value::as_bool);
    }

    if let Some(path) = obj.get("save_path").and_then(Value::as_str) {
        let path = path.trim();
        if !path.is_empty() {
            settings.save_path = path.to_string();
        }
    }

    if let Some(chunk) = obj.get("record_chunk_minutes").and_then(Value::as_i64) {
        settings.chunk_minutes = chunk.clamp(1, u32::MAX as i64) as u32;
    }
    if let Some(max) = obj.get("max_record_minutes").and_then(Value::as_i64) {
        settings.max_minutes = max.clamp(1, MAX_RECORD_MINUTES_LIMIT as i64) as u32;
    }

    settings.window_geometry = obj.get("window_geometry").filter(|v| !v.is_null()).cloned();

    if let Some(show) = obj.get("show_welcome_dialog").and_then(Value::as_bool) {
        settings.show_welcome = show;
    }
    if let Some(disable) = obj.get("disable_internal_cam").and_then(Value::as_bool) {
        settings.disable_internal_cam = disable;
    }
    if let Some(format) = obj
        .get("recording_format")
        .and_then(Value::as_str)
        .and_then(RecordingFormat::parse)
    {
        settings.recording_format = format;
    }

    settings
}

fn label_value(value: &Value) -> Option<String> {
    let label = value.as_str()?.trim();
    (!label.is_empty()).then(|| label.to_string())
}

/// Read either `[a, b, ...]` (position is the index) or `{"<index>": v}`.
/// Entries whose value does not convert, or whose key is not an index, are
/// skipped.
fn index_keyed<T>(value: &Value, convert: impl Fn(&Value) -> Option<T>) -> BTreeMap<u32, T> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter_map(|(i, v)| Some((u32::try_from(i).ok()?, convert(v)?)))
            .collect(),
        Value::Object(map) => object_entries(map, convert),
        _ => BTreeMap::new(),
    }
}

fn object_entries<T>(map: &Map<String, Value>, convert: impl Fn(&Value) -> Option<T>) -> BTreeMap<u32, T> {
    map.iter()
        .filter_map(|(k, v)| Some((k.trim().parse::<u32>().ok()?, convert(v)?)))
        .collect()
}
