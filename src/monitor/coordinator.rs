//! Monitor coordinator
//!
//! Owns the settings and the set of live feeds. Builds feeds from a device
//! scan, toggles recording across them and keeps the settings file in step
//! with what the user changes.

use crate::capture::{scan, CaptureBackend, DEFAULT_SCAN_LIMIT};
use crate::feed::{event_channel, Feed, FeedEvent, FeedSession};
use crate::scheduler::Scheduler;
use crate::settings::{LoadSource, Settings, SettingsError, SettingsStore};
use crate::utils::Clock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct MonitorCoordinator {
    backend: Arc<dyn CaptureBackend>,
    clock: Arc<dyn Clock>,
    scheduler: Scheduler,
    store: SettingsStore,
    settings: Settings,
    /// The settings file could not be used at startup. It is only replaced
    /// by a save the user asked for.
    keep_settings_file: bool,
    events: broadcast::Sender<FeedEvent>,
    feeds: Vec<Feed>,
    scan_limit: u32,
}

impl MonitorCoordinator {
    /// Create a coordinator and load settings from `store`
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        clock: Arc<dyn Clock>,
        scheduler: Scheduler,
        store: SettingsStore,
    ) -> Self {
        let (settings, source) = store.load_with_source();
        let (events, _) = event_channel();
        Self {
            backend,
            clock,
            scheduler,
            store,
            settings,
            keep_settings_file: source == LoadSource::Unusable,
            events,
            feeds: Vec::new(),
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }

    pub fn with_scan_limit(mut self, scan_limit: u32) -> Self {
        self.scan_limit = scan_limit;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Events from every feed
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    /// Every feed from the last scan, enabled or not
    pub fn feeds(&self) -> &[Feed] {
        &self.feeds
    }

    pub fn feed(&self, device_index: u32) -> Option<&Feed> {
        self.feeds.iter().find(|f| f.device_index() == device_index)
    }

    pub fn feed_mut(&mut self, device_index: u32) -> Option<&mut Feed> {
        self.feeds
            .iter_mut()
            .find(|f| f.device_index() == device_index)
    }

    /// Device indices of the feeds that are shown
    pub fn visible(&self) -> Vec<u32> {
        self.feeds
            .iter()
            .filter(|f| f.enabled())
            .map(Feed::device_index)
            .collect()
    }

    pub fn is_any_recording(&self) -> bool {
        self.feeds.iter().any(Feed::is_recording)
    }

    /// Close every feed, rescan, and build one feed per device found. Only
    /// enabled feeds are opened. Newly seen devices are written to the
    /// settings. Returns the visible device indices.
    pub fn detect_and_build(&mut self) -> Vec<u32> {
        self.close_all();

        let devices = scan(self.backend.as_ref(), self.scan_limit);
        let sinks = self.settings.recording_format.sink_factory();
        let mut added = false;

        for device in &devices {
            if self.settings.remember_device(device.index) {
                tracing::info!("New camera {} added to settings", device.index);
                added = true;
            }

            let session = FeedSession::new(
                device.index,
                self.settings.label_for(device.index),
                self.settings.is_enabled(device.index),
                self.backend.clone(),
                sinks.clone(),
                self.clock.clone(),
            );
            let mut feed = Feed::new(session, self.scheduler.clone(), self.events.clone());

            if feed.enabled() && !feed.open() {
                tracing::warn!("Camera {} is enabled but could not be opened", device.index);
            }
            self.feeds.push(feed);
        }

        if added {
            let saved = self.save_implicit();
            self.log_save_failure(saved);
        }

        let visible = self.visible();
        tracing::info!(
            "Built {} feed(s), {} visible: {:?}",
            self.feeds.len(),
            visible.len(),
            visible
        );
        visible
    }

    /// Start recording on every open feed with the configured limits.
    /// Returns how many feeds are recording afterwards.
    pub fn start_recording_all(&mut self) -> usize {
        let save_dir = PathBuf::from(&self.settings.save_path);
        let chunk = self.settings.chunk_minutes;
        let max = self.settings.max_minutes;

        for feed in self.feeds.iter().filter(|f| f.is_open()) {
            if let Err(e) = feed.start_recording(&save_dir, chunk, max) {
                tracing::error!("Camera {} could not start recording: {}", feed.device_index(), e);
            }
        }

        self.feeds.iter().filter(|f| f.is_recording()).count()
    }

    pub fn stop_recording_all(&mut self) {
        for feed in &self.feeds {
            feed.stop_recording();
        }
    }

    /// Flip between recording all open feeds and recording none
    pub fn toggle_recording(&mut self) -> bool {
        if self.is_any_recording() {
            self.stop_recording_all();
            false
        } else {
            self.start_recording_all() > 0
        }
    }

    /// Relabel a feed and persist the label
    pub fn rename_feed(&mut self, device_index: u32, label: &str) -> Result<(), SettingsError> {
        self.settings.set_label(device_index, label);
        let shown = self.settings.label_for(device_index);
        if let Some(feed) = self.feed(device_index) {
            feed.set_label(shown);
        }
        self.save()
    }

    /// Replace the settings, save them and rebuild the feeds
    pub fn apply_settings(&mut self, settings: Settings) -> Vec<u32> {
        self.settings = settings.normalized();
        let saved = self.save();
        self.log_save_failure(saved);
        self.detect_and_build()
    }

    pub fn acknowledge_welcome(&mut self, dont_show_again: bool) -> Result<(), SettingsError> {
        self.settings.show_welcome = !dont_show_again;
        self.save()
    }

    /// Stop recordings, close feeds and save settings. An unusable settings
    /// file found at startup is kept unless the user saved since.
    pub fn shutdown(&mut self) -> Result<(), SettingsError> {
        tracing::info!("Shutting down {} feed(s)", self.feeds.len());
        self.stop_recording_all();
        self.close_all();
        self.save_implicit()
    }

    fn close_all(&mut self) {
        for mut feed in self.feeds.drain(..) {
            feed.close();
        }
    }

    /// A save the user asked for
    fn save(&mut self) -> Result<(), SettingsError> {
        self.store.save(&self.settings)?;
        self.keep_settings_file = false;
        Ok(())
    }

    fn save_implicit(&mut self) -> Result<(), SettingsError> {
        if self.keep_settings_file {
            tracing::info!(
                "Not overwriting unusable settings file {:?}",
                self.store.path()
            );
            return Ok(());
        }
        self.save()
    }

    fn log_save_failure(&self, saved: Result<(), SettingsError>) {
        if let Err(e) = saved {
            tracing::warn!("Failed to save settings to {:?}: {}", self.store.path(), e);
        }
    }
}

impl Drop for MonitorCoordinator {
    fn drop(&mut self) {
        self.stop_recording_all();
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::{FakeBackend, FakeDevice};
    use crate::recorder::RecordingFormat;
    use crate::utils::ManualClock;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    struct Rig {
        dir: TempDir,
        backend: Arc<FakeBackend>,
        clock: Arc<ManualClock>,
        scheduler: Scheduler,
    }

    impl Rig {
        fn new(backend: FakeBackend) -> Self {
            let clock = Arc::new(ManualClock::default());
            Self {
                dir: tempdir().unwrap(),
                backend: Arc::new(backend),
                scheduler: Scheduler::new(clock.clone()),
                clock,
            }
        }

        fn settings_path(&self) -> std::path::PathBuf {
            self.dir.path().join("settings.json")
        }

        fn write_settings(&self, value: serde_json::Value) {
            fs::write(self.settings_path(), value.to_string()).unwrap();
        }

        fn coordinator(&self) -> MonitorCoordinator {
            MonitorCoordinator::new(
                self.backend.clone(),
                self.clock.clone(),
                self.scheduler.clone(),
                SettingsStore::new(self.settings_path()),
            )
        }

        fn recordings(&self) -> std::path::PathBuf {
            self.dir.path().join("recordings")
        }
    }

    fn two_cameras() -> FakeBackend {
        FakeBackend::new()
            .with_device(0, FakeDevice::live(8, 8))
            .with_device(1, FakeDevice::mute())
            .with_device(2, FakeDevice::live(8, 8))
    }

    fn count_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .map(|days| {
                days.filter_map(Result::ok)
                    .map(|day| fs::read_dir(day.path()).map(|f| f.count()).unwrap_or(0))
                    .sum()
            })
            .unwrap_or(0)
    }

    #[test]
    fn test_only_enabled_devices_are_opened() {
        let rig = Rig::new(two_cameras());
        rig.write_settings(json!({ "enabled_cameras": { "0": false, "2": true } }));
        let mut monitor = rig.coordinator();

        let visible = monitor.detect_and_build();

        assert_eq!(visible, vec![2]);
        assert_eq!(monitor.feeds().len(), 2);
        assert!(monitor.feed(2).unwrap().is_open());
        assert!(!monitor.feed(0).unwrap().is_open());
        assert!(monitor.feed(1).is_none());
        assert_eq!(rig.scheduler.len(), 1);
    }

    #[test]
    fn test_new_devices_are_saved_as_enabled() {
        let rig = Rig::new(two_cameras());
        let mut monitor = rig.coordinator();

        assert_eq!(monitor.detect_and_build(), vec![0, 2]);

        let saved = SettingsStore::new(rig.settings_path()).load();
        assert_eq!(saved.enabled_map.get(&0), Some(&true));
        assert_eq!(saved.enabled_map.get(&2), Some(&true));
        assert!(!saved.enabled_map.contains_key(&1));
    }

    #[test]
    fn test_unusable_settings_file_survives_startup_and_shutdown() {
        let rig = Rig::new(two_cameras());
        fs::write(rig.settings_path(), "{ not json").unwrap();

        let mut monitor = rig.coordinator();
        assert_eq!(monitor.detect_and_build(), vec![0, 2]);
        monitor.shutdown().unwrap();

        assert_eq!(fs::read_to_string(rig.settings_path()).unwrap(), "{ not json");
    }

    #[test]
    fn test_explicit_save_replaces_unusable_settings_file() {
        let rig = Rig::new(two_cameras());
        fs::write(rig.settings_path(), "{ not json").unwrap();
        let mut monitor = rig.coordinator();
        monitor.detect_and_build();

        monitor.rename_feed(2, "Porch").unwrap();

        let saved = SettingsStore::new(rig.settings_path()).load_with_source();
        assert_eq!(saved.1, LoadSource::File);
        assert_eq!(saved.0.label_for(2), "Porch");
        assert_eq!(saved.0.enabled_map.get(&0), Some(&true));
    }

    #[test]
    fn test_known_devices_do_not_rewrite_settings() {
        let rig = Rig::new(two_cameras());
        let original = r#"{"enabled_cameras": {"0": true, "2": true}}"#;
        fs::write(rig.settings_path(), original).unwrap();

        let mut monitor = rig.coordinator();
        monitor.detect_and_build();

        assert_eq!(fs::read_to_string(rig.settings_path()).unwrap(), original);
    }

    #[test]
    fn test_disable_internal_cam_hides_device_zero() {
        let rig = Rig::new(two_cameras());
        rig.write_settings(json!({ "disable_internal_cam": true }));
        let mut monitor = rig.coordinator();

        assert_eq!(monitor.detect_and_build(), vec![2]);
    }

    #[test]
    fn test_refresh_closes_previous_feeds() {
        let rig = Rig::new(two_cameras());
        let mut monitor = rig.coordinator();

        monitor.detect_and_build();
        monitor.detect_and_build();

        assert_eq!(rig.scheduler.len(), 2);
        // every handle except the two live ones went back
        assert_eq!(rig.backend.open_count() - rig.backend.release_count(), 2);
    }

    #[test]
    fn test_record_all_writes_chunks_for_open_feeds() {
        let rig = Rig::new(two_cameras());
        rig.write_settings(json!({
            "save_path": rig.recordings().to_string_lossy(),
            "recording_format": "y4m",
            "enabled_cameras": { "0": false }
        }));
        let mut monitor = rig.coordinator();
        monitor.detect_and_build();

        assert_eq!(monitor.start_recording_all(), 1);
        assert!(monitor.is_any_recording());

        rig.clock.advance(chrono::Duration::milliseconds(33));
        rig.scheduler.tick();

        assert!(!monitor.toggle_recording());
        assert!(!monitor.is_any_recording());
        assert_eq!(count_files(&rig.recordings()), 1);
    }

    #[test]
    fn test_rename_persists_label() {
        let rig = Rig::new(two_cameras());
        let mut monitor = rig.coordinator();
        monitor.detect_and_build();

        monitor.rename_feed(2, "Back door").unwrap();
        assert_eq!(monitor.feed(2).unwrap().label(), "Back door");

        monitor.rename_feed(0, "").unwrap();
        assert_eq!(monitor.feed(0).unwrap().label(), "Cam 0");

        let saved = SettingsStore::new(rig.settings_path()).load();
        assert_eq!(saved.label_for(2), "Back door");
        assert_eq!(saved.label_for(0), "Cam 0");
    }

    #[test]
    fn test_apply_settings_rebuilds_feeds() {
        let rig = Rig::new(two_cameras());
        let mut monitor = rig.coordinator();
        monitor.detect_and_build();

        let mut settings = monitor.settings().clone();
        settings.enabled_map.insert(2, false);
        settings.max_minutes = 300;

        assert_eq!(monitor.apply_settings(settings), vec![0]);
        assert_eq!(monitor.settings().max_minutes, 60);
        assert_eq!(rig.scheduler.len(), 1);
    }

    #[test]
    fn test_acknowledge_welcome_persists() {
        let rig = Rig::new(FakeBackend::new());
        let mut monitor = rig.coordinator();
        assert!(monitor.settings().show_welcome);

        monitor.acknowledge_welcome(true).unwrap();

        let saved = SettingsStore::new(rig.settings_path()).load();
        assert!(!saved.show_welcome);
    }

    #[test]
    fn test_shutdown_stops_everything() {
        let rig = Rig::new(two_cameras());
        rig.write_settings(json!({
            "save_path": rig.recordings().to_string_lossy(),
            "recording_format": "y4m"
        }));
        let mut monitor = rig.coordinator();
        monitor.detect_and_build();
        monitor.start_recording_all();

        monitor.shutdown().unwrap();

        assert!(monitor.feeds().is_empty());
        assert!(rig.scheduler.is_empty());
        assert_eq!(rig.backend.open_count(), rig.backend.release_count());
        assert_eq!(monitor.settings().recording_format, RecordingFormat::Y4m);
        assert!(rig.settings_path().exists());
    }

    #[test]
    fn test_no_cameras_is_not_an_error() {
        let rig = Rig::new(FakeBackend::new());
        let mut monitor = rig.coordinator();

        assert!(monitor.detect_and_build().is_empty());
        assert_eq!(monitor.start_recording_all(), 0);
    }
}
