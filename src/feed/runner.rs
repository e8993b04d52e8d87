//! Feed runner
//!
//! Binds a [`FeedSession`] to the scheduler and publishes what it sees as
//! [`FeedEvent`]s on a broadcast channel. Nothing here draws; a UI (or the
//! headless binary) subscribes to the events.

use super::session::{FeedSession, FeedStatus};
use crate::capture::Frame;
use crate::recorder::{RecordingError, RecordingEvent};
use crate::scheduler::{RegistrationId, Scheduler, FEED_POLL_INTERVAL};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Something a feed wants observers to know
#[derive(Debug, Clone)]
pub struct FeedEvent {
    pub device_index: u32,
    pub kind: FeedEventKind,
}

#[derive(Debug, Clone)]
pub enum FeedEventKind {
    /// A new overlaid frame
    Frame(Arc<Frame>),
    /// The feed's status changed
    Status(FeedStatus),
    Recording(RecordingEvent),
}

/// Capacity of the shared feed event channel
pub const EVENT_CAPACITY: usize = 256;

/// How often `close` logs while it waits for an in-flight read
const CLOSE_WAIT_WARN_INTERVAL: Duration = Duration::from_secs(2);

pub fn event_channel() -> (broadcast::Sender<FeedEvent>, broadcast::Receiver<FeedEvent>) {
    broadcast::channel(EVENT_CAPACITY)
}

struct SecondaryView {
    registration: RegistrationId,
    frames: watch::Receiver<Option<Arc<Frame>>>,
}

/// One camera's live pipeline
pub struct Feed {
    device_index: u32,
    session: Arc<Mutex<FeedSession>>,
    scheduler: Scheduler,
    events: broadcast::Sender<FeedEvent>,
    poll: Option<RegistrationId>,
    secondary: Option<SecondaryView>,
    /// Set by `close`; a poll that is already queued sees it and does nothing
    closing: Arc<AtomicBool>,
}

impl Feed {
    pub fn new(
        session: FeedSession,
        scheduler: Scheduler,
        events: broadcast::Sender<FeedEvent>,
    ) -> Self {
        Self {
            device_index: session.device_index(),
            session: Arc::new(Mutex::new(session)),
            scheduler,
            events,
            poll: None,
            secondary: None,
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn device_index(&self) -> u32 {
        self.device_index
    }

    pub fn label(&self) -> String {
        self.session.lock().label().to_string()
    }

    pub fn enabled(&self) -> bool {
        self.session.lock().enabled()
    }

    pub fn is_open(&self) -> bool {
        self.session.lock().is_open()
    }

    pub fn is_recording(&self) -> bool {
        self.session.lock().is_recording()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    /// Open the device and start polling it
    pub fn open(&mut self) -> bool {
        if !self.session.lock().open() {
            self.publish(FeedEventKind::Status(FeedStatus::OpenFailed));
            return false;
        }

        self.closing.store(false, Ordering::SeqCst);

        if self.poll.is_none() {
            let session = self.session.clone();
            let events = self.events.clone();
            let closing = self.closing.clone();
            let device_index = self.device_index;
            let mut last_status = None;

            self.poll = Some(self.scheduler.register(FEED_POLL_INTERVAL, move || {
                if closing.load(Ordering::SeqCst) {
                    return;
                }
                let outcome = session.lock().poll();
                // closed while the read was in flight
                if closing.load(Ordering::SeqCst) {
                    return;
                }

                if last_status != Some(outcome.status) {
                    last_status = Some(outcome.status);
                    send(&events, device_index, FeedEventKind::Status(outcome.status));
                }
                if let Some(frame) = outcome.frame {
                    send(&events, device_index, FeedEventKind::Frame(frame));
                }
                if let Some(event) = outcome.recording {
                    send(&events, device_index, FeedEventKind::Recording(event));
                }
            }));
        }

        true
    }

    /// Stop polling, tear down the secondary view, finalize any recording and
    /// release the device. Idempotent.
    ///
    /// Safe to call while a poll is running on another thread: the feed is
    /// marked closed and unregistered first, so nothing new starts and the
    /// in-flight poll publishes nothing. Releasing the device still waits for
    /// that poll's read to return, so a wedged camera blocks here until its
    /// driver gives up.
    pub fn close(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        self.hide_secondary();

        if let Some(id) = self.poll.take() {
            self.scheduler.cancel(id);
        }

        let mut session = loop {
            match self.session.try_lock_for(CLOSE_WAIT_WARN_INTERVAL) {
                Some(session) => break session,
                None => tracing::warn!(
                    "Feed {} close is waiting for a camera read to return",
                    self.device_index
                ),
            }
        };
        let stopped = session.close();
        drop(session);

        if let Some(event) = stopped {
            self.publish(FeedEventKind::Recording(event));
        }
    }

    pub fn set_label(&self, text: impl Into<String>) {
        self.session.lock().edit_label(text);
    }

    pub fn start_recording(
        &self,
        save_dir: &Path,
        chunk_minutes: u32,
        max_minutes: u32,
    ) -> Result<(), RecordingError> {
        let started = self
            .session
            .lock()
            .start_recording(save_dir, chunk_minutes, max_minutes)?;
        if let Some(event) = started {
            self.publish(FeedEventKind::Recording(event));
        }
        Ok(())
    }

    pub fn stop_recording(&self) {
        let stopped = self.session.lock().stop_recording();
        if let Some(event) = stopped {
            self.publish(FeedEventKind::Recording(event));
        }
    }

    /// Start the full-screen view. It mirrors the latest overlaid frame on its
    /// own schedule and never touches the device. Calling it again returns a
    /// new receiver on the same view.
    pub fn show_secondary(&mut self) -> watch::Receiver<Option<Arc<Frame>>> {
        if let Some(view) = &self.secondary {
            return view.frames.clone();
        }

        let (sender, frames) = watch::channel(None);
        let session = self.session.clone();

        let registration = self.scheduler.register(FEED_POLL_INTERVAL, move || {
            let latest = session.lock().last_frame();
            sender.send_if_modified(|current| {
                let unchanged = match (current.as_ref(), latest.as_ref()) {
                    (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                    (None, None) => true,
                    _ => false,
                };
                if !unchanged {
                    *current = latest.clone();
                }
                !unchanged
            });
        });

        tracing::debug!("Feed {} secondary view shown", self.device_index);
        let receiver = frames.clone();
        self.secondary = Some(SecondaryView {
            registration,
            frames,
        });
        receiver
    }

    pub fn hide_secondary(&mut self) {
        if let Some(view) = self.secondary.take() {
            self.scheduler.cancel(view.registration);
            tracing::debug!("Feed {} secondary view hidden", self.device_index);
        }
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    fn publish(&self, kind: FeedEventKind) {
        send(&self.events, self.device_index, kind);
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        self.close();
    }
}

fn send(events: &broadcast::Sender<FeedEvent>, device_index: u32, kind: FeedEventKind) {
    // no subscribers is fine
    let _ = events.send(FeedEvent { device_index, kind });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::{FakeBackend, FakeDevice};
    use crate::recorder::y4m::Y4mSinkFactory;
    use crate::utils::ManualClock;
    use chrono::Duration;
    use tempfile::tempdir;

    struct Rig {
        backend: Arc<FakeBackend>,
        clock: Arc<ManualClock>,
        scheduler: Scheduler,
        events: broadcast::Sender<FeedEvent>,
    }

    impl Rig {
        fn new(backend: FakeBackend) -> Self {
            let clock = Arc::new(ManualClock::default());
            let (events, _) = event_channel();
            Self {
                backend: Arc::new(backend),
                scheduler: Scheduler::new(clock.clone()),
                clock,
                events,
            }
        }

        fn feed(&self, index: u32) -> Feed {
            let session = FeedSession::new(
                index,
                format!("Cam {index}"),
                true,
                self.backend.clone(),
                Arc::new(Y4mSinkFactory),
                self.clock.clone(),
            );
            Feed::new(session, self.scheduler.clone(), self.events.clone())
        }

        fn step(&self) {
            self.clock.advance(Duration::milliseconds(33));
            self.scheduler.tick();
        }
    }

    fn drain(rx: &mut broadcast::Receiver<FeedEvent>) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_open_polls_and_publishes_frames() {
        let rig = Rig::new(FakeBackend::new().with_device(2, FakeDevice::live(32, 24)));
        let mut feed = rig.feed(2);
        let mut rx = feed.subscribe();

        assert!(feed.open());
        rig.step();
        rig.step();

        let events = drain(&mut rx);
        let frames = events
            .iter()
            .filter(|e| matches!(e.kind, FeedEventKind::Frame(_)))
            .count();
        let statuses: Vec<_> = events
            .iter()
            .filter_map(|e| match e.kind {
                FeedEventKind::Status(status) => Some(status),
                _ => None,
            })
            .collect();

        assert_eq!(frames, 2);
        assert_eq!(statuses, vec![FeedStatus::Live]);
        assert!(events.iter().all(|e| e.device_index == 2));
    }

    #[test]
    fn test_open_failure_publishes_status() {
        let rig = Rig::new(FakeBackend::new());
        let mut feed = rig.feed(0);
        let mut rx = feed.subscribe();

        assert!(!feed.open());
        assert!(rig.scheduler.is_empty());
        assert!(matches!(
            rx.try_recv().unwrap().kind,
            FeedEventKind::Status(FeedStatus::OpenFailed)
        ));
    }

    #[test]
    fn test_close_twice_releases_once_and_clears_registrations() {
        let rig = Rig::new(FakeBackend::new().with_device(0, FakeDevice::live(8, 8)));
        let mut feed = rig.feed(0);
        feed.open();
        feed.show_secondary();
        assert_eq!(rig.scheduler.len(), 2);

        feed.close();
        feed.close();

        assert!(rig.scheduler.is_empty());
        assert!(!feed.has_secondary());
        assert_eq!(rig.backend.release_count(), 1);
    }

    #[test]
    fn test_close_during_in_flight_poll() {
        let device = FakeDevice::live(8, 8).slow(std::time::Duration::from_millis(200));
        let rig = Rig::new(FakeBackend::new().with_device(0, device));
        let mut feed = rig.feed(0);
        let mut rx = feed.subscribe();
        feed.open();

        rig.clock.advance(Duration::milliseconds(33));
        let ticker = {
            let scheduler = rig.scheduler.clone();
            std::thread::spawn(move || scheduler.tick())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));

        feed.close();
        ticker.join().unwrap();

        assert!(!feed.is_open());
        assert!(rig.scheduler.is_empty());
        assert_eq!(rig.backend.release_count(), 1);
        assert!(drain(&mut rx)
            .iter()
            .all(|e| !matches!(e.kind, FeedEventKind::Frame(_))));

        // a later tick finds nothing to run
        rig.step();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_reopen_after_close_polls_again() {
        let rig = Rig::new(FakeBackend::new().with_device(0, FakeDevice::live(8, 8)));
        let mut feed = rig.feed(0);
        let mut rx = feed.subscribe();

        feed.open();
        feed.close();
        drain(&mut rx);

        assert!(feed.open());
        rig.step();

        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e.kind, FeedEventKind::Frame(_))));
        assert_eq!(rig.backend.open_count(), 2);
    }

    #[test]
    fn test_secondary_view_mirrors_latest_frame() {
        let rig = Rig::new(FakeBackend::new().with_device(0, FakeDevice::live(8, 8)));
        let mut feed = rig.feed(0);
        feed.open();
        let mut view = feed.show_secondary();

        rig.step();

        assert!(view.has_changed().unwrap());
        let shown = view.borrow_and_update().clone().unwrap();
        assert_eq!(shown.width, 8);
        // the view never opens the device itself
        assert_eq!(rig.backend.open_count(), 1);

        feed.hide_secondary();
        assert_eq!(rig.scheduler.len(), 1);
    }

    #[test]
    fn test_recording_events_are_published() {
        let dir = tempdir().unwrap();
        let rig = Rig::new(FakeBackend::new().with_device(0, FakeDevice::live(8, 8)));
        let mut feed = rig.feed(0);
        let mut rx = feed.subscribe();
        feed.open();

        feed.start_recording(dir.path(), 5, 10).unwrap();
        rig.step();
        feed.stop_recording();
        feed.stop_recording();

        let recording: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e.kind {
                FeedEventKind::Recording(event) => Some(event),
                _ => None,
            })
            .collect();

        assert_eq!(recording.len(), 2);
        assert!(matches!(recording[0], RecordingEvent::Started { .. }));
        assert!(matches!(recording[1], RecordingEvent::Stopped { .. }));
    }

    #[test]
    fn test_start_recording_on_closed_feed_fails() {
        let dir = tempdir().unwrap();
        let rig = Rig::new(FakeBackend::new().with_device(0, FakeDevice::live(8, 8)));
        let feed = rig.feed(0);

        assert!(matches!(
            feed.start_recording(dir.path(), 5, 10),
            Err(RecordingError::FeedNotOpen)
        ));
    }
}
