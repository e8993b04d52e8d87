//! Periodic task scheduler
//!
//! One tick source drives a registry of `(interval, callback)` entries.
//! [`Scheduler::tick`] runs due callbacks inline; [`Scheduler::run`] is the
//! tokio driver and hands each due callback to the blocking pool so a slow
//! camera only delays its own feed.
//!
//! Each registration carries a busy flag: a callback is never started while
//! its previous run is still in flight, so one feed's polls never overlap.
//! Cancelling removes the registration; a run already in progress finishes
//! and nothing further happens.
//!
//! Due times are kept on the clock's monotonic reading, so a wall-clock step
//! never stalls or bunches up registrations.

use crate::utils::Clock;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Poll interval used by feeds (about 30 fps)
pub const FEED_POLL_INTERVAL: Duration = Duration::from_millis(33);

/// Resolution of the tokio driver
pub const DEFAULT_RESOLUTION: Duration = Duration::from_millis(5);

/// Handle returned by [`Scheduler::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationId(u64);

type Task = Arc<Mutex<Box<dyn FnMut() + Send>>>;

struct Registration {
    interval: Duration,
    next_due: Duration,
    task: Task,
    busy: Arc<AtomicBool>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: BTreeMap<RegistrationId, Registration>,
}

struct DueTask {
    id: RegistrationId,
    task: Task,
    guard: BusyGuard,
}

/// Clears a registration's busy flag when the run ends, even on panic
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct Scheduler {
    registry: Arc<Mutex<Registry>>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            clock,
        }
    }

    /// Call `task` every `interval`, first after one interval has passed
    pub fn register<F>(&self, interval: Duration, task: F) -> RegistrationId
    where
        F: FnMut() + Send + 'static,
    {
        let interval = interval.max(Duration::from_millis(1));
        let now = self.clock.elapsed();

        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = RegistrationId(registry.next_id);
        registry.entries.insert(
            id,
            Registration {
                interval,
                next_due: now + interval,
                task: Arc::new(Mutex::new(Box::new(task))),
                busy: Arc::new(AtomicBool::new(false)),
            },
        );

        tracing::debug!("Registered scheduler task {:?} every {}ms", id, interval.as_millis());
        id
    }

    /// Remove a registration. Returns false if it was already gone.
    pub fn cancel(&self, id: RegistrationId) -> bool {
        let removed = self.registry.lock().entries.remove(&id).is_some();
        if removed {
            tracing::debug!("Cancelled scheduler task {:?}", id);
        }
        removed
    }

    pub fn is_registered(&self, id: RegistrationId) -> bool {
        self.registry.lock().entries.contains_key(&id)
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every due callback on the calling thread. Returns how many ran.
    pub fn tick(&self) -> usize {
        let mut ran = 0;
        for due in self.take_due() {
            if self.run_due(due) {
                ran += 1;
            }
        }
        ran
    }

    /// Drive the registry until `shutdown` turns true (or its sender drops)
    pub async fn run(&self, resolution: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(resolution);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!("Scheduler running ({}ms resolution)", resolution.as_millis());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for due in self.take_due() {
                        let scheduler = self.clone();
                        tokio::task::spawn_blocking(move || {
                            scheduler.run_due(due);
                        });
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Collect due registrations that are not already running and mark them
    /// busy. The next due time moves one interval past now, so missed ticks
    /// are skipped rather than replayed.
    fn take_due(&self) -> Vec<DueTask> {
        let now = self.clock.elapsed();
        let mut registry = self.registry.lock();
        let mut due = Vec::new();

        for (id, registration) in registry.entries.iter_mut() {
            if registration.next_due > now {
                continue;
            }
            if registration.busy.swap(true, Ordering::SeqCst) {
                continue;
            }
            registration.next_due = now + registration.interval;
            due.push(DueTask {
                id: *id,
                task: registration.task.clone(),
                guard: BusyGuard(registration.busy.clone()),
            });
        }

        due
    }

    fn run_due(&self, due: DueTask) -> bool {
        let DueTask { id, task, guard } = due;

        // cancelled between collection and dispatch
        if !self.is_registered(id) {
            return false;
        }

        let mut callback = task.lock();
        (*callback)();
        drop(guard);
        true
    }
}
