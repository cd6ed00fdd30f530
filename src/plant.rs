/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! The plant: reactor scheduling and lifecycle.
//!
//! The plant orchestrates reactors:
//! - Queues reactors that have work (thread-safe)
//! - Drains that queue, running each reactor until it has nothing runnable
//! - Owns the internal facility all plant-created reactors live in
//! - Carries the configuration: recovery policy, scheduler, time source
//!
//! Applications create one plant at their entry point and pass it to
//! whatever creates reactors. Tests create as many isolated plants as they
//! need.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam::queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scheduler::{Scheduler, Task, ThreadScheduler};
use crate::timer::{MonotonicClock, TimeSource};
use crate::{DefaultRecovery, Facility, Reactor, Recovery};

/// Tunables that can live in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantSettings {
    /// Name of the plant's internal facility
    pub name: String,
    /// Nested local sync calls allowed before a stack overflow is raised
    pub max_local_depth: usize,
    /// Report async requests that can no longer complete
    pub hung_request_check: bool,
}

impl Default for PlantSettings {
    fn default() -> Self {
        PlantSettings {
            name: "plant".to_string(),
            max_local_depth: 256,
            hung_request_check: true,
        }
    }
}

impl PlantSettings {
    /// Parse settings from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Settings(e.to_string()))
    }
}

/// Configuration for a plant.
#[derive(Clone)]
pub struct PlantConfig {
    pub recovery: Arc<dyn Recovery>,
    pub scheduler: Arc<dyn Scheduler>,
    pub time_source: Arc<dyn TimeSource>,
    pub settings: PlantSettings,
}

impl Default for PlantConfig {
    fn default() -> Self {
        PlantConfig {
            recovery: Arc::new(DefaultRecovery),
            scheduler: Arc::new(ThreadScheduler::new()),
            time_source: Arc::new(MonotonicClock::new()),
            settings: PlantSettings::default(),
        }
    }
}

impl PlantConfig {
    /// Create config with a custom recovery policy
    pub fn with_recovery(mut self, recovery: Arc<dyn Recovery>) -> Self {
        self.recovery = recovery;
        self
    }

    /// Create config with a custom scheduler
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn with_settings(mut self, settings: PlantSettings) -> Self {
        self.settings = settings;
        self
    }
}

struct DrainState {
    draining: bool,
    /// Scheduled tasks and responders that have neither run nor been dropped
    outstanding: usize,
}

/// State shared by the plant and every reactor it created.
pub(crate) struct PlantCore {
    config: PlantConfig,
    pending: SegQueue<Reactor>,
    current: Mutex<Option<(ThreadId, Reactor)>>,
    sync: Mutex<DrainState>,
    work_ready: Condvar,
    closed: AtomicBool,
}

impl PlantCore {
    fn new(config: PlantConfig) -> Self {
        PlantCore {
            config,
            pending: SegQueue::new(),
            current: Mutex::new(None),
            sync: Mutex::new(DrainState {
                draining: false,
                outstanding: 0,
            }),
            work_ready: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn settings(&self) -> &PlantSettings {
        &self.config.settings
    }

    pub(crate) fn recovery(&self) -> Arc<dyn Recovery> {
        Arc::clone(&self.config.recovery)
    }

    pub(crate) fn time_source(&self) -> &dyn TimeSource {
        self.config.time_source.as_ref()
    }

    /// Queue a reactor that has work. Safe from any thread.
    pub(crate) fn submit(&self, reactor: Reactor) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::trace!(reactor = %reactor.name(), "plant closed, submit ignored");
            return;
        }
        self.pending.push(reactor);
        let _sync = self.sync.lock();
        self.work_ready.notify_all();
    }

    /// The reactor being run by the calling thread, if any.
    pub(crate) fn current_reactor(&self) -> Option<Reactor> {
        match &*self.current.lock() {
            Some((thread, reactor)) if *thread == thread::current().id() => Some(reactor.clone()),
            _ => None,
        }
    }

    pub(crate) fn is_reactor_running(&self) -> bool {
        self.current_reactor().is_some()
    }

    /// Drain pending reactors until the queue is empty. Returns at once if
    /// another thread is already draining.
    pub(crate) fn process_messages(&self) {
        loop {
            {
                let mut sync = self.sync.lock();
                if sync.draining {
                    return;
                }
                sync.draining = true;
            }
            let drain = Draining(self);
            while let Some(reactor) = self.pending.pop() {
                let _current = CurrentReactor::enter(self, &reactor);
                reactor.run();
            }
            drop(drain);
            // A submit may have raced with the end of the drain.
            if self.pending.is_empty() {
                return;
            }
        }
    }

    /// Block until `done` holds or there is work this thread could drain.
    ///
    /// Returns false once `done` is still false while nothing is queued,
    /// nobody is draining and no scheduled task or live responder is
    /// outstanding. `done` is checked under the plant lock, so a completion
    /// followed by `wake` is never missed.
    pub(crate) fn await_work(&self, done: impl Fn() -> bool) -> bool {
        let mut sync = self.sync.lock();
        loop {
            if done() {
                return true;
            }
            if !sync.draining {
                if !self.pending.is_empty() {
                    return true;
                }
                if sync.outstanding == 0 {
                    return false;
                }
            }
            self.work_ready.wait(&mut sync);
        }
    }

    /// Wake threads blocked in `await_work`.
    pub(crate) fn wake(&self) {
        let _sync = self.sync.lock();
        self.work_ready.notify_all();
    }

    /// Count one unit of work that will arrive from outside the drain loop.
    /// Released when the returned guard drops.
    pub(crate) fn track_work(self: &Arc<Self>) -> Outstanding {
        self.sync.lock().outstanding += 1;
        Outstanding(Arc::clone(self))
    }

    pub(crate) fn schedule(self: &Arc<Self>, delay: Duration, task: Task) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!("plant closed, scheduled task dropped");
            return;
        }
        let outstanding = self.track_work();
        self.config.scheduler.schedule(
            delay,
            Box::new(move || {
                let _outstanding = outstanding;
                task();
            }),
        );
    }

    fn teardown(&self) {
        while self.pending.pop().is_some() {}
        let _sync = self.sync.lock();
        self.work_ready.notify_all();
    }
}

/// Clears the draining flag, also on unwind.
struct Draining<'a>(&'a PlantCore);

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        self.0.sync.lock().draining = false;
        self.0.work_ready.notify_all();
    }
}

/// Marks the reactor being run; cleared on drop, also on unwind.
struct CurrentReactor<'a>(&'a PlantCore);

impl<'a> CurrentReactor<'a> {
    fn enter(core: &'a PlantCore, reactor: &Reactor) -> Self {
        *core.current.lock() = Some((thread::current().id(), reactor.clone()));
        CurrentReactor(core)
    }
}

impl Drop for CurrentReactor<'_> {
    fn drop(&mut self) {
        *self.0.current.lock() = None;
    }
}

/// One scheduled task or live responder; released when it runs or is dropped.
pub(crate) struct Outstanding(Arc<PlantCore>);

impl Drop for Outstanding {
    fn drop(&mut self) {
        let mut sync = self.0.sync.lock();
        sync.outstanding = sync.outstanding.saturating_sub(1);
        self.0.work_ready.notify_all();
    }
}

/// Closes the scheduler and tears down the core even if closing the
/// facility unwinds.
struct Shutdown<'a>(&'a PlantCore);

impl Drop for Shutdown<'_> {
    fn drop(&mut self) {
        self.0.config.scheduler.close();
        self.0.teardown();
    }
}

struct PlantInner {
    core: Arc<PlantCore>,
    facility: Facility,
}

impl PlantInner {
    fn close(&self) {
        if self.core.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(plant = %self.core.settings().name, "closing plant");
        let _shutdown = Shutdown(&self.core);
        self.facility.close();
    }
}

impl Drop for PlantInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Runs reactors.
///
/// # Example
/// ```
/// use reactors::{Plant, PlantConfig, Request, SyncRequest};
///
/// let plant = Plant::new(PlantConfig::default());
/// let reactor = plant.non_blocking_reactor("adder").unwrap();
///
/// let sum = SyncRequest::new(&reactor, |_ctx| Ok(2 + 2)).call().unwrap();
/// assert_eq!(sum, 4);
///
/// plant.close();
/// assert!(reactor.is_closed());
/// ```
#[derive(Clone)]
pub struct Plant {
    inner: Arc<PlantInner>,
}

impl Plant {
    pub fn new(config: PlantConfig) -> Self {
        let name = config.settings.name.clone();
        let core = Arc::new(PlantCore::new(config));
        let facility = Facility::root(Arc::clone(&core), &name);
        Plant {
            inner: Arc::new(PlantInner { core, facility }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.core.settings().name
    }

    pub fn settings(&self) -> &PlantSettings {
        self.inner.core.settings()
    }

    /// The facility every plant-created reactor and facility lives under.
    pub fn internal_facility(&self) -> &Facility {
        &self.inner.facility
    }

    /// Create a facility under the internal facility.
    pub fn facility(&self, name: &str) -> Result<Facility> {
        self.inner.facility.facility(name)
    }

    pub fn non_blocking_reactor(&self, name: &str) -> Result<Reactor> {
        self.inner.facility.non_blocking_reactor(name)
    }

    pub fn isolation_reactor(&self, name: &str) -> Result<Reactor> {
        self.inner.facility.isolation_reactor(name)
    }

    /// Queue a reactor with pending work.
    pub fn submit(&self, reactor: &Reactor) {
        self.inner.core.submit(reactor.clone());
    }

    /// Run queued reactors until none has runnable work.
    pub fn process_messages(&self) {
        self.inner.core.process_messages();
    }

    /// Run `task` on the configured scheduler after `delay`.
    pub fn schedule(&self, delay: Duration, task: Task) {
        self.inner.core.schedule(delay, task);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.core.closed.load(Ordering::SeqCst)
    }

    /// Close the internal facility (and with it every reactor), then the
    /// scheduler. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Default for Plant {
    fn default() -> Self {
        Self::new(PlantConfig::default())
    }
}
