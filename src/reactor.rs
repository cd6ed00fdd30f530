/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Reactors: single-threaded execution contexts.
//!
//! A reactor owns a FIFO inbox and processes one message at a time. It has no
//! thread of its own; the plant's drain loop runs it when it has work.
//!
//! Two kinds exist:
//! - **NonBlocking** (a "common" reactor): while a request waits for
//!   sub-responses, other requests are processed.
//! - **Isolation**: while a request is in process, only responses are
//!   dequeued; new requests wait until it completes.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result, StackOverflow};
use crate::facility::{close_member, Facility, FacilityInner};
use crate::plant::PlantCore;
use crate::scheduler::Task;
use crate::{Closeable, Message, Recovery, RequestId, Timer};

/// Scheduling discipline of a reactor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReactorKind {
    /// Interleaves requests while earlier ones wait for responses
    NonBlocking,
    /// Processes one request at a time, start to completion
    Isolation,
}

/// Lifecycle of a reactor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReactorStatus {
    /// Never run yet
    Created,
    /// Evaluating a message
    Running,
    /// Between messages
    Idle,
    /// Terminal
    Closed,
}

static NEXT_REACTOR_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct ReactorImpl {
    id: u64,
    name: String,
    kind: ReactorKind,
    plant: Arc<PlantCore>,
    facility: Weak<FacilityInner>,
    parent: Weak<ReactorImpl>,
    state: Mutex<ReactorState>,
    /// Nesting of local (direct) sync calls
    local_depth: AtomicUsize,
    timer: Timer,
}

struct ReactorState {
    status: ReactorStatus,
    paused: bool,
    /// Queued in the plant or currently running
    scheduled: bool,
    inbox: VecDeque<Arc<dyn Message>>,
    current: Option<Arc<dyn Message>>,
    /// Requests targeting this reactor that started and have no response yet
    in_process: Vec<Arc<dyn Message>>,
    children: Vec<Reactor>,
    closeables: Vec<Arc<dyn Closeable>>,
}

/// Handle to a reactor. Cheap to clone; all clones address the same reactor.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<ReactorImpl>,
}

impl Reactor {
    pub(crate) fn new(
        plant: Arc<PlantCore>,
        facility: Weak<FacilityInner>,
        parent: Weak<ReactorImpl>,
        kind: ReactorKind,
        name: &str,
    ) -> Self {
        let reactor = Reactor {
            inner: Arc::new(ReactorImpl {
                id: NEXT_REACTOR_ID.fetch_add(1, Ordering::Relaxed),
                name: name.to_string(),
                kind,
                plant,
                facility,
                parent,
                state: Mutex::new(ReactorState {
                    status: ReactorStatus::Created,
                    paused: false,
                    scheduled: false,
                    inbox: VecDeque::new(),
                    current: None,
                    in_process: Vec::new(),
                    children: Vec::new(),
                    closeables: Vec::new(),
                }),
                local_depth: AtomicUsize::new(0),
                timer: Timer::new(),
            }),
        };
        tracing::debug!(reactor = %reactor.name(), kind = ?kind, "reactor created");
        reactor
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> ReactorKind {
        self.inner.kind
    }

    /// Common reactors are the shared, interleaving kind.
    pub fn is_common_reactor(&self) -> bool {
        self.inner.kind == ReactorKind::NonBlocking
    }

    pub fn status(&self) -> ReactorStatus {
        self.inner.state.lock().status
    }

    pub fn is_closed(&self) -> bool {
        self.status() == ReactorStatus::Closed
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    /// Number of queued messages (requests and responses).
    pub fn inbox_len(&self) -> usize {
        self.inner.state.lock().inbox.len()
    }

    /// Id of the request currently evaluating on this reactor.
    pub fn current_request_id(&self) -> Option<RequestId> {
        self.inner.state.lock().current.as_ref().map(|m| m.id())
    }

    /// Number of requests started on this reactor that have no response yet.
    pub fn in_process_count(&self) -> usize {
        self.inner.state.lock().in_process.len()
    }

    pub fn timer(&self) -> &Timer {
        &self.inner.timer
    }

    pub fn recovery(&self) -> Arc<dyn Recovery> {
        self.inner.plant.recovery()
    }

    /// The facility this reactor belongs to, while it is alive.
    pub fn facility(&self) -> Option<Facility> {
        self.inner.facility.upgrade().map(Facility::from_inner)
    }

    pub fn parent(&self) -> Option<Reactor> {
        self.inner.parent.upgrade().map(|inner| Reactor { inner })
    }

    /// Create a reactor nested under this one. Closing this reactor closes
    /// the child.
    pub fn child(&self, kind: ReactorKind, name: &str) -> Result<Reactor> {
        if self.is_closed() {
            return Err(Error::ReactorClosed(self.name().to_string()));
        }
        let facility = self
            .facility()
            .ok_or_else(|| Error::illegal_state(format!("reactor {} has no facility", self.name())))?;
        let child = facility.create_reactor(kind, name, Arc::downgrade(&self.inner))?;

        let mut state = self.inner.state.lock();
        if state.status == ReactorStatus::Closed {
            drop(state);
            child.close();
            return Err(Error::ReactorClosed(self.name().to_string()));
        }
        state.children.push(child.clone());
        Ok(child)
    }

    /// Close `closeable` when this reactor closes.
    pub fn add_closeable(&self, closeable: Arc<dyn Closeable>) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.status == ReactorStatus::Closed {
            return Err(Error::ReactorClosed(self.name().to_string()));
        }
        state.closeables.push(closeable);
        Ok(())
    }

    pub fn remove_closeable(&self, closeable: &Arc<dyn Closeable>) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.closeables.len();
        state.closeables.retain(|c| !same_closeable(c, closeable));
        state.closeables.len() != before
    }

    /// Stop being run by the plant. Messages keep queueing.
    pub fn pause(&self) {
        self.inner.state.lock().paused = true;
    }

    pub fn resume(&self) {
        let submit = {
            let mut state = self.inner.state.lock();
            state.paused = false;
            !state.inbox.is_empty() && Self::mark_scheduled(&mut state)
        };
        if submit {
            self.inner.plant.submit(self.clone());
        }
    }

    /// Run `task` on the plant's scheduler after `delay`.
    pub fn schedule(&self, delay: Duration, task: Task) {
        self.inner.plant.schedule(delay, task);
    }

    pub fn error(&self, msg: &str) {
        tracing::error!(reactor = %self.name(), "{}", msg);
    }

    pub fn warn(&self, msg: &str) {
        tracing::warn!(reactor = %self.name(), "{}", msg);
    }

    /// Log `msg` as an error and close the reactor.
    pub fn fail(&self, msg: &str) {
        self.error(msg);
        self.close();
    }

    /// Close the reactor.
    ///
    /// In-process and queued requests complete with `ReactorClosed`; queued
    /// responses are dropped; children and closeables are closed. Idempotent.
    pub fn close(&self) {
        let (inbox, in_process, children, closeables) = {
            let mut state = self.inner.state.lock();
            if state.status == ReactorStatus::Closed {
                return;
            }
            state.status = ReactorStatus::Closed;
            (
                std::mem::take(&mut state.inbox),
                std::mem::take(&mut state.in_process),
                std::mem::take(&mut state.children),
                std::mem::take(&mut state.closeables),
            )
        };
        tracing::debug!(
            reactor = %self.name(),
            in_process = in_process.len(),
            queued = inbox.len(),
            "reactor closed"
        );

        let name = self.name();
        for request in in_process {
            close_member(name, || request.close());
        }
        for message in inbox {
            if !message.is_complete() {
                close_member(name, || message.close());
            }
        }
        for child in children {
            close_member(name, || child.close());
        }
        for closeable in closeables {
            close_member(name, || closeable.close());
        }

        if let Some(facility) = self.facility() {
            facility.remove_reactor(self.id());
        }
        if let Some(parent) = self.parent() {
            parent.inner.state.lock().children.retain(|c| c.id() != self.id());
        }
    }

    // ------------------------------------------------------------------
    // Crate-internal plumbing used by requests and the plant
    // ------------------------------------------------------------------

    pub(crate) fn plant(&self) -> &Arc<PlantCore> {
        &self.inner.plant
    }

    pub(crate) fn current_request(&self) -> Option<Arc<dyn Message>> {
        self.inner.state.lock().current.clone()
    }

    pub(crate) fn set_current_request(&self, request: Option<Arc<dyn Message>>) {
        self.inner.state.lock().current = request;
    }

    /// Queue a request. `local` is true when the submitter runs on this
    /// reactor; ordering is FIFO either way.
    pub(crate) fn unbuffered_add_message(&self, message: Arc<dyn Message>, local: bool) -> Result<()> {
        let submit = {
            let mut state = self.inner.state.lock();
            if state.status == ReactorStatus::Closed {
                return Err(Error::ReactorClosed(self.name().to_string()));
            }
            state.inbox.push_back(message);
            Self::mark_scheduled(&mut state)
        };
        tracing::trace!(reactor = %self.name(), local, "message queued");
        if submit {
            self.inner.plant.submit(self.clone());
        }
        Ok(())
    }

    /// Queue a completed request for response delivery. Dropped if closed.
    pub(crate) fn incoming_response(&self, message: Arc<dyn Message>, local: bool) {
        if let Err(e) = self.unbuffered_add_message(message, local) {
            tracing::trace!(reactor = %self.name(), error = %e, "response dropped");
        }
    }

    /// Install `request` as current and start its timed window.
    pub(crate) fn request_begin(&self, request: Arc<dyn Message>) -> u64 {
        {
            let mut state = self.inner.state.lock();
            let id = request.id();
            if !state.in_process.iter().any(|m| m.id() == id) {
                state.in_process.push(Arc::clone(&request));
            }
            state.current = Some(request);
        }
        self.inner.plant.time_source().nano_time()
    }

    pub(crate) fn request_end(&self, start: u64, success: bool) {
        let elapsed = self.inner.plant.time_source().nano_time().saturating_sub(start);
        if success {
            self.inner.timer.success(elapsed);
        } else {
            self.inner.timer.failure(elapsed);
        }
        self.inner.state.lock().current = None;
    }

    /// A request targeting this reactor received its response.
    pub(crate) fn request_completed(&self, id: RequestId) {
        let submit = {
            let mut state = self.inner.state.lock();
            state.in_process.retain(|m| m.id() != id);
            // An isolation reactor may now accept the requests it held back.
            state.status != ReactorStatus::Closed
                && state.in_process.is_empty()
                && !state.inbox.is_empty()
                && Self::mark_scheduled(&mut state)
        };
        if submit {
            self.inner.plant.submit(self.clone());
        }
    }

    /// Enter a nested local call. Unwinds with `StackOverflow` past the
    /// configured depth.
    pub(crate) fn enter_local(&self) -> LocalCall<'_> {
        let depth = self.inner.local_depth.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = LocalCall { reactor: self };
        if depth > self.inner.plant.settings().max_local_depth {
            std::panic::panic_any(StackOverflow { depth });
        }
        guard
    }

    /// Process queued messages until the inbox has nothing runnable.
    pub(crate) fn run(&self) {
        loop {
            let message = {
                let mut state = self.inner.state.lock();
                if state.status == ReactorStatus::Closed || state.paused {
                    state.scheduled = false;
                    return;
                }
                match self.next_message(&mut state) {
                    Some(message) => {
                        state.status = ReactorStatus::Running;
                        message
                    }
                    None => {
                        state.scheduled = false;
                        if state.status == ReactorStatus::Running {
                            state.status = ReactorStatus::Idle;
                        }
                        return;
                    }
                }
            };
            message.eval();
        }
    }

    fn next_message(&self, state: &mut ReactorState) -> Option<Arc<dyn Message>> {
        if self.inner.kind == ReactorKind::Isolation && !state.in_process.is_empty() {
            let position = state.inbox.iter().position(|m| m.is_complete())?;
            return state.inbox.remove(position);
        }
        state.inbox.pop_front()
    }

    fn mark_scheduled(state: &mut ReactorState) -> bool {
        if state.scheduled || state.paused {
            return false;
        }
        state.scheduled = true;
        true
    }
}

/// Guard for one level of local-call nesting.
pub(crate) struct LocalCall<'a> {
    reactor: &'a Reactor,
}

impl Drop for LocalCall<'_> {
    fn drop(&mut self) {
        self.reactor.inner.local_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

fn same_closeable(a: &Arc<dyn Closeable>, b: &Arc<dyn Closeable>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl PartialEq for Reactor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Reactor {}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

impl Closeable for Reactor {
    fn close(&self) {
        Reactor::close(self);
    }
}
