/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Facility - a named closure boundary for reactors and resources.
//!
//! A facility owns its member reactors, any registered closeables, and child
//! facilities. Closing it closes children first, then reactors, then
//! closeables. A member that panics while closing does not stop the rest.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Fault, Result};
use crate::plant::PlantCore;
use crate::reactor::{ReactorImpl, ReactorKind};
use crate::Reactor;

/// Anything that can be shut down by a reactor or facility.
pub trait Closeable: Send + Sync {
    fn close(&self);
}

pub(crate) struct FacilityInner {
    name: String,
    plant: Arc<PlantCore>,
    parent: Weak<FacilityInner>,
    state: Mutex<FacilityState>,
}

struct FacilityState {
    closed: bool,
    reactors: Vec<Reactor>,
    closeables: Vec<Arc<dyn Closeable>>,
    children: Vec<Facility>,
}

/// A named group of reactors and closeable resources.
///
/// # Example
/// ```
/// use reactors::{Plant, PlantConfig};
///
/// let plant = Plant::new(PlantConfig::default());
/// let workers = plant.facility("workers").unwrap();
/// let w1 = workers.non_blocking_reactor("w1").unwrap();
/// let w2 = workers.isolation_reactor("w2").unwrap();
///
/// workers.close();
/// assert!(w1.is_closed() && w2.is_closed());
/// ```
#[derive(Clone)]
pub struct Facility {
    inner: Arc<FacilityInner>,
}

impl Facility {
    pub(crate) fn root(plant: Arc<PlantCore>, name: &str) -> Self {
        Self::with_parent(plant, Weak::new(), name)
    }

    fn with_parent(plant: Arc<PlantCore>, parent: Weak<FacilityInner>, name: &str) -> Self {
        Facility {
            inner: Arc::new(FacilityInner {
                name: name.to_string(),
                plant,
                parent,
                state: Mutex::new(FacilityState {
                    closed: false,
                    reactors: Vec::new(),
                    closeables: Vec::new(),
                    children: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<FacilityInner>) -> Self {
        Facility { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn parent(&self) -> Option<Facility> {
        self.inner.parent.upgrade().map(Facility::from_inner)
    }

    /// Create a nested facility, closed together with this one.
    pub fn facility(&self, name: &str) -> Result<Facility> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        let child = Facility::with_parent(
            Arc::clone(&self.inner.plant),
            Arc::downgrade(&self.inner),
            name,
        );
        state.children.push(child.clone());
        Ok(child)
    }

    pub fn reactor(&self, kind: ReactorKind, name: &str) -> Result<Reactor> {
        self.create_reactor(kind, name, Weak::new())
    }

    pub fn non_blocking_reactor(&self, name: &str) -> Result<Reactor> {
        self.reactor(ReactorKind::NonBlocking, name)
    }

    pub fn isolation_reactor(&self, name: &str) -> Result<Reactor> {
        self.reactor(ReactorKind::Isolation, name)
    }

    /// Member reactors that are still open.
    pub fn reactors(&self) -> Vec<Reactor> {
        self.inner.state.lock().reactors.clone()
    }

    pub fn children(&self) -> Vec<Facility> {
        self.inner.state.lock().children.clone()
    }

    pub fn add_closeable(&self, closeable: Arc<dyn Closeable>) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        state.closeables.push(closeable);
        Ok(())
    }

    pub fn remove_closeable(&self, closeable: &Arc<dyn Closeable>) -> bool {
        let target = Arc::as_ptr(closeable) as *const ();
        let mut state = self.inner.state.lock();
        let before = state.closeables.len();
        state
            .closeables
            .retain(|c| Arc::as_ptr(c) as *const () != target);
        state.closeables.len() != before
    }

    /// Close children, member reactors and closeables. Idempotent.
    pub fn close(&self) {
        let (children, reactors, closeables) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.children),
                std::mem::take(&mut state.reactors),
                std::mem::take(&mut state.closeables),
            )
        };
        tracing::debug!(
            facility = %self.name(),
            children = children.len(),
            reactors = reactors.len(),
            "closing facility"
        );

        let name = self.name();
        for child in children {
            close_member(name, || child.close());
        }
        for reactor in reactors {
            close_member(name, || reactor.close());
        }
        for closeable in closeables {
            close_member(name, || closeable.close());
        }

        if let Some(parent) = self.parent() {
            parent
                .inner
                .state
                .lock()
                .children
                .retain(|c| !Arc::ptr_eq(&c.inner, &self.inner));
        }
    }

    pub(crate) fn create_reactor(
        &self,
        kind: ReactorKind,
        name: &str,
        parent: Weak<ReactorImpl>,
    ) -> Result<Reactor> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        let reactor = Reactor::new(
            Arc::clone(&self.inner.plant),
            Arc::downgrade(&self.inner),
            parent,
            kind,
            name,
        );
        state.reactors.push(reactor.clone());
        Ok(reactor)
    }

    pub(crate) fn remove_reactor(&self, id: u64) {
        self.inner.state.lock().reactors.retain(|r| r.id() != id);
    }

    fn closed_error(&self) -> Error {
        Error::illegal_state(format!("facility {} is closed", self.name()))
    }
}

/// Run one member's close; a panic is logged and the cascade goes on.
pub(crate) fn close_member(owner: &str, close: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(close)) {
        let fault = Fault::from_payload(payload);
        tracing::error!(owner = %owner, error = %fault, "close failed");
    }
}

impl Closeable for Facility {
    fn close(&self) {
        Facility::close(self);
    }
}

impl std::fmt::Debug for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Facility")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
