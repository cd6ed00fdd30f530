/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Requests: one unit of work bound to a target reactor.
//!
//! A request is submitted exactly once, with one of:
//! - `signal()`: one-way, nobody waits for the response
//! - `call()`: blocking, from outside any reactor
//! - `do_send()`: from a running reactor, the response comes back to it as a
//!   callback with the sender's current request restored
//!
//! `SyncRequest` bodies return their value directly. `AsyncRequest` bodies
//! (see `async_request`) may send sub-requests and answer later.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Fault, Result};
use crate::{Message, Reactor, RequestId, RequestState};

/// Callback receiving the response of a sent request.
pub type ResponseProcessor<T> = Box<dyn FnOnce(Result<T>) + Send>;

/// How the response leaves the request once assigned.
pub(crate) enum Delivery<T> {
    Unset,
    /// One-way: value dropped, errors logged
    Signal,
    /// A blocking `call()` polls for it
    Caller,
    /// Returned directly by a local call
    Local,
    /// Bounced back to the source reactor
    Callback(ResponseProcessor<T>),
    /// Callback already consumed
    Delivered,
}

pub(crate) struct SharedState<T> {
    used: bool,
    processing: bool,
    complete: bool,
    canceled: bool,
    closed: bool,
    isolated: bool,
    source: Option<Reactor>,
    /// The source's current request at send time
    old_message: Option<Arc<dyn Message>>,
    delivery: Delivery<T>,
    response: Option<Result<T>>,
}

/// State common to sync and async requests.
pub(crate) struct RequestShared<T> {
    id: RequestId,
    target: Reactor,
    state: Mutex<SharedState<T>>,
}

impl<T> RequestShared<T> {
    pub(crate) fn new(target: &Reactor) -> Self {
        RequestShared {
            id: RequestId::next(),
            target: target.clone(),
            state: Mutex::new(SharedState {
                used: false,
                processing: false,
                complete: false,
                canceled: false,
                closed: false,
                isolated: false,
                source: None,
                old_message: None,
                delivery: Delivery::Unset,
                response: None,
            }),
        }
    }

    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    pub(crate) fn target(&self) -> &Reactor {
        &self.target
    }

    /// Mark the request used. Fails on a second submission.
    fn claim(
        &self,
        delivery: Delivery<T>,
        source: Option<Reactor>,
        old_message: Option<Arc<dyn Message>>,
        isolated: bool,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.used {
            return Err(Error::illegal_state(format!(
                "request {} has already been used",
                self.id
            )));
        }
        state.used = true;
        state.delivery = delivery;
        state.source = source;
        state.old_message = old_message;
        state.isolated = isolated;
        Ok(())
    }

    /// Returns false if already complete or canceled.
    fn mark_canceled(&self) -> bool {
        let mut state = self.state.lock();
        if state.complete || state.canceled {
            return false;
        }
        state.canceled = true;
        true
    }

    fn mark_closed(&self) -> bool {
        let mut state = self.state.lock();
        if state.complete {
            return false;
        }
        state.closed = true;
        true
    }

    fn set_processing(&self) {
        self.state.lock().processing = true;
    }

    fn take_response(&self) -> Option<Result<T>> {
        self.state.lock().response.take()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.state.lock().canceled
    }

    pub(crate) fn is_isolated(&self) -> bool {
        self.state.lock().isolated
    }

    pub(crate) fn state(&self) -> RequestState {
        let state = self.state.lock();
        if state.closed {
            RequestState::Closed
        } else if state.complete {
            RequestState::Complete
        } else if state.canceled {
            RequestState::Canceled
        } else if state.processing {
            RequestState::Processing
        } else if !state.used {
            RequestState::New
        } else if matches!(state.delivery, Delivery::Signal) {
            RequestState::Signaled
        } else {
            RequestState::Sent
        }
    }
}

/// The state machine shared by `SyncRequest` and `AsyncRequest`.
pub(crate) trait RequestImpl<T: Send + 'static>: Message + Sized {
    fn shared(&self) -> &RequestShared<T>;

    /// Run the body on the target reactor.
    fn process_request_message(self: &Arc<Self>);

    /// An application error raised while this request is current.
    fn process_exception(self: &Arc<Self>, error: Error);

    /// Cancel outstanding sub-requests.
    fn cancel_pending(&self) {}

    /// Dispatch: run the body if incomplete, deliver the response otherwise.
    fn eval_request(self: &Arc<Self>) {
        let shared = self.shared();
        let (complete, canceled) = {
            let state = shared.state.lock();
            (state.complete, state.canceled)
        };
        if complete {
            self.process_response_message();
            return;
        }
        if canceled {
            self.process_object_response(Err(Error::Canceled));
            return;
        }

        shared.set_processing();
        let target = shared.target().clone();
        let message: Arc<dyn Message> = Arc::clone(self) as Arc<dyn Message>;
        let start = target.request_begin(Arc::clone(&message));
        let outcome = catch_unwind(AssertUnwindSafe(|| self.process_request_message()));
        target.request_end(start, outcome.is_ok());

        if let Err(payload) = outcome {
            let fault = Fault::from_payload(payload);
            recover(message.as_ref(), &fault);
            if !self.is_complete() {
                self.process_object_response(Err(Error::message(format!(
                    "request {} failed: {}",
                    shared.id(),
                    fault
                ))));
            }
        }
    }

    /// Assign the response. Only the first assignment counts.
    fn process_object_response(self: &Arc<Self>, response: Result<T>) {
        let shared = self.shared();
        let id = shared.id();
        let (notify, uncaught, caller) = {
            let mut state = shared.state.lock();
            if state.complete {
                return;
            }
            state.complete = true;
            if matches!(state.delivery, Delivery::Signal) {
                (None, response.err(), false)
            } else {
                state.response = Some(response);
                if matches!(state.delivery, Delivery::Callback(_)) {
                    (state.source.clone(), None, false)
                } else {
                    (None, None, matches!(state.delivery, Delivery::Caller))
                }
            }
        };

        let target = shared.target();
        target.request_completed(id);
        if caller {
            // The caller may be blocked on another thread.
            target.plant().wake();
        }
        self.cancel_pending();

        if let Some(error) = uncaught {
            tracing::warn!(reactor = %target.name(), request = %id, "uncaught error in signaled request: {}", error);
        }
        if let Some(source) = notify {
            let local = source == *target;
            source.incoming_response(Arc::clone(self) as Arc<dyn Message>, local);
        }
    }

    /// Runs on the source reactor: hand the response to its callback with
    /// the sender's request restored as current.
    fn process_response_message(self: &Arc<Self>) {
        let (processor, response, old_message, source) = {
            let mut state = self.shared().state.lock();
            let processor = match std::mem::replace(&mut state.delivery, Delivery::Delivered) {
                Delivery::Callback(processor) => processor,
                other => {
                    state.delivery = other;
                    return;
                }
            };
            (
                processor,
                state.response.take(),
                state.old_message.take(),
                state.source.clone(),
            )
        };
        let (Some(response), Some(source)) = (response, source) else {
            return;
        };

        source.set_current_request(old_message.clone());
        let outcome = catch_unwind(AssertUnwindSafe(move || processor(response)));
        source.set_current_request(None);

        if let Err(payload) = outcome {
            let fault = Fault::from_payload(payload);
            match old_message {
                Some(old) => {
                    recover(old.as_ref(), &fault);
                    if !old.is_complete() {
                        let error = Error::message(format!("request {} failed: {}", old.id(), fault));
                        old.fail(error);
                    }
                }
                None => source.fail(&format!("response callback failed: {}", fault)),
            }
        }
    }

    fn close_request(self: &Arc<Self>) {
        if self.shared().mark_closed() {
            let name = self.shared().target().name().to_string();
            self.process_object_response(Err(Error::ReactorClosed(name)));
        }
    }

    fn cancel_request(self: &Arc<Self>) {
        if self.shared().mark_canceled() {
            tracing::trace!(request = %self.shared().id(), "request canceled");
            self.cancel_pending();
        }
    }

    fn signal_request(self: &Arc<Self>) -> Result<()> {
        let shared = self.shared();
        shared.claim(Delivery::Signal, None, None, false)?;
        let target = shared.target();
        let plant = Arc::clone(target.plant());
        let local = plant.current_reactor().is_some_and(|r| r == *target);
        target.unbuffered_add_message(Arc::clone(self) as Arc<dyn Message>, local)?;
        if !plant.is_reactor_running() {
            plant.process_messages();
        }
        Ok(())
    }

    fn call_request(self: &Arc<Self>) -> Result<T> {
        let shared = self.shared();
        let target = shared.target();
        let plant = Arc::clone(target.plant());
        if plant.is_reactor_running() {
            return Err(Error::illegal_state(format!(
                "request {}: call() is not allowed inside a reactor, use send",
                shared.id()
            )));
        }
        shared.claim(Delivery::Caller, None, None, false)?;
        target.unbuffered_add_message(Arc::clone(self) as Arc<dyn Message>, false)?;

        loop {
            plant.process_messages();
            if let Some(response) = shared.take_response() {
                return response;
            }
            if !plant.await_work(|| shared.is_complete()) {
                if let Some(response) = shared.take_response() {
                    return response;
                }
                if shared.is_canceled() {
                    return Err(Error::Canceled);
                }
                return Err(Error::Incomplete(shared.id()));
            }
        }
    }

    fn do_send_request(self: &Arc<Self>, source: &Reactor, processor: ResponseProcessor<T>) -> Result<()> {
        let shared = self.shared();
        let running = source.plant().current_reactor();
        if running.as_ref() != Some(source) {
            return Err(Error::illegal_state(format!(
                "request {}: source reactor {} is not running on this thread",
                shared.id(),
                source.name()
            )));
        }
        let old_message = source.current_request().ok_or_else(|| {
            Error::illegal_state(format!(
                "request {}: source reactor {} has no current request",
                shared.id(),
                source.name()
            ))
        })?;

        let target = shared.target();
        let isolated = !source.is_common_reactor();
        if isolated && target == source {
            return Err(Error::illegal_state(format!(
                "request {}: isolation reactor {} cannot send to itself",
                shared.id(),
                source.name()
            )));
        }

        shared.claim(
            Delivery::Callback(processor),
            Some(source.clone()),
            Some(old_message),
            isolated,
        )?;
        target.unbuffered_add_message(Arc::clone(self) as Arc<dyn Message>, target == source)
    }
}

/// Hand a caught fault to the target's recovery policy. A panicking policy is
/// logged and ignored.
pub(crate) fn recover(request: &dyn Message, fault: &Fault) {
    let recovery = request.target().recovery();
    let outcome = catch_unwind(AssertUnwindSafe(|| match fault {
        Fault::StackOverflow(e) => recovery.on_stack_overflow(request, e),
        Fault::Panic(e) => recovery.on_runtime_exception(request, e),
    }));
    if outcome.is_err() {
        tracing::error!(
            reactor = %request.target().name(),
            request = %request.id(),
            "recovery failed while handling {}",
            fault
        );
    }
}

/// Operations common to every request type.
pub trait Request<T: Send + 'static> {
    fn id(&self) -> RequestId;

    fn target(&self) -> &Reactor;

    fn state(&self) -> RequestState;

    /// Sent from an isolation reactor.
    fn is_isolated(&self) -> bool;

    /// The type-erased view of this request.
    fn message(&self) -> Arc<dyn Message>;

    /// Submit without waiting for a response. Drains the plant when called
    /// from outside any reactor.
    fn signal(&self) -> Result<()>;

    /// Submit and block until the response. Not allowed inside a reactor.
    fn call(&self) -> Result<T>;

    /// Submit from the running `source` reactor; `on_response` runs there
    /// once the response is back.
    fn do_send(&self, source: &Reactor, on_response: ResponseProcessor<T>) -> Result<()>;

    /// Cancel this request and its pending sub-requests. Idempotent.
    fn cancel(&self);
}

type SyncBody<T> = Box<dyn FnOnce(&mut SyncContext) -> Result<T> + Send>;

pub(crate) struct SyncRequestImpl<T> {
    shared: RequestShared<T>,
    body: Mutex<Option<SyncBody<T>>>,
}

impl<T: Send + 'static> RequestImpl<T> for SyncRequestImpl<T> {
    fn shared(&self) -> &RequestShared<T> {
        &self.shared
    }

    fn process_request_message(self: &Arc<Self>) {
        let Some(body) = self.body.lock().take() else {
            return;
        };
        let mut ctx = SyncContext {
            reactor: self.shared.target().clone(),
            request_id: self.shared.id(),
        };
        match body(&mut ctx) {
            Ok(value) => self.process_object_response(Ok(value)),
            Err(error) => self.process_exception(error),
        }
    }

    fn process_exception(self: &Arc<Self>, error: Error) {
        self.process_object_response(Err(error));
    }
}

impl<T: Send + 'static> Message for SyncRequestImpl<T> {
    fn id(&self) -> RequestId {
        self.shared.id()
    }

    fn target(&self) -> &Reactor {
        self.shared.target()
    }

    fn eval(self: Arc<Self>) {
        self.eval_request();
    }

    fn close(self: Arc<Self>) {
        self.close_request();
    }

    fn cancel(self: Arc<Self>) {
        self.cancel_request();
    }

    fn fail(self: Arc<Self>, error: Error) {
        self.process_object_response(Err(error));
    }

    fn is_complete(&self) -> bool {
        self.shared.is_complete()
    }

    fn is_canceled(&self) -> bool {
        self.shared.is_canceled()
    }

    fn state(&self) -> RequestState {
        self.shared.state()
    }
}

/// A request whose body computes its response directly.
///
/// # Example
/// ```
/// use reactors::{Plant, Request, SyncRequest};
///
/// let plant = Plant::default();
/// let r = plant.non_blocking_reactor("r").unwrap();
/// let greeting = SyncRequest::new(&r, |ctx| Ok(format!("hello from {}", ctx.reactor().name())));
/// assert_eq!(greeting.call().unwrap(), "hello from r");
/// ```
pub struct SyncRequest<T> {
    inner: Arc<SyncRequestImpl<T>>,
}

impl<T> Clone for SyncRequest<T> {
    fn clone(&self) -> Self {
        SyncRequest {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> SyncRequest<T> {
    pub fn new<F>(target: &Reactor, body: F) -> Self
    where
        F: FnOnce(&mut SyncContext) -> Result<T> + Send + 'static,
    {
        SyncRequest {
            inner: Arc::new(SyncRequestImpl {
                shared: RequestShared::new(target),
                body: Mutex::new(Some(Box::new(body))),
            }),
        }
    }

    /// Run the body directly on `reactor`, which must be this request's
    /// target and currently running on this thread.
    pub(crate) fn local(&self, reactor: &Reactor) -> Result<T> {
        let shared = &self.inner.shared;
        if shared.target() != reactor {
            return Err(Error::illegal_state(format!(
                "request {}: local call targets {}, running reactor is {}",
                shared.id(),
                shared.target().name(),
                reactor.name()
            )));
        }
        if reactor.plant().current_reactor().as_ref() != Some(reactor) {
            return Err(Error::illegal_state(format!(
                "request {}: local call outside of reactor {}",
                shared.id(),
                reactor.name()
            )));
        }
        shared.claim(Delivery::Local, None, None, false)?;

        let _depth = reactor.enter_local();
        shared.set_processing();
        let body = self.inner.body.lock().take().ok_or_else(|| {
            Error::illegal_state(format!("request {} has no body", shared.id()))
        })?;
        let mut ctx = SyncContext {
            reactor: reactor.clone(),
            request_id: shared.id(),
        };
        let result = body(&mut ctx);
        shared.state.lock().complete = true;
        result
    }
}

impl<T: Send + 'static> Request<T> for SyncRequest<T> {
    fn id(&self) -> RequestId {
        self.inner.shared.id()
    }

    fn target(&self) -> &Reactor {
        self.inner.shared.target()
    }

    fn state(&self) -> RequestState {
        self.inner.shared.state()
    }

    fn is_isolated(&self) -> bool {
        self.inner.shared.is_isolated()
    }

    fn message(&self) -> Arc<dyn Message> {
        Arc::clone(&self.inner) as Arc<dyn Message>
    }

    fn signal(&self) -> Result<()> {
        self.inner.signal_request()
    }

    fn call(&self) -> Result<T> {
        self.inner.call_request()
    }

    fn do_send(&self, source: &Reactor, on_response: ResponseProcessor<T>) -> Result<()> {
        self.inner.do_send_request(source, on_response)
    }

    fn cancel(&self) {
        self.inner.cancel_request();
    }
}

impl<T> std::fmt::Debug for SyncRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRequest")
            .field("id", &self.inner.shared.id)
            .field("target", &self.inner.shared.target.name())
            .finish()
    }
}

/// What a sync body sees of its environment.
pub struct SyncContext {
    reactor: Reactor,
    request_id: RequestId,
}

impl SyncContext {
    /// The reactor running the body.
    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Run another sync request targeting this reactor in place.
    pub fn local<U: Send + 'static>(&mut self, request: &SyncRequest<U>) -> Result<U> {
        request.local(&self.reactor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Plant, PlantConfig, PlantSettings, ReactorStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn plant() -> Plant {
        Plant::new(PlantConfig::default())
    }

    #[test]
    fn test_call_returns_value_and_error() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let ok = SyncRequest::new(&r, |_ctx| Ok(21 * 2));
        assert_eq!(ok.state(), RequestState::New);
        assert_eq!(ok.call().unwrap(), 42);
        assert_eq!(ok.state(), RequestState::Complete);

        let err = SyncRequest::<u32>::new(&r, |_ctx| Err(Error::message("no")));
        assert_eq!(err.call().unwrap_err().to_string(), "no");
        assert!(!r.is_closed());
    }

    #[test]
    fn test_one_shot_submission() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let request = SyncRequest::new(&r, move |_ctx| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        request.signal().unwrap();
        assert!(matches!(request.signal(), Err(Error::IllegalState(_))));
        assert!(matches!(request.call(), Err(Error::IllegalState(_))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_do_send_outside_reactor_is_illegal() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let request = SyncRequest::new(&r, |_ctx| Ok(()));
        let result = request.do_send(&r, Box::new(|_| {}));
        assert!(matches!(result, Err(Error::IllegalState(_))));
        // Not consumed by the failed send.
        assert_eq!(request.state(), RequestState::New);
    }

    #[test]
    fn test_do_send_from_other_reactor_is_illegal() {
        let plant = plant();
        let a = plant.non_blocking_reactor("a").unwrap();
        let b = plant.non_blocking_reactor("b").unwrap();
        let outcome = SyncRequest::new(&a, move |_ctx| {
            let request = SyncRequest::new(&b, |_ctx| Ok(()));
            let illegal = matches!(
                request.do_send(&b, Box::new(|_| {})),
                Err(Error::IllegalState(_))
            );
            Ok(illegal && request.state() == RequestState::New)
        })
        .call()
        .unwrap();
        assert!(outcome);
    }

    #[test]
    fn test_call_inside_reactor_is_illegal() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let other = plant.non_blocking_reactor("other").unwrap();
        let outcome = SyncRequest::new(&r, move |_ctx| {
            let inner = SyncRequest::new(&other, |_ctx| Ok(1));
            Ok(matches!(inner.call(), Err(Error::IllegalState(_))))
        })
        .call()
        .unwrap();
        assert!(outcome);
    }

    #[test]
    fn test_fifo_per_reactor() {
        let plant = plant();
        let driver = plant.non_blocking_reactor("driver").unwrap();
        let worker = plant.non_blocking_reactor("worker").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        SyncRequest::new(&driver, move |_ctx| {
            for name in ["A", "B", "C"] {
                let log = Arc::clone(&log);
                SyncRequest::new(&worker, move |_ctx| {
                    log.lock().push(name);
                    Ok(())
                })
                .signal()?;
            }
            Ok(())
        })
        .call()
        .unwrap();
        plant.process_messages();

        assert_eq!(*seen.lock(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_response_assigned_once() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let request = SyncRequest::new(&r, |_ctx| Ok(1));
        assert_eq!(request.call().unwrap(), 1);

        request.inner.process_object_response(Ok(2));
        Arc::clone(&request.inner).fail(Error::message("late"));
        Arc::clone(&request.inner).close();
        assert_eq!(request.state(), RequestState::Complete);
        assert!(request.inner.shared.take_response().is_none());
    }

    #[test]
    fn test_signal_error_is_logged_not_fatal() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        SyncRequest::<()>::new(&r, |_ctx| Err(Error::message("ignored")))
            .signal()
            .unwrap();
        assert!(!r.is_closed());
        assert_eq!(r.status(), ReactorStatus::Idle);
    }

    #[test]
    fn test_panic_closes_only_target() {
        let plant = plant();
        let bad = plant.non_blocking_reactor("bad").unwrap();
        let good = plant.non_blocking_reactor("good").unwrap();

        let result = SyncRequest::<()>::new(&bad, |_ctx| panic!("boom")).call();
        assert!(matches!(result, Err(Error::ReactorClosed(_))));
        assert!(bad.is_closed());
        assert_eq!(bad.timer().snapshot().failure_count, 1);

        assert!(!good.is_closed());
        assert_eq!(SyncRequest::new(&good, |_ctx| Ok("fine")).call().unwrap(), "fine");
    }

    #[test]
    fn test_canceled_before_processing() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        r.pause();
        let request = SyncRequest::new(&r, |_ctx| Ok(1));
        request.signal().unwrap();
        request.cancel();
        request.cancel();
        assert_eq!(request.state(), RequestState::Canceled);

        r.resume();
        plant.process_messages();
        assert_eq!(request.state(), RequestState::Complete);
        assert!(!r.is_closed());
    }

    #[test]
    fn test_closing_target_completes_queued_request() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        r.pause();
        let request = SyncRequest::new(&r, |_ctx| Ok(1));
        request.signal().unwrap();
        r.close();
        assert_eq!(request.state(), RequestState::Closed);
    }

    #[test]
    fn test_local_call_runs_in_place() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let target = r.clone();
        let value = SyncRequest::new(&r, move |ctx| {
            let double = SyncRequest::new(&target, |_ctx| Ok(2 * 8));
            ctx.local(&double)
        })
        .call()
        .unwrap();
        assert_eq!(value, 16);
    }

    #[test]
    fn test_local_call_to_other_reactor_is_illegal() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let other = plant.non_blocking_reactor("other").unwrap();
        let result = SyncRequest::new(&r, move |ctx| {
            let elsewhere = SyncRequest::new(&other, |_ctx| Ok(()));
            Ok(matches!(ctx.local(&elsewhere), Err(Error::IllegalState(_))))
        })
        .call()
        .unwrap();
        assert!(result);
    }

    fn recurse(reactor: Reactor) -> SyncRequest<usize> {
        let target = reactor.clone();
        SyncRequest::new(&reactor, move |ctx| {
            let next = recurse(target);
            ctx.local(&next).map(|depth| depth + 1)
        })
    }

    #[test]
    fn test_stack_overflow_closes_reactor() {
        let settings = PlantSettings {
            max_local_depth: 16,
            ..PlantSettings::default()
        };
        let plant = Plant::new(PlantConfig::default().with_settings(settings));
        let r = plant.non_blocking_reactor("deep").unwrap();

        let result = recurse(r.clone()).call();
        assert!(matches!(result, Err(Error::ReactorClosed(_))));
        assert!(r.is_closed());
    }

    #[test]
    fn test_send_response_restores_old_message() {
        let plant = plant();
        let a = plant.non_blocking_reactor("a").unwrap();
        let b = plant.non_blocking_reactor("b").unwrap();
        let seen = Arc::new(Mutex::new(None));

        let out = Arc::clone(&seen);
        let source = a.clone();
        let outer = SyncRequest::new(&a, move |ctx| {
            let me = ctx.request_id();
            let inner = SyncRequest::new(&b, |_ctx| Ok(3));
            let reactor = source.clone();
            inner.do_send(
                &source,
                Box::new(move |response| {
                    *out.lock() = Some((response.ok(), reactor.current_request_id() == Some(me)));
                }),
            )?;
            Ok(())
        });
        outer.call().unwrap();
        plant.process_messages();

        assert_eq!(*seen.lock(), Some((Some(3), true)));
    }

    #[test]
    fn test_isolated_send_to_self_is_illegal() {
        let plant = plant();
        let iso = plant.isolation_reactor("iso").unwrap();
        let me = iso.clone();
        let rejected = SyncRequest::new(&iso, move |_ctx| {
            let to_self = SyncRequest::new(&me, |_ctx| Ok(()));
            Ok(matches!(
                to_self.do_send(&me, Box::new(|_| {})),
                Err(Error::IllegalState(_))
            ))
        })
        .call()
        .unwrap();
        assert!(rejected);
    }
}
