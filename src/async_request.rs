/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Async requests: bodies that answer through sub-requests.
//!
//! The body of an `AsyncRequest` runs on the target reactor and may send
//! sub-requests with `AsyncContext::send`. Each sub-request stays pending
//! until its response comes back, at which point its callback runs on the
//! same reactor. The request completes when some body or callback calls
//! `process_async_response`.
//!
//! After the body and after every callback the request is checked: if it is
//! still incomplete and nothing is pending, nothing can ever complete it. Such
//! a hung request is reported to `Recovery::on_hung_request`.
//!
//! ```
//! use reactors::{AsyncRequest, Plant, Request, SyncRequest};
//!
//! let plant = Plant::default();
//! let producer = plant.non_blocking_reactor("producer").unwrap();
//! let consumer = plant.non_blocking_reactor("consumer").unwrap();
//!
//! let start = AsyncRequest::new(&producer, move |ctx| {
//!     let get = SyncRequest::new(&consumer, |_ctx| Ok("Hi".to_string()));
//!     ctx.send(&get, |ctx, greeting| {
//!         ctx.process_async_response(greeting);
//!         Ok(())
//!     })
//! });
//! assert_eq!(start.call().unwrap(), "Hi");
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::messages::RespondMessage;
use crate::plant::Outstanding;
use crate::request::{RequestImpl, RequestShared, ResponseProcessor};
use crate::{Message, Reactor, Request, RequestId, RequestState, SyncRequest};

/// Handles application errors raised while a request is current: errors
/// returned by its body or callbacks, and error responses of its
/// sub-requests. Returning `Err` makes that error the response.
pub type ExceptionHandler<T> = Box<dyn FnMut(&mut AsyncContext<T>, Error) -> Result<()> + Send>;

type AsyncBody<T> = Box<dyn FnOnce(&mut AsyncContext<T>) -> Result<()> + Send>;

struct AsyncState<T> {
    pending: Vec<Arc<dyn Message>>,
    exception_handler: Option<ExceptionHandler<T>>,
    /// Bumped whenever the handler is replaced or cleared
    handler_epoch: u64,
    no_hung_request_check: bool,
}

pub(crate) struct AsyncRequestImpl<T> {
    shared: RequestShared<T>,
    body: Mutex<Option<AsyncBody<T>>>,
    async_state: Mutex<AsyncState<T>>,
}

impl<T: Send + 'static> AsyncRequestImpl<T> {
    fn context(self: &Arc<Self>) -> AsyncContext<T> {
        AsyncContext {
            request: Arc::clone(self),
        }
    }

    fn add_pending(&self, request: Arc<dyn Message>) {
        self.async_state.lock().pending.push(request);
    }

    fn remove_pending(&self, id: RequestId) -> bool {
        let mut state = self.async_state.lock();
        let before = state.pending.len();
        state.pending.retain(|m| m.id() != id);
        state.pending.len() != before
    }

    fn pending_count(&self) -> usize {
        self.async_state.lock().pending.len()
    }

    /// Called by the target reactor when a `Responder` answers. Errors go
    /// through the exception handler like any other application error.
    pub(crate) fn respond(self: &Arc<Self>, response: Result<T>) {
        match response {
            Ok(value) => self.process_object_response(Ok(value)),
            Err(error) => {
                self.process_exception(error);
                self.pending_check();
            }
        }
    }

    /// Runs on this request's reactor when sub-request `sub` answers.
    fn sub_response<U, F>(self: &Arc<Self>, sub: RequestId, response: Result<U>, on_response: F)
    where
        F: FnOnce(&mut AsyncContext<T>, U) -> Result<()>,
    {
        if !self.remove_pending(sub) || self.is_complete() {
            tracing::trace!(request = %self.shared.id(), sub = %sub, "late sub-response dropped");
            return;
        }
        if self.is_canceled() {
            if self.pending_count() == 0 {
                self.process_object_response(Err(Error::Canceled));
            }
            return;
        }

        let mut ctx = self.context();
        let outcome = match response {
            Ok(value) => on_response(&mut ctx, value),
            Err(error) => Err(error),
        };
        if let Err(error) = outcome {
            self.process_exception(error);
        }
        self.pending_check();
    }

    /// Report the request as hung if nothing can complete it anymore.
    fn pending_check(self: &Arc<Self>) {
        let idle = {
            let state = self.async_state.lock();
            !state.no_hung_request_check && state.pending.is_empty()
        };
        let target = self.shared.target();
        if !idle
            || self.is_complete()
            || self.is_canceled()
            || !target.plant().settings().hung_request_check
        {
            return;
        }

        tracing::error!(reactor = %target.name(), request = %self.shared.id(), "hung request");
        let recovery = target.recovery();
        let message: &dyn Message = &**self;
        if catch_unwind(AssertUnwindSafe(|| recovery.on_hung_request(message))).is_err() {
            tracing::error!(
                reactor = %target.name(),
                request = %self.shared.id(),
                "recovery failed while handling hung request"
            );
        }
    }
}

impl<T: Send + 'static> RequestImpl<T> for AsyncRequestImpl<T> {
    fn shared(&self) -> &RequestShared<T> {
        &self.shared
    }

    fn process_request_message(self: &Arc<Self>) {
        let Some(body) = self.body.lock().take() else {
            return;
        };
        let mut ctx = self.context();
        if let Err(error) = body(&mut ctx) {
            self.process_exception(error);
        }
        self.pending_check();
    }

    fn process_exception(self: &Arc<Self>, error: Error) {
        if self.is_complete() {
            tracing::debug!(request = %self.shared.id(), error = %error, "error after completion ignored");
            return;
        }
        let installed = {
            let mut state = self.async_state.lock();
            let epoch = state.handler_epoch;
            state.exception_handler.take().map(|handler| (handler, epoch))
        };
        let Some((mut handler, epoch)) = installed else {
            self.process_object_response(Err(error));
            return;
        };

        let mut ctx = self.context();
        let outcome = handler(&mut ctx, error);
        {
            // Put it back unless the handler installed or cleared one.
            let mut state = self.async_state.lock();
            if state.handler_epoch == epoch && state.exception_handler.is_none() {
                state.exception_handler = Some(handler);
            }
        }
        if let Err(error) = outcome {
            self.process_object_response(Err(error));
        }
    }

    fn cancel_pending(&self) {
        let snapshot: Vec<Arc<dyn Message>> = {
            let mut state = self.async_state.lock();
            if self.shared.is_complete() {
                std::mem::take(&mut state.pending)
            } else {
                state.pending.clone()
            }
        };
        for request in snapshot {
            request.cancel();
        }
    }
}

impl<T: Send + 'static> Message for AsyncRequestImpl<T> {
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

/// A request whose body answers later, typically from a sub-request callback.
pub struct AsyncRequest<T> {
    inner: Arc<AsyncRequestImpl<T>>,
}

impl<T> Clone for AsyncRequest<T> {
    fn clone(&self) -> Self {
        AsyncRequest {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> AsyncRequest<T> {
    pub fn new<F>(target: &Reactor, body: F) -> Self
    where
        F: FnOnce(&mut AsyncContext<T>) -> Result<()> + Send + 'static,
    {
        AsyncRequest {
            inner: Arc::new(AsyncRequestImpl {
                shared: RequestShared::new(target),
                body: Mutex::new(Some(Box::new(body))),
                async_state: Mutex::new(AsyncState {
                    pending: Vec::new(),
                    exception_handler: None,
                    handler_epoch: 0,
                    no_hung_request_check: false,
                }),
            }),
        }
    }

    /// Number of sub-requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count()
    }
}

impl<T: Send + 'static> Request<T> for AsyncRequest<T> {
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

impl<T> std::fmt::Debug for AsyncRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRequest")
            .field("id", &self.inner.shared.id())
            .field("target", &self.inner.shared.target().name())
            .finish()
    }
}

/// The view an async body, callback or exception handler has of its request.
pub struct AsyncContext<T> {
    request: Arc<AsyncRequestImpl<T>>,
}

impl<T: Send + 'static> AsyncContext<T> {
    pub fn request_id(&self) -> RequestId {
        self.request.shared.id()
    }

    /// The reactor running the request.
    pub fn reactor(&self) -> &Reactor {
        self.request.shared.target()
    }

    /// Complete the request with `value`. Later responses are ignored.
    pub fn process_async_response(&mut self, value: T) {
        self.request.process_object_response(Ok(value));
    }

    /// Complete the request with `error`, bypassing the exception handler.
    pub fn process_async_exception(&mut self, error: Error) {
        self.request.process_object_response(Err(error));
    }

    pub fn set_exception_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&mut AsyncContext<T>, Error) -> Result<()> + Send + 'static,
    {
        let mut state = self.request.async_state.lock();
        state.exception_handler = Some(Box::new(handler));
        state.handler_epoch += 1;
    }

    pub fn clear_exception_handler(&mut self) {
        let mut state = self.request.async_state.lock();
        state.exception_handler = None;
        state.handler_epoch += 1;
    }

    /// The response will come from outside the sub-request bookkeeping.
    pub fn set_no_hung_request_check(&mut self) {
        self.request.async_state.lock().no_hung_request_check = true;
    }

    pub fn is_complete(&self) -> bool {
        self.request.is_complete()
    }

    pub fn is_canceled(&self) -> bool {
        self.request.is_canceled()
    }

    pub fn pending_count(&self) -> usize {
        self.request.pending_count()
    }

    /// Send a sub-request. `on_response` runs on this reactor with the
    /// sub-request's value; an error response goes to the exception handler.
    pub fn send<U, Q, F>(&mut self, request: &Q, on_response: F) -> Result<()>
    where
        U: Send + 'static,
        Q: Request<U>,
        F: FnOnce(&mut AsyncContext<T>, U) -> Result<()> + Send + 'static,
    {
        let sub = request.message();
        let sub_id = sub.id();
        self.request.add_pending(sub);

        let parent = Arc::clone(&self.request);
        let processor: ResponseProcessor<U> =
            Box::new(move |response| parent.sub_response(sub_id, response, on_response));
        let source = self.reactor().clone();
        if let Err(error) = request.do_send(&source, processor) {
            self.request.remove_pending(sub_id);
            return Err(error);
        }
        Ok(())
    }

    /// Cancel one pending sub-request. Its response will be ignored.
    pub fn cancel<U, Q>(&mut self, request: &Q) -> bool
    where
        U: Send + 'static,
        Q: Request<U>,
    {
        if !self.request.remove_pending(request.id()) {
            return false;
        }
        request.cancel();
        true
    }

    /// Cancel every pending sub-request.
    pub fn cancel_all(&mut self) {
        let snapshot = std::mem::take(&mut self.request.async_state.lock().pending);
        for request in snapshot {
            request.cancel();
        }
    }

    /// Run a sync request targeting this reactor in place.
    pub fn local<U: Send + 'static>(&mut self, request: &SyncRequest<U>) -> Result<U> {
        request.local(self.reactor())
    }

    /// A handle that can answer this request from another thread or a
    /// scheduled task. Pair with `set_no_hung_request_check`.
    ///
    /// While the responder is alive, a blocking `call()` on this request
    /// keeps waiting for it.
    pub fn responder(&self) -> Responder<T> {
        Responder {
            request: Arc::clone(&self.request),
            _work: self.reactor().plant().track_work(),
        }
    }
}

/// Delivers the response of an async request from outside its reactor.
pub struct Responder<T> {
    request: Arc<AsyncRequestImpl<T>>,
    /// Counts as outstanding plant work until dropped
    _work: Outstanding,
}

impl<T: Send + 'static> Responder<T> {
    /// Queue `response` on the request's reactor. Fails if that reactor is
    /// closed.
    ///
    /// An `Err` response is handed to the request's exception handler, if
    /// one is installed, before it becomes the response.
    pub fn respond(self, response: Result<T>) -> Result<()> {
        let Responder { request, _work: work } = self;
        let target = request.shared.target().clone();
        let plant = Arc::clone(target.plant());
        let local = plant.current_reactor().is_some_and(|r| r == target);
        let message = Arc::new(RespondMessage::new(request, response));
        target.unbuffered_add_message(message, local)?;
        if !plant.is_reactor_running() {
            plant.process_messages();
        }
        drop(work);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Panic, Plant, PlantConfig, PlantSettings, Recovery};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn plant() -> Plant {
        Plant::new(PlantConfig::default())
    }

    /// Counts hung-request reports, then applies the default.
    #[derive(Default)]
    struct CountingRecovery {
        hung: AtomicUsize,
        panics: AtomicUsize,
    }

    impl Recovery for CountingRecovery {
        fn on_hung_request(&self, request: &dyn Message) {
            self.hung.fetch_add(1, Ordering::SeqCst);
            request.target().fail(&format!("hung request {}", request.id()));
        }

        fn on_runtime_exception(&self, request: &dyn Message, error: &Panic) {
            self.panics.fetch_add(1, Ordering::SeqCst);
            request.target().fail(&format!("{}", error));
        }
    }

    fn counting_plant() -> (Plant, Arc<CountingRecovery>) {
        let recovery = Arc::new(CountingRecovery::default());
        let plant = Plant::new(PlantConfig::default().with_recovery(recovery.clone()));
        (plant, recovery)
    }

    #[test]
    fn test_producer_consumer_hi() {
        let (plant, recovery) = counting_plant();
        let producer = plant.non_blocking_reactor("producer").unwrap();
        let consumer = plant.non_blocking_reactor("consumer").unwrap();

        let get_op = SyncRequest::new(&consumer, |_ctx| Ok("Hi".to_string()));
        let sub = get_op.clone();
        let start_op = AsyncRequest::new(&producer, move |ctx| {
            ctx.send(&sub, |ctx, greeting: String| {
                ctx.process_async_response(greeting);
                Ok(())
            })
        });

        assert_eq!(start_op.call().unwrap(), "Hi");
        assert_eq!(start_op.state(), RequestState::Complete);
        assert_eq!(get_op.state(), RequestState::Complete);
        assert_eq!(recovery.hung.load(Ordering::SeqCst), 0);
        assert!(!producer.is_closed() && !consumer.is_closed());
    }

    #[test]
    fn test_body_without_send_is_hung() {
        let (plant, recovery) = counting_plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let request = AsyncRequest::<u32>::new(&r, |_ctx| Ok(()));

        assert!(matches!(request.call(), Err(Error::ReactorClosed(_))));
        assert_eq!(recovery.hung.load(Ordering::SeqCst), 1);
        assert!(r.is_closed());
    }

    #[test]
    fn test_no_hung_request_check_disables_detection() {
        let (plant, recovery) = counting_plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let request = AsyncRequest::<u32>::new(&r, |ctx| {
            ctx.set_no_hung_request_check();
            Ok(())
        });
        request.signal().unwrap();
        assert_eq!(recovery.hung.load(Ordering::SeqCst), 0);
        assert!(!r.is_closed());
        assert_eq!(request.state(), RequestState::Processing);
    }

    #[test]
    fn test_hang_check_can_be_disabled_in_settings() {
        let settings = PlantSettings {
            hung_request_check: false,
            ..PlantSettings::default()
        };
        let plant = Plant::new(PlantConfig::default().with_settings(settings));
        let r = plant.non_blocking_reactor("r").unwrap();
        let request = AsyncRequest::<u32>::new(&r, |_ctx| Ok(()));
        assert!(matches!(request.call(), Err(Error::Incomplete(_))));
        assert!(!r.is_closed());
    }

    #[test]
    fn test_hanger_scenario() {
        let (plant, recovery) = counting_plant();
        let main = plant.non_blocking_reactor("main").unwrap();
        let hanger = plant.non_blocking_reactor("hanger").unwrap();

        let hang = AsyncRequest::<()>::new(&hanger, |_ctx| Ok(()));
        let request = AsyncRequest::<()>::new(&main, move |ctx| {
            ctx.send(&hang, |ctx, ()| {
                ctx.process_async_response(());
                Ok(())
            })
        });

        assert!(matches!(request.call(), Err(Error::ReactorClosed(_))));
        assert_eq!(recovery.hung.load(Ordering::SeqCst), 1);
        assert!(hanger.is_closed());
        assert!(!main.is_closed());
    }

    #[test]
    fn test_cascade_cancellation() {
        let plant = plant();
        let parent_reactor = plant.non_blocking_reactor("parent").unwrap();
        let worker = plant.non_blocking_reactor("worker").unwrap();
        worker.pause();

        let subs: Vec<SyncRequest<u32>> = (0..3)
            .map(|i| SyncRequest::new(&worker, move |_ctx| Ok(i)))
            .collect();
        let to_send = subs.clone();
        let parent = AsyncRequest::<u32>::new(&parent_reactor, move |ctx| {
            for sub in &to_send {
                ctx.send(sub, |ctx, v| {
                    ctx.process_async_response(v);
                    Ok(())
                })?;
            }
            Ok(())
        });
        parent.signal().unwrap();
        assert_eq!(parent.pending_count(), 3);

        parent.cancel();
        parent.cancel();
        for sub in &subs {
            assert_eq!(sub.state(), RequestState::Canceled);
        }

        worker.resume();
        plant.process_messages();
        assert_eq!(parent.pending_count(), 0);
        assert_eq!(parent.state(), RequestState::Complete);
        assert!(!parent_reactor.is_closed());
    }

    #[test]
    fn test_cancel_one_sub_request() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let worker = plant.non_blocking_reactor("worker").unwrap();
        worker.pause();

        let slow = SyncRequest::new(&worker, |_ctx| Ok(1));
        let fast = SyncRequest::new(&worker, |_ctx| Ok(2));
        let (s, f) = (slow.clone(), fast.clone());
        let request = AsyncRequest::new(&r, move |ctx| {
            ctx.send(&s, |ctx, v| {
                ctx.process_async_response(v);
                Ok(())
            })?;
            ctx.send(&f, |ctx, v| {
                ctx.process_async_response(v);
                Ok(())
            })?;
            assert!(ctx.cancel(&s));
            assert!(!ctx.cancel(&s));
            Ok(())
        });
        request.signal().unwrap();
        assert_eq!(slow.state(), RequestState::Canceled);

        worker.resume();
        plant.process_messages();
        assert_eq!(request.state(), RequestState::Complete);
        assert_eq!(fast.state(), RequestState::Complete);
    }

    #[test]
    fn test_exception_handler_recovers_sub_error() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let worker = plant.non_blocking_reactor("worker").unwrap();

        let failing = SyncRequest::<u32>::new(&worker, |_ctx| Err(Error::message("bad input")));
        let request = AsyncRequest::new(&r, move |ctx| {
            ctx.set_exception_handler(|ctx, error| {
                ctx.process_async_response(format!("handled: {}", error));
                Ok(())
            });
            ctx.send(&failing, |_ctx, _v| Ok(()))
        });

        assert_eq!(request.call().unwrap(), "handled: bad input");
        assert!(!worker.is_closed());
    }

    #[test]
    fn test_exception_handler_error_becomes_response() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let request = AsyncRequest::<()>::new(&r, |ctx| {
            ctx.set_exception_handler(|_ctx, error| Err(Error::message(format!("wrapped {}", error))));
            Err(Error::message("inner"))
        });
        assert_eq!(request.call().unwrap_err().to_string(), "wrapped inner");
    }

    #[test]
    fn test_handler_belongs_to_its_request() {
        let plant = plant();
        let outer_reactor = plant.non_blocking_reactor("outer").unwrap();
        let inner_reactor = plant.non_blocking_reactor("inner").unwrap();
        let worker = plant.non_blocking_reactor("worker").unwrap();

        // The inner request has no handler: its sub error becomes its response,
        // which the outer handler then sees.
        let failing = SyncRequest::<u32>::new(&worker, |_ctx| Err(Error::message("deep")));
        let inner = AsyncRequest::<u32>::new(&inner_reactor, move |ctx| {
            ctx.send(&failing, |ctx, v| {
                ctx.process_async_response(v);
                Ok(())
            })
        });
        let outer = AsyncRequest::new(&outer_reactor, move |ctx| {
            ctx.set_exception_handler(|ctx, error| {
                ctx.process_async_response(format!("outer saw {}", error));
                Ok(())
            });
            ctx.send(&inner, |ctx, v| {
                ctx.process_async_response(format!("value {}", v));
                Ok(())
            })
        });

        assert_eq!(outer.call().unwrap(), "outer saw deep");
    }

    #[test]
    fn test_panic_in_callback_closes_source() {
        let (plant, recovery) = counting_plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let worker = plant.non_blocking_reactor("worker").unwrap();

        let sub = SyncRequest::new(&worker, |_ctx| Ok(1));
        let request = AsyncRequest::<u32>::new(&r, move |ctx| {
            ctx.send(&sub, |_ctx, _v| panic!("callback exploded"))
        });

        assert!(matches!(request.call(), Err(Error::ReactorClosed(_))));
        assert_eq!(recovery.panics.load(Ordering::SeqCst), 1);
        assert!(r.is_closed());
        assert!(!worker.is_closed());
    }

    #[test]
    fn test_isolation_reactor_defers_requests() {
        let plant = plant();
        let iso = plant.isolation_reactor("iso").unwrap();
        let worker = plant.non_blocking_reactor("worker").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&order);
        let first = AsyncRequest::<()>::new(&iso, move |ctx| {
            log.lock().push("first started");
            let log = Arc::clone(&log);
            let sub = SyncRequest::new(&worker, |_ctx| Ok(()));
            ctx.send(&sub, move |ctx, ()| {
                log.lock().push("first done");
                ctx.process_async_response(());
                Ok(())
            })
        });
        let log = Arc::clone(&order);
        let second = SyncRequest::new(&iso, move |_ctx| {
            log.lock().push("second");
            Ok(())
        });

        let driver = plant.non_blocking_reactor("driver").unwrap();
        SyncRequest::new(&driver, move |_ctx| {
            first.signal()?;
            second.signal()
        })
        .call()
        .unwrap();
        plant.process_messages();

        assert_eq!(*order.lock(), vec!["first started", "first done", "second"]);
    }

    #[test]
    fn test_non_blocking_reactor_interleaves() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let worker = plant.non_blocking_reactor("worker").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&order);
        let first = AsyncRequest::<()>::new(&r, move |ctx| {
            log.lock().push("first started");
            let log = Arc::clone(&log);
            let sub = SyncRequest::new(&worker, |_ctx| Ok(()));
            ctx.send(&sub, move |ctx, ()| {
                log.lock().push("first done");
                ctx.process_async_response(());
                Ok(())
            })
        });
        let log = Arc::clone(&order);
        let second = SyncRequest::new(&r, move |_ctx| {
            log.lock().push("second");
            Ok(())
        });

        let driver = plant.non_blocking_reactor("driver").unwrap();
        SyncRequest::new(&driver, move |_ctx| {
            first.signal()?;
            second.signal()
        })
        .call()
        .unwrap();
        plant.process_messages();

        assert_eq!(*order.lock(), vec!["first started", "second", "first done"]);
    }

    #[test]
    fn test_responder_from_other_thread() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let request = AsyncRequest::new(&r, |ctx| {
            ctx.set_no_hung_request_check();
            let responder = ctx.responder();
            std::thread::spawn(move || {
                let _ = responder.respond(Ok("late"));
            });
            Ok(())
        });
        request.signal().unwrap();

        for _ in 0..200 {
            plant.process_messages();
            if request.state() == RequestState::Complete {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(request.state(), RequestState::Complete);
    }

    #[test]
    fn test_closing_reactor_closes_pending_request() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let worker = plant.non_blocking_reactor("worker").unwrap();
        worker.pause();

        let sub = SyncRequest::new(&worker, |_ctx| Ok(()));
        let request = AsyncRequest::<()>::new(&r, move |ctx| ctx.send(&sub, |_ctx, ()| Ok(())));
        request.signal().unwrap();
        assert_eq!(r.in_process_count(), 1);

        r.close();
        assert_eq!(request.state(), RequestState::Closed);
        assert_eq!(request.pending_count(), 0);
    }

    #[test]
    fn test_responder_error_reaches_exception_handler() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let request = AsyncRequest::new(&r, move |ctx| {
            ctx.set_exception_handler(move |ctx, error| {
                log.lock().push(error.to_string());
                ctx.process_async_response(0u32);
                Ok(())
            });
            let responder = ctx.responder();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                let _ = responder.respond(Err(Error::message("lookup failed")));
            });
            Ok(())
        });

        assert_eq!(request.call().unwrap(), 0);
        assert_eq!(*seen.lock(), vec!["lookup failed".to_string()]);
    }

    #[test]
    fn test_dropped_responder_releases_call() {
        let plant = plant();
        let r = plant.non_blocking_reactor("r").unwrap();
        let request = AsyncRequest::<u32>::new(&r, |ctx| {
            ctx.set_no_hung_request_check();
            let responder = ctx.responder();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                drop(responder);
            });
            Ok(())
        });

        assert!(matches!(request.call(), Err(Error::Incomplete(_))));
    }
}
