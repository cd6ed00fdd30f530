/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Built-in messages and requests.
//!
//! - `RespondMessage`: carries a `Responder` answer onto the request's reactor
//! - `Delay`: an async request that answers after a duration

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::async_request::AsyncRequestImpl;
use crate::error::{Error, Result};
use crate::request::ResponseProcessor;
use crate::{AsyncRequest, Message, Reactor, Request, RequestId, RequestState};

/// Queued on an async request's reactor to complete it from outside.
///
/// Counts as a response, so isolation reactors dequeue it while the request
/// is in process.
pub(crate) struct RespondMessage<T> {
    request: Arc<AsyncRequestImpl<T>>,
    response: Mutex<Option<Result<T>>>,
}

impl<T: Send + 'static> RespondMessage<T> {
    pub(crate) fn new(request: Arc<AsyncRequestImpl<T>>, response: Result<T>) -> Self {
        RespondMessage {
            request,
            response: Mutex::new(Some(response)),
        }
    }
}

impl<T: Send + 'static> Message for RespondMessage<T> {
    fn id(&self) -> RequestId {
        self.request.id()
    }

    fn target(&self) -> &Reactor {
        self.request.target()
    }

    fn eval(self: Arc<Self>) {
        let Some(response) = self.response.lock().take() else {
            return;
        };
        let target = self.request.target();
        target.set_current_request(Some(Arc::clone(&self.request) as Arc<dyn Message>));
        self.request.respond(response);
        target.set_current_request(None);
    }

    fn close(self: Arc<Self>) {}

    fn cancel(self: Arc<Self>) {}

    fn fail(self: Arc<Self>, _error: Error) {}

    fn is_complete(&self) -> bool {
        true
    }

    fn is_canceled(&self) -> bool {
        false
    }

    fn state(&self) -> RequestState {
        self.request.state()
    }
}

/// Answers `()` after `duration`, using the plant's scheduler.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use reactors::{Delay, Plant, Request};
///
/// let plant = Plant::default();
/// let r = plant.non_blocking_reactor("sleeper").unwrap();
/// Delay::new(&r, Duration::from_millis(5)).call().unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct Delay {
    request: AsyncRequest<()>,
    duration: Duration,
}

impl Delay {
    pub fn new(target: &Reactor, duration: Duration) -> Self {
        let request = AsyncRequest::new(target, move |ctx| {
            ctx.set_no_hung_request_check();
            let responder = ctx.responder();
            ctx.reactor().schedule(
                duration,
                Box::new(move || {
                    if let Err(e) = responder.respond(Ok(())) {
                        tracing::debug!(error = %e, "delay expired after its reactor closed");
                    }
                }),
            );
            Ok(())
        });
        Delay { request, duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Request<()> for Delay {
    fn id(&self) -> RequestId {
        self.request.id()
    }

    fn target(&self) -> &Reactor {
        self.request.target()
    }

    fn state(&self) -> RequestState {
        self.request.state()
    }

    fn is_isolated(&self) -> bool {
        self.request.is_isolated()
    }

    fn message(&self) -> Arc<dyn Message> {
        self.request.message()
    }

    fn signal(&self) -> Result<()> {
        self.request.signal()
    }

    fn call(&self) -> Result<()> {
        self.request.call()
    }

    fn do_send(&self, source: &Reactor, on_response: ResponseProcessor<()>) -> Result<()> {
        self.request.do_send(source, on_response)
    }

    fn cancel(&self) {
        self.request.cancel()
    }
}
