/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! The type-erased unit a reactor queues and evaluates.
//!
//! Every request is a `Message`. The same object travels twice: first to its
//! target reactor as a request, then, once complete, back to its source
//! reactor as the response.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::{Error, Reactor};

/// Process-unique request identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

impl RequestId {
    pub(crate) fn next() -> Self {
        RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a request is in its life.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequestState {
    /// Constructed, not yet submitted
    New,
    /// Submitted with `send` or `call`
    Sent,
    /// Submitted with `signal`
    Signaled,
    /// Dequeued by its target, body has started
    Processing,
    /// Response assigned
    Complete,
    /// Canceled before a response was assigned
    Canceled,
    /// Completed with a reactor-closed error
    Closed,
}

/// An item in a reactor's inbox.
pub trait Message: Send + Sync + 'static {
    fn id(&self) -> RequestId;

    /// The reactor that runs the request body.
    fn target(&self) -> &Reactor;

    /// Request processing if incomplete, response delivery otherwise.
    fn eval(self: Arc<Self>);

    /// Complete with a reactor-closed error if still incomplete.
    fn close(self: Arc<Self>);

    /// Cancel this request and, recursively, its pending sub-requests.
    fn cancel(self: Arc<Self>);

    /// Complete with `error` if still incomplete.
    fn fail(self: Arc<Self>, error: Error);

    fn is_complete(&self) -> bool;

    fn is_canceled(&self) -> bool;

    fn state(&self) -> RequestState;
}

impl fmt::Debug for dyn Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id())
            .field("target", &self.target().name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(format!("{}", a), format!("#{}", a.as_u64()));
    }
}
