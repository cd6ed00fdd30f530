/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Error types for the reactor runtime.
//!
//! Application errors travel as the `Err` side of a request's response.
//! Runtime faults (panics, runaway local recursion) never reach the caller
//! directly: recovery closes the reactor and callers see `ReactorClosed`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::RequestId;

/// Errors surfaced by reactors and requests.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The target or source reactor has been closed.
    #[error("reactor closed: {0}")]
    ReactorClosed(String),

    /// An operation was used outside of its contract.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The request was canceled before it produced a response.
    #[error("request canceled")]
    Canceled,

    /// The plant ran out of work while the request was still incomplete.
    #[error("request {0} did not complete")]
    Incomplete(RequestId),

    /// Plant settings could not be parsed.
    #[error("invalid plant settings: {0}")]
    Settings(String),

    /// An application error carried as a response.
    #[error(transparent)]
    Application(Arc<dyn std::error::Error + Send + Sync>),

    /// An application error described by a message.
    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Error::IllegalState(msg.into())
    }

    pub fn message(msg: impl Into<String>) -> Self {
        Error::Message(msg.into())
    }

    /// Wrap any application error.
    pub fn application<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Application(Arc::new(error))
    }

    pub fn is_reactor_closed(&self) -> bool {
        matches!(self, Error::ReactorClosed(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A panic caught while running a request body or a response callback.
#[derive(Debug, Clone)]
pub struct Panic {
    message: String,
}

impl Panic {
    pub fn new(message: impl Into<String>) -> Self {
        Panic {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Panic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Raised when nested local calls exceed `PlantSettings::max_local_depth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackOverflow {
    pub depth: usize,
}

impl fmt::Display for StackOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stack overflow at local call depth {}", self.depth)
    }
}

/// What went wrong inside `catch_unwind`.
#[derive(Debug, Clone)]
pub(crate) enum Fault {
    StackOverflow(StackOverflow),
    Panic(Panic),
}

impl Fault {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<StackOverflow>() {
            Ok(overflow) => return Fault::StackOverflow(*overflow),
            Err(payload) => payload,
        };
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Fault::Panic(Panic::new(message))
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::StackOverflow(e) => write!(f, "{}", e),
            Fault::Panic(e) => write!(f, "panic: {}", e),
        }
    }
}
