/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Recovery policy.
//!
//! A reactor consults its plant's `Recovery` when a request hangs, panics, or
//! recurses past the local call limit. Every default closes the target reactor
//! of the failing request so the fault stays inside that reactor.

use crate::error::{Panic, StackOverflow};
use crate::Message;

/// Strategy invoked on request failures.
///
/// Override only the hooks you need:
///
/// ```
/// use reactors::{Message, Panic, Recovery};
///
/// struct LogOnly;
///
/// impl Recovery for LogOnly {
///     fn on_runtime_exception(&self, request: &dyn Message, error: &Panic) {
///         request.target().warn(&format!("ignoring panic in {}: {}", request.id(), error));
///     }
/// }
/// ```
pub trait Recovery: Send + Sync {
    /// An async request finished its body (or a callback) with nothing
    /// pending and no response.
    fn on_hung_request(&self, request: &dyn Message) {
        request
            .target()
            .fail(&format!("hung request {}", request.id()));
    }

    /// Nested local calls went past the configured depth.
    fn on_stack_overflow(&self, request: &dyn Message, error: &StackOverflow) {
        request
            .target()
            .fail(&format!("request {}: {}", request.id(), error));
    }

    /// A request body or response callback panicked.
    fn on_runtime_exception(&self, request: &dyn Message, error: &Panic) {
        request
            .target()
            .fail(&format!("request {} panicked: {}", request.id(), error));
    }
}

/// The stock policy: close the reactor on every failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRecovery;

impl Recovery for DefaultRecovery {}
