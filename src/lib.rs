/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! # Reactors - Cooperative Request/Reactor Runtime for Rust
//!
//! A small runtime for building systems out of single-threaded reactors that
//! talk to each other through requests.
//!
//! ## Features
//!
//! - **Reactors**: Independent execution contexts processing one request at a time
//! - **Requests**: Sync (value returned by the body) and async (value produced by a callback)
//! - **Failure Isolation**: A panicking or hung request closes its own reactor only
//! - **Hang Detection**: Async requests that can never complete are reported
//! - **Structured Shutdown**: Facilities and reactors close everything they own
//!
//! ## Quick Start
//!
//! ### 1. Create a Plant and Reactors
//!
//! ```rust
//! use reactors::{Plant, PlantConfig};
//!
//! let plant = Plant::new(PlantConfig::default());
//! let producer = plant.non_blocking_reactor("producer").unwrap();
//! let consumer = plant.isolation_reactor("consumer").unwrap();
//! # plant.close();
//! ```
//!
//! ### 2. Define Requests
//!
//! ```rust
//! use reactors::{AsyncRequest, Plant, Request, SyncRequest};
//!
//! let plant = Plant::default();
//! let producer = plant.non_blocking_reactor("producer").unwrap();
//! let consumer = plant.non_blocking_reactor("consumer").unwrap();
//!
//! // Answered directly by the consumer
//! let get_op = SyncRequest::new(&consumer, |_ctx| Ok("Hi".to_string()));
//!
//! // Answered once the consumer's response comes back to the producer
//! let start_op = AsyncRequest::new(&producer, move |ctx| {
//!     ctx.send(&get_op, |ctx, greeting| {
//!         ctx.process_async_response(greeting);
//!         Ok(())
//!     })
//! });
//!
//! assert_eq!(start_op.call().unwrap(), "Hi");
//! ```
//!
//! ## Submitting Requests
//!
//! ### Signal (Fire-and-Forget)
//! ```rust,ignore
//! request.signal()?;
//! ```
//!
//! ### Call (Blocking, outside any reactor)
//! ```rust,ignore
//! let value = request.call()?;
//! ```
//!
//! ### Send (from inside an async request)
//! ```rust,ignore
//! ctx.send(&sub_request, |ctx, value| {
//!     ctx.process_async_response(value);
//!     Ok(())
//! })?;
//! ```
//!
//! ## Failures
//!
//! Errors returned by bodies are responses. Panics and runaway local recursion
//! go to the plant's [`Recovery`], which by default closes the reactor; every
//! request in process there then completes with [`Error::ReactorClosed`].

pub mod async_request;
pub mod error;
pub mod facility;
pub mod message;
pub mod messages;
pub mod plant;
pub mod reactor;
pub mod recovery;
pub mod request;
pub mod scheduler;
pub mod timer;

// Re-export commonly used types
pub use async_request::{AsyncContext, AsyncRequest, ExceptionHandler, Responder};
pub use error::{Error, Panic, Result, StackOverflow};
pub use facility::{Closeable, Facility};
pub use message::{Message, RequestId, RequestState};
pub use messages::Delay;
pub use plant::{Plant, PlantConfig, PlantSettings};
pub use reactor::{Reactor, ReactorKind, ReactorStatus};
pub use recovery::{DefaultRecovery, Recovery};
pub use request::{Request, ResponseProcessor, SyncContext, SyncRequest};
pub use scheduler::{ManualScheduler, Scheduler, Task, ThreadScheduler};
pub use timer::{ManualClock, MonotonicClock, TimeSource, Timer, TimerStats};
