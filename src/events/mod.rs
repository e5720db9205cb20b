//! Event bus module.
//!
//! Typed in-process pub/sub that fans lifecycle and log events out to
//! subscribers (a UI, a log pipeline, the `/events` WebSocket).

mod bus;

pub use bus::{AppEvent, EventBus, LogLevel, ServerEvent, ServerEventKind, Subscription};
