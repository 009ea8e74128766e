#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Notification bus shared by the Flipper core and its front ends.
//!
//! The bus carries typed progress, status-text, and result-count events.
//! Publishing never blocks and never fails: when nobody is subscribed the
//! event only lands in the bounded replay ring, so a front end that never
//! subscribes cannot influence core behaviour. Subscribers that reconnect may
//! ask for events newer than the last identifier they saw.

/// Fan-out and replay.
pub mod bus;
/// Event payloads.
pub mod event;

pub use bus::{DEFAULT_REPLAY_CAPACITY, EventBus, EventStream};
pub use event::{Event, EventEnvelope, EventId, TaskState};
