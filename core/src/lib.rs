//! Core primitives for Rotor - effects, capabilities, and fibers.
//!
//! This crate contains the concurrency kernel without any runtime dependency:
//!
//! - **Effects** ([`Effect`]): descriptions of cancelable asynchronous
//!   operations, executed against a capability record
//! - **Capabilities** ([`Capabilities`]): named primitive operations supplied
//!   once at startup and checked structurally before an effect starts
//! - **Fibers** ([`Fiber`]): handles to in-flight effect runs, with the
//!   [`fork`]/[`join`]/[`select`]/[`kill`] combinator family
//!
//! Everything here is driven by callbacks; the engine crate supplies the
//! dispatch loop and the tokio-backed capability implementations.

pub mod capability;
pub mod effect;
pub mod fiber;

pub use capability::{Capabilities, Capability, CapabilityError, CapabilityId, TIMER, Timer};
pub use effect::{Cancel, Complete, Effect, delay};
pub use fiber::{
    Fiber, FiberStatus, Forked, Subscription, fork, join, kill, kill_with, select,
};
