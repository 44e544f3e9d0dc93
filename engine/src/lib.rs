//! Dispatch engine for Rotor - handler tables and the runtime loop.
//!
//! This crate turns the primitives of [`rotor_core`] into an application
//! runtime:
//!
//! - **Actions** ([`Action`]): named values fed to the dispatch table
//! - **Handler tables** ([`HandlerTable`]): pure transition functions keyed
//!   by action name, composed by key-merge and lens-style embedding
//! - **The loop** ([`App`]): serialized dispatch, live fiber tracking, and
//!   the view callback, fed through an [`ActionSender`]
//! - **Timer** ([`TokioTimer`]): the tokio-backed implementation of the
//!   core's timer capability
//!
//! Handlers return effects as data; only the loop executes them. Rendering,
//! persistence, and routing stay outside, reached through the capability
//! record and the view callback.

pub mod action;
pub mod app;
pub mod handler;
pub mod time;

pub use action::Action;
pub use app::{ActionSender, App, LoopPhase, StepError};
pub use handler::{DispatchError, HandlerTable, TableError, Update};
pub use time::TokioTimer;

// Re-export the core surface so applications depend on one crate.
pub use rotor_core::{
    Cancel, Capabilities, Capability, CapabilityError, CapabilityId, Complete, Effect, Fiber,
    FiberStatus, Forked, Subscription, TIMER, Timer, delay, fork, join, kill, kill_with, select,
};
