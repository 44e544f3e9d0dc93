//! The runtime loop - serialized dispatch of actions against a handler table.
//!
//! [`App`] owns the state, the handler table, the capability record, and the
//! live fiber set. All mutation flows through one unbounded queue: components
//! inject actions through an [`ActionSender`], fiber completions enqueue
//! their follow-up action from whatever thread the underlying primitive runs
//! on, and the loop processes one action to completion - dispatch, fork every
//! returned effect, render - before accepting the next. There is no partial
//! interleaving of updates.

use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, warn};

use rotor_core::{
    Capabilities, CapabilityError, CapabilityId, Effect, Fiber, FiberStatus, fork, join,
};

use crate::action::Action;
use crate::handler::{DispatchError, HandlerTable};

/// Where the loop currently is inside one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Between cycles, waiting for an action.
    Idle,
    /// Running the handler entry for the current action.
    Dispatching,
    /// Forking the effects the handler returned.
    Draining,
}

enum Inbox<P> {
    Action(Action<P>),
    Stop,
}

/// Cloneable injection handle - the sole entry point for mutations.
pub struct ActionSender<P> {
    tx: mpsc::UnboundedSender<Inbox<P>>,
}

impl<P> Clone for ActionSender<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<P> fmt::Debug for ActionSender<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSender").finish_non_exhaustive()
    }
}

impl<P> ActionSender<P> {
    /// Queue an action. Dropped silently if the loop has already shut down.
    pub fn send(&self, action: Action<P>) {
        let _ = self.tx.send(Inbox::Action(action));
    }

    /// Ask the loop to finish its current cycle and return.
    pub fn stop(&self) {
        let _ = self.tx.send(Inbox::Stop);
    }
}

/// Errors fatal to a single dispatch cycle. The loop reports them and keeps
/// accepting actions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// The dispatch loop for one application instance.
pub struct App<S, P> {
    state: S,
    table: HandlerTable<S, P>,
    capabilities: Capabilities,
    live: Vec<Fiber<Action<P>>>,
    phase: LoopPhase,
    view: Box<dyn FnMut(&S) + Send>,
    boot: Vec<Effect<Action<P>>>,
    tx: mpsc::UnboundedSender<Inbox<P>>,
    rx: mpsc::UnboundedReceiver<Inbox<P>>,
}

impl<S, P> fmt::Debug for App<S, P>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("state", &self.state)
            .field("phase", &self.phase)
            .field("live", &self.live.len())
            .finish_non_exhaustive()
    }
}

impl<S, P> App<S, P>
where
    S: Clone + Send + 'static,
    P: Clone + Send + 'static,
{
    /// Build the loop around a handler table, a capability record, the
    /// initial state, and the view callback.
    ///
    /// Fails if the record does not cover every capability the table
    /// declares, so misconfigured wiring is caught before any action runs.
    pub fn new(
        table: HandlerTable<S, P>,
        capabilities: Capabilities,
        initial: S,
        view: impl FnMut(&S) + Send + 'static,
    ) -> Result<Self, CapabilityError> {
        let required: Vec<CapabilityId> =
            table.required_capabilities().iter().copied().collect();
        let missing = capabilities.missing(&required);
        if !missing.is_empty() {
            return Err(CapabilityError::Missing { missing });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            state: initial,
            table,
            capabilities,
            live: Vec::new(),
            phase: LoopPhase::Idle,
            view: Box::new(view),
            boot: Vec::new(),
            tx,
            rx,
        })
    }

    /// Effects to fork before the first action - typically initial loads.
    #[must_use]
    pub fn with_boot_effects(mut self, effects: Vec<Effect<Action<P>>>) -> Self {
        self.boot = effects;
        self
    }

    #[must_use]
    pub fn sender(&self) -> ActionSender<P> {
        ActionSender {
            tx: self.tx.clone(),
        }
    }

    /// Queue an action on this loop's own queue.
    pub fn inject(&self, action: Action<P>) {
        let _ = self.tx.send(Inbox::Action(action));
    }

    #[must_use]
    pub fn state(&self) -> &S {
        &self.state
    }

    #[must_use]
    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Number of forked fibers still pending.
    #[must_use]
    pub fn live_fibers(&self) -> usize {
        self.live
            .iter()
            .filter(|fiber| fiber.status() == FiberStatus::Pending)
            .count()
    }

    /// Fork the boot effects and render the initial state once.
    ///
    /// [`run`](App::run) calls this itself; drive it manually only when
    /// stepping the loop by hand.
    pub fn boot(&mut self) -> Result<(), StepError> {
        let effects = std::mem::take(&mut self.boot);
        self.phase = LoopPhase::Draining;
        let outcome = self.start_effects(effects);
        (self.view)(&self.state);
        self.phase = LoopPhase::Idle;
        outcome
    }

    /// Process one action to completion.
    ///
    /// Dispatches, replaces the state, forks every returned effect, then
    /// invokes the view callback exactly once. An unknown action leaves the
    /// state untouched and skips the render; either error here is fatal to
    /// this cycle only.
    pub fn step(&mut self, action: Action<P>) -> Result<(), StepError> {
        self.phase = LoopPhase::Dispatching;
        self.live
            .retain(|fiber| fiber.status() == FiberStatus::Pending);
        debug!(action = action.name(), live = self.live.len(), "dispatch");

        let update = match self.table.dispatch(self.state.clone(), &action, &self.live) {
            Ok(update) => update,
            Err(err) => {
                warn!(action = action.name(), error = %err, "dispatch failed");
                self.phase = LoopPhase::Idle;
                return Err(err.into());
            }
        };

        let (next, effects) = update.into_parts();
        self.state = next;

        self.phase = LoopPhase::Draining;
        let outcome = self.start_effects(effects);
        (self.view)(&self.state);
        self.phase = LoopPhase::Idle;
        outcome
    }

    /// Process every queued action synchronously, in arrival order.
    ///
    /// Returns the first cycle error, after the queue has drained anyway.
    pub fn drain(&mut self) -> Result<(), StepError> {
        let mut outcome = Ok(());
        loop {
            match self.rx.try_recv() {
                Ok(Inbox::Action(action)) => {
                    if let Err(err) = self.step(action) {
                        if outcome.is_ok() {
                            outcome = Err(err);
                        }
                    }
                }
                Ok(Inbox::Stop) | Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        outcome
    }

    /// Drive the loop until a stop signal arrives; returns the final state.
    pub async fn run(mut self) -> S {
        if let Err(err) = self.boot() {
            warn!(error = %err, "boot effect failed");
        }
        while let Some(message) = self.rx.recv().await {
            match message {
                Inbox::Action(action) => {
                    if let Err(err) = self.step(action) {
                        warn!(error = %err, "dispatch cycle failed");
                    }
                }
                Inbox::Stop => break,
            }
        }
        self.state
    }

    /// Fork each effect, track the fiber, and wire its completion back into
    /// the queue. The fiber joins the live set before its completion can be
    /// observed, so no completion dangles.
    fn start_effects(&mut self, effects: Vec<Effect<Action<P>>>) -> Result<(), StepError> {
        let mut first_failure: Option<CapabilityError> = None;
        for effect in effects {
            match fork(&effect, &self.capabilities) {
                Ok(fiber) => {
                    self.live.push(fiber.clone());
                    let tx = self.tx.clone();
                    let _subscription = join(&fiber, move |completed| {
                        if let Some(follow_up) = completed.value() {
                            let _ = tx.send(Inbox::Action(follow_up));
                        }
                    });
                }
                Err(err) => {
                    warn!(error = %err, "effect not started");
                    first_failure.get_or_insert(err);
                }
            }
        }
        match first_failure {
            None => Ok(()),
            Some(err) => Err(err.into()),
        }
    }
}
