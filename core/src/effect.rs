//! Effects - descriptions of cancelable asynchronous operations.
//!
//! An [`Effect`] is data: it carries the capability ids it requires and a
//! re-invocable run function. Running it starts one independent operation
//! against a capability record and hands back a [`Cancel`] handle. The result
//! (if the operation is not canceled first) arrives later through the
//! completion callback. Effects are returned from handlers and executed only
//! by the runtime loop, never in place.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::capability::{Capabilities, CapabilityError, CapabilityId, TIMER, Timer};

/// Completion callback for one effect run. Invoked at most once.
pub type Complete<A> = Box<dyn FnOnce(A) + Send>;

/// Handle releasing the resource behind one effect run.
///
/// Consumed on use, so a cancel is invoked at most once. The owning fiber's
/// absorbing terminal states guarantee that canceling after completion (or
/// completing after a cancel) is observationally a no-op.
pub struct Cancel(Option<Box<dyn FnOnce() + Send>>);

impl Cancel {
    /// A handle with nothing to release, as returned by synchronously
    /// completing effects.
    #[must_use]
    pub fn noop() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(release)))
    }

    /// Release the underlying resource.
    pub fn invoke(self) {
        if let Some(release) = self.0 {
            release();
        }
    }
}

impl fmt::Debug for Cancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cancel").field(&self.0.is_some()).finish()
    }
}

type RunFn<A> =
    dyn Fn(&Capabilities, Complete<A>) -> Result<Cancel, CapabilityError> + Send + Sync;

/// A cancelable asynchronous operation, as a value.
///
/// Stateless: running the same effect twice yields two independent
/// operations. Composition ([`map`](Effect::map), [`map_to`](Effect::map_to))
/// preserves the required-capability set so the runtime can verify coverage
/// before execution.
pub struct Effect<A> {
    required: Arc<[CapabilityId]>,
    run: Arc<RunFn<A>>,
}

impl<A> Clone for Effect<A> {
    fn clone(&self) -> Self {
        Self {
            required: Arc::clone(&self.required),
            run: Arc::clone(&self.run),
        }
    }
}

impl<A> fmt::Debug for Effect<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

impl<A: Send + 'static> Effect<A> {
    /// Build an effect from its required capability ids and run function.
    ///
    /// `run` must return promptly; the operation's result is delivered through
    /// the completion callback, never by blocking.
    pub fn new(
        required: impl IntoIterator<Item = CapabilityId>,
        run: impl Fn(&Capabilities, Complete<A>) -> Result<Cancel, CapabilityError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            required: required.into_iter().collect(),
            run: Arc::new(run),
        }
    }

    /// An effect that completes synchronously with `value` and requires no
    /// capability.
    #[must_use]
    pub fn pure(value: A) -> Self
    where
        A: Clone + Sync,
    {
        Self::new([], move |_capabilities, complete| {
            complete(value.clone());
            Ok(Cancel::noop())
        })
    }

    /// Capability ids this effect requires from the record.
    #[must_use]
    pub fn required(&self) -> &[CapabilityId] {
        &self.required
    }

    /// Start one run of the operation.
    ///
    /// Prefer [`fork`](crate::fork), which checks the requirement first and
    /// wraps the run in a fiber.
    pub fn run(
        &self,
        capabilities: &Capabilities,
        complete: Complete<A>,
    ) -> Result<Cancel, CapabilityError> {
        (*self.run)(capabilities, complete)
    }

    /// Transform the result, keeping the required-capability set.
    #[must_use]
    pub fn map<B: Send + 'static>(self, f: impl Fn(A) -> B + Send + Sync + 'static) -> Effect<B> {
        let Self { required, run } = self;
        let f = Arc::new(f);
        Effect {
            required,
            run: Arc::new(move |capabilities: &Capabilities, complete: Complete<B>| {
                let f = Arc::clone(&f);
                (*run)(capabilities, Box::new(move |value| complete(f(value))))
            }),
        }
    }

    /// Replace the result with a fixed value, keeping the required set.
    #[must_use]
    pub fn map_to<B>(self, value: B) -> Effect<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        self.map(move |_| value.clone())
    }
}

/// An effect that completes with `value` after `after`, via the timer
/// capability.
#[must_use]
pub fn delay<A>(after: Duration, value: A) -> Effect<A>
where
    A: Clone + Send + Sync + 'static,
{
    Effect::new([TIMER], move |capabilities, complete| {
        let timer = capabilities.get::<dyn Timer>()?;
        let value = value.clone();
        Ok(timer.delay(after, Box::new(move || complete(value))))
    })
}
