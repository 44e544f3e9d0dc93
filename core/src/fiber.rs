//! Fibers - handles to in-flight effect runs.
//!
//! A fiber owns exactly one run of one effect. Its state machine is
//!
//! ```text
//! Pending { cancel, subscribers } ──complete──> Completed { value }
//!          │
//!          └──────────kill──────────> Killed
//! ```
//!
//! Both terminal states are absorbing: once reached, the fiber never again
//! changes state or invokes a subscriber, which is what makes a late timer
//! firing after a kill (or a double completion) harmless. Subscriber
//! callbacks always run with no internal lock held, so they may re-enter the
//! fiber API freely - joining, forking, or killing from inside a callback is
//! fine.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::capability::{Capabilities, CapabilityError};
use crate::effect::{Cancel, Effect};

/// Completion callback registered with [`join`]. Receives the fiber itself so
/// it can read the completed value.
pub type Subscriber<A> = Box<dyn FnOnce(&Fiber<A>) + Send>;

enum FiberState<A> {
    Pending {
        cancel: Option<Cancel>,
        subscribers: Vec<(u64, Subscriber<A>)>,
        next_subscriber: u64,
    },
    Completed {
        value: A,
    },
    Killed,
}

/// Observable phase of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    Pending,
    Completed,
    Killed,
}

struct FiberCell<A>(Mutex<FiberState<A>>);

impl<A> FiberCell<A> {
    fn lock(&self) -> MutexGuard<'_, FiberState<A>> {
        self.0.lock().expect("fiber state lock")
    }

    fn status(&self) -> FiberStatus {
        match &*self.lock() {
            FiberState::Pending { .. } => FiberStatus::Pending,
            FiberState::Completed { .. } => FiberStatus::Completed,
            FiberState::Killed => FiberStatus::Killed,
        }
    }

    /// Transition to `Killed`, dropping subscribers unnotified, and release
    /// the underlying resource. No-op unless `Pending`.
    fn kill(&self) {
        let cancel = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, FiberState::Killed) {
                FiberState::Pending { cancel, .. } => cancel,
                terminal @ FiberState::Completed { .. } => {
                    *state = terminal;
                    return;
                }
                FiberState::Killed => return,
            }
        };
        trace!("fiber killed");
        if let Some(cancel) = cancel {
            cancel.invoke();
        }
    }
}

/// Handle to one effect run. Cloning shares the handle, not the run.
pub struct Fiber<A> {
    cell: Arc<FiberCell<A>>,
}

impl<A> Clone for Fiber<A> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<A> fmt::Debug for Fiber<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fiber").field(&self.cell.status()).finish()
    }
}

impl<A> Fiber<A> {
    fn pending() -> Self {
        Self {
            cell: Arc::new(FiberCell(Mutex::new(FiberState::Pending {
                cancel: None,
                subscribers: Vec::new(),
                next_subscriber: 0,
            }))),
        }
    }

    #[must_use]
    pub fn status(&self) -> FiberStatus {
        self.cell.status()
    }

    /// The completed value, if the fiber has completed.
    #[must_use]
    pub fn value(&self) -> Option<A>
    where
        A: Clone,
    {
        match &*self.cell.lock() {
            FiberState::Completed { value } => Some(value.clone()),
            FiberState::Pending { .. } | FiberState::Killed => None,
        }
    }

    /// Attach the cancel handle after the effect run has started.
    ///
    /// The run may have completed (or been killed) in the meantime, in which
    /// case the handle is stale and simply dropped.
    fn wire_cancel(&self, cancel: Cancel) {
        let mut state = self.cell.lock();
        if let FiberState::Pending { cancel: slot, .. } = &mut *state {
            if slot.is_none() {
                *slot = Some(cancel);
            }
        }
    }

    /// Transition to `Completed`, then notify subscribers in registration
    /// order. Absorbed without effect in either terminal state.
    fn complete(&self, value: A) {
        let subscribers = {
            let mut state = self.cell.lock();
            match std::mem::replace(&mut *state, FiberState::Completed { value }) {
                FiberState::Pending { subscribers, .. } => subscribers,
                terminal => {
                    *state = terminal;
                    return;
                }
            }
        };
        for (_, subscriber) in subscribers {
            subscriber(self);
        }
    }

    fn remove_subscriber(&self, id: u64) {
        let mut state = self.cell.lock();
        if let FiberState::Pending { subscribers, .. } = &mut *state {
            subscribers.retain(|(subscriber_id, _)| *subscriber_id != id);
        }
    }
}

impl<A: Send + 'static> Fiber<A> {
    /// A type-erased view of this fiber, suitable for [`kill`].
    #[must_use]
    pub fn erased(&self) -> Forked {
        let cell: Arc<dyn ErasedFiber> = self.cell.clone();
        Forked { cell }
    }
}

trait ErasedFiber: Send + Sync {
    fn status(&self) -> FiberStatus;
    fn kill(&self);
}

impl<A: Send + 'static> ErasedFiber for FiberCell<A> {
    fn status(&self) -> FiberStatus {
        FiberCell::status(self)
    }

    fn kill(&self) {
        FiberCell::kill(self);
    }
}

/// A fiber handle with the value type erased: exposes the status and can be
/// killed, nothing else.
#[derive(Clone)]
pub struct Forked {
    cell: Arc<dyn ErasedFiber>,
}

impl Forked {
    #[must_use]
    pub fn status(&self) -> FiberStatus {
        self.cell.status()
    }
}

impl fmt::Debug for Forked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Forked").field(&self.status()).finish()
    }
}

/// Registration handle returned by [`join`] and [`select`].
///
/// Call [`unsubscribe`](Subscription::unsubscribe) to withdraw the callback;
/// dropping the handle leaves the registration in place.
pub struct Subscription(Option<Box<dyn FnOnce() + Send>>);

impl Subscription {
    #[must_use]
    fn noop() -> Self {
        Self(None)
    }

    fn armed(remove: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(remove)))
    }

    pub fn unsubscribe(self) {
        if let Some(remove) = self.0 {
            remove();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Subscription").field(&self.0.is_some()).finish()
    }
}

/// Start one run of `effect` and wrap it in a fiber.
///
/// The record is checked against the effect's requirement first; on a miss
/// the effect never starts. The run begins before this function returns, so
/// a synchronously completing effect hands back an already-completed fiber.
pub fn fork<A: Send + 'static>(
    effect: &Effect<A>,
    capabilities: &Capabilities,
) -> Result<Fiber<A>, CapabilityError> {
    let missing = capabilities.missing(effect.required());
    if !missing.is_empty() {
        return Err(CapabilityError::Missing { missing });
    }

    let fiber = Fiber::pending();
    let completion = fiber.clone();
    let cancel = effect.run(
        capabilities,
        Box::new(move |value| completion.complete(value)),
    )?;
    fiber.wire_cancel(cancel);
    Ok(fiber)
}

/// Observe a fiber's natural completion.
///
/// - `Completed`: `subscriber` is invoked synchronously, exactly once.
/// - `Killed`: `subscriber` is never invoked.
/// - `Pending`: `subscriber` is appended; the returned subscription removes
///   it again. Registering the same logic twice notifies it twice.
pub fn join<A: Send + 'static>(
    fiber: &Fiber<A>,
    subscriber: impl FnOnce(&Fiber<A>) + Send + 'static,
) -> Subscription {
    {
        let mut state = fiber.cell.lock();
        match &mut *state {
            FiberState::Pending {
                subscribers,
                next_subscriber,
                ..
            } => {
                let id = *next_subscriber;
                *next_subscriber += 1;
                subscribers.push((id, Box::new(subscriber)));
                let registered = fiber.clone();
                return Subscription::armed(move || registered.remove_subscriber(id));
            }
            FiberState::Killed => return Subscription::noop(),
            FiberState::Completed { .. } => {}
        }
    }
    subscriber(fiber);
    Subscription::noop()
}

struct Race<A> {
    subscriber: Option<Box<dyn FnOnce(&[Fiber<A>]) + Send>>,
    subscriptions: Vec<Subscription>,
}

impl<A> Race<A> {
    /// Disarm the race, returning what the caller must run or release.
    fn resolve(&mut self) -> Option<(Box<dyn FnOnce(&[Fiber<A>]) + Send>, Vec<Subscription>)> {
        let subscriber = self.subscriber.take()?;
        Some((subscriber, std::mem::take(&mut self.subscriptions)))
    }
}

/// Observe the first completion among `fibers`.
///
/// `subscriber` is invoked with the full fiber list as soon as any one of
/// them completes - synchronously if one already has. The remaining
/// registrations are withdrawn before the callback runs, so it fires at most
/// once and a later completion never re-triggers it. Callers inspect the
/// statuses to find the winner. Fibers forked from inside the callback are
/// untouched by the in-progress unsubscription.
pub fn select<A: Send + 'static>(
    subscriber: impl FnOnce(&[Fiber<A>]) + Send + 'static,
    fibers: &[Fiber<A>],
) -> Subscription {
    if fibers
        .iter()
        .any(|fiber| fiber.status() == FiberStatus::Completed)
    {
        subscriber(fibers);
        return Subscription::noop();
    }

    let fibers: Vec<Fiber<A>> = fibers.to_vec();
    let race = Arc::new(Mutex::new(Race {
        subscriber: Some(Box::new(subscriber) as Box<dyn FnOnce(&[Fiber<A>]) + Send>),
        subscriptions: Vec::new(),
    }));

    let mut registered = Vec::with_capacity(fibers.len());
    for fiber in &fibers {
        let race = Arc::clone(&race);
        let watched = fibers.clone();
        registered.push(join(fiber, move |_winner| {
            let resolved = race.lock().expect("select race lock").resolve();
            if let Some((subscriber, subscriptions)) = resolved {
                for subscription in subscriptions {
                    subscription.unsubscribe();
                }
                subscriber(&watched);
            }
        }));
    }

    // A completion may have raced in while registrations were still being
    // collected; in that case the callback already fired and the remaining
    // registrations just need to be withdrawn.
    {
        let mut race_state = race.lock().expect("select race lock");
        if race_state.subscriber.is_some() {
            race_state.subscriptions = registered;
        } else {
            drop(race_state);
            for subscription in registered {
                subscription.unsubscribe();
            }
            return Subscription::noop();
        }
    }

    Subscription::armed(move || {
        let resolved = race.lock().expect("select race lock").resolve();
        if let Some((_, subscriptions)) = resolved {
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        }
    })
}

/// An effect that kills `forked` when run.
///
/// If the fiber is no longer `Pending` the effect completes immediately with
/// no observable change; otherwise the fiber transitions to `Killed`, its
/// cancel handle is invoked, and the effect completes once cancellation has
/// finished. Subscribers registered on the killed fiber are not notified.
#[must_use]
pub fn kill(forked: &Forked) -> Effect<()> {
    let forked = forked.clone();
    Effect::new([], move |_capabilities, complete| {
        forked.cell.kill();
        complete(());
        Ok(Cancel::noop())
    })
}

/// [`kill`], resolving to `value` - the usual way to feed a kill back into a
/// dispatch loop as an action.
#[must_use]
pub fn kill_with<A>(value: A, forked: &Forked) -> Effect<A>
where
    A: Clone + Send + Sync + 'static,
{
    kill(forked).map_to(value)
}
