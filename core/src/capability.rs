//! The capability record - named primitive operations behind trait objects.
//!
//! Effects never touch timers, storage, or listeners directly. They name the
//! operations they need through [`CapabilityId`]s and receive concrete
//! implementations from a [`Capabilities`] record supplied once at startup.
//! The record is checked structurally: [`fork`](crate::fork) refuses to start
//! an effect whose requirement is not covered, and the engine performs the
//! same check for a whole handler table before accepting any action.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::effect::Cancel;

/// Identifies one named primitive operation in the capability record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapabilityId(&'static str);

impl CapabilityId {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A capability interface registrable in a [`Capabilities`] record.
///
/// Implemented on the trait object of each interface, tying it to the id an
/// effect declares:
///
/// ```
/// use rotor_core::{Capability, CapabilityId};
///
/// pub trait Beeper: Send + Sync {
///     fn beep(&self);
/// }
///
/// impl Capability for dyn Beeper {
///     const ID: CapabilityId = CapabilityId::new("beep");
/// }
/// ```
pub trait Capability: Send + Sync + 'static {
    const ID: CapabilityId;
}

/// Errors raised when the capability record does not cover a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// The record lacks one or more required operations. The effect that
    /// required them was never started.
    #[error("capability record is missing {missing:?}")]
    Missing { missing: Vec<CapabilityId> },
}

/// The record of primitive operations supplied to effects at run time.
///
/// Assembled once at startup; the engine verifies it covers every capability
/// the handler table declares before accepting any action.
#[derive(Default)]
pub struct Capabilities {
    entries: BTreeMap<CapabilityId, Box<dyn Any + Send + Sync>>,
}

impl Capabilities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation for the capability interface `C`.
    ///
    /// `C` is the trait object of the interface, so registration reads
    /// `record.with::<dyn Timer>(Arc::new(TokioTimer))`. A later registration
    /// under the same id replaces the earlier one.
    #[must_use]
    pub fn with<C>(mut self, implementation: Arc<C>) -> Self
    where
        C: Capability + ?Sized,
    {
        self.entries.insert(C::ID, Box::new(implementation));
        self
    }

    /// Whether the record supplies the operation named by `id`.
    #[must_use]
    pub fn provides(&self, id: CapabilityId) -> bool {
        self.entries.contains_key(&id)
    }

    /// The subset of `required` that the record does not supply.
    #[must_use]
    pub fn missing(&self, required: &[CapabilityId]) -> Vec<CapabilityId> {
        required
            .iter()
            .copied()
            .filter(|id| !self.provides(*id))
            .collect()
    }

    /// Retrieve the implementation registered for the interface `C`.
    pub fn get<C>(&self) -> Result<Arc<C>, CapabilityError>
    where
        C: Capability + ?Sized,
    {
        self.entries
            .get(&C::ID)
            .and_then(|entry| entry.downcast_ref::<Arc<C>>())
            .cloned()
            .ok_or(CapabilityError::Missing {
                missing: vec![C::ID],
            })
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("provides", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Id of the built-in timer capability used by [`delay`](crate::delay).
pub const TIMER: CapabilityId = CapabilityId::new("delay");

/// One-shot timer primitive.
///
/// `fire` must be invoked at most once, after roughly `after` has elapsed.
/// The returned [`Cancel`] releases the underlying timer; a fired or
/// canceled timer must not invoke `fire` again.
pub trait Timer: Send + Sync {
    fn delay(&self, after: Duration, fire: Box<dyn FnOnce() + Send>) -> Cancel;
}

impl Capability for dyn Timer {
    const ID: CapabilityId = TIMER;
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE: CapabilityId = CapabilityId::new("probe");

    trait Probe: Send + Sync + std::fmt::Debug {
        fn value(&self) -> u8;
    }

    impl Capability for dyn Probe {
        const ID: CapabilityId = PROBE;
    }

    #[derive(Debug)]
    struct FixedProbe(u8);

    impl Probe for FixedProbe {
        fn value(&self) -> u8 {
            self.0
        }
    }

    #[test]
    fn registered_capability_is_provided_and_retrievable() {
        let record = Capabilities::new().with::<dyn Probe>(Arc::new(FixedProbe(7)));

        assert!(record.provides(PROBE));
        assert!(record.missing(&[PROBE]).is_empty());

        let probe = record.get::<dyn Probe>().expect("probe registered");
        assert_eq!(probe.value(), 7);
    }

    #[test]
    fn absent_capability_is_reported_by_name() {
        let record = Capabilities::new();

        assert!(!record.provides(PROBE));
        assert_eq!(record.missing(&[PROBE, TIMER]), vec![PROBE, TIMER]);

        let err = record.get::<dyn Probe>().expect_err("nothing registered");
        assert_eq!(
            err,
            CapabilityError::Missing {
                missing: vec![PROBE]
            }
        );
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let record = Capabilities::new()
            .with::<dyn Probe>(Arc::new(FixedProbe(1)))
            .with::<dyn Probe>(Arc::new(FixedProbe(2)));

        let probe = record.get::<dyn Probe>().expect("probe registered");
        assert_eq!(probe.value(), 2);
    }
}
