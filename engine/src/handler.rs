//! Handler tables - action-keyed families of pure transition functions.
//!
//! Each entry maps `(state, payload, live fibers)` to either a bare new state
//! or a new state plus effects to start. Tables are assembled once at
//! startup: per-feature tables are unioned with [`merge`](HandlerTable::merge)
//! (colliding action names are a construction-time error) and lifted into a
//! larger state space with [`embed`](HandlerTable::embed). After assembly the
//! table is immutable.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use rotor_core::{CapabilityId, Effect, Fiber};

use crate::action::Action;

/// Result of one handler call: the replacement state, optionally with
/// effects for the loop to start.
#[derive(Debug)]
pub enum Update<S, P> {
    State(S),
    WithEffects(S, Vec<Effect<Action<P>>>),
}

impl<S, P> Update<S, P> {
    #[must_use]
    pub fn state(&self) -> &S {
        match self {
            Update::State(state) | Update::WithEffects(state, _) => state,
        }
    }

    #[must_use]
    pub fn into_parts(self) -> (S, Vec<Effect<Action<P>>>) {
        match self {
            Update::State(state) => (state, Vec::new()),
            Update::WithEffects(state, effects) => (state, effects),
        }
    }
}

/// Construction-time errors for handler tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TableError {
    /// Two entries claimed the same action name while registering or merging.
    #[error("duplicate handler entry for action {0:?}")]
    DuplicateAction(&'static str),
}

/// Dispatch-time errors, fatal to a single cycle only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The action's name matched no entry. Misconfigured action wiring is
    /// reported rather than silently leaving the state unchanged.
    #[error("no handler entry for action {0:?}")]
    UnknownAction(String),
}

type HandlerFn<S, P> = Box<dyn Fn(S, &P, &[Fiber<Action<P>>]) -> Update<S, P> + Send + Sync>;

/// An immutable mapping from action name to pure transition function.
pub struct HandlerTable<S, P> {
    entries: BTreeMap<&'static str, HandlerFn<S, P>>,
    required: BTreeSet<CapabilityId>,
}

impl<S, P> Default for HandlerTable<S, P> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            required: BTreeSet::new(),
        }
    }
}

impl<S, P> HandlerTable<S, P> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry that produces no capability-requiring effects.
    pub fn on(
        self,
        name: &'static str,
        handler: impl Fn(S, &P, &[Fiber<Action<P>>]) -> Update<S, P> + Send + Sync + 'static,
    ) -> Result<Self, TableError> {
        self.on_requiring(name, [], handler)
    }

    /// Register an entry, declaring the capability ids any effect it returns
    /// may require. The declarations are unioned across the table and checked
    /// against the capability record when the loop is constructed.
    pub fn on_requiring(
        mut self,
        name: &'static str,
        requires: impl IntoIterator<Item = CapabilityId>,
        handler: impl Fn(S, &P, &[Fiber<Action<P>>]) -> Update<S, P> + Send + Sync + 'static,
    ) -> Result<Self, TableError> {
        if self.entries.contains_key(name) {
            return Err(TableError::DuplicateAction(name));
        }
        self.required.extend(requires);
        self.entries.insert(name, Box::new(handler));
        Ok(self)
    }

    /// Union two tables by action name. Names must be disjoint.
    pub fn merge(mut self, other: Self) -> Result<Self, TableError> {
        for (name, handler) in other.entries {
            if self.entries.contains_key(name) {
                return Err(TableError::DuplicateAction(name));
            }
            self.entries.insert(name, handler);
        }
        self.required.extend(other.required);
        Ok(self)
    }

    /// Registered action names, in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    /// Union of the capability ids declared by all entries.
    #[must_use]
    pub fn required_capabilities(&self) -> &BTreeSet<CapabilityId> {
        &self.required
    }

    /// Resolve and run the entry for `action`.
    ///
    /// Pure: identical `(state, payload, live)` inputs produce structurally
    /// equal updates, and no effect is executed here.
    pub fn dispatch(
        &self,
        state: S,
        action: &Action<P>,
        live: &[Fiber<Action<P>>],
    ) -> Result<Update<S, P>, DispatchError> {
        let handler = self
            .entries
            .get(action.name())
            .ok_or_else(|| DispatchError::UnknownAction(action.name().to_owned()))?;
        trace!(action = action.name(), "dispatch");
        Ok(handler(state, action.payload(), live))
    }

    /// Lift this table into a larger state space through a lens.
    ///
    /// `extract` projects the substate out of the outer state; `rebuild`
    /// writes a new substate back. Effects returned by the inner entries are
    /// threaded through unchanged.
    #[must_use]
    pub fn embed<T>(
        self,
        extract: impl Fn(&T) -> S + Send + Sync + 'static,
        rebuild: impl Fn(S, T) -> T + Send + Sync + 'static,
    ) -> HandlerTable<T, P>
    where
        S: 'static,
        P: 'static,
    {
        let extract = Arc::new(extract);
        let rebuild = Arc::new(rebuild);
        let entries = self
            .entries
            .into_iter()
            .map(|(name, handler)| {
                let extract = Arc::clone(&extract);
                let rebuild = Arc::clone(&rebuild);
                let lifted: HandlerFn<T, P> = Box::new(move |outer, payload, live| {
                    let inner = extract(&outer);
                    match handler(inner, payload, live) {
                        Update::State(next) => Update::State(rebuild(next, outer)),
                        Update::WithEffects(next, effects) => {
                            Update::WithEffects(rebuild(next, outer), effects)
                        }
                    }
                });
                (name, lifted)
            })
            .collect();
        HandlerTable {
            entries,
            required: self.required,
        }
    }
}

impl<S, P> fmt::Debug for HandlerTable<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("actions", &self.entries.keys().collect::<Vec<_>>())
            .field("required", &self.required)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rotor_core::TIMER;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Count {
        count: i64,
    }

    fn counting() -> HandlerTable<Count, i64> {
        HandlerTable::new()
            .on("add", |state: Count, amount: &i64, _live| {
                Update::State(Count {
                    count: state.count + amount,
                })
            })
            .expect("fresh table")
    }

    #[test]
    fn dispatch_runs_the_matching_entry() {
        let table = counting();
        let update = table
            .dispatch(Count { count: 1 }, &Action::new("add", 2), &[])
            .expect("entry registered");
        assert_eq!(update.state(), &Count { count: 3 });
    }

    #[test]
    fn unknown_action_is_an_error_not_a_silent_noop() {
        let table = counting();
        let err = table
            .dispatch(Count { count: 1 }, &Action::new("sub", 2), &[])
            .expect_err("no such entry");
        assert_eq!(err, DispatchError::UnknownAction("sub".to_owned()));
    }

    #[test]
    fn dispatch_is_pure() {
        let table = counting();
        let action = Action::new("add", 5);

        let first = table
            .dispatch(Count { count: 1 }, &action, &[])
            .expect("entry registered")
            .into_parts();
        let second = table
            .dispatch(Count { count: 1 }, &action, &[])
            .expect("entry registered")
            .into_parts();

        assert_eq!(first.0, second.0);
        assert_eq!(first.1.len(), second.1.len());
    }

    #[test]
    fn merge_unions_disjoint_tables() {
        let reset = HandlerTable::new()
            .on("reset", |_state, _payload: &i64, _live| {
                Update::State(Count { count: 0 })
            })
            .expect("fresh table");

        let table = counting().merge(reset).expect("disjoint names");
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["add", "reset"]);
    }

    #[test]
    fn merge_collision_is_a_construction_error() {
        let err = counting().merge(counting()).expect_err("same names");
        assert_eq!(err, TableError::DuplicateAction("add"));
    }

    #[test]
    fn duplicate_registration_is_a_construction_error() {
        let err = counting()
            .on("add", |state, _payload, _live| Update::State(state))
            .expect_err("name taken");
        assert_eq!(err, TableError::DuplicateAction("add"));
    }

    #[test]
    fn declared_capabilities_union_across_merge() {
        let timed = HandlerTable::new()
            .on_requiring("tick", [TIMER], |state: Count, _payload: &i64, _live| {
                Update::State(state)
            })
            .expect("fresh table");

        let table = counting().merge(timed).expect("disjoint names");
        assert!(table.required_capabilities().contains(&TIMER));
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Outer {
        tally: Count,
        label: &'static str,
    }

    #[test]
    fn embed_rebuilds_the_outer_state_around_the_inner_update() {
        let table = counting().embed(
            |outer: &Outer| outer.tally.clone(),
            |tally, outer| Outer { tally, ..outer },
        );

        let start = Outer {
            tally: Count { count: 10 },
            label: "kept",
        };
        let update = table
            .dispatch(start.clone(), &Action::new("add", 4), &[])
            .expect("entry registered");

        // Same result as running the inner handler alone, then rebuilding.
        let expected = Outer {
            tally: Count { count: 14 },
            label: "kept",
        };
        assert_eq!(update.state(), &expected);
    }

    #[test]
    fn embed_threads_effects_unchanged() {
        let inner = HandlerTable::new()
            .on("ping", |state: Count, _payload: &i64, _live| {
                Update::WithEffects(state, vec![Effect::pure(Action::new("ping", 0))])
            })
            .expect("fresh table");

        let table = inner.embed(
            |outer: &Outer| outer.tally.clone(),
            |tally, outer| Outer { tally, ..outer },
        );

        let (_, effects) = table
            .dispatch(
                Outer {
                    tally: Count { count: 0 },
                    label: "kept",
                },
                &Action::new("ping", 0),
                &[],
            )
            .expect("entry registered")
            .into_parts();
        assert_eq!(effects.len(), 1);
        assert!(effects[0].required().is_empty());
    }
}
