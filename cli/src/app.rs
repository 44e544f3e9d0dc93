//! The delay-counter application: state, payload, and handler table.

use std::time::Duration;

use rotor_engine::{
    Action, HandlerTable, TIMER, TableError, Update, delay, kill_with,
};

use crate::store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterState {
    pub count: i64,
    pub delayed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    None,
    After(Duration),
    Loaded(Option<i64>),
}

/// Assemble the full handler table from the counter and persistence entries.
pub fn counter_table() -> Result<HandlerTable<CounterState, Payload>, TableError> {
    counting()?.merge(delaying()?)
}

/// Plain counting, persisted on every change.
fn counting() -> Result<HandlerTable<CounterState, Payload>, TableError> {
    HandlerTable::new()
        .on_requiring("inc", [store::STORE], |state: CounterState, _payload, _live| {
            changed(CounterState {
                count: state.count + 1,
                ..state
            })
        })?
        .on_requiring("dec", [store::STORE], |state: CounterState, _payload, _live| {
            changed(CounterState {
                count: state.count - 1,
                ..state
            })
        })?
        .on_requiring("reset", [store::STORE], |state: CounterState, _payload, _live| {
            changed(CounterState { count: 0, ..state })
        })?
        .on("load", |state: CounterState, payload: &Payload, _live| {
            match *payload {
                Payload::Loaded(Some(count)) => Update::State(CounterState { count, ..state }),
                _ => Update::State(state),
            }
        })?
        .on("saved", |state, _payload, _live| Update::State(state))
}

/// Delayed increments and their cancellation.
fn delaying() -> Result<HandlerTable<CounterState, Payload>, TableError> {
    HandlerTable::new()
        .on_requiring("delay", [TIMER], |state: CounterState, payload, _live| {
            let Payload::After(after) = *payload else {
                return Update::State(state);
            };
            Update::WithEffects(
                CounterState {
                    delayed: state.delayed + 1,
                    ..state
                },
                vec![delay(after, Action::new("tick", Payload::None))],
            )
        })?
        .on("tick", |state: CounterState, _payload, _live| {
            Update::State(CounterState {
                count: state.count + 1,
                delayed: state.delayed.saturating_sub(1),
            })
        })?
        .on("cancel-delays", |state: CounterState, _payload, live| {
            let kills = live
                .iter()
                .map(|fiber| kill_with(Action::new("killed", Payload::None), &fiber.erased()))
                .collect();
            Update::WithEffects(CounterState { delayed: 0, ..state }, kills)
        })?
        .on("killed", |state, _payload, _live| Update::State(state))
}

fn changed(state: CounterState) -> Update<CounterState, Payload> {
    let count = state.count;
    Update::WithEffects(state, vec![store::save(count)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_assembles_with_disjoint_names() {
        let table = counter_table().expect("feature tables are disjoint");
        assert!(table.names().any(|name| name == "inc"));
        assert!(table.names().any(|name| name == "cancel-delays"));
        assert!(table.required_capabilities().contains(&TIMER));
        assert!(table.required_capabilities().contains(&store::STORE));
    }

    #[test]
    fn counting_entries_persist_the_new_count() {
        let table = counter_table().expect("feature tables are disjoint");
        let (state, effects) = table
            .dispatch(
                CounterState::default(),
                &Action::new("inc", Payload::None),
                &[],
            )
            .expect("entry registered")
            .into_parts();

        assert_eq!(state, CounterState { count: 1, delayed: 0 });
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].required(), &[store::STORE]);
    }

    #[test]
    fn load_applies_a_saved_count_only_when_present() {
        let table = counter_table().expect("feature tables are disjoint");

        let update = table
            .dispatch(
                CounterState::default(),
                &Action::new("load", Payload::Loaded(Some(9))),
                &[],
            )
            .expect("entry registered");
        assert_eq!(update.state(), &CounterState { count: 9, delayed: 0 });

        let update = table
            .dispatch(
                CounterState { count: 3, delayed: 0 },
                &Action::new("load", Payload::Loaded(None)),
                &[],
            )
            .expect("entry registered");
        assert_eq!(update.state(), &CounterState { count: 3, delayed: 0 });
    }
}
