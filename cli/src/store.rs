//! File-backed store capability for the demo counter.
//!
//! Plays the role a browser's local storage plays for the runtime: a named
//! capability the handler table reaches only through load/save effects.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use rotor_engine::{Action, Cancel, Capability, CapabilityId, Effect};

use crate::app::Payload;

/// Id of the store capability required by [`load`] and [`save`].
pub const STORE: CapabilityId = CapabilityId::new("store");

/// Persistence primitive for the saved count.
pub trait Store: Send + Sync {
    fn load(&self, done: Box<dyn FnOnce(Option<i64>) + Send>) -> Cancel;
    fn save(&self, count: i64, done: Box<dyn FnOnce() + Send>) -> Cancel;
}

impl Capability for dyn Store {
    const ID: CapabilityId = STORE;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedCount {
    count: i64,
}

/// [`Store`] writing a small JSON document to one file.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Store for JsonStore {
    fn load(&self, done: Box<dyn FnOnce(Option<i64>) + Send>) -> Cancel {
        let count = fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str::<SavedCount>(&raw).ok())
            .map(|saved| saved.count);
        done(count);
        Cancel::noop()
    }

    fn save(&self, count: i64, done: Box<dyn FnOnce() + Send>) -> Cancel {
        match serde_json::to_string_pretty(&SavedCount { count }) {
            Ok(raw) => {
                if let Err(err) = fs::write(&self.path, raw) {
                    warn!(path = %self.path.display(), error = %err, "count not saved");
                }
            }
            Err(err) => warn!(error = %err, "count not serialized"),
        }
        done();
        Cancel::noop()
    }
}

/// Effect resolving to a `load` action carrying the saved count, if any.
#[must_use]
pub fn load() -> Effect<Action<Payload>> {
    Effect::new([STORE], |capabilities, complete| {
        let store = capabilities.get::<dyn Store>()?;
        Ok(store.load(Box::new(move |count| {
            complete(Action::new("load", Payload::Loaded(count)));
        })))
    })
}

/// Effect persisting `count`, resolving to a `saved` action.
#[must_use]
pub fn save(count: i64) -> Effect<Action<Payload>> {
    Effect::new([STORE], move |capabilities, complete| {
        let store = capabilities.get::<dyn Store>()?;
        Ok(store.save(count, Box::new(move || {
            complete(Action::new("saved", Payload::None));
        })))
    })
}
