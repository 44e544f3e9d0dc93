//! Tokio-backed timer capability.

use std::time::Duration;

use futures_util::future::{AbortHandle, Abortable};
use tokio::time::sleep;

use rotor_core::{Cancel, Timer};

/// [`Timer`] implementation that spawns an abortable sleep task.
///
/// Must be used from within a tokio runtime. Canceling aborts the task, so
/// the callback can no longer fire and the timer entry is released.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn delay(&self, after: Duration, fire: Box<dyn FnOnce() + Send>) -> Cancel {
        let (abort, registration) = AbortHandle::new_pair();
        let task = Abortable::new(
            async move {
                sleep(after).await;
                fire();
            },
            registration,
        );
        tokio::spawn(async move {
            let _ = task.await;
        });
        Cancel::new(move || abort.abort())
    }
}
