//! Thread-safe handle. Operations take the lock for their whole duration, so
//! reservations from different threads can never interleave.

use super::core::Engine;
use crate::oracle::PriceOracle;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
pub struct SharedEngine<O: PriceOracle> {
    inner: Arc<Mutex<Engine<O>>>,
}

impl<O: PriceOracle> Clone for SharedEngine<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O: PriceOracle> SharedEngine<O> {
    pub fn new(engine: Engine<O>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    // a panicking holder can't leave a half-applied operation behind (every
    // mutation is checkpointed), so a poisoned lock is still safe to use
    pub fn lock(&self) -> MutexGuard<'_, Engine<O>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `op` with exclusive access to the engine.
    pub fn with<T>(&self, op: impl FnOnce(&mut Engine<O>) -> T) -> T {
        let mut engine = self.lock();
        op(&mut engine)
    }
}
