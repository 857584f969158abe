//! In-memory lock store with TTLs driven by a [`Clock`].

use crate::environment::{Clock, SystemClock, add_duration};
use crate::error::{RaffleError, Result};
use crate::lock::LockStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    /// Remaining successful `set_if_absent` calls before they start failing
    acquisitions_left: Option<usize>,
    /// Every call fails
    unavailable: bool,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, (String, DateTime<Utc>)>,
    faults: Faults,
}

/// Mock lock store.
///
/// Entries expire according to the injected clock, so tests can move time forward
/// instead of sleeping.
#[derive(Clone)]
pub struct InMemoryLockStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLockStore {
    /// Store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store on a custom clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Let `n` more acquisitions succeed, then fail the rest until [`Self::recover`].
    pub fn fail_acquisitions_after(&self, n: usize) {
        self.state().faults.acquisitions_left = Some(n);
    }

    /// Fail every call until [`Self::recover`].
    pub fn set_unavailable(&self) {
        self.state().faults.unavailable = true;
    }

    /// Clear injected faults.
    pub fn recover(&self) {
        self.state().faults = Faults::default();
    }

    /// Number of unexpired locks.
    #[must_use]
    pub fn held_count(&self) -> usize {
        let now = self.clock.now();
        self.state()
            .entries
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    fn check_available(state: &State) -> Result<()> {
        if state.faults.unavailable {
            return Err(RaffleError::StoreUnavailable(
                "lock store unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn live_token<'a>(state: &'a State, key: &str, now: DateTime<Utc>) -> Option<&'a str> {
        state
            .entries
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map(|(token, _)| token.as_str())
    }
}

impl Default for InMemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state();
        Self::check_available(&state)?;

        match state.faults.acquisitions_left {
            Some(0) => {
                return Err(RaffleError::StoreUnavailable(
                    "injected acquisition failure".to_string(),
                ));
            }
            Some(n) => state.faults.acquisitions_left = Some(n - 1),
            None => {}
        }

        if Self::live_token(&state, key, now).is_some() {
            return Ok(false);
        }
        state
            .entries
            .insert(key.to_string(), (token.to_string(), add_duration(now, ttl)));
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state();
        Self::check_available(&state)?;

        if Self::live_token(&state, key, now) == Some(token) {
            state.entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn compare_and_expire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state();
        Self::check_available(&state)?;

        if Self::live_token(&state, key, now) == Some(token) {
            if let Some(entry) = state.entries.get_mut(key) {
                entry.1 = add_duration(now, ttl);
            }
            return Ok(true);
        }
        Ok(false)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state();
        Self::check_available(&state)?;
        state.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        let state = self.state();
        Self::check_available(&state)?;
        Ok(Self::live_token(&state, key, now).is_some())
    }
}
