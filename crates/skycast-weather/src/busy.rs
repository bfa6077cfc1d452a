//! Busy/operation coordinator.
//!
//! Tracks in-flight operations per `scope` or `scope:key`. Each
//! `begin_busy` hands out a token that `end_busy` redeems once; counts per
//! key let nested and concurrent operations compose. The displayed mode and
//! status are recomputed from the live tokens on every change.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::watch;

use crate::types::StatusMessage;

/// Opaque handle for one in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusyToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyMode {
    /// Overlays the whole UI
    Blocking,
    /// Ambient indicator only
    NonBlocking,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusyOptions {
    pub blocking: bool,
    pub status: Option<StatusMessage>,
}

impl BusyOptions {
    pub fn blocking() -> Self {
        Self {
            blocking: true,
            status: None,
        }
    }

    pub fn non_blocking() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: StatusMessage) -> Self {
        self.status = Some(status);
        self
    }
}

/// What the UI needs to render busy state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusySnapshot {
    pub mode: Option<BusyMode>,
    pub status: Option<StatusMessage>,
    pub live_tokens: usize,
}

#[derive(Debug)]
struct LiveToken {
    full_key: String,
    blocking: bool,
}

#[derive(Debug, Default)]
struct BusyState {
    next_token: u64,
    tokens: HashMap<BusyToken, LiveToken>,
    counts: HashMap<String, usize>,
    mode: Option<BusyMode>,
    status: Option<StatusMessage>,
}

impl BusyState {
    fn register(&mut self, full_key: String, options: BusyOptions) -> BusyToken {
        self.next_token += 1;
        let token = BusyToken(self.next_token);

        *self.counts.entry(full_key.clone()).or_insert(0) += 1;
        self.tokens.insert(
            token,
            LiveToken {
                full_key,
                blocking: options.blocking,
            },
        );
        if let Some(status) = options.status {
            self.status = Some(status);
        }
        self.recompute();
        token
    }

    fn recompute(&mut self) {
        self.mode = if self.tokens.values().any(|t| t.blocking) {
            Some(BusyMode::Blocking)
        } else if !self.counts.is_empty() {
            Some(BusyMode::NonBlocking)
        } else {
            None
        };

        if self.counts.is_empty() {
            self.status = None;
        }
    }

    fn snapshot(&self) -> BusySnapshot {
        BusySnapshot {
            mode: self.mode,
            status: self.status.clone(),
            live_tokens: self.tokens.len(),
        }
    }
}

fn full_key(scope: &str, key: Option<&str>) -> String {
    match key {
        Some(key) => format!("{}:{}", scope, key),
        None => scope.to_string(),
    }
}

#[derive(Debug)]
pub struct BusyCoordinator {
    state: Mutex<BusyState>,
    changes: watch::Sender<BusySnapshot>,
}

impl Default for BusyCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl BusyCoordinator {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(BusySnapshot::default());
        Self {
            state: Mutex::new(BusyState::default()),
            changes,
        }
    }

    /// Register an operation on `scope` (or `scope:key`).
    pub fn begin_busy(&self, scope: &str, key: Option<&str>, options: BusyOptions) -> BusyToken {
        let mut state = self.state.lock();
        let token = state.register(full_key(scope, key), options);
        self.publish(&state);
        token
    }

    /// Like `begin_busy`, but refuses when `scope:key` already has a live
    /// token. Check and registration happen under one lock.
    pub fn begin_exclusive(
        &self,
        scope: &str,
        key: Option<&str>,
        options: BusyOptions,
    ) -> Option<BusyToken> {
        let mut state = self.state.lock();
        let full_key = full_key(scope, key);
        if state.counts.contains_key(&full_key) {
            return None;
        }
        let token = state.register(full_key, options);
        self.publish(&state);
        Some(token)
    }

    /// Release `token`. Unknown or already-released tokens are ignored.
    ///
    /// Returns whether the token was live.
    pub fn end_busy(&self, token: BusyToken) -> bool {
        let mut state = self.state.lock();

        let Some(live) = state.tokens.remove(&token) else {
            return false;
        };

        if let Some(count) = state.counts.get_mut(&live.full_key) {
            *count -= 1;
            if *count == 0 {
                state.counts.remove(&live.full_key);
            }
        }
        state.recompute();

        self.publish(&state);
        true
    }

    /// Begin an operation that ends when the returned guard is dropped.
    pub fn guard(&self, scope: &str, key: Option<&str>, options: BusyOptions) -> BusyGuard<'_> {
        let token = self.begin_busy(scope, key, options);
        BusyGuard {
            coordinator: self,
            token,
        }
    }

    /// Guarded form of `begin_exclusive`.
    pub fn try_guard(
        &self,
        scope: &str,
        key: Option<&str>,
        options: BusyOptions,
    ) -> Option<BusyGuard<'_>> {
        let token = self.begin_exclusive(scope, key, options)?;
        Some(BusyGuard {
            coordinator: self,
            token,
        })
    }

    pub fn is_busy(&self) -> bool {
        !self.state.lock().counts.is_empty()
    }

    pub fn is_busy_key(&self, scope: &str, key: &str) -> bool {
        self.state
            .lock()
            .counts
            .contains_key(&full_key(scope, Some(key)))
    }

    pub fn mode(&self) -> Option<BusyMode> {
        self.state.lock().mode
    }

    pub fn status(&self) -> Option<StatusMessage> {
        self.state.lock().status.clone()
    }

    pub fn snapshot(&self) -> BusySnapshot {
        self.state.lock().snapshot()
    }

    /// Receive a new snapshot every time busy state changes.
    pub fn subscribe(&self) -> watch::Receiver<BusySnapshot> {
        self.changes.subscribe()
    }

    fn publish(&self, state: &BusyState) {
        self.changes.send_replace(state.snapshot());
    }
}

/// Ends its operation on drop, so busy state is released on every path.
#[derive(Debug)]
pub struct BusyGuard<'a> {
    coordinator: &'a BusyCoordinator,
    token: BusyToken,
}

impl BusyGuard<'_> {
    pub fn token(&self) -> BusyToken {
        self.token
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.end_busy(self.token);
    }
}
