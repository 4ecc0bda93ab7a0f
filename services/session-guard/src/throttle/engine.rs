// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Throttle decision engine.
//!
//! Per action identifier:
//! 1. Cooldown: at least `delay` between two allowed attempts
//! 2. Window cap: at most `max_attempts` per `time_window`, after which the
//!    action is blocked
//! 3. Deferred unblock: `time_window` after the block was set, a timer resets
//!    the record and opens a fresh window
//!
//! All record mutation (decisions, server-forced blocks and the deferred
//! unblock) happens under one mutex, so the engine can be shared freely
//! between tasks and threads.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::record::ThrottleRecord;
use super::store::{Entry, ThrottleStore};
use crate::clock::{millis, span_ms, Clock};
use crate::config::{GuardConfig, ThrottleConfig};
use crate::metrics::GuardMetrics;
use crate::storage::Storage;

/// Storage key used when none is configured.
pub const DEFAULT_STORAGE_KEY: &str = "throttle_state";

/// Outcome of a throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Attempt allowed and counted
    Allowed,
    /// Denied: the per-attempt delay has not elapsed
    Cooldown,
    /// Denied: attempts exhausted or server pushed back
    Blocked,
    /// Denied: empty action identifier
    Invalid,
}

impl ThrottleDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    fn label(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Cooldown => "cooldown",
            Self::Blocked => "blocked",
            Self::Invalid => "invalid",
        }
    }
}

struct State {
    store: ThrottleStore,
    next_generation: u64,
}

struct Shared {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    default_config: ThrottleConfig,
    metrics: Option<GuardMetrics>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .store
            .clear();
    }
}

/// Process-wide throttle engine. Clones share state.
#[derive(Clone)]
pub struct ThrottleEngine {
    shared: Arc<Shared>,
}

impl ThrottleEngine {
    /// Engine with the default class and storage key.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self::build(
            storage,
            clock,
            DEFAULT_STORAGE_KEY.to_string(),
            ThrottleConfig::DEFAULT,
            None,
        )
    }

    /// Engine configured from [`GuardConfig`].
    pub fn from_config(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        config: &GuardConfig,
        metrics: Option<GuardMetrics>,
    ) -> Self {
        Self::build(
            storage,
            clock,
            config.storage.throttle_key.clone(),
            config.throttle.default,
            metrics,
        )
    }

    fn build(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        key: String,
        default_config: ThrottleConfig,
        metrics: Option<GuardMetrics>,
    ) -> Self {
        let store = ThrottleStore::load(storage, key, clock.now_ms());
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    store,
                    next_generation: 0,
                }),
                clock,
                default_config,
                metrics,
            }),
        }
    }

    /// Check and count an attempt; `true` means the caller may proceed.
    pub fn can_perform_action(&self, action_id: &str, config: Option<&ThrottleConfig>) -> bool {
        self.check(action_id, config).is_allowed()
    }

    /// Check and count an attempt, reporting why it was denied.
    pub fn check(&self, action_id: &str, config: Option<&ThrottleConfig>) -> ThrottleDecision {
        let config = self.resolve(config);
        let decision = if action_id.is_empty() {
            debug!("Ignoring throttle check for empty action identifier");
            ThrottleDecision::Invalid
        } else {
            self.decide(action_id, &config)
        };

        if let Some(metrics) = &self.shared.metrics {
            metrics.record_decision(decision.label());
        }
        decision
    }

    fn decide(&self, action_id: &str, config: &ThrottleConfig) -> ThrottleDecision {
        let now = self.shared.clock.now_ms();
        let mut guard = self.lock();
        let state = &mut *guard;
        self.reconcile(state, action_id, Some(config), now);

        if !state.store.contains(action_id) {
            state
                .store
                .insert(action_id, Entry::new(ThrottleRecord::first_attempt(now), config.persist));
            if config.persist {
                state.store.persist();
            }
            debug!(action_id, "First attempt recorded");
            return ThrottleDecision::Allowed;
        }

        let Some(entry) = state.store.get_mut(action_id) else {
            return ThrottleDecision::Invalid;
        };

        if entry.record.blocked {
            debug!(action_id, "Attempt denied, action blocked");
            return ThrottleDecision::Blocked;
        }

        if now.saturating_sub(entry.record.last_attempt_at) < span_ms(config.delay_ms) {
            debug!(action_id, "Attempt denied, cooldown active");
            return ThrottleDecision::Cooldown;
        }

        if entry.record.window_age(now) > span_ms(config.time_window_ms) {
            entry.record.roll_window(now);
        }

        let rewrite = entry.persist || config.persist;
        entry.persist = config.persist;

        let decision = if entry.record.attempt_count >= config.max_attempts {
            entry.record.block(now);
            let unblock_at = now.saturating_add(span_ms(config.time_window_ms));
            self.arm_unblock(&mut state.next_generation, action_id, entry, unblock_at, now);
            warn!(
                action_id,
                attempts = entry.record.attempt_count,
                retry_after_ms = config.time_window_ms,
                "Throttle block applied"
            );
            if let Some(metrics) = &self.shared.metrics {
                metrics.record_block("local");
            }
            ThrottleDecision::Blocked
        } else {
            entry.record.attempt_count += 1;
            entry.record.last_attempt_at = now;
            ThrottleDecision::Allowed
        };

        if rewrite {
            state.store.persist();
        }
        decision
    }

    /// Force a block because the server rejected the action (HTTP 429).
    ///
    /// A fresh block lasts `time_window` from now. If the action is already
    /// blocked until later than that, the later deadline is kept.
    pub fn record_action(&self, action_id: &str, config: &ThrottleConfig) {
        if action_id.is_empty() {
            debug!("Ignoring server block for empty action identifier");
            return;
        }

        let now = self.shared.clock.now_ms();
        let mut guard = self.lock();
        let state = &mut *guard;
        self.reconcile(state, action_id, Some(config), now);

        if !state.store.contains(action_id) {
            let record = ThrottleRecord {
                last_attempt_at: now,
                attempt_count: 0,
                window_started_at: now,
                blocked: false,
            };
            state.store.insert(action_id, Entry::new(record, config.persist));
        }
        let Some(entry) = state.store.get_mut(action_id) else {
            return;
        };

        let window = span_ms(config.time_window_ms);
        let requested = now.saturating_add(window);
        let current = entry.record.blocked.then(|| {
            entry
                .unblock_at
                .unwrap_or(entry.record.window_started_at.saturating_add(window))
        });

        match current {
            Some(at) if at >= requested => {
                debug!(action_id, unblock_at = at, "Server block within existing block");
                if entry.timer.is_none() {
                    self.arm_unblock(&mut state.next_generation, action_id, entry, at, now);
                }
            }
            _ => {
                entry.record.block(now);
                entry.record.attempt_count = 0;
                self.arm_unblock(&mut state.next_generation, action_id, entry, requested, now);
                warn!(
                    action_id,
                    retry_after_ms = config.time_window_ms,
                    "Server forced throttle block"
                );
            }
        }

        let rewrite = entry.persist || config.persist;
        entry.persist = config.persist;
        if rewrite {
            state.store.persist();
        }
        drop(guard);

        if let Some(metrics) = &self.shared.metrics {
            metrics.record_block("server");
        }
    }

    /// Read-only snapshot of a record.
    pub fn get_throttle_state(&self, action_id: &str) -> Option<ThrottleRecord> {
        let now = self.shared.clock.now_ms();
        let mut guard = self.lock();
        self.reconcile(&mut guard, action_id, None, now);
        guard.store.record(action_id)
    }

    /// Time until the next attempt could be allowed.
    ///
    /// While blocked this is the time left until the unblock; otherwise the
    /// remainder of the per-attempt delay. Zero for unknown identifiers.
    pub fn get_time_until_next_action(
        &self,
        action_id: &str,
        config: Option<&ThrottleConfig>,
    ) -> Duration {
        let config = self.resolve(config);
        let now = self.shared.clock.now_ms();
        let mut guard = self.lock();
        self.reconcile(&mut guard, action_id, Some(&config), now);

        let Some(entry) = guard.store.get(action_id) else {
            return Duration::ZERO;
        };

        if entry.record.blocked {
            let window = span_ms(config.time_window_ms);
            let deadline = entry
                .unblock_at
                .unwrap_or(entry.record.window_started_at.saturating_add(window));
            millis(deadline.saturating_sub(now))
        } else {
            let next = entry.record.last_attempt_at.saturating_add(span_ms(config.delay_ms));
            millis(next.saturating_sub(now))
        }
    }

    /// Attempts left in the current window.
    pub fn get_remaining_attempts(&self, action_id: &str, config: Option<&ThrottleConfig>) -> u32 {
        let config = self.resolve(config);
        let now = self.shared.clock.now_ms();
        let mut guard = self.lock();
        self.reconcile(&mut guard, action_id, Some(&config), now);

        match guard.store.get(action_id) {
            None => config.max_attempts,
            Some(entry) if entry.record.blocked => 0,
            Some(entry) if entry.record.window_age(now) > span_ms(config.time_window_ms) => {
                config.max_attempts
            }
            Some(entry) => config.max_attempts.saturating_sub(entry.record.attempt_count),
        }
    }

    /// Forget one action, cancelling its pending unblock.
    pub fn clear_throttle_state(&self, action_id: &str) {
        if action_id.is_empty() {
            return;
        }

        let mut guard = self.lock();
        if let Some(mut entry) = guard.store.remove(action_id) {
            entry.cancel_timer();
            if entry.persist {
                guard.store.persist();
            }
            info!(action_id, "Throttle state cleared");
        }
    }

    /// Forget every action and delete the persisted blob.
    pub fn clear_all_throttle_states(&self) {
        let mut guard = self.lock();
        let cleared = guard.store.len();
        guard.store.clear();
        guard.store.remove_blob();
        info!(cleared, "All throttle state cleared");
    }

    /// Config used when callers pass none.
    pub fn default_config(&self) -> ThrottleConfig {
        self.shared.default_config
    }

    pub fn metrics(&self) -> Option<&GuardMetrics> {
        self.shared.metrics.as_ref()
    }

    fn resolve(&self, config: Option<&ThrottleConfig>) -> ThrottleConfig {
        config.copied().unwrap_or(self.shared.default_config)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply an unblock whose deadline has passed, or arm the timer for a
    /// restored block once its window length is known.
    fn reconcile(
        &self,
        state: &mut State,
        action_id: &str,
        config: Option<&ThrottleConfig>,
        now: i64,
    ) {
        let Some(entry) = state.store.get_mut(action_id) else {
            return;
        };
        if !entry.record.blocked {
            return;
        }

        let deadline = match (entry.unblock_at, config) {
            (Some(at), _) => at,
            (None, Some(c)) => entry
                .record
                .window_started_at
                .saturating_add(span_ms(c.time_window_ms)),
            (None, None) => return,
        };

        if now >= deadline {
            entry.cancel_timer();
            entry.unblock_at = None;
            entry.record.unblock(deadline);
            let persist = entry.persist;
            if persist {
                state.store.persist();
            }
            info!(action_id, "Throttle block lifted");
        } else if entry.unblock_at.is_none() {
            self.arm_unblock(&mut state.next_generation, action_id, entry, deadline, now);
        }
    }

    /// Record the block deadline and schedule the deferred unblock.
    ///
    /// Without an ambient tokio runtime no timer is spawned; the deadline is
    /// then applied by [`Self::reconcile`] on the next read.
    fn arm_unblock(
        &self,
        next_generation: &mut u64,
        action_id: &str,
        entry: &mut Entry,
        unblock_at: i64,
        now: i64,
    ) {
        entry.cancel_timer();
        *next_generation += 1;
        let generation = *next_generation;
        entry.generation = generation;
        entry.unblock_at = Some(unblock_at);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(action_id, "No async runtime, unblock applied on next use");
            return;
        };

        let delay = millis(unblock_at.saturating_sub(now));
        let weak = Arc::downgrade(&self.shared);
        let id = action_id.to_string();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                ThrottleEngine { shared }.fire_unblock(&id, generation);
            }
        });

        entry.timer = Some(task.abort_handle());
    }

    fn fire_unblock(&self, action_id: &str, generation: u64) {
        let now = self.shared.clock.now_ms();
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(entry) = state.store.get_mut(action_id) else {
            return;
        };
        if !entry.record.blocked || entry.generation != generation {
            debug!(action_id, generation, "Ignoring stale unblock timer");
            return;
        }

        entry.timer = None;
        entry.unblock_at = None;
        entry.record.unblock(now);
        let persist = entry.persist;
        if persist {
            state.store.persist();
        }
        info!(action_id, "Throttle block lifted");
    }
}

impl std::fmt::Debug for ThrottleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleEngine")
            .field("clock", &self.shared.clock)
            .field("default_config", &self.shared.default_config)
            .finish_non_exhaustive()
    }
}
