// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Sliding session expiry.
//!
//! Tracks one absolute expiry timestamp and a "warning shown" flag:
//!
//! ```text
//!   Idle ──reset/set──▶ Counting ──lead time reached──▶ Warning
//!    ▲                     │  ▲                            │
//!    │                     │  └──────reset (activity)──────┤
//!    └──────────clear / logout / 401───────────────────────┘
//! ```
//!
//! Storage writes only happen while the injected [`AuthState`] reports an
//! authenticated user; clearing storage is always allowed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::clock::{millis, span_ms, Clock};
use crate::config::{GuardConfig, SessionConfig};
use crate::facade::Poller;
use crate::metrics::GuardMetrics;
use crate::storage::Storage;

/// Storage key used when none is configured.
pub const DEFAULT_SESSION_KEY: &str = "session_expires_at";

const EVENT_CAPACITY: usize = 16;

/// "Is the user authenticated?" query, asked on every storage side effect.
pub trait AuthState: Send + Sync {
    fn is_authenticated(&self) -> bool;
}

impl<F> AuthState for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_authenticated(&self) -> bool {
        self()
    }
}

/// Shared authentication flag. Clones observe the same value.
#[derive(Debug, Clone, Default)]
pub struct AuthFlag(Arc<AtomicBool>);

impl AuthFlag {
    pub fn new(authenticated: bool) -> Self {
        Self(Arc::new(AtomicBool::new(authenticated)))
    }

    pub fn set(&self, authenticated: bool) {
        self.0.store(authenticated, Ordering::SeqCst);
    }
}

impl AuthState for AuthFlag {
    fn is_authenticated(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Snapshot of the coordinator state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionExpiryState {
    /// Epoch ms the session expires; `0` means no tracked session
    pub expires_at: i64,
    pub warning_shown: bool,
}

/// Coarse lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Counting,
    Warning,
}

impl SessionExpiryState {
    pub fn phase(&self) -> SessionPhase {
        match (self.expires_at, self.warning_shown) {
            (0, _) => SessionPhase::Idle,
            (_, false) => SessionPhase::Counting,
            (_, true) => SessionPhase::Warning,
        }
    }
}

/// What a session-expiry modal renders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCountdown {
    pub is_warning_active: bool,
    pub until_expiry: Duration,
}

impl SessionCountdown {
    pub fn milliseconds_until_expiry(&self) -> u64 {
        u64::try_from(self.until_expiry.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Notifications published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Countdown started or extended
    Renewed { expires_at: i64 },
    /// Remaining time crossed the warning lead; sent once per countdown
    WarningRaised { expires_at: i64 },
    /// Expiry passed without renewal; the UI should run its logout flow
    Expired { expires_at: i64 },
    /// Tracking stopped (logout, 401, explicit clear)
    Cleared,
}

struct Inner {
    state: SessionExpiryState,
    expired_notified: bool,
    generation: u64,
    timer: Option<AbortHandle>,
}

impl Inner {
    fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    auth: Arc<dyn AuthState>,
    storage: Arc<dyn Storage>,
    key: String,
    config: SessionConfig,
    events: broadcast::Sender<SessionEvent>,
    metrics: Option<GuardMetrics>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.inner
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_timer();
    }
}

/// Session expiry coordinator. Clones share state.
#[derive(Clone)]
pub struct SessionExpiry {
    shared: Arc<Shared>,
}

impl SessionExpiry {
    /// Coordinator with the default storage key.
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        auth: Arc<dyn AuthState>,
        config: SessionConfig,
    ) -> Self {
        Self::build(storage, clock, auth, config, DEFAULT_SESSION_KEY.to_string(), None)
    }

    /// Coordinator configured from [`GuardConfig`].
    pub fn from_config(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        auth: Arc<dyn AuthState>,
        config: &GuardConfig,
        metrics: Option<GuardMetrics>,
    ) -> Self {
        Self::build(
            storage,
            clock,
            auth,
            config.session.clone(),
            config.storage.session_key.clone(),
            metrics,
        )
    }

    fn build(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        auth: Arc<dyn AuthState>,
        config: SessionConfig,
        key: String,
        metrics: Option<GuardMetrics>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let session = Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionExpiryState::default(),
                    expired_notified: false,
                    generation: 0,
                    timer: None,
                }),
                clock,
                auth,
                storage,
                key,
                config,
                events,
                metrics,
            }),
        };
        session.restore();
        session
    }

    /// Adopt a persisted expiry that is still in the future.
    fn restore(&self) {
        let shared = &self.shared;
        let raw = match shared.storage.get(&shared.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(key = %shared.key, error = %e, "Failed to read persisted session expiry");
                return;
            }
        };

        let now = shared.clock.now_ms();
        match raw.trim().parse::<i64>() {
            Ok(expires_at) if expires_at > now => {
                let mut inner = self.lock();
                inner.state.expires_at = expires_at;
                self.arm(&mut inner, now);
                info!(expires_at, "Restored persisted session expiry");
            }
            _ => {
                debug!(key = %shared.key, "Dropping stale or unreadable session expiry");
                self.remove_persisted();
            }
        }
    }

    /// Start (or restart) the countdown: `expires_at = now + session timeout`.
    pub fn reset_timer(&self) {
        let now = self.shared.clock.now_ms();
        let expires_at = now.saturating_add(span_ms(self.shared.config.session_timeout_ms));
        self.apply_expiry(expires_at, now);
    }

    /// Track an explicit absolute expiry, e.g. from a token TTL.
    ///
    /// Non-positive timestamps are ignored.
    pub fn set_expires_at(&self, expires_at: i64) {
        if expires_at <= 0 {
            debug!(expires_at, "Ignoring non-positive session expiry");
            return;
        }
        let now = self.shared.clock.now_ms();
        self.apply_expiry(expires_at, now);
    }

    fn apply_expiry(&self, expires_at: i64, now: i64) {
        {
            let mut inner = self.lock();
            inner.state = SessionExpiryState {
                expires_at,
                warning_shown: false,
            };
            inner.expired_notified = false;
            self.arm(&mut inner, now);
        }

        if self.shared.auth.is_authenticated() {
            if let Err(e) = self
                .shared
                .storage
                .set(&self.shared.key, &expires_at.to_string())
            {
                warn!(key = %self.shared.key, error = %e, "Failed to persist session expiry");
            }
        } else {
            debug!("Not authenticated, session expiry kept in memory only");
        }

        if let Some(metrics) = &self.shared.metrics {
            metrics.record_renewal();
        }
        debug!(expires_at, "Session countdown renewed");
        let _ = self.shared.events.send(SessionEvent::Renewed { expires_at });
    }

    /// Raise the warning if the lead time has been reached.
    ///
    /// Idempotent: returns `true` only on the call that raised it.
    pub fn check_warning(&self) -> bool {
        let now = self.shared.clock.now_ms();
        let mut inner = self.lock();
        let threshold = inner
            .state
            .expires_at
            .saturating_sub(span_ms(self.shared.config.warning_lead_ms));
        if inner.state.expires_at == 0 || now < threshold {
            return false;
        }
        self.raise_warning(&mut inner, now)
    }

    fn raise_warning(&self, inner: &mut Inner, now: i64) -> bool {
        let state = &mut inner.state;
        if state.warning_shown || state.expires_at <= now {
            return false;
        }
        state.warning_shown = true;
        let expires_at = state.expires_at;

        if let Some(metrics) = &self.shared.metrics {
            metrics.record_warning();
        }
        info!(
            expires_at,
            remaining_ms = expires_at.saturating_sub(now),
            "Session expiry warning raised"
        );
        let _ = self.shared.events.send(SessionEvent::WarningRaised { expires_at });
        true
    }

    fn notify_expired(&self, inner: &mut Inner, now: i64) {
        let expires_at = inner.state.expires_at;
        if expires_at == 0 || now < expires_at || inner.expired_notified {
            return;
        }
        inner.expired_notified = true;
        info!(expires_at, "Session expired");
        let _ = self.shared.events.send(SessionEvent::Expired { expires_at });
    }

    /// Stop tracking and clear storage. Independent of authentication.
    pub fn remove_expires_at(&self) {
        {
            let mut inner = self.lock();
            inner.cancel_timer();
            inner.generation += 1;
            inner.state = SessionExpiryState::default();
            inner.expired_notified = false;
        }
        self.remove_persisted();
        debug!("Session expiry cleared");
        let _ = self.shared.events.send(SessionEvent::Cleared);
    }

    fn remove_persisted(&self) {
        if let Err(e) = self.shared.storage.remove(&self.shared.key) {
            warn!(key = %self.shared.key, error = %e, "Failed to remove session expiry");
        }
    }

    pub fn on_login_succeeded(&self) {
        info!("Login succeeded, starting session countdown");
        self.reset_timer();
    }

    pub fn on_logout_succeeded(&self) {
        info!("Logout succeeded, clearing session countdown");
        self.remove_expires_at();
    }

    /// Current state.
    pub fn state(&self) -> SessionExpiryState {
        self.lock().state
    }

    /// Countdown for rendering, applying any transition whose time has come.
    pub fn countdown(&self) -> SessionCountdown {
        let now = self.shared.clock.now_ms();
        let mut inner = self.lock();
        let state = inner.state;
        if state.expires_at == 0 {
            return SessionCountdown::default();
        }

        if now >= state.expires_at.saturating_sub(span_ms(self.shared.config.warning_lead_ms)) {
            self.raise_warning(&mut inner, now);
        }
        self.notify_expired(&mut inner, now);

        SessionCountdown {
            is_warning_active: inner.state.warning_shown,
            until_expiry: millis(inner.state.expires_at.saturating_sub(now)),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Refresh a countdown value every poll interval until dropped.
    pub fn watch_countdown(&self) -> Poller<SessionCountdown> {
        let session = self.clone();
        Poller::spawn(self.shared.config.poll_interval(), move || session.countdown())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.auth.is_authenticated()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule the warning check and the expiry notice for the current
    /// countdown, superseding any earlier schedule.
    fn arm(&self, inner: &mut Inner, now: i64) {
        inner.cancel_timer();
        inner.generation += 1;
        let generation = inner.generation;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, session checks applied on next countdown read");
            return;
        };

        let expires_at = inner.state.expires_at;
        let warn_at = expires_at.saturating_sub(span_ms(self.shared.config.warning_lead_ms));
        let warn_delay = millis(warn_at.saturating_sub(now));
        let expire_delay = millis(expires_at.saturating_sub(now.max(warn_at)));
        let weak = Arc::downgrade(&self.shared);

        let task = runtime.spawn(async move {
            tokio::time::sleep(warn_delay).await;
            match weak.upgrade() {
                Some(shared) => SessionExpiry { shared }.fire(generation, false),
                None => return,
            }

            tokio::time::sleep(expire_delay).await;
            if let Some(shared) = weak.upgrade() {
                SessionExpiry { shared }.fire(generation, true);
            }
        });
        inner.timer = Some(task.abort_handle());
    }

    fn fire(&self, generation: u64, expiry: bool) {
        let now = self.shared.clock.now_ms();
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        if expiry {
            inner.timer = None;
            self.notify_expired(&mut inner, now);
        } else {
            self.raise_warning(&mut inner, now);
        }
    }
}

impl std::fmt::Debug for SessionExpiry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionExpiry")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}
