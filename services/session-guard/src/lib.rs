// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Session Guard
//!
//! Client-side security controls for interactive front-ends:
//!
//! - Per-action throttling (cooldown between attempts, attempt cap per
//!   window, automatic unblock after the window)
//! - Three action classes: strict (auth forms), default, strictest
//!   (critical operations)
//! - Throttle state mirrored to key/value storage so blocks survive restarts
//! - Sliding session expiry with a warning threshold before forced logout
//! - Activity adapter (and `tower` layer) that renews the session on
//!   successful calls and force-blocks actions the server answered with 429
//!
//! Storage, clock and authentication status are injected, so a single
//! [`ThrottleEngine`] and [`SessionExpiry`] can be built at start-up and
//! handed to every consumer by cheap clone.

pub mod activity;
pub mod clock;
pub mod config;
pub mod error;
pub mod facade;
pub mod metrics;
pub mod session;
pub mod storage;
pub mod throttle;

pub use activity::{ActivityLayer, ActivitySignals, LogicalAction, RenewalPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GuardConfig, ThrottleClass, ThrottleConfig, ThrottleOverride, MAX_SPAN_MS};
pub use error::{GuardError, Result};
pub use facade::{Denial, FormThrottle, Poller, ThrottleStatus};
pub use metrics::GuardMetrics;
pub use session::{AuthFlag, AuthState, SessionCountdown, SessionEvent, SessionExpiry};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
pub use throttle::{ActionId, ThrottleEngine, ThrottleRecord};
