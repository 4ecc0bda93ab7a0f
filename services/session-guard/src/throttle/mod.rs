// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-action throttling.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               Throttle Engine                │
//! │   cooldown → window rollover → attempt cap   │
//! │          deferred unblock timers             │
//! ├──────────────────────────────────────────────┤
//! │  Throttle Store (in-memory, persist-flagged  │
//! │  records mirrored to one storage blob)       │
//! └──────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod engine;
pub mod record;
pub mod store;

pub use action::ActionId;
pub use engine::{ThrottleDecision, ThrottleEngine, DEFAULT_STORAGE_KEY};
pub use record::ThrottleRecord;
pub use store::{ThrottleStore, STALE_AFTER_MS};
