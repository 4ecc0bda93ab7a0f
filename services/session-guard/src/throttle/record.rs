// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-action throttle record.

use serde::{Deserialize, Serialize};

/// Mutable counters for one action identifier.
///
/// Field names follow the persisted storage layout
/// (`lastAttemptAt`, `attemptCount`, `windowStartedAt`, `blocked`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleRecord {
    /// Epoch ms of the most recently allowed attempt
    pub last_attempt_at: i64,

    /// Attempts consumed in the current window
    pub attempt_count: u32,

    /// Epoch ms the current window began
    pub window_started_at: i64,

    /// Set once the window's attempts are exhausted or the server pushed back
    pub blocked: bool,
}

impl ThrottleRecord {
    /// Record for the first-ever allowed attempt.
    pub fn first_attempt(now: i64) -> Self {
        Self {
            last_attempt_at: now,
            attempt_count: 1,
            window_started_at: now,
            blocked: false,
        }
    }

    /// Window age in milliseconds.
    pub fn window_age(&self, now: i64) -> i64 {
        now.saturating_sub(self.window_started_at)
    }

    /// Block and restart the window at `now`, so a reload derives the same
    /// deadline (`windowStartedAt + time_window`) as the running engine.
    pub(crate) fn block(&mut self, now: i64) {
        self.blocked = true;
        self.window_started_at = now;
    }

    /// Start a fresh window.
    pub(crate) fn roll_window(&mut self, now: i64) {
        self.attempt_count = 0;
        self.window_started_at = now;
    }

    /// Clear a block and start a fresh window at `at`.
    pub(crate) fn unblock(&mut self, at: i64) {
        self.blocked = false;
        self.roll_window(at);
    }
}
