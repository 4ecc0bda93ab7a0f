// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Attack patterns against throttled forms.

use std::time::Duration;

use session_guard::{ActionId, ThrottleConfig};

/// Attack pattern configuration.
#[derive(Debug, Clone)]
pub struct AttackConfig {
    /// Total number of submit attempts
    pub total_attempts: usize,
    /// Simulated time between two attempts
    pub interval: Duration,
    /// Number of distinct forms the attempts rotate across
    pub forms: usize,
    /// Server answers 429 after every n-th allowed attempt
    pub server_pushback_every: Option<usize>,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            total_attempts: 100,
            interval: Duration::from_millis(100),
            forms: 1,
            server_pushback_every: None,
        }
    }
}

/// Predefined attack patterns.
impl AttackConfig {
    /// Scripted password guessing as fast as the page allows.
    pub fn credential_stuffing() -> Self {
        Self {
            total_attempts: 200,
            interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    /// Guessing paced exactly at the strict cooldown.
    pub fn paced_guessing() -> Self {
        Self {
            total_attempts: 100,
            interval: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// Rotating across forms to spread attempts over several records.
    pub fn form_rotation() -> Self {
        Self {
            total_attempts: 300,
            interval: Duration::from_millis(100),
            forms: 5,
            ..Default::default()
        }
    }

    /// Server rate limiting every accepted attempt.
    pub fn server_pushback() -> Self {
        Self {
            total_attempts: 50,
            interval: Duration::from_secs(2),
            server_pushback_every: Some(1),
            ..Default::default()
        }
    }

    /// A human retrying once a minute; never meant to be blocked.
    pub fn patient_user() -> Self {
        Self {
            total_attempts: 20,
            interval: Duration::from_secs(61),
            ..Default::default()
        }
    }

    /// Simulated time between the first and the last attempt.
    pub fn span(&self) -> Duration {
        self.interval * self.total_attempts.saturating_sub(1) as u32
    }

    /// Action identifier hit by the `i`-th attempt.
    pub fn action_for(&self, i: usize) -> ActionId {
        ActionId::submit(&format!("login-{}", i % self.forms.max(1)))
    }

    /// Upper bound on allowed attempts: at most `max_attempts` per form in
    /// every window the attack spans.
    pub fn max_allowed(&self, config: &ThrottleConfig) -> usize {
        let windows = self.span().as_millis() as u64 / config.time_window_ms.max(1) + 1;
        self.forms.max(1) * config.max_attempts as usize * windows as usize
    }
}
