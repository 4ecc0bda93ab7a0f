// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for throttling and session expiry.
//!
//! Configuration is loaded from defaults, optionally overlaid with
//! environment variables:
//!
//! - `SESSION_TIMEOUT_MS`: sliding session duration (default: 1800000)
//! - `SESSION_WARNING_LEAD_MS`: warning lead before expiry (default: 300000)
//! - `UI_POLL_INTERVAL_MS`: countdown refresh period (default: 1000)
//! - `THROTTLE_STORAGE_KEY`: persisted throttle blob key (default: throttle_state)
//! - `SESSION_STORAGE_KEY`: persisted expiry key (default: session_expires_at)
//! - `GUARD_STORAGE_DIR`: directory for file-backed storage (default: unset)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GuardError, Result};

/// Longest delay, window, timeout or poll interval accepted by `validate` (one year).
pub const MAX_SPAN_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Per-class throttle parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Minimum milliseconds between two allowed attempts
    pub delay_ms: u64,

    /// Attempts permitted inside one window before blocking
    pub max_attempts: u32,

    /// Window length in milliseconds
    pub time_window_ms: u64,

    /// Whether records of this class are mirrored to storage
    pub persist: bool,
}

impl ThrottleConfig {
    /// Strict class: authentication forms.
    pub const STRICT: Self = Self {
        delay_ms: 2_000,
        max_attempts: 5,
        time_window_ms: 300_000,
        persist: true,
    };

    /// Default class: regular forms.
    pub const DEFAULT: Self = Self {
        delay_ms: 1_000,
        max_attempts: 10,
        time_window_ms: 60_000,
        persist: false,
    };

    /// Strictest class: critical operations.
    pub const STRICTEST: Self = Self {
        delay_ms: 5_000,
        max_attempts: 3,
        time_window_ms: 900_000,
        persist: true,
    };

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn time_window(&self) -> Duration {
        Duration::from_millis(self.time_window_ms)
    }

    /// Apply a partial override on top of this config.
    pub fn with_override(self, o: &ThrottleOverride) -> Self {
        Self {
            delay_ms: o.delay_ms.unwrap_or(self.delay_ms),
            max_attempts: o.max_attempts.unwrap_or(self.max_attempts),
            time_window_ms: o.time_window_ms.unwrap_or(self.time_window_ms),
            persist: o.persist.unwrap_or(self.persist),
        }
    }

    /// Reject configs the engine cannot reason about.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(GuardError::Config("max_attempts must be positive".into()));
        }
        if self.time_window_ms == 0 {
            return Err(GuardError::Config("time_window_ms must be positive".into()));
        }
        if self.time_window_ms > MAX_SPAN_MS || self.delay_ms > MAX_SPAN_MS {
            return Err(GuardError::Config(format!(
                "delay_ms and time_window_ms must not exceed {MAX_SPAN_MS}"
            )));
        }
        Ok(())
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Partial config: unset fields fall back to the class defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleOverride {
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub time_window_ms: Option<u64>,
    #[serde(default)]
    pub persist: Option<bool>,
}

/// Predefined action classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleClass {
    /// Authentication forms
    Strict,
    /// Regular forms
    Default,
    /// Critical actions
    Strictest,
}

impl std::fmt::Display for ThrottleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Default => write!(f, "default"),
            Self::Strictest => write!(f, "strictest"),
        }
    }
}

/// Class table, overridable as a whole from config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleClasses {
    #[serde(default = "default_strict")]
    pub strict: ThrottleConfig,

    #[serde(default = "default_default")]
    pub default: ThrottleConfig,

    #[serde(default = "default_strictest")]
    pub strictest: ThrottleConfig,
}

impl ThrottleClasses {
    /// Look up the parameters for a class.
    pub fn get(&self, class: ThrottleClass) -> ThrottleConfig {
        match class {
            ThrottleClass::Strict => self.strict,
            ThrottleClass::Default => self.default,
            ThrottleClass::Strictest => self.strictest,
        }
    }
}

/// Session expiry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sliding session duration in milliseconds (default: 30 minutes)
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// How long before expiry the warning is raised (default: 5 minutes)
    #[serde(default = "default_warning_lead_ms")]
    pub warning_lead_ms: u64,

    /// Countdown refresh period for UI pollers (default: 1 second)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl SessionConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn warning_lead(&self) -> Duration {
        Duration::from_millis(self.warning_lead_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Storage key layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Key holding the persisted throttle blob
    #[serde(default = "default_throttle_key")]
    pub throttle_key: String,

    /// Key holding the persisted session expiry
    #[serde(default = "default_session_key")]
    pub session_key: String,

    /// Directory for file-backed storage; `None` keeps state in memory
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Endpoints whose successful completion extends the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewalConfig {
    /// Path prefixes considered session-renewing (default: /api/)
    #[serde(default = "default_renew_prefixes")]
    pub include: Vec<String>,

    /// Path prefixes excluded even if included (login/refresh renew implicitly)
    #[serde(default = "default_renew_excludes")]
    pub exclude: Vec<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub throttle: ThrottleClasses,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub renewal: RenewalConfig,
}

// Default value functions
fn default_strict() -> ThrottleConfig {
    ThrottleConfig::STRICT
}

fn default_default() -> ThrottleConfig {
    ThrottleConfig::DEFAULT
}

fn default_strictest() -> ThrottleConfig {
    ThrottleConfig::STRICTEST
}

fn default_session_timeout_ms() -> u64 {
    30 * 60 * 1000
}

fn default_warning_lead_ms() -> u64 {
    5 * 60 * 1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_throttle_key() -> String {
    "throttle_state".to_string()
}

fn default_session_key() -> String {
    "session_expires_at".to_string()
}

fn default_renew_prefixes() -> Vec<String> {
    vec!["/api/".to_string()]
}

fn default_renew_excludes() -> Vec<String> {
    vec![
        "/api/auth/login".to_string(),
        "/api/auth/refresh".to_string(),
    ]
}

impl Default for ThrottleClasses {
    fn default() -> Self {
        Self {
            strict: default_strict(),
            default: default_default(),
            strictest: default_strictest(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: default_session_timeout_ms(),
            warning_lead_ms: default_warning_lead_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            throttle_key: default_throttle_key(),
            session_key: default_session_key(),
            dir: None,
        }
    }
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            include: default_renew_prefixes(),
            exclude: default_renew_excludes(),
        }
    }
}

impl GuardConfig {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("SESSION_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.session.session_timeout_ms = v;
        }
        if let Some(v) = lookup("SESSION_WARNING_LEAD_MS").and_then(|v| v.parse().ok()) {
            config.session.warning_lead_ms = v;
        }
        if let Some(v) = lookup("UI_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            config.session.poll_interval_ms = v;
        }
        if let Some(v) = lookup("THROTTLE_STORAGE_KEY") {
            config.storage.throttle_key = v;
        }
        if let Some(v) = lookup("SESSION_STORAGE_KEY") {
            config.storage.session_key = v;
        }
        if let Some(v) = lookup("GUARD_STORAGE_DIR") {
            config.storage.dir = Some(PathBuf::from(v));
        }

        config
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        for class in [
            ThrottleClass::Strict,
            ThrottleClass::Default,
            ThrottleClass::Strictest,
        ] {
            self.throttle
                .get(class)
                .validate()
                .map_err(|e| GuardError::Config(format!("{class} class: {e}")))?;
        }

        if self.session.session_timeout_ms == 0 {
            return Err(GuardError::Config(
                "session_timeout_ms must be positive".into(),
            ));
        }
        if self.session.warning_lead_ms >= self.session.session_timeout_ms {
            return Err(GuardError::Config(
                "warning_lead_ms must be shorter than session_timeout_ms".into(),
            ));
        }
        if self.session.poll_interval_ms == 0 {
            return Err(GuardError::Config("poll_interval_ms must be positive".into()));
        }
        if self.session.session_timeout_ms > MAX_SPAN_MS
            || self.session.poll_interval_ms > MAX_SPAN_MS
        {
            return Err(GuardError::Config(format!(
                "session_timeout_ms and poll_interval_ms must not exceed {MAX_SPAN_MS}"
            )));
        }
        if self.storage.throttle_key.is_empty() || self.storage.session_key.is_empty() {
            return Err(GuardError::Config("storage keys must not be empty".into()));
        }
        if self.storage.throttle_key == self.storage.session_key {
            return Err(GuardError::Config(
                "throttle and session storage keys must differ".into(),
            ));
        }

        Ok(())
    }
}
