// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Form-level view over the throttle engine.
//!
//! A [`FormThrottle`] binds one action identifier to its class parameters
//! and turns engine answers into the values a form renders: whether the
//! submit button is enabled, how long to wait, and how many attempts remain.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{ThrottleClass, ThrottleClasses, ThrottleConfig, ThrottleOverride};
use crate::throttle::{ActionId, ThrottleDecision, ThrottleEngine};

/// Submit-button state for one form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleStatus {
    pub can_submit: bool,
    pub time_until_next_submission: Duration,
    pub remaining_attempts: u32,
}

/// Why a throttled submit did not run.
///
/// Returned as a value; the `Display` text is the user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Too soon after the previous attempt
    Cooldown { retry_after: Duration },
    /// Attempts exhausted or server pushed back
    Blocked { retry_after: Duration },
    /// The form has no usable action identifier; retrying will not help
    Invalid,
}

impl Denial {
    pub fn retry_after(&self) -> Duration {
        match self {
            Self::Cooldown { retry_after } | Self::Blocked { retry_after } => *retry_after,
            Self::Invalid => Duration::ZERO,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cooldown { retry_after } => write!(
                f,
                "Too many attempts, please wait {} before trying again",
                Rounded(*retry_after, 1_000, "second")
            ),
            Self::Blocked { retry_after } => write!(
                f,
                "Too many attempts, this action is blocked for {}",
                Rounded(*retry_after, 60_000, "minute")
            ),
            Self::Invalid => f.write_str("This form cannot be submitted"),
        }
    }
}

/// Duration rounded up to whole units (at least one), with the unit name
/// pluralised by count.
struct Rounded(Duration, u128, &'static str);

impl fmt::Display for Rounded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(duration, unit_ms, unit) = *self;
        let count = duration.as_millis().div_ceil(unit_ms).max(1);
        let suffix = if count == 1 { "" } else { "s" };
        write!(f, "{count} {unit}{suffix}")
    }
}

/// Throttle handle for one form.
#[derive(Debug, Clone)]
pub struct FormThrottle {
    engine: ThrottleEngine,
    form_name: String,
    action_id: ActionId,
    config: ThrottleConfig,
}

impl FormThrottle {
    /// Throttle the `submit` action of `form_name` with explicit parameters.
    pub fn new(
        engine: ThrottleEngine,
        form_name: impl Into<String>,
        config: ThrottleConfig,
    ) -> Self {
        let form_name = form_name.into();
        Self {
            engine,
            action_id: ActionId::submit(&form_name),
            form_name,
            config,
        }
    }

    /// Throttle `form_name` with the parameters of a predefined class.
    pub fn for_class(
        engine: ThrottleEngine,
        form_name: impl Into<String>,
        classes: &ThrottleClasses,
        class: ThrottleClass,
    ) -> Self {
        Self::new(engine, form_name, classes.get(class))
    }

    /// Throttle a different action type of the same form.
    pub fn with_action_type(mut self, action_type: &str) -> Self {
        self.action_id = ActionId::new(&self.form_name, action_type);
        self
    }

    /// Override individual class parameters.
    pub fn with_override(mut self, overrides: &ThrottleOverride) -> Self {
        self.config = self.config.with_override(overrides);
        self
    }

    pub fn action_id(&self) -> &ActionId {
        &self.action_id
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Check and count an attempt.
    pub fn can_perform_action(&self) -> bool {
        self.engine
            .can_perform_action(self.action_id.as_str(), Some(&self.config))
    }

    /// Current submit state, without counting an attempt.
    pub fn status(&self) -> ThrottleStatus {
        let id = self.action_id.as_str();
        let time_until_next_submission = self
            .engine
            .get_time_until_next_action(id, Some(&self.config));
        let remaining_attempts = self.engine.get_remaining_attempts(id, Some(&self.config));
        ThrottleStatus {
            can_submit: time_until_next_submission.is_zero() && remaining_attempts > 0,
            time_until_next_submission,
            remaining_attempts,
        }
    }

    /// Run `submit` if the throttle allows it.
    ///
    /// The attempt is counted before `submit` runs, whatever its outcome.
    pub async fn handle_throttled_submit<F, Fut, T>(&self, submit: F) -> Result<T, Denial>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let id = self.action_id.as_str();
        match self.engine.check(id, Some(&self.config)) {
            ThrottleDecision::Allowed => Ok(submit().await),
            ThrottleDecision::Cooldown => {
                let denial = Denial::Cooldown {
                    retry_after: self.engine.get_time_until_next_action(id, Some(&self.config)),
                };
                debug!(action_id = id, %denial, "Submit throttled");
                Err(denial)
            }
            ThrottleDecision::Blocked => {
                let denial = Denial::Blocked {
                    retry_after: self.engine.get_time_until_next_action(id, Some(&self.config)),
                };
                debug!(action_id = id, %denial, "Submit blocked");
                Err(denial)
            }
            ThrottleDecision::Invalid => {
                warn!(form = %self.form_name, "Submit rejected, form has no action identifier");
                Err(Denial::Invalid)
            }
        }
    }

    /// Forget this form's throttle state.
    pub fn reset_throttle(&self) {
        self.engine.clear_throttle_state(self.action_id.as_str());
    }

    /// Block this form as if the server had rejected it.
    pub fn activate_throttle(&self) {
        info!(action_id = %self.action_id, "Throttle activated");
        self.engine.record_action(self.action_id.as_str(), &self.config);
    }

    /// Refresh [`ThrottleStatus`] every `period` until the poller is dropped.
    pub fn watch(&self, period: Duration) -> Poller<ThrottleStatus> {
        let form = self.clone();
        Poller::spawn(period, move || form.status())
    }
}

/// Periodically sampled value.
///
/// Sampling runs on the ambient tokio runtime and stops when the poller is
/// dropped. Outside a runtime the poller holds its initial sample only.
#[derive(Debug)]
pub struct Poller<T> {
    rx: watch::Receiver<T>,
    task: Option<AbortHandle>,
}

impl<T> Poller<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Sample once now, then every `period`.
    pub fn spawn<F>(period: Duration, sample: F) -> Self
    where
        F: Fn() -> T + Send + 'static,
    {
        let (tx, rx) = watch::channel(sample());
        let period = period.max(Duration::from_millis(1));

        let task = tokio::runtime::Handle::try_current().ok().map(|runtime| {
            runtime
                .spawn(async move {
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        if tx.is_closed() {
                            break;
                        }
                        let value = sample();
                        tx.send_if_modified(|current| {
                            if *current == value {
                                return false;
                            }
                            *current = value;
                            true
                        });
                    }
                })
                .abort_handle()
        });

        Self { rx, task }
    }

    /// Most recent sample.
    pub fn latest(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait for the next distinct sample. `false` once sampling stopped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Independent receiver for the sampled value.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl<T> Drop for Poller<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
