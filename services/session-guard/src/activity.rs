// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Activity adapter.
//!
//! Translates outbound request outcomes into coordinator and engine calls:
//!
//! | Outcome                              | Effect                         |
//! |--------------------------------------|--------------------------------|
//! | 2xx on a session-renewing endpoint   | `SessionExpiry::reset_timer`   |
//! | 401                                  | `SessionExpiry::remove_expires_at` |
//! | 429 for a logical action             | `ThrottleEngine::record_action`|
//! | login / logout succeeded             | start / clear the countdown    |
//!
//! [`ActivityLayer`] applies the same mapping to any `tower` HTTP client
//! service.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use http::{Request, Response, StatusCode};
use tower::{Layer, Service};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{GuardConfig, RenewalConfig, ThrottleConfig};
use crate::session::SessionExpiry;
use crate::throttle::{ActionId, ThrottleEngine};

/// Which endpoints extend the session when they succeed.
#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self::from_config(&RenewalConfig::default())
    }
}

impl RenewalPolicy {
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            exclude: exclude.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &RenewalConfig) -> Self {
        Self::new(config.include.iter().cloned(), config.exclude.iter().cloned())
    }

    /// Path component of an endpoint, without query or fragment.
    ///
    /// Absolute URLs are parsed; anything else is treated as a path.
    pub fn path_of(endpoint: &str) -> String {
        match Url::parse(endpoint) {
            Ok(url) => url.path().to_string(),
            Err(_) => {
                let end = endpoint.find(['?', '#']).unwrap_or(endpoint.len());
                endpoint[..end].to_string()
            }
        }
    }

    /// Whether a successful call to `endpoint` renews the session.
    pub fn renews(&self, endpoint: &str) -> bool {
        let path = Self::path_of(endpoint);
        self.include.iter().any(|p| path.starts_with(p.as_str()))
            && !self.exclude.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// Logical action a request belongs to, attached as a request extension so
/// a 429 can be charged to the right throttle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalAction(String);

impl LogicalAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Request-outcome signals wired to one coordinator and one engine.
#[derive(Clone)]
pub struct ActivitySignals {
    session: SessionExpiry,
    engine: ThrottleEngine,
    policy: Arc<RenewalPolicy>,
    actions: Arc<RwLock<HashMap<String, ThrottleConfig>>>,
}

impl ActivitySignals {
    pub fn new(session: SessionExpiry, engine: ThrottleEngine, policy: RenewalPolicy) -> Self {
        Self {
            session,
            engine,
            policy: Arc::new(policy),
            actions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn from_config(
        session: SessionExpiry,
        engine: ThrottleEngine,
        config: &GuardConfig,
    ) -> Self {
        Self::new(session, engine, RenewalPolicy::from_config(&config.renewal))
    }

    /// Parameters used when the server rate-limits `logical_action`.
    ///
    /// Unregistered actions fall back to the engine's default class.
    pub fn register_action(&self, logical_action: impl Into<String>, config: ThrottleConfig) {
        self.actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(logical_action.into(), config);
    }

    /// A call to `endpoint` succeeded. Returns `true` if the session was
    /// renewed.
    pub fn on_request_succeeded(&self, endpoint: &str) -> bool {
        if !self.session.is_authenticated() {
            return false;
        }
        if !self.policy.renews(endpoint) {
            debug!(endpoint, "Endpoint does not renew the session");
            return false;
        }
        self.session.reset_timer();
        true
    }

    /// The server rejected our credentials.
    pub fn on_auth_rejected(&self) {
        info!("Authentication rejected, clearing session countdown");
        self.session.remove_expires_at();
    }

    /// The server answered 429 for `logical_action`.
    pub fn on_rate_limited(&self, logical_action: &str) {
        let action_id = ActionId::submit(logical_action);
        if action_id.is_empty() {
            warn!("Rate limited response without a logical action");
            return;
        }

        let config = self
            .actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(logical_action)
            .copied()
            .unwrap_or_else(|| self.engine.default_config());
        self.engine.record_action(action_id.as_str(), &config);
    }

    pub fn on_login_succeeded(&self) {
        self.session.on_login_succeeded();
    }

    pub fn on_logout_succeeded(&self) {
        self.session.on_logout_succeeded();
    }

    /// Dispatch a response status to the matching signal.
    pub fn on_response(&self, endpoint: &str, status: StatusCode, logical_action: Option<&str>) {
        match status {
            s if s.is_success() => {
                self.on_request_succeeded(endpoint);
            }
            StatusCode::UNAUTHORIZED => self.on_auth_rejected(),
            StatusCode::TOO_MANY_REQUESTS => match logical_action {
                Some(action) => self.on_rate_limited(action),
                None => debug!(endpoint, "429 without logical action, not throttled"),
            },
            _ => {}
        }
    }

    /// `tower` layer feeding responses into these signals.
    pub fn layer(&self) -> ActivityLayer {
        ActivityLayer::new(self.clone())
    }

    pub fn session(&self) -> &SessionExpiry {
        &self.session
    }

    pub fn engine(&self) -> &ThrottleEngine {
        &self.engine
    }
}

impl std::fmt::Debug for ActivitySignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivitySignals")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Wraps an HTTP client service with [`ActivitySignals`].
#[derive(Debug, Clone)]
pub struct ActivityLayer {
    signals: ActivitySignals,
}

impl ActivityLayer {
    pub fn new(signals: ActivitySignals) -> Self {
        Self { signals }
    }
}

impl<S> Layer<S> for ActivityLayer {
    type Service = ActivityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ActivityService {
            inner,
            signals: self.signals.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActivityService<S> {
    inner: S,
    signals: ActivitySignals,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ActivityService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let path = request.uri().path().to_string();
        let logical_action = request.extensions().get::<LogicalAction>().cloned();
        let signals = self.signals.clone();
        let response = self.inner.call(request);

        Box::pin(async move {
            let response = response.await?;
            signals.on_response(
                &path,
                response.status(),
                logical_action.as_ref().map(LogicalAction::as_str),
            );
            Ok(response)
        })
    }
}
