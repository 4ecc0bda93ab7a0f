// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Integration tests wiring the throttle engine, session coordinator and
//! activity adapter together.

mod harness;

use std::sync::Arc;
use std::time::Duration;

use session_guard::config::{SessionConfig, ThrottleClass};
use session_guard::session::SessionPhase;
use session_guard::storage;
use session_guard::{
    ActivitySignals, AuthFlag, Clock, Denial, FormThrottle, GuardConfig, GuardMetrics,
    ManualClock, MemoryStorage, SessionEvent, SessionExpiry, Storage, ThrottleConfig,
    ThrottleEngine,
};

const T0: i64 = 1_700_000_000_000;

struct App {
    engine: ThrottleEngine,
    session: SessionExpiry,
    signals: ActivitySignals,
    login: FormThrottle,
    clock: ManualClock,
    auth: AuthFlag,
    metrics: GuardMetrics,
}

fn build_app(
    storage: Arc<dyn Storage>,
    clock: ManualClock,
    config: &GuardConfig,
) -> anyhow::Result<App> {
    harness::init_tracing();

    let metrics = GuardMetrics::new()?;
    let auth = AuthFlag::new(false);
    let engine = ThrottleEngine::from_config(
        storage.clone(),
        Arc::new(clock.clone()),
        config,
        Some(metrics.clone()),
    );
    let session = SessionExpiry::from_config(
        storage,
        Arc::new(clock.clone()),
        Arc::new(auth.clone()),
        config,
        Some(metrics.clone()),
    );
    let signals = ActivitySignals::from_config(session.clone(), engine.clone(), config);
    let login = FormThrottle::for_class(
        engine.clone(),
        "login",
        &config.throttle,
        ThrottleClass::Strict,
    );
    signals.register_action("login", *login.config());

    Ok(App {
        engine,
        session,
        signals,
        login,
        clock,
        auth,
        metrics,
    })
}

#[tokio::test]
async fn test_login_flow() -> anyhow::Result<()> {
    let app = build_app(
        Arc::new(MemoryStorage::new()),
        ManualClock::new(T0),
        &GuardConfig::default(),
    )?;

    // Wrong password, then an immediate retry
    let first = app.login.handle_throttled_submit(|| async { false }).await;
    assert_eq!(first, Ok(false));
    let retry = app.login.handle_throttled_submit(|| async { false }).await;
    assert!(matches!(retry, Err(Denial::Cooldown { .. })));

    // Correct password after the cooldown
    app.clock.advance(Duration::from_secs(2));
    let ok = app.login.handle_throttled_submit(|| async { true }).await;
    assert_eq!(ok, Ok(true));
    app.auth.set(true);
    app.login.reset_throttle();
    app.signals.on_login_succeeded();

    let state = app.session.state();
    assert_eq!(state.expires_at, app.clock.now_ms() + 30 * 60 * 1000);
    assert_eq!(state.phase(), SessionPhase::Counting);
    assert!(app.login.status().can_submit);

    // Regular activity slides the expiry
    app.clock.advance(Duration::from_secs(600));
    assert!(app.signals.on_request_succeeded("/api/feed?page=3"));
    assert_eq!(
        app.session.state().expires_at,
        app.clock.now_ms() + 30 * 60 * 1000
    );

    app.signals.on_logout_succeeded();
    app.auth.set(false);
    assert_eq!(app.session.state().phase(), SessionPhase::Idle);

    let exposition = app.metrics.encode()?;
    assert!(exposition.contains("session_renewals_total 2"));
    assert!(exposition.contains("throttle_decisions_total"));
    Ok(())
}

#[test]
fn test_file_storage_survives_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let clock = ManualClock::new(T0);
    let mut config = GuardConfig::default();
    config.storage.dir = Some(dir.path().to_path_buf());

    {
        let app = build_app(storage::open(&config.storage)?, clock.clone(), &config)?;
        app.login.activate_throttle();

        app.auth.set(true);
        app.session.reset_timer();
        assert!(!app.login.status().can_submit);
    }

    clock.advance(Duration::from_secs(30));
    let app = build_app(storage::open(&config.storage)?, clock.clone(), &config)?;

    let record = app
        .engine
        .get_throttle_state("login-submit")
        .expect("blocked login restored");
    assert!(record.blocked);
    assert_eq!(
        app.login.status().time_until_next_submission,
        Duration::from_secs(270)
    );
    assert_eq!(app.session.state().expires_at, T0 + 30 * 60 * 1000);
    Ok(())
}

#[test]
fn test_non_persisted_class_not_written() -> anyhow::Result<()> {
    let storage = MemoryStorage::new();
    let app = build_app(
        Arc::new(storage.clone()),
        ManualClock::new(T0),
        &GuardConfig::default(),
    )?;

    let search = FormThrottle::new(app.engine.clone(), "search", ThrottleConfig::DEFAULT);
    assert!(search.can_perform_action());
    assert_eq!(storage.get("throttle_state")?, None);

    assert!(app.login.can_perform_action());
    let raw = storage.get("throttle_state")?.unwrap_or_default();
    let blob: serde_json::Value = serde_json::from_str(&raw)?;
    assert!(blob.get("login-submit").is_some());
    assert!(blob.get("search-submit").is_none());
    Ok(())
}

#[test]
fn test_partial_config_uses_defaults() -> anyhow::Result<()> {
    let config: GuardConfig = serde_json::from_str(
        r#"{
            "session": { "session_timeout_ms": 600000 },
            "throttle": { "strict": { "delay_ms": 500, "max_attempts": 3, "time_window_ms": 60000, "persist": true } }
        }"#,
    )?;
    config.validate()?;

    assert_eq!(config.session.session_timeout(), Duration::from_secs(600));
    assert_eq!(config.session.warning_lead_ms, SessionConfig::default().warning_lead_ms);
    assert_eq!(config.throttle.strict.max_attempts, 3);
    assert_eq!(config.throttle.default, ThrottleConfig::DEFAULT);
    assert_eq!(config.storage.throttle_key, "throttle_state");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_expires() -> anyhow::Result<()> {
    let app = build_app(
        Arc::new(MemoryStorage::new()),
        ManualClock::new(T0),
        &GuardConfig::default(),
    )?;
    app.auth.set(true);

    let mut events = app.session.subscribe();
    app.signals.on_login_succeeded();
    assert!(matches!(events.recv().await?, SessionEvent::Renewed { .. }));

    app.clock.advance(Duration::from_secs(25 * 60));
    assert!(matches!(events.recv().await?, SessionEvent::WarningRaised { .. }));
    assert!(app.session.countdown().is_warning_active);

    app.clock.advance(Duration::from_secs(5 * 60));
    assert!(matches!(events.recv().await?, SessionEvent::Expired { .. }));
    assert_eq!(app.session.countdown().until_expiry, Duration::ZERO);
    assert_eq!(app.metrics.session_warnings(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_countdown_poller() -> anyhow::Result<()> {
    let app = build_app(
        Arc::new(MemoryStorage::new()),
        ManualClock::new(T0),
        &GuardConfig::default(),
    )?;
    app.auth.set(true);
    app.session.reset_timer();

    let mut poller = app.session.watch_countdown();
    assert_eq!(poller.latest().until_expiry, Duration::from_secs(30 * 60));

    app.clock.advance(Duration::from_secs(1));
    assert!(poller.changed().await);
    assert_eq!(poller.latest().until_expiry, Duration::from_secs(30 * 60 - 1));
    Ok(())
}
