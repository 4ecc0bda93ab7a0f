// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test harness for brute-force simulation against throttled forms.
//!
//! Simulations run on a [`ManualClock`](session_guard::ManualClock), so every
//! outcome is deterministic and no test sleeps in real time.

#![allow(dead_code)]

pub mod attacks;
pub mod metrics;

use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test writer. Controlled by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
