// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for throttle decisions and session lifecycle.
//!
//! Counters live in a registry owned by [`GuardMetrics`] rather than the
//! global default registry, so several engines (or tests) can run side by
//! side without name clashes.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::Result;

/// Registry-backed counters. Clones share the same counters.
#[derive(Debug, Clone)]
pub struct GuardMetrics {
    registry: Registry,
    decisions: IntCounterVec,
    blocks: IntCounterVec,
    session_renewals: IntCounter,
    session_warnings: IntCounter,
}

impl GuardMetrics {
    /// Create and register all counters.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let decisions = IntCounterVec::new(
            Opts::new(
                "throttle_decisions_total",
                "Throttle decisions by outcome (allowed, cooldown, blocked, invalid)",
            ),
            &["outcome"],
        )?;
        let blocks = IntCounterVec::new(
            Opts::new(
                "throttle_blocks_total",
                "Actions placed in the blocked state, by source (local, server)",
            ),
            &["source"],
        )?;
        let session_renewals = IntCounter::new(
            "session_renewals_total",
            "Session expiry countdowns started or extended",
        )?;
        let session_warnings = IntCounter::new(
            "session_warnings_total",
            "Session expiry warnings raised",
        )?;

        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(blocks.clone()))?;
        registry.register(Box::new(session_renewals.clone()))?;
        registry.register(Box::new(session_warnings.clone()))?;

        Ok(Self {
            registry,
            decisions,
            blocks,
            session_renewals,
            session_warnings,
        })
    }

    pub(crate) fn record_decision(&self, outcome: &str) {
        self.decisions.with_label_values(&[outcome]).inc();
    }

    pub(crate) fn record_block(&self, source: &str) {
        self.blocks.with_label_values(&[source]).inc();
    }

    pub(crate) fn record_renewal(&self) {
        self.session_renewals.inc();
    }

    pub(crate) fn record_warning(&self) {
        self.session_warnings.inc();
    }

    /// Current count for a decision outcome.
    pub fn decisions(&self, outcome: &str) -> u64 {
        self.decisions.with_label_values(&[outcome]).get()
    }

    /// Current count of blocks from a source.
    pub fn blocks(&self, source: &str) -> u64 {
        self.blocks.with_label_values(&[source]).get()
    }

    pub fn session_renewals(&self) -> u64 {
        self.session_renewals.get()
    }

    pub fn session_warnings(&self) -> u64 {
        self.session_warnings.get()
    }

    /// Render all counters in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
