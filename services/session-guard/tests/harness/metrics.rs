// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Outcome collection for attack simulations.

use std::collections::HashMap;
use std::time::Duration;

use session_guard::throttle::ThrottleDecision;

/// Possible outcomes for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Allowed,
    Cooldown,
    Blocked,
    Invalid,
}

impl From<ThrottleDecision> for Outcome {
    fn from(decision: ThrottleDecision) -> Self {
        match decision {
            ThrottleDecision::Allowed => Self::Allowed,
            ThrottleDecision::Cooldown => Self::Cooldown,
            ThrottleDecision::Blocked => Self::Blocked,
            ThrottleDecision::Invalid => Self::Invalid,
        }
    }
}

/// Collects outcomes during a simulation.
#[derive(Debug, Default)]
pub struct AttackMetrics {
    outcomes: HashMap<Outcome, usize>,
    attempts_per_action: HashMap<String, usize>,
    server_blocks: usize,
    simulated: Duration,
}

impl AttackMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: Outcome, action_id: &str) {
        *self.outcomes.entry(outcome).or_insert(0) += 1;
        *self
            .attempts_per_action
            .entry(action_id.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_server_block(&mut self) {
        self.server_blocks += 1;
    }

    pub fn advance(&mut self, by: Duration) {
        self.simulated += by;
    }

    pub fn total_attempts(&self) -> usize {
        self.outcomes.values().sum()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    pub fn unique_actions(&self) -> usize {
        self.attempts_per_action.len()
    }

    /// Ratio of denied attempts to total.
    pub fn block_rate(&self) -> f64 {
        let total = self.total_attempts();
        if total == 0 {
            return 0.0;
        }
        (total - self.count(Outcome::Allowed)) as f64 / total as f64
    }

    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            total_attempts: self.total_attempts(),
            allowed: self.count(Outcome::Allowed),
            cooldown: self.count(Outcome::Cooldown),
            blocked: self.count(Outcome::Blocked),
            server_blocks: self.server_blocks,
            simulated_ms: self.simulated.as_millis() as u64,
            block_rate: self.block_rate(),
            unique_actions: self.unique_actions(),
        }
    }
}

/// Summary of a simulation.
#[derive(Debug, Clone)]
pub struct MetricsReport {
    pub total_attempts: usize,
    pub allowed: usize,
    pub cooldown: usize,
    pub blocked: usize,
    pub server_blocks: usize,
    pub simulated_ms: u64,
    pub block_rate: f64,
    pub unique_actions: usize,
}

impl std::fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Attack Simulation Report ===")?;
        writeln!(f, "Simulated time:    {} ms", self.simulated_ms)?;
        writeln!(f, "Total Attempts:    {}", self.total_attempts)?;
        writeln!(f)?;
        writeln!(f, "--- Outcomes ---")?;
        writeln!(f, "Allowed:           {}", self.allowed)?;
        writeln!(f, "Cooldown:          {}", self.cooldown)?;
        writeln!(f, "Blocked:           {}", self.blocked)?;
        writeln!(f, "Server Blocks:     {}", self.server_blocks)?;
        writeln!(f, "Block Rate:        {:.1}%", self.block_rate * 100.0)?;
        writeln!(f, "Unique Actions:    {}", self.unique_actions)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_rate() {
        let mut metrics = AttackMetrics::new();
        for _ in 0..3 {
            metrics.record(Outcome::Allowed, "login-submit");
        }
        for _ in 0..7 {
            metrics.record(Outcome::Cooldown, "login-submit");
        }

        assert_eq!(metrics.total_attempts(), 10);
        assert_eq!(metrics.unique_actions(), 1);
        assert!((metrics.block_rate() - 0.7).abs() < 0.01);
    }
}
