//! Backpressure handler and circuit breaker: derives a load level from
//! utilization signals, sheds requests by priority, and opens a rolling
//! error-rate breaker under sustained failure. An ordinal load level is
//! derived from a composed queue/processing utilization signal against a
//! fixed threshold ladder.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::model::Priority;

/* ============================= LOAD LEVEL ============================= */

/// Monotonic pressure state (: "normal < elevated < high <
/// critical").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadLevel {
    Normal,
    Elevated,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadThresholds {
    pub elevated: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for LoadThresholds {
    fn default() -> Self {
        Self { elevated: 0.6, high: 0.8, critical: 0.95 }
    }
}

impl LoadThresholds {
    /// `max(queueUtilization, processingUtilization, cpu%?, mem%?)`
    /// composed into a load level.
    pub fn classify(&self, signal: f64) -> LoadLevel {
        if signal >= self.critical {
            LoadLevel::Critical
        } else if signal >= self.high {
            LoadLevel::High
        } else if signal >= self.elevated {
            LoadLevel::Elevated
        } else {
            LoadLevel::Normal
        }
    }
}

/* ============================= ADMISSION ============================= */

/// `{normal, elevated, high, critical}` admission rules per incoming
/// priority. `rng` is injected so shedding is testable.
pub fn admit(level: LoadLevel, priority: Priority, shed_priorities: &[Priority], signal: f64, rng: &mut impl Rng) -> Result<(), GatewayError> {
    match level {
        LoadLevel::Normal | LoadLevel::Elevated => Ok(()),
        LoadLevel::High => {
            if shed_priorities.contains(&priority) {
                let shed_probability = ((signal - 0.8) / 0.2).clamp(0.0, 1.0);
                if rng.gen_bool(shed_probability) {
                    return Err(GatewayError::LoadShed("high load".to_string()));
                }
            }
            Ok(())
        }
        LoadLevel::Critical => {
            if priority == Priority::Critical {
                Ok(())
            } else {
                Err(GatewayError::LoadShed("load critical".to_string()))
            }
        }
    }
}

/* ============================= CIRCUIT BREAKER ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Rolling-window error-rate gate. `window` outcomes are kept;
/// once the failure rate exceeds `threshold` the breaker opens for
/// `cool_down`, then half-opens to admit a probe batch.
pub struct CircuitBreaker {
    window: usize,
    threshold: f64,
    cool_down: Duration,
    probe_batch: usize,
    inner: Mutex<BreakerInner>,
}

struct BreakerInner {
    outcomes: VecDeque<bool>,
    state: BreakerState,
    opened_at: Option<Instant>,
    probes_remaining: usize,
}

impl CircuitBreaker {
    pub fn new(window: usize, threshold: f64, cool_down: Duration, probe_batch: usize) -> Self {
        Self {
            window,
            threshold,
            cool_down,
            probe_batch,
            inner: Mutex::new(BreakerInner { outcomes: VecDeque::new(), state: BreakerState::Closed, opened_at: None, probes_remaining: 0 }),
        }
    }

    /// Whether a non-critical request may proceed right now.
    /// Critical-priority requests bypass the breaker entirely, matching
    /// the backpressure critical-admission rule.
    pub fn allow_at(&self, priority: Priority, now: Instant) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if priority == Priority::Critical {
            return true;
        }
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if inner.opened_at.is_some_and(|t| now.duration_since(t) >= self.cool_down) {
                    inner.state = BreakerState::HalfOpen;
                    inner.probes_remaining = self.probe_batch;
                    crate::metrics::CIRCUIT_STATE.set(0);
                    inner.probes_remaining > 0
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probes_remaining > 0 {
                    inner.probes_remaining -= 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn allow(&self, priority: Priority) -> bool {
        self.allow_at(priority, Instant::now())
    }

    /// Records one outcome and re-evaluates the breaker's state.
    pub fn record(&self, success: bool) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::HalfOpen => {
                if success {
                    inner.state = BreakerState::Closed;
                    inner.outcomes.clear();
                    crate::metrics::CIRCUIT_STATE.set(0);
                } else {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    crate::metrics::CIRCUIT_STATE.set(1);
                }
                return;
            }
            BreakerState::Open => return,
            BreakerState::Closed => {}
        }

        inner.outcomes.push_back(success);
        if inner.outcomes.len() > self.window {
            inner.outcomes.pop_front();
        }
        if inner.outcomes.len() < self.window {
            return;
        }
        let failures = inner.outcomes.iter().filter(|o| !**o).count();
        let failure_rate = failures as f64 / inner.outcomes.len() as f64;
        if failure_rate > self.threshold {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            crate::metrics::CIRCUIT_STATE.set(1);
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.inner.lock().expect("breaker lock poisoned").state, BreakerState::Open)
    }

    /// Failure rate over the current rolling window (0.0 with no recorded
    /// outcomes yet), for feeding the scheduler's autoscaling signal.
    pub fn recent_failure_rate(&self) -> f64 {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.outcomes.is_empty() {
            return 0.0;
        }
        let failures = inner.outcomes.iter().filter(|o| !**o).count();
        failures as f64 / inner.outcomes.len() as f64
    }
}
