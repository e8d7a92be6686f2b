//! Circuit Breaker Pattern
//!
//! Prevents cascading failures by temporarily blocking requests to failing
//! dependencies. Implements the standard three-state pattern:
//! - Closed: Normal operation, requests pass through
//! - Open: Requests short-circuited after the failure window tripped
//! - HalfOpen: A single probe allowed after the cool-down
//!
//! Unlike a consecutive-failure breaker, tripping is decided over a sliding
//! window of recent calls: the circuit opens when the accumulated failure
//! weight reaches the threshold, or when the window is full and the failure
//! rate reaches the configured fraction. Rate-limit responses contribute at
//! half weight. Each failed probe doubles the cool-down up to a cap.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use helpdesk_rag_core::Transience;

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Clone, Debug)]
pub struct BreakerConfig {
    /// Failure weight within the window that opens the circuit
    pub failure_threshold: f32,
    /// Number of recent calls kept in the window
    pub window: usize,
    /// Failure rate that opens the circuit once the window is full
    pub failure_rate: f64,
    /// Initial cool-down before a probe is allowed
    pub cool_down: Duration,
    /// Cap on the doubled cool-down
    pub cool_down_max: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5.0,
            window: 20,
            failure_rate: 0.5,
            cool_down: Duration::from_secs(30),
            cool_down_max: Duration::from_secs(300),
        }
    }
}

#[derive(Default)]
struct BreakerCounters {
    total_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
    state_transitions: AtomicU64,
}

struct Inner {
    state: BreakerState,
    /// Failure weight of each recent call, 0.0 for successes
    window: VecDeque<f32>,
    /// Current cool-down, doubled on each failed probe
    cool_down: Duration,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Admission decision for a prospective call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Allowed,
    Rejected { retry_after: Option<Duration> },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Windowed three-state circuit breaker
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    counters: BreakerCounters,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let cool_down = config.cool_down;
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                cool_down,
                opened_at: None,
                probe_in_flight: false,
            }),
            counters: BreakerCounters::default(),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, BreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Ask whether a call may proceed. A call admitted here MUST be
    /// reported back through [`record_success`](Self::record_success) or
    /// [`record_outcome`](Self::record_outcome).
    pub fn try_acquire(&self) -> Admission {
        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= inner.cool_down {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.probe_in_flight = true;
                    Admission::Allowed
                } else {
                    self.counters.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    Admission::Rejected {
                        retry_after: Some(inner.cool_down - elapsed),
                    }
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    self.counters.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    Admission::Rejected { retry_after: None }
                } else {
                    inner.probe_in_flight = true;
                    Admission::Allowed
                }
            }
        }
    }

    /// Report a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.probe_in_flight = false;
                self.transition(&mut inner, BreakerState::Closed);
            }
            _ => self.push_weight(&mut inner, 0.0),
        }
    }

    /// Report a completed call with its failure weight. Zero-weight
    /// outcomes (caller errors) never trip the circuit.
    pub fn record_outcome(&self, weight: f32) {
        if weight <= 0.0 {
            self.record_success();
            return;
        }
        self.counters.failed_calls.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                // Failed probe: reopen and back off harder
                inner.probe_in_flight = false;
                inner.cool_down = (inner.cool_down * 2).min(self.config.cool_down_max);
                self.transition(&mut inner, BreakerState::Open);
            }
            BreakerState::Closed => {
                self.push_weight(&mut inner, weight);
                let weight_sum: f32 = inner.window.iter().sum();
                let len = inner.window.len();
                let rate = weight_sum as f64 / len.max(1) as f64;
                if weight_sum >= self.config.failure_threshold
                    || (len >= self.config.window && rate >= self.config.failure_rate)
                {
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Run an operation through the breaker, classifying failures via
    /// [`Transience`].
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transience,
    {
        match self.try_acquire() {
            Admission::Rejected { retry_after } => Err(BreakerError::Open {
                name: self.name.clone(),
                retry_after,
            }),
            Admission::Allowed => match operation().await {
                Ok(value) => {
                    self.record_success();
                    Ok(value)
                }
                Err(e) => {
                    self.record_outcome(e.failure_weight());
                    Err(BreakerError::Failed(e))
                }
            },
        }
    }

    /// Manually reset to closed
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;
        self.transition(&mut inner, BreakerState::Closed);
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            window_failure_weight: inner.window.iter().sum(),
            window_calls: inner.window.len(),
            cool_down_ms: inner.cool_down.as_millis() as u64,
            total_calls: self.counters.total_calls.load(Ordering::Relaxed),
            failed_calls: self.counters.failed_calls.load(Ordering::Relaxed),
            rejected_calls: self.counters.rejected_calls.load(Ordering::Relaxed),
            state_transitions: self.counters.state_transitions.load(Ordering::Relaxed),
        }
    }

    fn push_weight(&self, inner: &mut Inner, weight: f32) {
        inner.window.push_back(weight);
        while inner.window.len() > self.config.window {
            inner.window.pop_front();
        }
    }

    fn transition(&self, inner: &mut Inner, new_state: BreakerState) {
        if inner.state == new_state {
            return;
        }
        let old_state = inner.state;
        inner.state = new_state;
        self.counters.state_transitions.fetch_add(1, Ordering::Relaxed);

        match new_state {
            BreakerState::Closed => {
                inner.window.clear();
                inner.opened_at = None;
                inner.cool_down = self.config.cool_down;
                info!(circuit = %self.name, from = %old_state, "circuit closed");
            }
            BreakerState::Open => {
                inner.opened_at = Some(Instant::now());
                warn!(
                    circuit = %self.name,
                    from = %old_state,
                    cool_down_ms = %inner.cool_down.as_millis(),
                    "circuit open"
                );
            }
            BreakerState::HalfOpen => {
                info!(circuit = %self.name, "circuit half-open, probing");
            }
        }
    }
}

/// Error from a breaker-guarded call
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit '{name}' is open")]
    Open {
        name: String,
        retry_after: Option<Duration>,
    },

    #[error(transparent)]
    Failed(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BreakerError::Open { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Status snapshot for observability endpoints
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: BreakerState,
    pub window_failure_weight: f32,
    pub window_calls: usize,
    pub cool_down_ms: u64,
    pub total_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub state_transitions: u64,
}

/// Registry holding one breaker per dependency (each source, plus the LLM)
pub struct BreakerRegistry {
    breakers: dashmap::DashMap<String, std::sync::Arc<CircuitBreaker>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: dashmap::DashMap::new(),
            config,
        }
    }

    pub fn get_or_create(&self, name: &str) -> std::sync::Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(name) {
            return breaker.clone();
        }
        let breaker = std::sync::Arc::new(CircuitBreaker::new(name, self.config.clone()));
        self.breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|r| r.clone())
    }

    pub fn all_status(&self) -> Vec<BreakerStatus> {
        let mut status: Vec<BreakerStatus> = self.breakers.iter().map(|r| r.status()).collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }
}
